//! Request and response interceptors.
//!
//! The execution chain runs these in a fixed order around every exchange:
//! content-encoding advertisement and cookie generation on the way out,
//! cookie capture and content decoding on the way in. Each interceptor is
//! a no-op when the context lacks the state it needs.

use crate::context::ExecutionContext;
use crate::cookie::Cookie;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::{Body, Response};

/// Mutates the outgoing request before it is written to the wire.
pub trait RequestInterceptor: Send + Sync {
    fn process(&self, request: &mut Request, ctx: &mut ExecutionContext) -> Result<()>;
}

/// Inspects or rewrites the response before the chain acts on it.
pub trait ResponseInterceptor: Send + Sync {
    fn process(&self, response: &mut Response, ctx: &mut ExecutionContext) -> Result<()>;
}

/// Advertises the content codings the client can decode.
pub struct RequestAcceptEncoding;

impl RequestInterceptor for RequestAcceptEncoding {
    fn process(&self, request: &mut Request, _ctx: &mut ExecutionContext) -> Result<()> {
        if !request.headers.contains("Accept-Encoding") {
            request.headers.add("Accept-Encoding", "gzip,deflate");
        }
        Ok(())
    }
}

/// Generates the outbound `Cookie` header from the store.
pub struct RequestAddCookies;

impl RequestInterceptor for RequestAddCookies {
    fn process(&self, request: &mut Request, ctx: &mut ExecutionContext) -> Result<()> {
        let (Some(origin), Some(store)) = (&ctx.cookie_origin, &ctx.cookie_store) else {
            return Ok(());
        };
        let spec = &ctx.cookie_spec;

        let mut matched: Vec<Cookie> = store
            .cookies()
            .into_iter()
            .filter(|cookie| spec.matches(cookie, origin))
            .collect();
        if matched.is_empty() {
            request.headers.remove("Cookie");
            return Ok(());
        }
        // More specific paths first, so same-named cookies resolve
        // deterministically.
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()));

        request
            .headers
            .set("Cookie", spec.format_cookie_header(&matched));
        // Advertise RFC 2965 support when version-1 cookies are in play.
        if matched.iter().any(|c| c.version >= 1) {
            request.headers.set("Cookie2", "$Version=\"1\"");
        }
        Ok(())
    }
}

/// Captures `Set-Cookie`/`Set-Cookie2` headers into the store.
///
/// A malformed or rejected cookie drops only that header, never the
/// exchange. `Set-Cookie2` processes after `Set-Cookie`, so a version-1
/// cookie overrides a same-named version-0 one from the same response.
pub struct ResponseProcessCookies;

impl ResponseInterceptor for ResponseProcessCookies {
    fn process(&self, response: &mut Response, ctx: &mut ExecutionContext) -> Result<()> {
        let (Some(origin), Some(store)) = (&ctx.cookie_origin, &ctx.cookie_store) else {
            return Ok(());
        };
        let spec = &ctx.cookie_spec;

        for (header, version) in [("Set-Cookie", 0u8), ("Set-Cookie2", 1u8)] {
            for value in response.headers().all(header) {
                let cookies = match spec.parse(value, origin, version) {
                    Ok(cookies) => cookies,
                    Err(e) => {
                        tracing::warn!("invalid cookie header \"{}: {}\": {}", header, value, e);
                        continue;
                    }
                };
                for cookie in cookies {
                    match spec.validate(&cookie, origin) {
                        Ok(()) => {
                            tracing::debug!(cookie = %cookie, "cookie accepted");
                            store.add(cookie);
                        }
                        Err(e) => {
                            tracing::warn!(cookie = %cookie, "cookie rejected: {}", e);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Wraps the response body in a decompressing decorator per its declared
/// `Content-Encoding`.
pub struct ResponseContentEncoding;

impl ResponseInterceptor for ResponseContentEncoding {
    fn process(&self, response: &mut Response, _ctx: &mut ExecutionContext) -> Result<()> {
        let Some(declared) = response.content_encoding() else {
            return Ok(());
        };
        // Decoding an empty stream is a no-op, and some codecs reject it.
        if response.body().is_empty() {
            return Ok(());
        }

        let codings: Vec<String> = declared
            .split(',')
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty() && c != "identity")
            .collect();
        let coding = match codings.as_slice() {
            [] => return Ok(()),
            [coding] => coding.as_str(),
            _ => {
                return Err(Error::UnsupportedEncoding(declared.to_string()));
            }
        };

        let raw = response.body().raw().clone();
        match coding {
            "gzip" | "x-gzip" => response.set_body(Body::Gzip(raw)),
            "deflate" => response.set_body(Body::Deflate(raw)),
            _ => return Err(Error::UnsupportedEncoding(declared.to_string())),
        }
        Ok(())
    }
}
