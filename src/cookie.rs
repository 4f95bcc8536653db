//! Cookie model, origin matching and persistent store.
//!
//! Handles both Netscape-style `Set-Cookie` (version 0) and RFC 2965
//! `Set-Cookie2` (version 1) headers. Acceptance and outbound selection are
//! driven by the [`CookieOrigin`] of the request that produced or will
//! carry the cookies.

use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Error, Result};

/// A single HTTP cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lower-cased domain without a leading dot.
    pub domain: String,
    pub path: String,
    /// Absolute expiry; `None` marks a session cookie.
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
    /// 0 for Netscape-style cookies, 1 for `Set-Cookie2`.
    pub version: u8,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: "/".to_string(),
            expires: None,
            secure: false,
            version: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires, Some(expiry) if expiry <= now)
    }

    pub fn is_persistent(&self) -> bool {
        self.expires.is_some()
    }
}

impl std::fmt::Display for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// The request context cookies are validated against and selected for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOrigin {
    /// Lower-cased request host.
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Whether the request travels over a secure channel.
    pub secure: bool,
}

impl CookieOrigin {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>, secure: bool) -> Self {
        let path = path.into();
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
            path: if path.is_empty() { "/".to_string() } else { path },
            secure,
        }
    }
}

/// Ordered cookie store keyed by (name, domain, path).
///
/// Inserting a cookie with an existing key replaces it; expired cookies are
/// purged lazily on read. Reads may happen concurrently from multiple
/// executions, so the store synchronizes internally.
#[derive(Debug, Default)]
pub struct CookieStore {
    cookies: Mutex<Vec<Cookie>>,
}

impl CookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a cookie. An already-expired cookie only removes
    /// the entry it replaces.
    pub fn add(&self, cookie: Cookie) {
        let mut cookies = self.cookies.lock().expect("cookie store poisoned");
        cookies.retain(|c| {
            !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
        });
        if !cookie.is_expired(Utc::now()) {
            cookies.push(cookie);
        }
    }

    /// Snapshot of the live cookies, purging expired ones.
    pub fn cookies(&self) -> Vec<Cookie> {
        let now = Utc::now();
        let mut cookies = self.cookies.lock().expect("cookie store poisoned");
        cookies.retain(|c| !c.is_expired(now));
        cookies.clone()
    }

    pub fn clear(&self) {
        self.cookies.lock().expect("cookie store poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.cookies.lock().expect("cookie store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parsing, validation, matching and rendering rules for cookies.
///
/// One spec covers both header generations: `Set-Cookie` values parse as
/// version 0, `Set-Cookie2` values as version 1.
#[derive(Debug, Clone, Default)]
pub struct CookieSpec;

impl CookieSpec {
    pub fn new() -> Self {
        Self
    }

    /// Parse one `Set-Cookie`/`Set-Cookie2` header value into cookies.
    ///
    /// `version` is 0 for `Set-Cookie` and 1 for `Set-Cookie2`; version-1
    /// headers may carry several comma-separated cookies.
    pub fn parse(
        &self,
        header_value: &str,
        origin: &CookieOrigin,
        version: u8,
    ) -> Result<Vec<Cookie>> {
        let elements: Vec<&str> = if version >= 1 {
            split_unquoted(header_value, ',')
        } else {
            // Version-0 values are never comma-split: Expires dates contain
            // commas.
            vec![header_value]
        };
        let mut cookies = Vec::with_capacity(elements.len());
        for element in elements {
            cookies.push(self.parse_one(element, origin, version)?);
        }
        Ok(cookies)
    }

    fn parse_one(&self, element: &str, origin: &CookieOrigin, version: u8) -> Result<Cookie> {
        let mut parts = split_unquoted(element, ';').into_iter();
        let name_value = parts.next().unwrap_or("").trim();
        let (name, value) = name_value
            .split_once('=')
            .ok_or_else(|| Error::cookie(format!("missing name=value: {}", element)))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::cookie("empty cookie name"));
        }

        let mut cookie = Cookie::new(name, unquote(value.trim()));
        cookie.version = version;
        cookie.domain = origin.host.clone();
        cookie.path = default_path(origin);

        for attr in parts {
            let attr = attr.trim();
            if attr.is_empty() {
                continue;
            }
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim().to_ascii_lowercase(), unquote(v.trim())),
                None => (attr.to_ascii_lowercase(), String::new()),
            };
            match key.as_str() {
                "domain" => {
                    if val.is_empty() {
                        return Err(Error::cookie("blank domain attribute"));
                    }
                    cookie.domain = normalize_domain(&val);
                }
                "path" => {
                    if !val.is_empty() {
                        cookie.path = val;
                    }
                }
                "secure" => cookie.secure = true,
                "max-age" => {
                    let seconds: i64 = val
                        .parse()
                        .map_err(|_| Error::cookie(format!("invalid max-age: {}", val)))?;
                    cookie.expires = Some(Utc::now() + chrono::Duration::seconds(seconds.max(0)));
                }
                "expires" if version == 0 => {
                    cookie.expires = parse_cookie_date(&val);
                }
                "version" => {
                    let v: u8 = val
                        .parse()
                        .map_err(|_| Error::cookie(format!("invalid version: {}", val)))?;
                    cookie.version = v;
                }
                // Comment, CommentURL, Port, Discard and unknown attributes
                // carry no matching semantics here.
                _ => {}
            }
        }
        Ok(cookie)
    }

    /// Validate a parsed cookie against the origin that supplied it.
    pub fn validate(&self, cookie: &Cookie, origin: &CookieOrigin) -> Result<()> {
        if cookie.domain.is_empty() {
            return Err(Error::cookie("cookie has no domain"));
        }
        if !domain_match(&cookie.domain, &origin.host) {
            return Err(Error::cookie(format!(
                "illegal domain attribute \"{}\" for host \"{}\"",
                cookie.domain, origin.host
            )));
        }
        // Reject cookies scoped to a bare public suffix, e.g. Domain=com.
        if cookie.domain != origin.host && !cookie.domain.contains('.') {
            return Err(Error::cookie(format!(
                "domain attribute \"{}\" is too general",
                cookie.domain
            )));
        }
        if !path_match(&origin.path, &cookie.path) {
            return Err(Error::cookie(format!(
                "illegal path attribute \"{}\" for request path \"{}\"",
                cookie.path, origin.path
            )));
        }
        Ok(())
    }

    /// Whether a stored cookie should be sent for the given origin.
    pub fn matches(&self, cookie: &Cookie, origin: &CookieOrigin) -> bool {
        if cookie.secure && !origin.secure {
            return false;
        }
        domain_match(&cookie.domain, &origin.host) && path_match(&origin.path, &cookie.path)
    }

    /// Render matched cookies into a single `Cookie` header value.
    ///
    /// Callers pass cookies sorted most-specific-path first.
    pub fn format_cookie_header(&self, cookies: &[Cookie]) -> String {
        cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Default path: the request path up to, but not including, its last slash.
fn default_path(origin: &CookieOrigin) -> String {
    match origin.path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => origin.path[..idx].to_string(),
    }
}

fn normalize_domain(domain: &str) -> String {
    domain
        .strip_prefix('.')
        .unwrap_or(domain)
        .to_ascii_lowercase()
}

/// Suffix match with a dot boundary: `host` equals `domain` or ends with
/// `.domain`.
fn domain_match(domain: &str, host: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Prefix match with a segment boundary: the request path is inside the
/// cookie path.
fn path_match(request_path: &str, cookie_path: &str) -> bool {
    let cookie_path = cookie_path.trim_end_matches('/');
    if cookie_path.is_empty() {
        return true;
    }
    request_path == cookie_path
        || request_path
            .strip_prefix(cookie_path)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

/// Split on `sep` outside of double quotes.
fn split_unquoted(value: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (idx, ch) in value.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            c if c == sep && !quoted => {
                parts.push(&value[start..idx]);
                start = idx + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    const FORMATS: [&str; 3] = [
        "%a, %d %b %Y %H:%M:%S GMT",
        "%a, %d-%b-%y %H:%M:%S GMT",
        "%a, %d-%b-%Y %H:%M:%S GMT",
    ];
    for fmt in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}
