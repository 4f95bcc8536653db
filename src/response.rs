//! HTTP response with a lazily-decoding body.

use std::io::Read;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::version::HttpVersion;

/// Parsed status line plus headers.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: HttpVersion,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

/// Response body: the raw wire bytes behind an optional decompressing
/// decorator. Decoding happens on read, not on receipt.
#[derive(Debug, Clone)]
pub enum Body {
    Plain(Bytes),
    Gzip(Bytes),
    Deflate(Bytes),
}

impl Body {
    /// The undecoded wire bytes.
    pub fn raw(&self) -> &Bytes {
        match self {
            Self::Plain(b) | Self::Gzip(b) | Self::Deflate(b) => b,
        }
    }

    /// The body after applying the negotiated content coding.
    pub fn bytes(&self) -> Result<Bytes> {
        match self {
            Self::Plain(b) => Ok(b.clone()),
            Self::Gzip(b) => decode_gzip(b),
            Self::Deflate(b) => decode_deflate(b),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raw().is_empty()
    }
}

/// HTTP response as returned by the execution chain.
#[derive(Debug)]
pub struct Response {
    head: ResponseHead,
    body: Body,
}

impl Response {
    pub fn new(head: ResponseHead, body: Bytes) -> Self {
        Self {
            head,
            body: Body::Plain(body),
        }
    }

    pub fn status(&self) -> u16 {
        self.head.status
    }

    pub fn reason(&self) -> &str {
        &self.head.reason
    }

    pub fn version(&self) -> HttpVersion {
        self.head.version
    }

    pub fn headers(&self) -> &Headers {
        &self.head.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub(crate) fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.head.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.head.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.head.headers.first("Content-Type")
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.head.headers.first("Content-Encoding")
    }

    /// The decoded body bytes.
    pub fn bytes(&self) -> Result<Bytes> {
        self.body.bytes()
    }

    /// The decoded body as UTF-8 text.
    pub fn text(&self) -> Result<String> {
        let decoded = self.bytes()?;
        String::from_utf8(decoded.to_vec())
            .map_err(|e| Error::Decompression(format!("UTF-8 decode error: {}", e)))
    }

    /// Deserialize the decoded body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let text = self.text()?;
        serde_json::from_str(&text).map_err(Error::from)
    }
}

fn decode_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("gzip: {}", e)))?;
    Ok(Bytes::from(decoded))
}

fn decode_deflate(data: &[u8]) -> Result<Bytes> {
    // Some servers send raw deflate streams without the zlib wrapper.
    let mut decoded = Vec::new();
    if flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut decoded)
        .is_ok()
    {
        return Ok(Bytes::from(decoded));
    }
    decoded.clear();
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::Decompression(format!("deflate: {}", e)))?;
    Ok(Bytes::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn head(status: u16) -> ResponseHead {
        ResponseHead {
            version: HttpVersion::Http11,
            status,
            reason: "OK".to_string(),
            headers: Headers::new(),
        }
    }

    #[test]
    fn test_plain_body_passthrough() {
        let resp = Response::new(head(200), Bytes::from_static(b"hello"));
        assert_eq!(resp.bytes().unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(resp.text().unwrap(), "hello");
        assert!(resp.is_success());
    }

    #[test]
    fn test_gzip_body_decoded_lazily() {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"encoded stuff").unwrap();
        let compressed = enc.finish().unwrap();

        let mut resp = Response::new(head(200), Bytes::from(compressed.clone()));
        resp.set_body(Body::Gzip(Bytes::from(compressed)));
        assert_eq!(resp.text().unwrap(), "encoded stuff");
    }

    #[test]
    fn test_deflate_zlib_and_raw() {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"zlib stuff").unwrap();
        let zlib = enc.finish().unwrap();
        assert_eq!(
            Body::Deflate(Bytes::from(zlib)).bytes().unwrap(),
            Bytes::from_static(b"zlib stuff")
        );

        let mut enc =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"raw stuff").unwrap();
        let raw = enc.finish().unwrap();
        assert_eq!(
            Body::Deflate(Bytes::from(raw)).bytes().unwrap(),
            Bytes::from_static(b"raw stuff")
        );
    }

    #[test]
    fn test_corrupt_gzip_is_an_error() {
        let body = Body::Gzip(Bytes::from_static(b"not gzip at all"));
        assert!(matches!(body.bytes(), Err(Error::Decompression(_))));
    }

    #[test]
    fn test_json() {
        #[derive(serde::Deserialize)]
        struct Payload {
            ok: bool,
        }
        let resp = Response::new(head(200), Bytes::from_static(b"{\"ok\":true}"));
        let payload: Payload = resp.json().unwrap();
        assert!(payload.ok);
    }
}
