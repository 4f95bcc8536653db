//! RFC 7616 Digest authentication scheme.
//!
//! Supports MD5 and SHA-256 (plus their `-sess` variants) with `qop=auth`,
//! and the RFC 2069 compatibility form when the challenge offers no qop.

use md5::Md5;
use sha2::{Digest as _, Sha256};

use crate::auth::{AuthScheme, Challenge, Credentials};
use crate::error::{Error, Result};
use crate::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl Algorithm {
    fn parse(value: Option<&str>) -> Result<Self> {
        match value.map(str::to_ascii_uppercase).as_deref() {
            None | Some("MD5") => Ok(Self::Md5),
            Some("MD5-SESS") => Ok(Self::Md5Sess),
            Some("SHA-256") => Ok(Self::Sha256),
            Some("SHA-256-SESS") => Ok(Self::Sha256Sess),
            Some(other) => Err(Error::auth(format!("unsupported digest algorithm: {}", other))),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn hash(&self, data: &str) -> String {
        match self {
            Self::Md5 | Self::Md5Sess => hex::encode(Md5::digest(data.as_bytes())),
            Self::Sha256 | Self::Sha256Sess => hex::encode(Sha256::digest(data.as_bytes())),
        }
    }
}

/// Digest access authentication.
#[derive(Debug, Default)]
pub struct DigestScheme {
    realm: Option<String>,
    nonce: Option<String>,
    opaque: Option<String>,
    qop: Option<String>,
    algorithm: Option<String>,
    cnonce: Option<String>,
    nc: u32,
    complete: bool,
}

impl DigestScheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the client nonce instead of generating one. Intended for tests
    /// against known RFC vectors.
    pub fn override_cnonce(&mut self, cnonce: impl Into<String>) {
        self.cnonce = Some(cnonce.into());
    }

    fn cnonce(&mut self) -> Result<String> {
        if let Some(cnonce) = &self.cnonce {
            return Ok(cnonce.clone());
        }
        let mut raw = [0u8; 8];
        getrandom::getrandom(&mut raw)
            .map_err(|e| Error::auth(format!("cannot generate cnonce: {}", e)))?;
        let cnonce = hex::encode(raw);
        self.cnonce = Some(cnonce.clone());
        Ok(cnonce)
    }
}

impl AuthScheme for DigestScheme {
    fn name(&self) -> &str {
        "digest"
    }

    fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    fn process_challenge(&mut self, challenge: &Challenge) -> Result<()> {
        let nonce = challenge
            .param("nonce")
            .ok_or_else(|| Error::auth("digest challenge without nonce"))?;
        // A new nonce restarts the request counter.
        if self.nonce.as_deref() != Some(nonce) {
            self.nc = 0;
            self.cnonce = None;
        }
        self.nonce = Some(nonce.to_string());
        self.realm = challenge.param("realm").map(str::to_string);
        self.opaque = challenge.param("opaque").map(str::to_string);
        self.qop = challenge.param("qop").map(str::to_string);
        self.algorithm = challenge.param("algorithm").map(str::to_string);
        Algorithm::parse(self.algorithm.as_deref())?;
        self.complete = true;
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn is_connection_based(&self) -> bool {
        false
    }

    fn authenticate(&mut self, credentials: &Credentials, request: &Request) -> Result<String> {
        let algorithm = Algorithm::parse(self.algorithm.as_deref())?;
        let realm = self.realm.clone().unwrap_or_default();
        let nonce = self
            .nonce
            .clone()
            .ok_or_else(|| Error::auth("digest scheme was not challenged"))?;
        let uri = request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();

        // Prefer "auth" when offered; fall back to the RFC 2069 form.
        let qop = self
            .qop
            .as_deref()
            .and_then(|offered| {
                offered
                    .split(',')
                    .map(str::trim)
                    .find(|q| q.eq_ignore_ascii_case("auth"))
            })
            .map(str::to_string);

        let a1 = format!("{}:{}:{}", credentials.username, realm, credentials.password);
        let mut ha1 = algorithm.hash(&a1);
        let cnonce = self.cnonce()?;
        if algorithm.is_session() {
            ha1 = algorithm.hash(&format!("{}:{}:{}", ha1, nonce, cnonce));
        }
        let ha2 = algorithm.hash(&format!("{}:{}", request.method.as_str(), uri));

        self.nc += 1;
        let nc = format!("{:08x}", self.nc);
        let response = match &qop {
            Some(qop) => {
                algorithm.hash(&format!("{}:{}:{}:{}:{}:{}", ha1, nonce, nc, cnonce, qop, ha2))
            }
            None => algorithm.hash(&format!("{}:{}:{}", ha1, nonce, ha2)),
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
            credentials.username, realm, nonce, uri, response, algorithm.label()
        );
        if let Some(qop) = &qop {
            header.push_str(&format!(", qop={}, nc={}, cnonce=\"{}\"", qop, nc, cnonce));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::parse_challenges;

    #[test]
    fn test_rfc2617_vector() {
        // The worked example from RFC 2617 Section 3.5.
        let mut scheme = DigestScheme::new();
        let challenges = parse_challenges(&[concat!(
            "Digest realm=\"testrealm@host.com\", qop=\"auth\", ",
            "nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", ",
            "opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""
        )]);
        scheme.process_challenge(&challenges[0]).unwrap();
        scheme.override_cnonce("0a4f113b");

        let request = Request::get("http://www.example.org/dir/index.html").unwrap();
        let creds = Credentials::new("Mufasa", "Circle Of Life");
        let header = scheme.authenticate(&creds, &request).unwrap();

        assert!(header.contains("response=\"6629fae49393a05397450978507c4ef1\""));
        assert!(header.contains("nc=00000001"));
        assert!(header.contains("uri=\"/dir/index.html\""));
        assert!(header.contains("opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""));
    }

    #[test]
    fn test_nc_increments_per_request() {
        let mut scheme = DigestScheme::new();
        let challenges =
            parse_challenges(&["Digest realm=\"r\", nonce=\"n\", qop=\"auth\""]);
        scheme.process_challenge(&challenges[0]).unwrap();
        let request = Request::get("http://h/").unwrap();
        let creds = Credentials::new("u", "p");
        let first = scheme.authenticate(&creds, &request).unwrap();
        let second = scheme.authenticate(&creds, &request).unwrap();
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
    }

    #[test]
    fn test_missing_nonce_is_rejected() {
        let mut scheme = DigestScheme::new();
        let challenges = parse_challenges(&["Digest realm=\"r\""]);
        assert!(scheme.process_challenge(&challenges[0]).is_err());
        assert!(!scheme.is_complete());
    }

    #[test]
    fn test_unsupported_algorithm_is_rejected() {
        let mut scheme = DigestScheme::new();
        let challenges =
            parse_challenges(&["Digest realm=\"r\", nonce=\"n\", algorithm=TIGER"]);
        assert!(scheme.process_challenge(&challenges[0]).is_err());
    }

    #[test]
    fn test_rfc2069_compat_without_qop() {
        let mut scheme = DigestScheme::new();
        let challenges = parse_challenges(&["Digest realm=\"r\", nonce=\"n\""]);
        scheme.process_challenge(&challenges[0]).unwrap();
        let header = scheme
            .authenticate(
                &Credentials::new("u", "p"),
                &Request::get("http://h/x").unwrap(),
            )
            .unwrap();
        assert!(!header.contains("qop="));
        assert!(!header.contains("cnonce="));
    }
}
