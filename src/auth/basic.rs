//! RFC 7617 Basic authentication scheme.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::auth::{AuthScheme, Challenge, Credentials};
use crate::error::Result;
use crate::request::Request;

/// Basic access authentication: a single round of base64-encoded
/// credentials.
#[derive(Debug, Default)]
pub struct BasicScheme {
    realm: Option<String>,
    complete: bool,
}

impl BasicScheme {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuthScheme for BasicScheme {
    fn name(&self) -> &str {
        "basic"
    }

    fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    fn process_challenge(&mut self, challenge: &Challenge) -> Result<()> {
        self.realm = challenge.param("realm").map(str::to_string);
        self.complete = true;
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn is_connection_based(&self) -> bool {
        false
    }

    fn authenticate(&mut self, credentials: &Credentials, _request: &Request) -> Result<String> {
        let plain = format!("{}:{}", credentials.username, credentials.password);
        Ok(format!("Basic {}", BASE64.encode(plain)))
    }
}
