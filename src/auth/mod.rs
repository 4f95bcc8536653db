//! Authentication: credential lookup, challenge parsing and the
//! per-execution exchange state machine.
//!
//! Scheme cryptography stays behind the [`AuthScheme`] trait; the exchange
//! only needs "produce a challenge-response header given credentials and a
//! server challenge". Basic and Digest ship with the crate; Negotiate and
//! NTLM slots exist in the preference order for externally registered
//! schemes.

pub mod basic;
pub mod digest;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::request::Request;
use crate::route::HttpHost;

pub use basic::BasicScheme;
pub use digest::DigestScheme;

/// Username/password credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Credential lookup key with wildcard fields.
///
/// `None` fields match anything; lookups prefer the most specific stored
/// scope using weighted scoring (host over port over realm over scheme).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthScope {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub realm: Option<String>,
    pub scheme: Option<String>,
}

impl AuthScope {
    /// Matches any challenge.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn host(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into().to_ascii_lowercase()),
            port: Some(port),
            realm: None,
            scheme: None,
        }
    }

    pub fn realm(realm: impl Into<String>) -> Self {
        Self {
            host: None,
            port: None,
            realm: Some(realm.into()),
            scheme: None,
        }
    }

    /// Score this stored scope against a concrete lookup scope. Returns
    /// `None` when a set field disagrees, otherwise a weight where more
    /// specific matches score higher.
    fn match_score(&self, target: &AuthScope) -> Option<i32> {
        let mut score = 0;
        score += field_score(&self.scheme, &target.scheme, 1)?;
        score += field_score(&self.realm, &target.realm, 2)?;
        score += field_score(&self.port, &target.port, 4)?;
        score += field_score(&self.host, &target.host, 8)?;
        Some(score)
    }
}

fn field_score<T: PartialEq>(stored: &Option<T>, target: &Option<T>, weight: i32) -> Option<i32> {
    match (stored, target) {
        (Some(s), Some(t)) if s == t => Some(weight),
        (Some(_), _) => None,
        (None, _) => Some(0),
    }
}

/// Looks up credentials for an authentication scope.
pub trait CredentialsProvider: Send + Sync {
    fn credentials(&self, scope: &AuthScope) -> Option<Credentials>;
}

/// In-memory credentials provider with most-specific-match lookup.
#[derive(Debug, Default)]
pub struct BasicCredentialsProvider {
    entries: Mutex<Vec<(AuthScope, Credentials)>>,
}

impl BasicCredentialsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, scope: AuthScope, credentials: Credentials) {
        self.entries
            .lock()
            .expect("credentials provider poisoned")
            .push((scope, credentials));
    }
}

impl CredentialsProvider for BasicCredentialsProvider {
    fn credentials(&self, scope: &AuthScope) -> Option<Credentials> {
        let entries = self.entries.lock().expect("credentials provider poisoned");
        entries
            .iter()
            .filter_map(|(stored, creds)| stored.match_score(scope).map(|s| (s, creds)))
            .max_by_key(|(score, _)| *score)
            .map(|(_, creds)| creds.clone())
    }
}

/// A parsed `WWW-Authenticate`/`Proxy-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Lower-cased scheme name.
    pub scheme: String,
    /// Parameters keyed by lower-cased name, quotes stripped.
    pub params: HashMap<String, String>,
    /// The raw header value, for repeat-challenge detection.
    pub raw: String,
}

impl Challenge {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Parse challenge header values, one challenge per header.
///
/// Headers that do not carry a scheme token are skipped.
pub fn parse_challenges(values: &[&str]) -> Vec<Challenge> {
    let mut challenges = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let (scheme, rest) = match value.split_once(char::is_whitespace) {
            Some((scheme, rest)) => (scheme, rest),
            None => (value, ""),
        };
        let mut params = HashMap::new();
        for part in rest.split(',') {
            if let Some((key, val)) = part.trim().split_once('=') {
                params.insert(
                    key.trim().to_ascii_lowercase(),
                    val.trim().trim_matches('"').to_string(),
                );
            }
        }
        challenges.push(Challenge {
            scheme: scheme.to_ascii_lowercase(),
            params,
            raw: value.to_string(),
        });
    }
    challenges
}

/// An authentication scheme's capability set.
pub trait AuthScheme: Send + Sync {
    /// Lower-cased scheme name as it appears in challenges.
    fn name(&self) -> &str;

    /// Realm from the most recent challenge, if any.
    fn realm(&self) -> Option<&str>;

    /// Feed the scheme a server challenge.
    fn process_challenge(&mut self, challenge: &Challenge) -> Result<()>;

    /// Whether the exchange needs no further challenge rounds.
    fn is_complete(&self) -> bool;

    /// Whether the scheme authenticates the connection rather than the
    /// request (NTLM-style); such exchanges must stay on one connection.
    fn is_connection_based(&self) -> bool;

    /// Produce the `Authorization`/`Proxy-Authorization` header value.
    fn authenticate(&mut self, credentials: &Credentials, request: &Request) -> Result<String>;
}

type SchemeFactory = Box<dyn Fn() -> Box<dyn AuthScheme> + Send + Sync>;

/// Registry of scheme factories with a configurable preference order.
pub struct AuthSchemeRegistry {
    factories: HashMap<String, SchemeFactory>,
    preference: Vec<String>,
}

impl AuthSchemeRegistry {
    /// Registry with the built-in schemes and the default preference order
    /// `negotiate > ntlm > digest > basic`.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            preference: ["negotiate", "ntlm", "digest", "basic"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        registry.register("basic", || Box::new(BasicScheme::new()));
        registry.register("digest", || Box::new(DigestScheme::new()));
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn AuthScheme> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_ascii_lowercase(), Box::new(factory));
    }

    /// Override the scheme preference order, most preferred first.
    pub fn set_preference(&mut self, order: Vec<String>) {
        self.preference = order.into_iter().map(|s| s.to_ascii_lowercase()).collect();
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn AuthScheme>> {
        self.factories
            .get(&name.to_ascii_lowercase())
            .map(|factory| factory())
    }

    /// Challenge scheme names in preference order, unranked ones last.
    fn ranked<'a>(&self, challenges: &'a [Challenge]) -> Vec<&'a Challenge> {
        let mut ranked: Vec<&Challenge> = Vec::with_capacity(challenges.len());
        for name in &self.preference {
            if let Some(ch) = challenges.iter().find(|c| &c.scheme == name) {
                ranked.push(ch);
            }
        }
        for ch in challenges {
            if !self.preference.contains(&ch.scheme) {
                ranked.push(ch);
            }
        }
        ranked
    }
}

impl Default for AuthSchemeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Exchange progress across challenge rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChallengeState {
    #[default]
    Unchallenged,
    /// A challenge was seen and a scheme selected.
    Challenged,
    /// The selected scheme needs further message rounds.
    Handshake,
    Success,
    /// The scheme is exhausted or the credentials were rejected.
    Failure,
}

/// Per-execution authentication state for one side (target or proxy).
#[derive(Default)]
pub struct AuthExchange {
    state: ChallengeState,
    scheme: Option<Box<dyn AuthScheme>>,
    credentials: Option<Credentials>,
    last_challenge: Option<String>,
}

impl AuthExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ChallengeState {
        self.state
    }

    pub fn scheme(&self) -> Option<&dyn AuthScheme> {
        self.scheme.as_deref()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record that the server accepted the authenticated request.
    pub fn mark_success(&mut self) {
        if matches!(self.state, ChallengeState::Challenged | ChallengeState::Handshake) {
            self.state = ChallengeState::Success;
        }
    }

    /// Advance the exchange with a fresh set of challenges.
    ///
    /// Returns `true` when another request round is warranted. A server
    /// that repeats an unresolved challenge verbatim, offers no supported
    /// scheme, or names no scheme we hold credentials for moves the
    /// exchange to [`ChallengeState::Failure`].
    pub fn update(
        &mut self,
        challenges: &[Challenge],
        host: &HttpHost,
        registry: &AuthSchemeRegistry,
        credentials: &dyn CredentialsProvider,
    ) -> bool {
        if self.state == ChallengeState::Failure {
            return false;
        }
        if challenges.is_empty() {
            tracing::warn!("unauthorized response carried no challenges");
            self.state = ChallengeState::Failure;
            return false;
        }

        if let Some(scheme) = self.scheme.as_mut() {
            if let Some(challenge) = challenges.iter().find(|c| c.scheme == scheme.name()) {
                if self.last_challenge.as_deref() == Some(challenge.raw.as_str()) {
                    // The server is replaying the same challenge instead of
                    // progressing; authenticating again cannot succeed.
                    tracing::debug!(scheme = scheme.name(), "repeated identical challenge");
                    self.state = ChallengeState::Failure;
                    return false;
                }
                match scheme.process_challenge(challenge) {
                    Ok(()) => {
                        self.last_challenge = Some(challenge.raw.clone());
                        self.state = if scheme.is_complete() {
                            ChallengeState::Challenged
                        } else {
                            ChallengeState::Handshake
                        };
                        return true;
                    }
                    Err(e) => {
                        tracing::warn!(scheme = scheme.name(), "challenge rejected: {}", e);
                        self.state = ChallengeState::Failure;
                        return false;
                    }
                }
            }
            // The server abandoned the scheme mid-exchange; start over.
            self.scheme = None;
            self.credentials = None;
            self.last_challenge = None;
        }

        self.select_scheme(challenges, host, registry, credentials)
    }

    fn select_scheme(
        &mut self,
        challenges: &[Challenge],
        host: &HttpHost,
        registry: &AuthSchemeRegistry,
        credentials: &dyn CredentialsProvider,
    ) -> bool {
        for challenge in registry.ranked(challenges) {
            let Some(mut scheme) = registry.create(&challenge.scheme) else {
                tracing::debug!(scheme = %challenge.scheme, "no registered auth scheme");
                continue;
            };
            if let Err(e) = scheme.process_challenge(challenge) {
                tracing::warn!(scheme = %challenge.scheme, "malformed challenge: {}", e);
                continue;
            }
            let scope = AuthScope {
                host: Some(host.hostname.clone()),
                port: Some(host.port),
                realm: scheme.realm().map(str::to_string),
                scheme: Some(challenge.scheme.clone()),
            };
            let Some(creds) = credentials.credentials(&scope) else {
                tracing::debug!(scheme = %challenge.scheme, "no credentials for scope");
                continue;
            };
            tracing::debug!(scheme = %challenge.scheme, "selected authentication scheme");
            self.state = if scheme.is_complete() {
                ChallengeState::Challenged
            } else {
                ChallengeState::Handshake
            };
            self.last_challenge = Some(challenge.raw.clone());
            self.scheme = Some(scheme);
            self.credentials = Some(creds);
            return true;
        }
        tracing::warn!("unable to respond to any of the offered challenges");
        self.state = ChallengeState::Failure;
        false
    }

    /// Produce the authorization header value for the next round, if the
    /// exchange is in a state that calls for one.
    pub fn authorization_header(&mut self, request: &Request) -> Result<Option<String>> {
        if !matches!(
            self.state,
            ChallengeState::Challenged | ChallengeState::Handshake
        ) {
            return Ok(None);
        }
        match (self.scheme.as_mut(), self.credentials.as_ref()) {
            (Some(scheme), Some(creds)) => scheme.authenticate(creds, request).map(Some),
            _ => Ok(None),
        }
    }
}

impl std::fmt::Debug for AuthExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthExchange")
            .field("state", &self.state)
            .field("scheme", &self.scheme.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HttpHost {
        HttpHost::new("localhost", 80, false)
    }

    fn provider_with(scope: AuthScope) -> BasicCredentialsProvider {
        let provider = BasicCredentialsProvider::new();
        provider.set(scope, Credentials::new("test", "test"));
        provider
    }

    #[test]
    fn test_scope_specificity() {
        let provider = BasicCredentialsProvider::new();
        provider.set(AuthScope::any(), Credentials::new("any", "any"));
        provider.set(
            AuthScope::realm("test realm"),
            Credentials::new("realmuser", "pw"),
        );
        provider.set(AuthScope::host("localhost", 80), Credentials::new("hostuser", "pw"));

        let lookup = AuthScope {
            host: Some("localhost".to_string()),
            port: Some(80),
            realm: Some("test realm".to_string()),
            scheme: Some("basic".to_string()),
        };
        // host+port (12) outranks realm (2) and the full wildcard (0).
        assert_eq!(
            provider.credentials(&lookup).unwrap().username,
            "hostuser"
        );

        let elsewhere = AuthScope {
            host: Some("elsewhere".to_string()),
            port: Some(80),
            realm: Some("test realm".to_string()),
            scheme: Some("basic".to_string()),
        };
        assert_eq!(
            provider.credentials(&elsewhere).unwrap().username,
            "realmuser"
        );

        let unknown = AuthScope {
            host: Some("elsewhere".to_string()),
            port: Some(80),
            realm: Some("other realm".to_string()),
            scheme: Some("basic".to_string()),
        };
        assert_eq!(provider.credentials(&unknown).unwrap().username, "any");
    }

    #[test]
    fn test_parse_challenges() {
        let challenges = parse_challenges(&[
            "Digest realm=\"test realm\", nonce=\"abc\", qop=\"auth\"",
            "Basic realm=\"test realm\"",
        ]);
        assert_eq!(challenges.len(), 2);
        assert_eq!(challenges[0].scheme, "digest");
        assert_eq!(challenges[0].param("nonce"), Some("abc"));
        assert_eq!(challenges[1].scheme, "basic");
        assert_eq!(challenges[1].param("realm"), Some("test realm"));
    }

    #[test]
    fn test_select_by_preference() {
        let registry = AuthSchemeRegistry::new();
        let provider = provider_with(AuthScope::any());
        let mut exchange = AuthExchange::new();
        let challenges = parse_challenges(&[
            "Basic realm=\"r\"",
            "Digest realm=\"r\", nonce=\"n\"",
        ]);
        assert!(exchange.update(&challenges, &host(), &registry, &provider));
        assert_eq!(exchange.scheme().unwrap().name(), "digest");
        assert_eq!(exchange.state(), ChallengeState::Challenged);
    }

    #[test]
    fn test_fallback_on_malformed_preferred_challenge() {
        // A digest challenge without a nonce cannot be processed; selection
        // falls back to basic.
        let registry = AuthSchemeRegistry::new();
        let provider = provider_with(AuthScope::any());
        let mut exchange = AuthExchange::new();
        let challenges = parse_challenges(&[
            "Digest realm=\"test realm\" invalid",
            "Basic realm=\"test realm\"",
        ]);
        assert!(exchange.update(&challenges, &host(), &registry, &provider));
        assert_eq!(exchange.scheme().unwrap().name(), "basic");
    }

    #[test]
    fn test_no_credentials_fails_exchange() {
        let registry = AuthSchemeRegistry::new();
        let provider = BasicCredentialsProvider::new();
        let mut exchange = AuthExchange::new();
        let challenges = parse_challenges(&["Basic realm=\"r\""]);
        assert!(!exchange.update(&challenges, &host(), &registry, &provider));
        assert_eq!(exchange.state(), ChallengeState::Failure);
    }

    #[test]
    fn test_repeated_identical_challenge_fails() {
        let registry = AuthSchemeRegistry::new();
        let provider = provider_with(AuthScope::any());
        let mut exchange = AuthExchange::new();
        let challenges = parse_challenges(&["Basic realm=\"r\""]);
        assert!(exchange.update(&challenges, &host(), &registry, &provider));
        assert!(!exchange.update(&challenges, &host(), &registry, &provider));
        assert_eq!(exchange.state(), ChallengeState::Failure);
        // A failed exchange stays failed.
        assert!(!exchange.update(&challenges, &host(), &registry, &provider));
    }

    #[test]
    fn test_authorization_header_only_when_challenged() {
        let registry = AuthSchemeRegistry::new();
        let provider = provider_with(AuthScope::any());
        let mut exchange = AuthExchange::new();
        let request = Request::get("http://localhost/").unwrap();
        assert!(exchange.authorization_header(&request).unwrap().is_none());

        let challenges = parse_challenges(&["Basic realm=\"r\""]);
        exchange.update(&challenges, &host(), &registry, &provider);
        let header = exchange.authorization_header(&request).unwrap().unwrap();
        assert!(header.starts_with("Basic "));
    }

    #[test]
    fn test_success_transition() {
        let registry = AuthSchemeRegistry::new();
        let provider = provider_with(AuthScope::any());
        let mut exchange = AuthExchange::new();
        exchange.update(
            &parse_challenges(&["Basic realm=\"r\""]),
            &host(),
            &registry,
            &provider,
        );
        exchange.mark_success();
        assert_eq!(exchange.state(), ChallengeState::Success);
    }
}
