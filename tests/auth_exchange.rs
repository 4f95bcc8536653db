use wraith::auth::{AuthScope, BasicCredentialsProvider, Credentials};
use wraith::{Client, Request};

mod helpers;
use helpers::mock_server::{Canned, MockServer};

fn unauthorized(challenges: &[&str]) -> Canned {
    let mut raw = String::from("HTTP/1.1 401 Unauthorized\r\n");
    for challenge in challenges {
        raw.push_str(&format!("WWW-Authenticate: {}\r\n", challenge));
    }
    raw.push_str("Content-Length: 0\r\nConnection: keep-alive\r\n\r\n");
    Canned::raw(raw)
}

fn client_with_credentials(server: &MockServer) -> Client {
    let provider = BasicCredentialsProvider::new();
    provider.set(
        AuthScope::host("127.0.0.1", server.port()),
        Credentials::new("test", "test"),
    );
    Client::builder().credentials_provider(provider).build()
}

#[tokio::test]
async fn test_basic_authentication_round_trip() {
    let server = MockServer::start(vec![
        unauthorized(&["Basic realm=\"test realm\""]),
        Canned::ok("success"),
    ])
    .await
    .unwrap();
    let client = client_with_credentials(&server);

    let resp = client
        .execute(Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().unwrap(), "success");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].contains("Authorization:"));
    // test:test in RFC 4648 base64
    assert!(requests[1].contains("Authorization: Basic dGVzdDp0ZXN0\r\n"));
    // Both rounds ride the same keep-alive connection.
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn test_repeated_challenge_stops_after_bounded_rounds() {
    // A server that rejects the credentials forever: the client must stop
    // and hand back the last 401 instead of looping.
    let challenge = ["Basic realm=\"test realm\""];
    let server = MockServer::start(vec![
        unauthorized(&challenge),
        unauthorized(&challenge),
        unauthorized(&challenge),
        unauthorized(&challenge),
        unauthorized(&challenge),
        unauthorized(&challenge),
    ])
    .await
    .unwrap();
    let client = client_with_credentials(&server);

    let resp = client
        .execute(Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 401, "final answer is the last 401");

    // Round one selects the scheme; the identical repeat fails the
    // exchange. Two requests total, never an endless loop.
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn test_scheme_fallback_to_basic() {
    // A malformed Digest challenge (no nonce) plus a valid Basic one:
    // selection falls back to Basic, as preference alone would pick
    // Digest.
    let server = MockServer::start(vec![
        unauthorized(&["Digest realm=\"test realm\" invalid", "Basic realm=\"test realm\""]),
        Canned::ok("success"),
    ])
    .await
    .unwrap();
    let client = client_with_credentials(&server);

    let resp = client
        .execute(Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(server.requests()[1].contains("Authorization: Basic "));
}

#[tokio::test]
async fn test_digest_authentication_round_trip() {
    let server = MockServer::start(vec![
        unauthorized(&["Digest realm=\"test realm\", nonce=\"abc123\", qop=\"auth\""]),
        Canned::ok("success"),
    ])
    .await
    .unwrap();
    let client = client_with_credentials(&server);

    let resp = client
        .execute(Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let authorized = &server.requests()[1];
    assert!(authorized.contains("Authorization: Digest username=\"test\""));
    assert!(authorized.contains("nonce=\"abc123\""));
    assert!(authorized.contains("nc=00000001"));
}

#[tokio::test]
async fn test_no_credentials_returns_unauthorized_response() {
    let server = MockServer::start(vec![unauthorized(&["Basic realm=\"test realm\""])])
        .await
        .unwrap();
    // Empty provider: no credentials for any scope.
    let client = Client::builder()
        .credentials_provider(BasicCredentialsProvider::new())
        .build();

    let resp = client
        .execute(Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(server.requests().len(), 1, "no pointless retry without credentials");
}

#[tokio::test]
async fn test_authentication_disabled_returns_first_response() {
    let server = MockServer::start(vec![unauthorized(&["Basic realm=\"test realm\""])])
        .await
        .unwrap();
    let provider = BasicCredentialsProvider::new();
    provider.set(AuthScope::any(), Credentials::new("test", "test"));
    let client = Client::builder()
        .credentials_provider(provider)
        .authenticate(false)
        .build();

    let resp = client
        .execute(Request::get(&server.url()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(server.requests().len(), 1);
}
