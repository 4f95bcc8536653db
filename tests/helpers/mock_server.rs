// Each integration test binary compiles this module and uses a different
// slice of it.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// One scripted response, written verbatim so tests can exercise garbage
/// prefixes, missing framing and half-closed connections.
#[derive(Clone)]
pub struct Canned {
    pub raw: Vec<u8>,
    /// Close the connection after writing this response, regardless of
    /// what its headers claim.
    pub close_after: bool,
    /// Artificial delay before writing, to simulate a slow server.
    pub delay: Option<Duration>,
}

impl Canned {
    pub fn raw(raw: impl Into<Vec<u8>>) -> Self {
        Self {
            raw: raw.into(),
            close_after: false,
            delay: None,
        }
    }

    /// A keep-alive response with a Content-Length body.
    pub fn ok(body: &str) -> Self {
        Self::raw(format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n{}",
            body.len(),
            body
        ))
    }

    pub fn with_close(mut self) -> Self {
        self.close_after = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct ServerState {
    responses: Mutex<VecDeque<Canned>>,
    requests: Mutex<Vec<String>>,
    accepted: AtomicUsize,
}

/// A scripted HTTP/1.1 test server.
///
/// Connections consume responses from one shared queue in order; each
/// connection keeps serving requests until its script says to close, the
/// queue runs dry, or the client goes away. Received request heads are
/// recorded for assertions.
pub struct MockServer {
    port: u16,
    state: Arc<ServerState>,
}

impl MockServer {
    pub async fn start(responses: Vec<Canned>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(ServerState {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            accepted: AtomicUsize::new(0),
        });

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        accept_state.accepted.fetch_add(1, Ordering::SeqCst);
                        let conn_state = Arc::clone(&accept_state);
                        tokio::spawn(handle_connection(stream, conn_state));
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self { port, state })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Request heads received so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Number of connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) {
    loop {
        let head = match read_request_head(&mut stream).await {
            Some(head) => head,
            None => break,
        };
        state.requests.lock().unwrap().push(head);

        let canned = { state.responses.lock().unwrap().pop_front() };
        let Some(canned) = canned else { break };

        if let Some(delay) = canned.delay {
            tokio::time::sleep(delay).await;
        }
        if stream.write_all(&canned.raw).await.is_err() {
            break;
        }
        if stream.flush().await.is_err() {
            break;
        }
        if canned.close_after {
            break;
        }
    }
}

/// Read one full request: the head plus any Content-Length body.
async fn read_request_head(stream: &mut TcpStream) -> Option<String> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 8 * 1024];
    let mut needed: Option<usize> = None;
    loop {
        if let Some(needed) = needed {
            if collected.len() >= needed {
                return Some(String::from_utf8_lossy(&collected).into_owned());
            }
        } else if let Some(end) = collected.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&collected[..end]).into_owned();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            needed = Some(end + 4 + content_length);
            continue;
        }

        let n = match timeout(Duration::from_secs(10), stream.read(&mut buf)).await {
            Ok(Ok(n)) => n,
            _ => return None,
        };
        if n == 0 {
            return None;
        }
        collected.extend_from_slice(&buf[..n]);
    }
}
