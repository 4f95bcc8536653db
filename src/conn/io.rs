//! Buffered session IO over a transport stream.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::conn::connector::BoxStream;
use crate::error::{Error, Result};

/// Default cap on a single header/status line.
const DEFAULT_MAX_LINE_LEN: usize = 16 * 1024;

/// Buffered reader/writer owned by a managed connection.
///
/// Serves both the line-oriented message head (status line, headers) and the
/// byte-oriented body reads, sharing one read buffer so bytes that arrive
/// together are not lost between the two phases.
pub struct SessionBuffer {
    stream: BoxStream,
    buf: Vec<u8>,
    pos: usize,
    max_line_len: usize,
    eof: bool,
}

impl SessionBuffer {
    pub fn new(stream: BoxStream) -> Self {
        Self {
            stream,
            buf: Vec::with_capacity(8 * 1024),
            pos: 0,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            eof: false,
        }
    }

    fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    fn consume(&mut self, n: usize) {
        self.pos += n;
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
    }

    /// Pull more bytes from the stream into the buffer. Returns the number
    /// of bytes read; zero means end of stream.
    async fn fill(&mut self) -> Result<usize> {
        if self.eof {
            return Ok(0);
        }
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        let mut chunk = [0u8; 8 * 1024];
        let n = self.stream.read(&mut chunk).await?;
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(n)
    }

    /// Read one line, stripping the trailing CRLF or LF.
    ///
    /// Returns `None` at end of stream with no pending bytes. A final line
    /// without a terminator is returned as-is.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(idx) = self.buffered().iter().position(|&b| b == b'\n') {
                let mut line = &self.buffered()[..idx];
                if line.ends_with(b"\r") {
                    line = &line[..line.len() - 1];
                }
                let text = String::from_utf8_lossy(line).into_owned();
                self.consume(idx + 1);
                return Ok(Some(text));
            }
            if self.buffered().len() > self.max_line_len {
                return Err(Error::protocol("message line exceeds maximum length"));
            }
            if self.fill().await? == 0 {
                if self.buffered().is_empty() {
                    return Ok(None);
                }
                let text = String::from_utf8_lossy(self.buffered()).into_owned();
                let len = self.buffered().len();
                self.consume(len);
                return Ok(Some(text));
            }
        }
    }

    /// Read up to `out.len()` body bytes, draining the buffer first.
    /// Returns zero at end of stream.
    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        let pending = self.buffered();
        if !pending.is_empty() {
            let n = pending.len().min(out.len());
            out[..n].copy_from_slice(&pending[..n]);
            self.consume(n);
            return Ok(n);
        }
        if self.eof {
            return Ok(0);
        }
        let n = self.stream.read(out).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn buffer_over(data: &'static [u8]) -> SessionBuffer {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let _ = server.write_all(data).await;
            // dropping the far end signals EOF
        });
        SessionBuffer::new(Box::new(client))
    }

    #[tokio::test]
    async fn test_read_line_crlf_and_lf() {
        let mut buf = buffer_over(b"first\r\nsecond\nthird").await;
        assert_eq!(buf.read_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(buf.read_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(buf.read_line().await.unwrap().as_deref(), Some("third"));
        assert_eq!(buf.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_line_eof_empty() {
        let mut buf = buffer_over(b"").await;
        assert_eq!(buf.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_and_body_share_buffer() {
        let mut buf = buffer_over(b"head\r\nbody bytes").await;
        assert_eq!(buf.read_line().await.unwrap().as_deref(), Some("head"));
        let mut out = [0u8; 32];
        let n = buf.read(&mut out).await.unwrap();
        assert_eq!(&out[..n], b"body bytes");
        assert_eq!(buf.read(&mut out).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_line_length_cap() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let big = vec![b'a'; 64 * 1024];
            let _ = server.write_all(&big).await;
        });
        let mut buf = SessionBuffer::new(Box::new(client));
        assert!(matches!(buf.read_line().await, Err(Error::Protocol(_))));
    }
}
