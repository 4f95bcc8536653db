//! HTTP protocol version.

/// Protocol version of a parsed response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    /// HTTP/1.0: connections close after the response unless the server
    /// opts into keep-alive.
    Http10,
    /// HTTP/1.1: connections are persistent unless closed explicitly.
    #[default]
    Http11,
}

impl HttpVersion {
    /// Get the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }

    /// Whether connections of this version are persistent by default.
    pub fn keeps_alive_by_default(&self) -> bool {
        matches!(self, Self::Http11)
    }
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
