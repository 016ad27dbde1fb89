//! Common error type for HTTP calls made by harvest pipelines

/// Error from a single HTTP exchange.
///
/// A response that arrived with a non-success status is kept apart from a
/// transport failure so callers can pick a backoff per failure class.
#[derive(Debug)]
pub enum HttpError {
    /// Server answered with a non-success status
    Status { status: u16, message: String },
    /// Connection, TLS, timeout or body read failure (no usable status)
    Transport { message: String },
    /// Call abandoned because a forced shutdown was requested
    Aborted,
    /// Local I/O error
    Io(std::io::Error),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status { status, message } => write!(f, "HTTP {status}: {message}"),
            Self::Transport { message } => write!(f, "HTTP error: {message}"),
            Self::Aborted => f.write_str("request aborted by shutdown"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for HttpError {}

impl From<std::io::Error> for HttpError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl HttpError {
    /// Create error from reqwest error.
    ///
    /// The URL is stripped so tokens passed in query strings never reach logs.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        let message = e.without_url().to_string();
        match status {
            Some(status) => Self::Status { status, message },
            None => Self::Transport { message },
        }
    }

    /// HTTP status, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Throttling statuses: 429 rate limited, 403 temporarily blocked
    pub fn is_throttled(&self) -> bool {
        matches!(self.status(), Some(429 | 403))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status != 404,
            Self::Transport { .. } => true,
            Self::Aborted => false,
            Self::Io(e) => e.kind() != std::io::ErrorKind::StorageFull,
        }
    }
}
