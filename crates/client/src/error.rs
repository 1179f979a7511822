//! Error types for the roomlink client

use roomlink_backend::codes;

/// Result type alias using the client [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Which operation produced a backend failure.
///
/// Used when mapping a raw backend code to an [`Error`] variant:
/// codes are range-based, but the operation disambiguates codes a
/// backend reports outside its documented range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// connect / connect_async / disconnect
    Connect,
    /// data send
    Send,
    /// audio publish (connection-level or track-level)
    Publish,
    /// anything else (handler registration, stats, ...)
    Other,
}

/// Errors surfaced by the roomlink client
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A named resource with this name is already live
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// No live resource with this name
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Connection-level backend failure (bad URL/token, handshake)
    #[error("Connection error {code}: {message}")]
    Connection {
        /// Backend result code.
        code: i32,
        /// Backend-supplied reason.
        message: String,
    },

    /// Data send rejected by the backend
    #[error("Send error {code}: {message}")]
    Send {
        /// Backend result code.
        code: i32,
        /// Backend-supplied reason.
        message: String,
    },

    /// Audio publish rejected by the backend
    #[error("Publish error {code}: {message}")]
    Publish {
        /// Backend result code.
        code: i32,
        /// Backend-supplied reason.
        message: String,
    },

    /// Operation on a torn-down or not-yet-created object
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// The backend declines an operation it does not implement;
    /// the fallback is disconnect + reconnect
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Backend failure without a more specific classification
    #[error("Internal error {code}: {message}")]
    Internal {
        /// Backend result code.
        code: i32,
        /// Backend-supplied reason.
        message: String,
    },

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Map a backend (code, message) failure to an error variant.
    ///
    /// Code ranges follow the backend convention (1xx connection,
    /// 2xx send, 3xx publish, 4xx lifecycle, 501 unsupported); codes
    /// outside those ranges fall back on the operation kind, then on
    /// `Internal`.
    pub fn from_backend(op: OpKind, code: i32, message: Option<String>) -> Self {
        let message = message.unwrap_or_else(|| "unknown".to_string());
        match code {
            codes::UNSUPPORTED => Error::Unsupported(format!(
                "{} (recommended fallback: disconnect + reconnect)",
                message
            )),
            100..=199 => Error::Connection { code, message },
            200..=299 => Error::Send { code, message },
            300..=399 => Error::Publish { code, message },
            400..=499 => Error::Lifecycle(message),
            _ => match op {
                OpKind::Connect => Error::Connection { code, message },
                OpKind::Send => Error::Send { code, message },
                OpKind::Publish => Error::Publish { code, message },
                OpKind::Other => Error::Internal { code, message },
            },
        }
    }

    /// Check if this error is retryable (transient connection trouble)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error is a payload-size rejection
    pub fn is_payload_too_large(&self) -> bool {
        matches!(
            self,
            Error::Send { code, .. }
                if *code == codes::LOSSY_TOO_LARGE || *code == codes::RELIABLE_TOO_LARGE
        )
    }

    /// Backend code carried by this error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Connection { code, .. }
            | Error::Send { code, .. }
            | Error::Publish { code, .. }
            | Error::Internal { code, .. } => Some(*code),
            _ => None,
        }
    }
}
