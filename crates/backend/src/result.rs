//! Result channel for backend-facing operations
//!
//! Every call that crosses the backend boundary returns a
//! [`BackendResult`]: a numeric code plus an optional human-readable
//! message. Code `0` is success; a success may still carry an advisory
//! message (the backend is allowed to attach diagnostic text to a
//! successful call). The message is an owned `String`, so the
//! "exactly one release per message, on the path that received it"
//! rule is enforced by move semantics: [`BackendResult::take_message`]
//! consumes the result, and anything not taken is dropped when the
//! result goes out of scope.

/// Error code ranges, mirroring the backend's convention:
///
/// - `1xx` — connection/token errors
/// - `2xx` — data send errors
/// - `3xx` — audio publish errors
/// - `4xx` — lifecycle errors
/// - `5xx` — internal/unsupported errors
pub mod codes {
    /// Connect was attempted on an already-connected handle.
    pub const ALREADY_CONNECTED: i32 = 104;
    /// Lossy payload exceeds the backend's lossy size ceiling.
    pub const LOSSY_TOO_LARGE: i32 = 201;
    /// Reliable payload exceeds the backend's reliable size ceiling.
    pub const RELIABLE_TOO_LARGE: i32 = 202;
    /// Send rejected by the backend for a non-size reason.
    pub const SEND_REJECTED: i32 = 203;
    /// Audio publish attempted while not connected.
    pub const PUBLISH_NOT_CONNECTED: i32 = 301;
    /// Operation on a torn-down or never-created handle.
    pub const LIFECYCLE: i32 = 401;
    /// The backend does not implement the requested operation.
    pub const UNSUPPORTED: i32 = 501;
    /// Catch-all internal failure.
    pub const INTERNAL: i32 = 500;
}

/// Outcome of one backend call.
///
/// `code == 0` means success. A non-zero code always carries a
/// message; a zero code may carry one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResult {
    /// Numeric result code; `0` is success.
    pub code: i32,
    /// Optional human-readable message, owned by this result.
    pub message: Option<String>,
}

impl BackendResult {
    /// Plain success with no message.
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: None,
        }
    }

    /// Success carrying an advisory message.
    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: Some(message.into()),
        }
    }

    /// Failure with a code and message.
    pub fn err(code: i32, message: impl Into<String>) -> Self {
        debug_assert!(code != 0, "error results must use a non-zero code");
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// True if this result is a success.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Consume the result, yielding `(code, message)`.
    ///
    /// This is the single point where the message leaves the result;
    /// callers that only need the code can drop the result instead,
    /// which discards the message exactly once either way.
    pub fn take_message(self) -> (i32, Option<String>) {
        (self.code, self.message)
    }
}
