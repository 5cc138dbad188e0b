//! Unified error type.

/// The error type returned by fastrest's fallible operations.
///
/// Handlers and middleware return [`Result<()>`](Result). Any `Err` that
/// reaches the dispatcher is logged server-side and, unless the handler
/// already chose a status, turned into a generic `500`. The message never
/// reaches the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{0}`")]
    InvalidAddr(String),

    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },

    #[error("invalid header `{0}`")]
    InvalidHeader(String),

    #[error("query parameter `{key}`: {reason}")]
    Query { key: String, reason: String },

    #[error("config `{key}`: {reason}")]
    Config { key: &'static str, reason: String },

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("{0}")]
    Handler(String),
}

impl Error {
    /// Free-form handler failure.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    pub(crate) fn query(key: &str, reason: impl ToString) -> Self {
        Self::Query { key: key.to_owned(), reason: reason.to_string() }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
