//! Error types for priority admission
//!
//! Admission failures fall into three categories that callers handle
//! differently: malformed input is a contract violation of the surrounding
//! framework, policy violations are final rejections of the write, and
//! transient failures may be retried by the API client.

use thiserror::Error;

/// Main error type for priority admission
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The object does not match the shape its resource type declares
    #[error("bad request: {message}")]
    Malformed {
        /// Kind the object was expected to be (e.g. "Pod")
        kind: String,
        /// Description of what could not be decoded
        message: String,
    },

    /// The write breaks a priority policy and must not be retried
    #[error("forbidden: {message}")]
    Forbidden {
        /// Why the write was rejected
        message: String,
    },

    /// The priority class index could not be read
    #[error("internal error: {message}")]
    Transient {
        /// Description of what failed
        message: String,
    },

    /// Invalid startup configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The webhook server failed
    #[error("server error: {0}")]
    Server(String),
}

impl Error {
    /// Create a malformed-input error for an object that could not be
    /// converted to `kind`
    pub fn unconvertible(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self::Malformed {
            message: format!(
                "resource was marked with kind {} but was unable to be converted",
                kind
            ),
            kind,
        }
    }

    /// Create a malformed-input error with an explicit message
    pub fn malformed(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Malformed {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create a policy-violation error with the given message
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden {
            message: msg.into(),
        }
    }

    /// Create a transient error with the given message
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient {
            message: msg.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a server error with the given message
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    /// Whether the API client may retry the write that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// The message surfaced to the API client, without the category prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Malformed { message, .. }
            | Self::Forbidden { message }
            | Self::Transient { message }
            | Self::Config(message)
            | Self::Server(message) => message,
        }
    }
}
