//! Error module for quizrelay
//!
//! Every fallible operation in the crate returns [`QuizRelayError`]. Errors
//! that callers are expected to react to carry an [`ErrorCode`], whose
//! category decides how the HTTP surface reports it.

use thiserror::Error;
use std::fmt;

/// Error code, grouped by category in 0x100 blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Validation errors (0x0001-0x0100)
    InvalidId = 0x0001,
    InvalidRequest = 0x0002,
    MissingUserId = 0x0003,

    // Not-found errors (0x0101-0x0200)
    QuizNotFound = 0x0101,
    QuestionNotFound = 0x0102,
    UserNotFound = 0x0103,

    // Source-of-truth store errors (0x0201-0x0300)
    StorageUnavailable = 0x0201,
    StorageConflict = 0x0202,

    // Cache store errors (0x0301-0x0400)
    CacheUnavailable = 0x0301,
    CacheCorrupt = 0x0302,

    // Viewer transport errors (0x0401-0x0500)
    SendFailed = 0x0401,
    HubClosed = 0x0402,

    // System errors (0x0501-0x0600)
    ConfigInvalid = 0x0502,
}

impl ErrorCode {
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the error code category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            0x0001..=0x0100 => ErrorCategory::Validation,
            0x0101..=0x0200 => ErrorCategory::NotFound,
            0x0201..=0x0300 => ErrorCategory::Storage,
            0x0301..=0x0400 => ErrorCategory::Cache,
            0x0401..=0x0500 => ErrorCategory::Transport,
            0x0501..=0x0600 => ErrorCategory::System,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Get a human-readable description of the error code
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidId => "Malformed identifier",
            Self::InvalidRequest => "Request failed validation",
            Self::MissingUserId => "User ID required",
            Self::QuizNotFound => "Quiz not found",
            Self::QuestionNotFound => "Question not found",
            Self::UserNotFound => "User not found",
            Self::StorageUnavailable => "Answer ledger unavailable",
            Self::StorageConflict => "Conflicting write to answer ledger",
            Self::CacheUnavailable => "Cache store unavailable",
            Self::CacheCorrupt => "Cached value could not be decoded",
            Self::SendFailed => "Failed to deliver message to viewer",
            Self::HubClosed => "Topic hub is no longer running",
            Self::ConfigInvalid => "Invalid configuration",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::InvalidId => "INVALID_ID",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::MissingUserId => "MISSING_USER_ID",
            Self::QuizNotFound => "QUIZ_NOT_FOUND",
            Self::QuestionNotFound => "QUESTION_NOT_FOUND",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::StorageConflict => "STORAGE_CONFLICT",
            Self::CacheUnavailable => "CACHE_UNAVAILABLE",
            Self::CacheCorrupt => "CACHE_CORRUPT",
            Self::SendFailed => "SEND_FAILED",
            Self::HubClosed => "HUB_CLOSED",
            Self::ConfigInvalid => "CONFIG_INVALID",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04X})", self.name(), self.as_u16())
    }
}

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Storage,
    Cache,
    Transport,
    System,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "Validation"),
            Self::NotFound => write!(f, "NotFound"),
            Self::Storage => write!(f, "Storage"),
            Self::Cache => write!(f, "Cache"),
            Self::Transport => write!(f, "Transport"),
            Self::System => write!(f, "System"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Main error type for quizrelay
#[derive(Error, Debug)]
pub enum QuizRelayError {
    #[error("{code}: {message}")]
    Standard {
        code: ErrorCode,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl QuizRelayError {
    /// Create a new standard error with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Standard {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_id(what: &str, raw: &str) -> Self {
        Self::new(ErrorCode::InvalidId, format!("invalid {} ID: {:?}", what, raw))
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageUnavailable, message)
    }

    /// Get the error code if this is a standard error
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Standard { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Category of the error; errors without a code are system errors,
    /// except Redis failures, which always come from the cache store.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Standard { code, .. } => code.category(),
            Self::Redis(_) => ErrorCategory::Cache,
            _ => ErrorCategory::System,
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::Standard { message, .. } => message.clone(),
            _ => self.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }
}

/// Result type alias for quizrelay operations
pub type Result<T> = std::result::Result<T, QuizRelayError>;
