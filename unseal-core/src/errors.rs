use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy shared by every engine in the crate.
///
/// Transport layers decide how coarse their own status mapping is; the core
/// always reports the precise kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("failed to parse policy: {0}")]
    Compile(String),
    #[error("{entity} not found")]
    NotFound { entity: String },
    #[error("cipher: message authentication failed")]
    AuthenticationFailed,
    #[error("permission denied: {0}")]
    PolicyViolation(String),
    #[error("{entity} already exists")]
    Conflict { entity: String },
    #[error("token expired")]
    Expired,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Error::Validation(message.into())
    }

    pub fn compile<T: Into<String>>(message: T) -> Self {
        Error::Compile(message.into())
    }

    pub fn denied<T: Into<String>>(message: T) -> Self {
        Error::PolicyViolation(message.into())
    }

    pub fn not_found<T: Into<String>>(entity: T) -> Self {
        Error::NotFound {
            entity: entity.into(),
        }
    }

    pub fn conflict<T: Into<String>>(entity: T) -> Self {
        Error::Conflict {
            entity: entity.into(),
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }
}
