use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by services and repositories.
///
/// Repositories surface `NotFound` / `Conflict` / `Transient` / `Invalid`;
/// services wrap those into the caller-facing kinds. The HTTP layer maps
/// each kind to a status code.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    RateLimited(String),

    /// The caller may retry.
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::Invalid(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Error::Invalid(m)
            | Error::Unauthorized(m)
            | Error::Forbidden(m)
            | Error::NotFound(m)
            | Error::Conflict(m)
            | Error::RateLimited(m)
            | Error::Transient(m)
            | Error::Internal(m) => m,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_matches_display() {
        let err = Error::Invalid("name:please provide a valid name".to_string());
        assert_eq!(err.message(), err.to_string());
    }
}
