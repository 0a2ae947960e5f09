use thiserror::Error;

/// Errors produced across let-me-in.
#[derive(Debug, Error)]
pub enum LmiError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("random source unavailable: {0}")]
    EntropyFailure(String),

    #[error("unknown user: {0}")]
    UnknownUser(i64),

    #[error("{0}")]
    Validation(String),

    #[error("email already exists")]
    DuplicateEmail,

    #[error("too many attempts")]
    RateLimited,

    #[error("launch failure: {0}")]
    LaunchFailure(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse failure classes, used at the HTTP boundary to decide what a
/// caller is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad, missing or expired credential. Cause is never disclosed.
    Authentication,
    /// Malformed request; carries a field-level message.
    Validation,
    /// Process launch or terminal allocation failed.
    Resource,
    /// Record store unavailable or conflicting.
    Storage,
    /// I/O failure while bridging. Normal at connection end.
    Stream,
}

impl LmiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LmiError::InvalidToken(_)
            | LmiError::InvalidRefreshToken
            | LmiError::InvalidCredentials
            | LmiError::RateLimited => ErrorKind::Authentication,
            LmiError::Validation(_) | LmiError::DuplicateEmail | LmiError::UnknownUser(_) => {
                ErrorKind::Validation
            }
            LmiError::LaunchFailure(_) | LmiError::EntropyFailure(_) | LmiError::Other(_) => {
                ErrorKind::Resource
            }
            LmiError::Storage(_) => ErrorKind::Storage,
            LmiError::Stream(_) | LmiError::Io(_) => ErrorKind::Stream,
        }
    }
}

pub type LmiResult<T> = Result<T, LmiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_share_a_kind() {
        assert_eq!(LmiError::InvalidRefreshToken.kind(), ErrorKind::Authentication);
        assert_eq!(
            LmiError::InvalidToken("expired".into()).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(LmiError::InvalidCredentials.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn io_is_stream_failure() {
        let err: LmiError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert_eq!(err.kind(), ErrorKind::Stream);
    }
}
