/// Errors surfaced by the provider collaborator.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("a call is already in flight for this agent")]
    Busy,
}

impl ProviderError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Busy => "busy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_strings() {
        assert_eq!(ProviderError::Busy.error_kind(), "busy");
        assert_eq!(
            ProviderError::Unavailable("down".into()).error_kind(),
            "unavailable"
        );
    }

    #[test]
    fn display() {
        let err = ProviderError::InvalidRequest("no messages".into());
        assert_eq!(err.to_string(), "invalid request: no messages");
    }
}
