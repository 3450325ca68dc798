use arbor_core::errors::ProviderError;
use arbor_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("corrupt agent data: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Short classification string for logs and operator messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(e) => e.kind(),
            Self::InvalidArgument(_) => "invalid_argument",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::Corrupt(_) => "parse",
            Self::Internal(_) => "internal",
        }
    }

    /// Failures caused by what the operator asked for rather than by the
    /// infrastructure. Commands report these as notices.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::Store(StoreError::NotFound(_))
        )
    }
}

impl From<ProviderError> for EngineError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::InvalidRequest(msg) => EngineError::InvalidArgument(msg),
            other => EngineError::ProviderUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_preconditions() {
        let nf = EngineError::from(StoreError::NotFound("agent x".into()));
        assert_eq!(nf.kind(), "not_found");
        assert!(nf.is_precondition());

        let io = EngineError::from(StoreError::Database("disk I/O error".into()));
        assert_eq!(io.kind(), "io");
        assert!(!io.is_precondition());

        assert!(EngineError::InvalidArgument("root".into()).is_precondition());
        assert!(!EngineError::Corrupt("cycle".into()).is_precondition());
    }

    #[test]
    fn provider_errors_map() {
        let e = EngineError::from(ProviderError::Busy);
        assert_eq!(e.kind(), "provider_unavailable");
        let e = EngineError::from(ProviderError::InvalidRequest("empty".into()));
        assert!(matches!(e, EngineError::InvalidArgument(_)));
    }
}
