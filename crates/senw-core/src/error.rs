use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Fetch or connect failure. State is left untouched; re-selecting retries.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed JSON or an event with the wrong shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// Selecting an entity that does not belong to the currently selected parent.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    /// Connection attempt did not complete within the configured window.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl EngineError {
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Network(_) => "engine.network",
            EngineError::Decode(_) => "engine.decode",
            EngineError::InvalidSelection(_) => "engine.invalid_selection",
            EngineError::Timeout(_) => "engine.timeout",
        }
    }

    /// Network failures and timeouts can be retried by re-selecting the entity.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Network(_) | EngineError::Timeout(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            EngineError::Decode(e.to_string())
        } else {
            EngineError::Network(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        EngineError::Network(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_distinct() {
        let errors = [
            EngineError::Network("x".into()),
            EngineError::Decode("x".into()),
            EngineError::InvalidSelection("x".into()),
            EngineError::Timeout(Duration::from_secs(3)),
        ];
        let mut codes: Vec<_> = errors.iter().map(EngineError::error_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(EngineError::Network("refused".into()).is_retryable());
        assert!(EngineError::Timeout(Duration::from_secs(10)).is_retryable());
        assert!(!EngineError::Decode("bad".into()).is_retryable());
        assert!(!EngineError::InvalidSelection("b9".into()).is_retryable());
    }

    #[test]
    fn json_errors_become_decode_errors() {
        let err = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
        assert_eq!(EngineError::from(err).error_code(), "engine.decode");
    }

    #[test]
    fn timeout_message_names_window() {
        assert_eq!(
            EngineError::Timeout(Duration::from_secs(10)).to_string(),
            "timed out after 10s"
        );
        assert_eq!(
            EngineError::Timeout(Duration::from_millis(250)).to_string(),
            "timed out after 250ms"
        );
    }
}
