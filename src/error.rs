use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error("backfill failed: {0}")]
    BackfillFailed(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("reconciliation failed: {0}")]
    ReconciliationFailed(String),
    #[error("{0}")]
    InvalidConfiguration(String),
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("json decode error: {0}")]
    SimdJson(#[from] simd_json::Error),
    #[error("float parse error: {0}")]
    ParseFloat(#[from] std::num::ParseFloatError),
    #[error("integer parse error: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(value))
    }
}

impl StreamError {
    /// Configuration errors end a subscription; everything else is retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }

    /// Decode-level failures that only cost the current message.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedRecord(_) | Self::SimdJson(_) | Self::ParseFloat(_) | Self::ParseInt(_)
        )
    }

    /// Re-labels any non-configuration failure raised while seeding a cycle.
    pub fn into_backfill(self) -> Self {
        match self {
            Self::InvalidConfiguration(_) | Self::BackfillFailed(_) => self,
            other => Self::BackfillFailed(other.to_string()),
        }
    }

    /// Re-labels any non-configuration failure raised during a boundary refetch.
    pub fn into_reconciliation(self) -> Self {
        match self {
            Self::InvalidConfiguration(_) | Self::ReconciliationFailed(_) => self,
            other => Self::ReconciliationFailed(other.to_string()),
        }
    }
}

impl serde::Serialize for StreamError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_errors_are_terminal() {
        assert!(StreamError::InvalidConfiguration("Invalid Field".to_string()).is_terminal());
        assert!(!StreamError::ConnectionFailed("reset".to_string()).is_terminal());
        assert!(!StreamError::BackfillFailed("503".to_string()).is_terminal());
    }

    #[test]
    fn parse_failures_count_as_malformed() {
        let error: StreamError = "x1".parse::<f64>().unwrap_err().into();
        assert!(error.is_malformed());
        assert!(!StreamError::ConnectionFailed("eof".to_string()).is_malformed());
    }

    #[test]
    fn relabels_failures_by_stage() {
        let error = StreamError::ConnectionFailed("timeout".to_string()).into_backfill();
        assert!(matches!(error, StreamError::BackfillFailed(_)));

        let error = StreamError::MalformedRecord("k".to_string()).into_reconciliation();
        assert!(matches!(error, StreamError::ReconciliationFailed(_)));

        let error = StreamError::InvalidConfiguration("bad".to_string()).into_backfill();
        assert!(error.is_terminal());
    }

    #[test]
    fn configuration_error_displays_bare_message() {
        let error = StreamError::InvalidConfiguration("Invalid Field".to_string());
        assert_eq!(error.to_string(), "Invalid Field");
    }
}
