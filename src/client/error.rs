use thiserror::Error;

use crate::types::EntityId;

/// Failure classes shown to the user: transport problems, input rejected
/// before any request, and backends answering outside their contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NetworkFailure,
    ValidationFailure,
    ContractViolation,
    Local,
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("a request for {0} is already in flight")]
    Busy(EntityId),

    #[error("no symbols available")]
    NoSymbols,

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: EntityId },

    #[error("no API key selected")]
    NoApiKey,

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DashboardError {
    pub fn not_found(kind: &'static str, id: &EntityId) -> Self {
        DashboardError::NotFound { kind, id: id.clone() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DashboardError::Network(_)
            | DashboardError::Http { .. }
            | DashboardError::Rejected(_) => ErrorKind::NetworkFailure,
            DashboardError::Validation(_)
            | DashboardError::Busy(_)
            | DashboardError::NoSymbols
            | DashboardError::NotFound { .. }
            | DashboardError::NoApiKey => ErrorKind::ValidationFailure,
            DashboardError::ContractViolation(_) | DashboardError::Decode(_) => {
                ErrorKind::ContractViolation
            }
            DashboardError::Storage(_) | DashboardError::Io(_) | DashboardError::Config(_) => {
                ErrorKind::Local
            }
        }
    }

    /// The backend's own wording when it sent one, otherwise the full error.
    pub fn user_message(&self) -> String {
        match self {
            DashboardError::Http { message, .. } | DashboardError::Rejected(message) => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}

impl From<config::ConfigError> for DashboardError {
    fn from(e: config::ConfigError) -> Self {
        DashboardError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_mapping() {
        let http = DashboardError::Http {
            status: 400,
            message: "locked".to_string(),
        };
        assert_eq!(http.kind(), ErrorKind::NetworkFailure);
        assert_eq!(http.user_message(), "locked");

        assert_eq!(
            DashboardError::Validation("x".into()).kind(),
            ErrorKind::ValidationFailure
        );
        assert_eq!(
            DashboardError::ContractViolation("no id".into()).kind(),
            ErrorKind::ContractViolation
        );
        assert_eq!(
            DashboardError::Busy(EntityId::from(1)).kind(),
            ErrorKind::ValidationFailure
        );
    }

    #[test]
    fn test_display() {
        let err = DashboardError::not_found("strategy", &EntityId::from("abc"));
        assert_eq!(err.to_string(), "strategy abc not found");
    }
}
