use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::client::{DashboardError, ErrorKind};

/// Notification severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Types of notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AlertType {
    // Rejected before any request went out
    ValidationFailed {
        action: String,
        message: String,
    },
    // Backend or transport failure of a user-initiated mutation
    ActionFailed {
        action: String,
        entity: String,
        message: String,
    },
    // Backend answered 2xx but left out a field it must send
    ContractViolation {
        action: String,
        message: String,
    },
    ApiKeySelected {
        id: String,
    },
    ExportWritten {
        instance: String,
        path: String,
    },
}

impl AlertType {
    /// Get default severity for this alert type
    pub fn default_severity(&self) -> Severity {
        match self {
            AlertType::ActionFailed { .. } => Severity::Critical,
            AlertType::ContractViolation { .. } => Severity::Critical,
            AlertType::ValidationFailed { .. } => Severity::Warning,
            _ => Severity::Info,
        }
    }

    /// Get a human-readable title for this alert
    pub fn title(&self) -> String {
        match self {
            AlertType::ValidationFailed { action, .. } => format!("Cannot {}", action),
            AlertType::ActionFailed { action, entity, .. } => {
                format!("Failed to {} {}", action, entity)
            }
            AlertType::ContractViolation { action, .. } => {
                format!("Unexpected response to {}", action)
            }
            AlertType::ApiKeySelected { id } => format!("API key {} selected", id),
            AlertType::ExportWritten { instance, .. } => format!("Exported instance {}", instance),
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            AlertType::ValidationFailed { message, .. }
            | AlertType::ActionFailed { message, .. }
            | AlertType::ContractViolation { message, .. } => Some(message),
            AlertType::ExportWritten { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Alerts that interrupt the user instead of only landing in the log.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            AlertType::ValidationFailed { .. }
                | AlertType::ActionFailed { .. }
                | AlertType::ContractViolation { .. }
        )
    }
}

/// A notification/alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub alert_type: AlertType,
    pub acknowledged: bool,
}

impl Notification {
    pub fn new(alert_type: AlertType) -> Self {
        let severity = alert_type.default_severity();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity,
            alert_type,
            acknowledged: false,
        }
    }

    pub fn message(&self) -> String {
        match self.alert_type.detail() {
            Some(detail) => format!("{}: {}", self.alert_type.title(), detail),
            None => self.alert_type.title(),
        }
    }
}

/// Where blocking alerts are shown. Called synchronously, before the
/// failing operation returns to its caller.
pub trait AlertSink: Send + Sync {
    fn present(&self, notification: &Notification);
}

/// Notification manager
pub struct NotificationCenter {
    notifications: Arc<RwLock<Vec<Notification>>>,
    sink: Option<Arc<dyn AlertSink>>,
    max_notifications: usize,
}

impl NotificationCenter {
    pub fn new(sink: Option<Arc<dyn AlertSink>>) -> Self {
        Self {
            notifications: Arc::new(RwLock::new(Vec::new())),
            sink,
            max_notifications: 200,
        }
    }

    /// Send a notification
    pub async fn notify(&self, alert_type: AlertType) {
        let notification = Notification::new(alert_type);

        let message = notification.message();
        match notification.severity {
            Severity::Critical => error!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Info => info!("{}", message),
        }

        if notification.alert_type.is_blocking() {
            if let Some(sink) = &self.sink {
                sink.present(&notification);
            }
        }

        let mut notifications = self.notifications.write().await;
        notifications.insert(0, notification);
        if notifications.len() > self.max_notifications {
            notifications.truncate(self.max_notifications);
        }
    }

    pub async fn validation_failed(&self, action: &str, message: impl Into<String>) {
        self.notify(AlertType::ValidationFailed {
            action: action.to_string(),
            message: message.into(),
        })
        .await;
    }

    /// Files a failed mutation under the alert its error class calls for.
    pub async fn action_failed(&self, action: &str, entity: impl ToString, err: &DashboardError) {
        let message = err.user_message();
        let alert = match err.kind() {
            ErrorKind::ValidationFailure => AlertType::ValidationFailed {
                action: format!("{} {}", action, entity.to_string()),
                message,
            },
            ErrorKind::ContractViolation => AlertType::ContractViolation {
                action: format!("{} {}", action, entity.to_string()),
                message,
            },
            ErrorKind::NetworkFailure | ErrorKind::Local => AlertType::ActionFailed {
                action: action.to_string(),
                entity: entity.to_string(),
                message,
            },
        };
        self.notify(alert).await;
    }

    #[cfg(test)]
    pub async fn get_all(&self) -> Vec<Notification> {
        self.notifications.read().await.clone()
    }

    /// Blocking alerts the user has not dismissed yet
    #[cfg(test)]
    pub async fn get_unacknowledged_alerts(&self) -> Vec<Notification> {
        let notifications = self.notifications.read().await;
        notifications
            .iter()
            .filter(|n| n.alert_type.is_blocking() && !n.acknowledged)
            .cloned()
            .collect()
    }

    /// Acknowledge a notification
    #[cfg(test)]
    pub async fn acknowledge(&self, id: &str) {
        let mut notifications = self.notifications.write().await;
        if let Some(notification) = notifications.iter_mut().find(|n| n.id == id) {
            notification.acknowledged = true;
        }
    }
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        shown: Mutex<Vec<String>>,
    }

    impl AlertSink for RecordingSink {
        fn present(&self, notification: &Notification) {
            self.shown.lock().unwrap().push(notification.message());
        }
    }

    #[test]
    fn test_severity_defaults() {
        let failed = AlertType::ActionFailed {
            action: "stop".to_string(),
            entity: "strategy s1".to_string(),
            message: "locked".to_string(),
        };
        assert_eq!(failed.default_severity(), Severity::Critical);
        assert!(failed.is_blocking());

        let selected = AlertType::ApiKeySelected { id: "3".to_string() };
        assert_eq!(selected.default_severity(), Severity::Info);
        assert!(!selected.is_blocking());
    }

    #[tokio::test]
    async fn test_only_blocking_alerts_reach_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let center = NotificationCenter::new(Some(sink.clone()));

        center.notify(AlertType::ApiKeySelected { id: "3".to_string() }).await;
        center.validation_failed("save strategy", "instance_id is required").await;

        let shown = sink.shown.lock().unwrap().clone();
        assert_eq!(shown, vec!["Cannot save strategy: instance_id is required".to_string()]);
        assert_eq!(center.get_all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_acknowledge() {
        let center = NotificationCenter::default();
        let err = DashboardError::Http {
            status: 500,
            message: "db down".to_string(),
        };
        center.action_failed("remove", "instance 4", &err).await;

        let pending = center.get_unacknowledged_alerts().await;
        assert_eq!(pending.len(), 1);

        center.acknowledge(&pending[0].id).await;
        assert!(center.get_unacknowledged_alerts().await.is_empty());
        assert_eq!(center.get_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_alert_follows_error_class() {
        let center = NotificationCenter::default();

        center
            .action_failed("save", "instance Bot1", &DashboardError::ContractViolation("no id".to_string()))
            .await;
        center
            .action_failed("stop", "strategy 3", &DashboardError::Busy(crate::types::EntityId::from(3)))
            .await;
        center
            .action_failed("stop", "strategy 3", &DashboardError::Rejected("locked".to_string()))
            .await;

        let kinds: Vec<Severity> = center.get_all().await.iter().map(|n| n.severity).collect();
        assert_eq!(kinds, vec![Severity::Critical, Severity::Warning, Severity::Critical]);

        let all = center.get_all().await;
        assert!(matches!(all[0].alert_type, AlertType::ActionFailed { .. }));
        assert!(matches!(all[1].alert_type, AlertType::ValidationFailed { .. }));
        assert!(matches!(all[2].alert_type, AlertType::ContractViolation { .. }));
        assert_eq!(
            all[2].message(),
            "Unexpected response to save instance Bot1: contract violation: no id"
        );
    }
}
