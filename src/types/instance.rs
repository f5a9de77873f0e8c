use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use super::wire::opt_timestamp;
use super::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Active,
    Inactive,
}

impl InstanceStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, InstanceStatus::Active)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Active => write!(f, "Active"),
            InstanceStatus::Inactive => write!(f, "Inactive"),
        }
    }
}

// The backend stores status as an integer column (1 = active) but older
// rows and handlers use booleans or labels.
impl<'de> Deserialize<'de> for InstanceStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Code(i64),
            Label(String),
        }

        let raw: Option<Raw> = Option::deserialize(deserializer)?;
        Ok(match raw {
            Some(Raw::Flag(true)) | Some(Raw::Code(1)) => InstanceStatus::Active,
            Some(Raw::Label(label))
                if matches!(label.trim().to_lowercase().as_str(), "1" | "active" | "running") =>
            {
                InstanceStatus::Active
            }
            _ => InstanceStatus::Inactive,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_status")]
    pub status: InstanceStatus,
    #[serde(default, deserialize_with = "opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "opt_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_status() -> InstanceStatus {
    InstanceStatus::Inactive
}

impl Instance {
    /// Unsaved instance carrying a client-generated id.
    pub fn draft(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::draft(),
            name: name.into(),
            status: InstanceStatus::Inactive,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

/// Body of `/save_instance`.
#[derive(Debug, Clone, Serialize)]
pub struct SaveInstanceRequest {
    pub user_id: EntityId,
    pub api_key: EntityId,
    pub strategy: EntityId,
    pub name: String,
}

/// Answer of `/save_instance`; the id is optional on the wire so a missing
/// one can be reported as a contract violation instead of a decode error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveInstanceResponse {
    #[serde(default)]
    pub instance_id: Option<EntityId>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_row_decodes() {
        let json = r#"{
            "id": 9,
            "api_key": 3,
            "name": "Bot1",
            "status": 1,
            "created_at": "2024-05-01T08:00:00Z",
            "updated_at": null,
            "strategies": {"buy": null, "sell": null}
        }"#;
        let instance: Instance = serde_json::from_str(json).unwrap();
        assert_eq!(instance.id, EntityId::from(9));
        assert_eq!(instance.status, InstanceStatus::Active);
        assert!(instance.created_at.is_some());
        assert!(instance.updated_at.is_none());
    }

    #[test]
    fn test_status_variants() {
        let decode = |raw: &str| -> InstanceStatus {
            serde_json::from_str::<InstanceStatus>(raw).unwrap()
        };
        assert_eq!(decode("1"), InstanceStatus::Active);
        assert_eq!(decode("0"), InstanceStatus::Inactive);
        assert_eq!(decode("true"), InstanceStatus::Active);
        assert_eq!(decode("\"active\""), InstanceStatus::Active);
        assert_eq!(decode("\"stopped\""), InstanceStatus::Inactive);
        assert_eq!(decode("null"), InstanceStatus::Inactive);
    }

    #[test]
    fn test_missing_instance_id_is_representable() {
        let resp: SaveInstanceResponse =
            serde_json::from_str(r#"{"message": "Instance saved successfully"}"#).unwrap();
        assert!(resp.instance_id.is_none());
    }
}
