use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::wire::{bool_lenient, opt_timestamp};
use super::EntityId;

/// Exchange credentials as stored by the backend.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiCredentials {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyCredential {
    #[serde(rename = "api_key_id")]
    pub id: EntityId,
    #[serde(default)]
    pub exchange_id: Option<EntityId>,
    #[serde(default)]
    pub exchange_name: String,
    #[serde(default)]
    pub api_credentials: ApiCredentials,
    #[serde(default, deserialize_with = "opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ApiKeyCredential {
    /// Short label used when listing keys: exchange name plus a masked key.
    pub fn label(&self) -> String {
        format!("{} ({})", self.exchange_name, mask(&self.api_credentials.api_key))
    }
}

/// Body of `/save_user_apikey`.
#[derive(Debug, Clone, Serialize)]
pub struct NewApiKey {
    pub exchange_id: EntityId,
    pub api_credentials: ApiCredentials,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: EntityId,
    pub name: String,
    #[serde(default, deserialize_with = "bool_lenient")]
    pub is_demo: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_backend_listing_row() {
        let json = r#"{
            "api_key_id": 3,
            "exchange_id": 1,
            "exchange_name": "OKX",
            "api_credentials": {"api_key": "abcd1234", "secret_key": "s3cr3t", "passphrase": "pp"},
            "created_at": "Tue, 15 Nov 1994 12:45:26 GMT"
        }"#;
        let key: ApiKeyCredential = serde_json::from_str(json).unwrap();
        assert_eq!(key.id, EntityId::from(3));
        assert_eq!(key.exchange_name, "OKX");
        assert_eq!(key.api_credentials.passphrase.as_deref(), Some("pp"));
        assert!(key.created_at.is_some());
        assert_eq!(key.label(), "OKX (****1234)");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = ApiCredentials {
            api_key: "public".to_string(),
            secret_key: "very-secret".to_string(),
            passphrase: Some("hidden".to_string()),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("public"));
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("hidden"));
    }

    #[test]
    fn test_new_key_payload_shape() {
        let body = NewApiKey {
            exchange_id: EntityId::from(2),
            api_credentials: ApiCredentials {
                api_key: "k".to_string(),
                secret_key: "s".to_string(),
                passphrase: None,
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["exchange_id"], 2);
        assert_eq!(value["api_credentials"]["api_key"], "k");
    }
}
