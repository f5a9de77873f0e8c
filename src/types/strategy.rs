use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use super::wire::{f64_lenient, opt_u32_lenient, u32_lenient};
use super::EntityId;

/// Sell strategies always dispose of the whole position.
pub const SELL_PERCENT: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyStatus {
    Unsaved,
    Stopped,
    Running,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Unsaved => "unsaved",
            StrategyStatus::Stopped => "stopped",
            StrategyStatus::Running => "running",
        }
    }

    pub fn is_persisted(&self) -> bool {
        !matches!(self, StrategyStatus::Unsaved)
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for StrategyStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// Older handlers report a running strategy as "active".
impl<'de> Deserialize<'de> for StrategyStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(match raw.as_deref().map(|s| s.trim().to_lowercase()) {
            Some(s) if s == "running" || s == "active" => StrategyStatus::Running,
            Some(s) if s == "unsaved" => StrategyStatus::Unsaved,
            _ => StrategyStatus::Stopped,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyConfig {
    #[serde(default, deserialize_with = "f64_lenient")]
    pub percent: f64,
    #[serde(default, deserialize_with = "u32_lenient")]
    pub condition_limit: u32,
    #[serde(default, deserialize_with = "f64_lenient")]
    pub interval: f64,
    #[serde(default, deserialize_with = "opt_u32_lenient", skip_serializing_if = "Option::is_none")]
    pub simultaneous_operations: Option<u32>,
}

/// Sell side settings. There is no percent field: it is pinned to
/// [`SELL_PERCENT`] on the wire whatever the backend or the form says.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SellConfig {
    #[serde(default, deserialize_with = "u32_lenient")]
    pub condition_limit: u32,
    #[serde(default, deserialize_with = "f64_lenient")]
    pub interval: f64,
}

impl SellConfig {
    pub fn percent(&self) -> f64 {
        SELL_PERCENT
    }
}

impl Serialize for SellConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SellConfig", 3)?;
        state.serialize_field("percent", &SELL_PERCENT)?;
        state.serialize_field("condition_limit", &self.condition_limit)?;
        state.serialize_field("interval", &self.interval)?;
        state.end()
    }
}

/// Defaults applied to freshly drafted strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyDefaults {
    pub buy: BuyConfig,
    pub sell: SellConfig,
}

impl Default for StrategyDefaults {
    fn default() -> Self {
        Self {
            buy: BuyConfig {
                percent: 0.5,
                condition_limit: 10,
                interval: 30.0,
                simultaneous_operations: Some(1),
            },
            sell: SellConfig {
                condition_limit: 5,
                interval: 15.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "StrategyRecord")]
pub struct Strategy {
    pub id: EntityId,
    pub instance_id: Option<EntityId>,
    pub symbol: Option<String>,
    pub buy: BuyConfig,
    pub sell: SellConfig,
    pub status: StrategyStatus,
}

impl Strategy {
    pub fn draft(instance_id: Option<EntityId>, symbol: impl Into<String>, defaults: &StrategyDefaults) -> Self {
        Self {
            id: EntityId::draft(),
            instance_id,
            symbol: Some(symbol.into()),
            buy: defaults.buy.clone(),
            sell: defaults.sell.clone(),
            status: StrategyStatus::Unsaved,
        }
    }

    /// Everything that blocks a save, in field order. Empty means valid.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.id.is_blank() {
            errors.push("strategy_id is required".to_string());
        }
        if self.instance_id.as_ref().map_or(true, EntityId::is_blank) {
            errors.push("instance_id is required".to_string());
        }
        if self.symbol.as_deref().map_or(true, |s| s.trim().is_empty()) {
            errors.push("symbol is required".to_string());
        }
        if !(0.0..=1.0).contains(&self.buy.percent) {
            errors.push("buy percent must be between 0 and 100%".to_string());
        }
        if self.buy.condition_limit < 1 || self.sell.condition_limit < 1 {
            errors.push("condition_limit must be >= 1".to_string());
        }
        if self.buy.interval < 0.0 || self.sell.interval < 0.0 {
            errors.push("interval must be >= 0".to_string());
        }
        if matches!(self.buy.simultaneous_operations, Some(0)) {
            errors.push("simultaneous_operations must be >= 1".to_string());
        }

        errors
    }
}

/// Raw strategy row. Instance listings carry both the integer row id and the
/// UUID the client drafted; the UUID is the identity start/stop/delete use.
#[derive(Debug, Deserialize)]
struct StrategyRecord {
    #[serde(default)]
    strategy_id: Option<EntityId>,
    #[serde(default)]
    strategy_uuid: Option<EntityId>,
    #[serde(default)]
    instance_id: Option<EntityId>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    buy: Option<BuyConfig>,
    #[serde(default)]
    sell: Option<SellConfig>,
    #[serde(default)]
    status: Option<StrategyStatus>,
}

impl TryFrom<StrategyRecord> for Strategy {
    type Error = String;

    fn try_from(record: StrategyRecord) -> Result<Self, Self::Error> {
        let id = record
            .strategy_uuid
            .or(record.strategy_id)
            .ok_or_else(|| "strategy record without strategy_id".to_string())?;
        let defaults = StrategyDefaults::default();

        Ok(Self {
            id,
            instance_id: record.instance_id,
            symbol: record.symbol,
            buy: record.buy.unwrap_or(defaults.buy),
            sell: record.sell.unwrap_or(defaults.sell),
            status: record.status.unwrap_or(StrategyStatus::Stopped),
        })
    }
}

/// Body of `/save_strategy`.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyPayload {
    pub strategy_id: EntityId,
    pub instance_id: EntityId,
    pub api_key: EntityId,
    #[serde(rename = "instanceName", skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    pub symbol: String,
    pub buy: BuyConfig,
    pub sell: SellConfig,
}
