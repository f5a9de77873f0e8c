use serde::{Deserialize, Serialize};

use super::wire::bool_lenient;
use super::{EntityId, Side};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub id: EntityId,
    pub strategy_id: EntityId,
    pub side: Side,
    #[serde(default, deserialize_with = "bool_lenient")]
    pub mandatory: bool,
}

impl Indicator {
    pub fn draft(strategy_id: EntityId, side: Side) -> Self {
        Self {
            id: EntityId::draft(),
            strategy_id,
            side,
            mandatory: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_is_optional_condition() {
        let i = Indicator::draft(EntityId::from("s-1"), Side::Sell);
        assert!(!i.mandatory);
        assert_eq!(i.side, Side::Sell);
    }

    #[test]
    fn test_wire_shape() {
        let i: Indicator =
            serde_json::from_str(r#"{"id": "x", "strategy_id": 5, "side": "buy", "mandatory": 1}"#).unwrap();
        assert!(i.mandatory);
        assert_eq!(i.side, Side::Buy);

        let value = serde_json::to_value(&i).unwrap();
        assert_eq!(value["side"], "buy");
        assert_eq!(value["mandatory"], true);
        assert_eq!(value["strategy_id"], 5);
    }
}
