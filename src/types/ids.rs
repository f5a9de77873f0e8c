use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

/// Opaque entity identifier.
///
/// The backend issues integer keys for some tables and UUID strings for
/// others; drafts created on the client always carry a fresh UUID. Both
/// shapes round-trip unchanged so ids can be sent back exactly as received.
/// Equality compares the textual form, so `7` and `"7"` name the same row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(IdRepr);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Number(i64),
    Text(String),
}

impl EntityId {
    /// Fresh client-side identifier for an unsaved draft.
    pub fn draft() -> Self {
        Self(IdRepr::Text(Uuid::new_v4().to_string()))
    }

    pub fn is_blank(&self) -> bool {
        match &self.0 {
            IdRepr::Number(_) => false,
            IdRepr::Text(s) => s.trim().is_empty(),
        }
    }
}

impl PartialEq for EntityId {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (IdRepr::Number(a), IdRepr::Number(b)) => a == b,
            (IdRepr::Text(a), IdRepr::Text(b)) => a == b,
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl Eq for EntityId {}

impl Hash for EntityId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            IdRepr::Number(n) => write!(f, "{}", n),
            IdRepr::Text(s) => write!(f, "{}", s),
        }
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        Self(IdRepr::Number(n))
    }
}

/// Typed input becomes a number only when it is the number's canonical
/// form, so "007" stays text and still matches a server id "007".
impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.parse::<i64>() {
            Ok(n) if n.to_string() == trimmed => Self(IdRepr::Number(n)),
            _ => Self(IdRepr::Text(trimmed.to_string())),
        }
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}
