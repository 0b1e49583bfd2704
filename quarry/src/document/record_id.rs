use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// Key format of a record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyFormat {
    /// Store assigned, monotonically increasing integer ids.
    Long,
    /// Caller supplied string keys; used by clustered collections.
    String,
}

/// Opaque, totally ordered handle of a record inside a record store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordId {
    Long(i64),
    Str(String),
}

impl RecordId {
    /// Cluster key derived from an `_id` value.
    pub fn from_id_value(id: &Value) -> RecordId {
        match id {
            Value::String(s) => RecordId::Str(s.clone()),
            other => RecordId::Str(other.to_string()),
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            RecordId::Long(id) => Some(*id),
            RecordId::Str(_) => None,
        }
    }

    pub fn key_format(&self) -> KeyFormat {
        match self {
            RecordId::Long(_) => KeyFormat::Long,
            RecordId::Str(_) => KeyFormat::String,
        }
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordId::Long(id) => write!(f, "RecordId({})", id),
            RecordId::Str(key) => write!(f, "RecordId({:?})", key),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Long(id)
    }
}
