use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::errors::{ErrorKind, QuarryError, QuarryResult};

/// Fully qualified collection name, `db.collection`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    db: String,
    coll: String,
}

impl Namespace {
    pub fn new(db: &str, coll: &str) -> Self {
        Namespace {
            db: db.to_string(),
            coll: coll.to_string(),
        }
    }

    pub fn parse(ns: &str) -> QuarryResult<Self> {
        match ns.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Namespace::new(db, coll)),
            _ => {
                log::error!("Invalid namespace {}", ns);
                Err(QuarryError::new(
                    &format!("Invalid namespace: {}", ns),
                    ErrorKind::InvalidNamespace,
                ))
            }
        }
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn coll(&self) -> &str {
        &self.coll
    }

    pub fn ns(&self) -> String {
        format!("{}.{}", self.db, self.coll)
    }

    pub fn is_oplog(&self) -> bool {
        self.db == "local" && self.coll.starts_with("oplog.")
    }

    pub fn is_system(&self) -> bool {
        self.coll.starts_with("system.")
    }

    pub fn is_on_internal_db(&self) -> bool {
        matches!(self.db.as_str(), "admin" | "local" | "config")
    }

    pub fn is_local(&self) -> bool {
        self.db == "local"
    }

    /// Writes to replicated namespaces are recorded for replication.
    pub fn is_replicated(&self) -> bool {
        !self.is_local() && !self.is_system_dot_profile()
    }

    pub fn is_temporary_resharding_collection(&self) -> bool {
        self.coll.starts_with("system.resharding.")
    }

    pub fn is_timeseries_buckets_collection(&self) -> bool {
        self.coll.starts_with("system.buckets.")
    }

    pub fn is_drop_pending(&self) -> bool {
        self.coll.starts_with("system.drop.")
    }

    pub fn is_system_dot_profile(&self) -> bool {
        self.coll == "system.profile"
    }

    pub fn is_system_dot_indexes(&self) -> bool {
        self.coll == "system.indexes"
    }

    pub fn is_system_dot_namespaces(&self) -> bool {
        self.coll == "system.namespaces"
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}
