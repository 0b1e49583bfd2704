use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::Document;
use crate::errors::{ErrorKind, QuarryError, QuarryResult};
use crate::validation::{ValidationAction, ValidationLevel};

/// Options of a clustered collection, whose records are keyed by `_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteredIndexOptions {
    pub expire_after_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesOptions {
    pub time_field: String,
    pub meta_field: Option<String>,
}

/// Persisted creation options of a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionOptions {
    pub uuid: Option<Uuid>,
    pub capped: bool,
    /// Size limit of a capped collection in bytes.
    pub capped_size: i64,
    /// Document limit of a capped collection; 0 means unlimited.
    pub capped_max_docs: i64,
    pub clustered: Option<ClusteredIndexOptions>,
    pub validator: Document,
    pub validation_level: Option<ValidationLevel>,
    pub validation_action: Option<ValidationAction>,
    pub record_pre_images: bool,
    pub timeseries: Option<TimeseriesOptions>,
    pub collation: Document,
    pub temp: bool,
}

impl CollectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capped(mut self, max_size: i64, max_docs: i64) -> Self {
        self.capped = true;
        self.capped_size = max_size;
        self.capped_max_docs = max_docs;
        self
    }

    pub fn clustered(mut self, expire_after_seconds: Option<i64>) -> Self {
        self.clustered = Some(ClusteredIndexOptions {
            expire_after_seconds,
        });
        self
    }

    pub fn validator(mut self, validator: Document) -> Self {
        self.validator = validator;
        self
    }

    pub fn validation_level(mut self, level: ValidationLevel) -> Self {
        self.validation_level = Some(level);
        self
    }

    pub fn validation_action(mut self, action: ValidationAction) -> Self {
        self.validation_action = Some(action);
        self
    }

    pub fn record_pre_images(mut self, enabled: bool) -> Self {
        self.record_pre_images = enabled;
        self
    }

    pub fn timeseries(mut self, time_field: &str, meta_field: Option<&str>) -> Self {
        self.timeseries = Some(TimeseriesOptions {
            time_field: time_field.to_string(),
            meta_field: meta_field.map(str::to_string),
        });
        self
    }

    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Checks options that are inconsistent on their own.
    pub fn validate(&self) -> QuarryResult<()> {
        if self.capped {
            if self.capped_size <= 0 {
                return Err(invalid_options("capped collections need a positive size"));
            }
            if self.capped_max_docs < 0 {
                return Err(invalid_options("max documents of a capped collection cannot be negative"));
            }
            if self.clustered.is_some() {
                return Err(invalid_options("clustered collections cannot be capped"));
            }
        }
        if let Some(clustered) = &self.clustered {
            if matches!(clustered.expire_after_seconds, Some(seconds) if seconds < 0) {
                return Err(invalid_options("expireAfterSeconds cannot be negative"));
            }
        }
        Ok(())
    }
}

fn invalid_options(message: &str) -> QuarryError {
    log::error!("Invalid collection options: {}", message);
    QuarryError::new(message, ErrorKind::InvalidOptions)
}
