use serde::{Deserialize, Serialize};

use crate::document::DOC_ID;

pub const ID_INDEX_NAME: &str = "_id_";

/// Definition of a single field index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    /// Dotted path of the indexed field.
    pub key: String,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: &str, key: &str) -> Self {
        IndexSpec {
            name: name.to_string(),
            key: key.to_string(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn id_index() -> Self {
        IndexSpec::new(ID_INDEX_NAME, DOC_ID).unique()
    }

    pub fn is_id_index(&self) -> bool {
        self.name == ID_INDEX_NAME && self.key == DOC_ID
    }
}
