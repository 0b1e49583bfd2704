use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Debug, Display, Formatter};
use std::io;

use crate::errors::{ErrorKind, QuarryError, QuarryResult};

/// Name of the primary key field.
pub const DOC_ID: &str = "_id";

/// An ordered, schemaless document.
///
/// Field order is preserved. The stored form of a document is its compact JSON
/// encoding, and [`Document::byte_size`] is the length of that encoding, which is
/// what capped collections account against their size limit.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Document { fields: Map::new() }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Resolves a dotted path such as `address.zip` or `items.0.sku`.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn put(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.to_string(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// The `_id` of the document, if present.
    pub fn id(&self) -> Option<&Value> {
        self.fields.get(DOC_ID)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    pub fn to_bytes(&self) -> QuarryResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.fields)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> QuarryResult<Self> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(fields)) => Ok(Document { fields }),
            Ok(other) => {
                log::error!("Record does not hold a document: {}", other);
                Err(QuarryError::new(
                    "Record does not hold a document",
                    ErrorKind::EncodingError,
                ))
            }
            Err(err) => {
                log::error!("Failed to decode record: {}", err);
                Err(QuarryError::new(
                    &format!("Failed to decode record: {}", err),
                    ErrorKind::EncodingError,
                ))
            }
        }
    }

    /// Length of the stored encoding.
    pub fn byte_size(&self) -> usize {
        let mut counter = ByteCounter(0);
        // writing a JSON map into a counter cannot fail
        match serde_json::to_writer(&mut counter, &self.fields) {
            Ok(()) => counter.0,
            Err(_) => 0,
        }
    }
}

impl From<Map<String, Value>> for Document {
    fn from(fields: Map<String, Value>) -> Self {
        Document { fields }
    }
}

impl TryFrom<Value> for Document {
    type Error = QuarryError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Document { fields }),
            other => Err(QuarryError::new(
                &format!("{} is not a document", other),
                ErrorKind::EncodingError,
            )),
        }
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.fields)
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(&self.fields) {
            Ok(text) => write!(f, "{}", text),
            Err(_) => write!(f, "{{..}}"),
        }
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Document({})", self)
    }
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[doc(hidden)]
pub fn normalize_key(key: &str) -> String {
    key.trim_matches('"').to_string()
}

/// Builds a [`Document`] from `key: value` pairs.
///
/// ```rust,ignore
/// use quarry::doc;
///
/// let doc = doc! {
///     _id: 1,
///     name: "widget",
///     tags: ["a", "b"],
///     size: { h: 10, w: 4 },
/// };
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::document::Document::new()
    };

    ($($key:tt : $value:tt),* $(,)?) => {
        {
            let mut doc = $crate::document::Document::new();
            $(
                doc.put(&$crate::document::normalize_key(stringify!($key)), $crate::doc_value!($value));
            )*
            doc
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! doc_value {
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::__serde_json::Value::from($crate::doc!{ $($key : $value),* })
    };

    ([ $($value:tt),* $(,)? ]) => {
        $crate::__serde_json::Value::Array(vec![$($crate::doc_value!($value)),*])
    };

    ($value:expr) => {
        $crate::__serde_json::json!($value)
    };
}
