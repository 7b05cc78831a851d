use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named structured value attached to a log statement.
///
/// Values may be scalars, arrays, or nested objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> From<(K, V)> for Field {
    fn from((name, value): (K, V)) -> Self {
        Field::new(name, value)
    }
}
