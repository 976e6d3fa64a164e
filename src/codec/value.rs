use serde::{Deserialize, Serialize};
use std::fmt;

/// A single column value as held by the embedded store.
///
/// Variants mirror the store's storage classes. The serde form is untagged so archive files
/// stay readable: integers and reals are JSON numbers, text is a string, blobs are byte arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Renders the value as an escaped SQL literal for the textual dump stream.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(v) => v.to_string(),
            Value::Real(v) => render_real(*v),
            Value::Text(v) => format!("'{}'", v.replace('\'', "''")),
            Value::Blob(v) => format!("X'{}'", hex::encode_upper(v)),
        }
    }
}

fn render_real(v: f64) -> String {
    if v.is_nan() {
        // the store keeps NaN as NULL anyway
        "NULL".to_string()
    } else if v.is_infinite() {
        if v.is_sign_positive() { "9e999".to_string() } else { "-9e999".to_string() }
    } else {
        // Debug keeps the shortest round-trip form and always marks the value as real
        format!("{:?}", v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql_literal())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
