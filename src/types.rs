//! Core types for recordlink

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// A raw input object as produced by a reader.
pub type RawObject = serde_json::Map<String, serde_json::Value>;

/// Record id type
pub type RecordId = String;

/// Property value types
///
/// Serialized adjacently tagged, so empty lists keep their variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    StringList(Vec<String>),
    Vector(Vec<f64>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            Value::StringList(list) => Some(list),
            _ => None,
        }
    }

    /// Numeric view of the value. Integers and floats widen to a one-element vector.
    pub fn as_vector(&self) -> Option<Vec<f64>> {
        match self {
            Value::Vector(v) => Some(v.clone()),
            Value::Float(f) => Some(vec![*f]),
            Value::Integer(i) => Some(vec![*i as f64]),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in shape errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::StringList(_) => "list<string>",
            Value::Vector(_) => "vector",
        }
    }

    /// Convert a JSON value. Arrays must be homogeneous strings or numbers.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        Ok(match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                if items.iter().all(|v| v.is_string()) {
                    Value::StringList(
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                    )
                } else if items.iter().all(|v| v.is_number()) {
                    Value::Vector(items.iter().filter_map(|v| v.as_f64()).collect())
                } else {
                    return Err(Error::internal("mixed-type arrays are not supported"));
                }
            }
            serde_json::Value::Object(_) => {
                return Err(Error::internal("nested objects are not supported as values"))
            }
        })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(list: Vec<String>) -> Self {
        Value::StringList(list)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Vector(v)
    }
}

/// Membership of a record in a dataset: the value stored inside block key sets.
///
/// Encoded as `{"d":"<dataset_id>","r":"<record_id>"}` with sorted keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Member {
    #[serde(rename = "d")]
    pub dataset_id: String,
    #[serde(rename = "r")]
    pub record_id: RecordId,
}

impl Member {
    pub fn new(dataset_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            record_id: record_id.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!(
            "{{\"d\":{},\"r\":{}}}",
            serde_json::Value::String(self.dataset_id.clone()),
            serde_json::Value::String(self.record_id.clone())
        )
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        Ok(serde_json::from_str(encoded)?)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dataset_id, self.record_id)
    }
}

/// Hex-encode an arbitrary key so it is safe to use as an object name.
pub fn encode_object_key(key: &str) -> String {
    key.bytes().map(|b| format!("{:02x}", b)).collect()
}

/// Inverse of [`encode_object_key`]. Names that are not hex pairs are rejected.
pub fn decode_object_key(encoded: &str) -> Result<String> {
    if encoded.len() % 2 != 0 {
        return Err(Error::internal(format!("odd-length object key: {}", encoded)));
    }
    let digit = |b: u8| (b as char).to_digit(16);
    let bytes = encoded
        .as_bytes()
        .chunks(2)
        .map(|pair| match (digit(pair[0]), digit(pair[1])) {
            (Some(hi), Some(lo)) => Ok((hi * 16 + lo) as u8),
            _ => Err(Error::internal(format!("invalid object key: {}", encoded))),
        })
        .collect::<Result<Vec<u8>>>()?;
    String::from_utf8(bytes).map_err(|e| Error::internal(format!("invalid object key: {}", e)))
}
