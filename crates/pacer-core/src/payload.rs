//! Normalization of response payload shapes to bytes.
//!
//! Endpoints hand back plain text, raw bytes, or a JSON object that wraps the
//! content under one of a few keys. [`Payload`] names every accepted shape and
//! [`Payload::into_bytes`] is the one place they are converted.

use serde_json::{Map, Value};

use crate::retry::RawFailure;

/// Object keys that may hold the textual content, in lookup order.
const TEXT_KEYS: [&str; 4] = ["text", "content", "data", "output"];

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("unrecognized payload shape: {0}")]
    Unrecognized(String),
    #[error("`bytes` entry {index} is not a byte value")]
    InvalidByte { index: usize },
}

impl From<PayloadError> for RawFailure {
    fn from(e: PayloadError) -> Self {
        RawFailure::MalformedBody(e.to_string())
    }
}

impl Payload {
    /// Canonical byte buffer for this payload.
    pub fn into_bytes(self) -> Result<Vec<u8>, PayloadError> {
        match self {
            Payload::Text(s) => Ok(s.into_bytes()),
            Payload::Bytes(b) => Ok(b),
            Payload::Json(Value::String(s)) => Ok(s.into_bytes()),
            Payload::Json(Value::Object(map)) => object_bytes(&map),
            Payload::Json(other) => Err(PayloadError::Unrecognized(json_type(&other).to_string())),
        }
    }

    /// Like [`into_bytes`](Self::into_bytes), decoded as UTF-8 (lossy).
    pub fn into_text(self) -> Result<String, PayloadError> {
        let bytes = self.into_bytes()?;
        Ok(match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }
}

fn object_bytes(map: &Map<String, Value>) -> Result<Vec<u8>, PayloadError> {
    if let Some(s) = TEXT_KEYS
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
    {
        return Ok(s.as_bytes().to_vec());
    }
    if let Some(items) = map.get("bytes").and_then(Value::as_array) {
        return items
            .iter()
            .enumerate()
            .map(|(index, v)| {
                v.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or(PayloadError::InvalidByte { index })
            })
            .collect();
    }
    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
    Err(PayloadError::Unrecognized(format!(
        "object with keys [{}]",
        keys.join(", ")
    )))
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
