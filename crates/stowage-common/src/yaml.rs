//! YAML utilities
//!
//! Both directions go through serde_yaml and meet at `serde_json::Value`,
//! the representation every engine manipulates. Using one library for both
//! keeps a string such as `NaN` or `1e400` a string across a round trip.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type for YAML parsing and emitting
#[derive(Debug, Clone)]
pub struct YamlError(String);

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for YamlError {}

impl From<YamlError> for crate::Error {
    fn from(e: YamlError) -> Self {
        crate::Error::serialization(e.0)
    }
}

impl From<serde_yaml::Error> for YamlError {
    fn from(e: serde_yaml::Error) -> Self {
        YamlError(e.to_string())
    }
}

/// Parse a YAML string into a serde_json::Value.
///
/// For multi-document YAML, returns only the first document.
/// Returns `Value::Null` for empty input.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    match serde_yaml::Deserializer::from_str(input).next() {
        Some(doc) => Ok(Value::deserialize(doc)?),
        None => Ok(Value::Null),
    }
}

/// Parse a multi-document YAML string into a Vec of serde_json::Values.
///
/// Empty documents (e.g. a trailing `---`) are dropped.
pub fn parse_yaml_multi(input: &str) -> Result<Vec<Value>, YamlError> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(input) {
        let value = Value::deserialize(doc)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Serialize a value as a single YAML document (without leading `---`)
pub fn to_yaml<T: Serialize>(value: &T) -> Result<String, YamlError> {
    Ok(serde_yaml::to_string(value)?)
}
