use std::collections::BTreeMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// A flag value as delivered by the service.
///
/// Flag values are arbitrary JSON documents. `FlagValue` is a closed representation of them that
/// compares structurally, so two values fetched at different times are equal when their contents
/// are.
///
/// Conveniently implements `From` conversions for common Rust types:
/// ```
/// # use flagwire::FlagValue;
/// let enabled: FlagValue = true.into();
/// let theme: FlagValue = "dark".into();
/// let limit: FlagValue = 10.into();
/// assert_eq!(limit.as_f64(), Some(10.0));
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum FlagValue {
    /// JSON `null`.
    #[default]
    Null,
    /// A boolean value.
    Bool(bool),
    /// A numeric value.
    Number(f64),
    /// A string value.
    String(String),
    /// An array of values.
    Array(Vec<FlagValue>),
    /// An object. Keys are kept sorted so serialization is deterministic.
    Object(BTreeMap<String, FlagValue>),
}

impl FlagValue {
    /// Whether the value is JSON `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, FlagValue::Null)
    }

    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The number, if this is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FlagValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The array, if this is one.
    pub fn as_array(&self) -> Option<&[FlagValue]> {
        match self {
            FlagValue::Array(values) => Some(values),
            _ => None,
        }
    }

    /// The object, if this is one.
    pub fn as_object(&self) -> Option<&BTreeMap<String, FlagValue>> {
        match self {
            FlagValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// A stable textual form of the value, used to key the duplicate-event index.
    pub(crate) fn fingerprint(&self) -> String {
        // Serializing a `FlagValue` cannot fail: keys are strings and there are no custom
        // serializers. Non-finite numbers serialize as `null`.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for FlagValue {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FlagValue::Null,
            serde_json::Value::Bool(b) => FlagValue::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(FlagValue::Null, FlagValue::Number),
            serde_json::Value::String(s) => FlagValue::String(s),
            serde_json::Value::Array(values) => {
                FlagValue::Array(values.into_iter().map(FlagValue::from).collect())
            }
            serde_json::Value::Object(map) => FlagValue::Object(
                map.into_iter()
                    .map(|(key, value)| (key, FlagValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<FlagValue> for serde_json::Value {
    fn from(value: FlagValue) -> Self {
        match value {
            FlagValue::Null => serde_json::Value::Null,
            FlagValue::Bool(b) => serde_json::Value::Bool(b),
            FlagValue::Number(n) => serde_json::Number::from_f64(n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            FlagValue::String(s) => serde_json::Value::String(s),
            FlagValue::Array(values) => {
                serde_json::Value::Array(values.into_iter().map(Into::into).collect())
            }
            FlagValue::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FlagValue;

    #[test]
    fn deserializes_json_values() {
        let value: FlagValue =
            serde_json::from_str(r#"{"b": [1, "two", false, null], "a": 1.5}"#).unwrap();

        let object = value.as_object().unwrap();
        assert_eq!(object["a"], FlagValue::Number(1.5));
        assert_eq!(
            object["b"],
            FlagValue::Array(vec![
                1.into(),
                "two".into(),
                false.into(),
                FlagValue::Null
            ])
        );
    }

    #[test]
    fn compares_structurally() {
        let a: FlagValue = serde_json::from_str(r#"{"x": 1, "y": [true]}"#).unwrap();
        let b: FlagValue = serde_json::from_str(r#"{"y": [true], "x": 1.0}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn converts_from_serde_json() {
        let value = FlagValue::from(serde_json::json!({"on": true}));
        assert_eq!(
            value.as_object().and_then(|m| m.get("on")),
            Some(&FlagValue::Bool(true))
        );
        assert_eq!(serde_json::Value::from(value), serde_json::json!({"on": true}));
    }
}
