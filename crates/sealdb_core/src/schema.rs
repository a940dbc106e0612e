//! Structural schema validation for inserted and updated records.
//!
//! A schema is a recursive description in a JSON-schema-like dialect.
//! Three fields are enforced: `type`, `properties`
//! (recursively, on fields that are present), and `required`. The
//! remaining recognized fields are carried for round-tripping but are
//! advisory.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A declared table schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Schema {
    /// Expected JSON type tag (`object`, `array`, `string`, ...).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Sub-schemas for named fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Schema>>,

    /// Fields that must be present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,

    /// Sub-schema for array elements (advisory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,

    /// Allowed literal values (advisory).
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,

    /// Format hint such as `email` or `date-time` (advisory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Minimum string length (advisory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,

    /// Maximum string length (advisory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,

    /// Minimum numeric value (advisory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    /// Maximum numeric value (advisory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// Regex the value should match (advisory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Whether undeclared fields are allowed (advisory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<bool>,
}

impl Schema {
    /// Creates a schema expecting an object with the given required fields.
    #[must_use]
    pub fn object(required: &[&str]) -> Self {
        Self {
            kind: Some("object".to_string()),
            required: Some(required.iter().map(|s| (*s).to_string()).collect()),
            ..Self::default()
        }
    }

    /// Validates a value against this schema.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Validation`] naming the offending field.
    pub fn validate(&self, value: &Value) -> DbResult<()> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> DbResult<()> {
        if let Some(expected) = &self.kind {
            let actual = json_type_name(value);
            // Legacy concession: a declared array accepts an object.
            let matches =
                actual == expected || (expected == "array" && value.is_object());
            if !matches {
                return Err(DbError::validation(format!(
                    "{path}: expected type '{expected}', got '{actual}'"
                )));
            }
        }

        if let Some(obj) = value.as_object() {
            if let Some(required) = &self.required {
                for field in required {
                    if !obj.contains_key(field) {
                        return Err(DbError::validation(format!(
                            "{path}: missing required field '{field}'"
                        )));
                    }
                }
            }
            if let Some(properties) = &self.properties {
                for (field, sub) in properties {
                    if let Some(field_value) = obj.get(field) {
                        sub.validate_at(field_value, &format!("{path}.{field}"))?;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Returns the JSON type tag of a value.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_mismatch_fails() {
        let schema = Schema {
            kind: Some("object".to_string()),
            ..Schema::default()
        };
        assert!(schema.validate(&json!({"a": 1})).is_ok());
        assert!(schema.validate(&json!("not an object")).is_err());
    }

    #[test]
    fn declared_array_accepts_object() {
        let schema = Schema {
            kind: Some("array".to_string()),
            ..Schema::default()
        };
        assert!(schema.validate(&json!([1, 2])).is_ok());
        assert!(schema.validate(&json!({"legacy": true})).is_ok());
        assert!(schema.validate(&json!(42)).is_err());
    }

    #[test]
    fn required_fields_enforced() {
        let schema = Schema::object(&["email"]);
        assert!(schema.validate(&json!({"email": "a@x"})).is_ok());

        let err = schema.validate(&json!({"name": "a"})).unwrap_err();
        assert!(err.to_string().contains("email"));
    }

    #[test]
    fn properties_validate_recursively() {
        let mut props = BTreeMap::new();
        props.insert(
            "age".to_string(),
            Schema {
                kind: Some("number".to_string()),
                ..Schema::default()
            },
        );
        let schema = Schema {
            kind: Some("object".to_string()),
            properties: Some(props),
            ..Schema::default()
        };

        assert!(schema.validate(&json!({"age": 30})).is_ok());
        let err = schema.validate(&json!({"age": "thirty"})).unwrap_err();
        assert!(err.to_string().contains("age"));
    }

    #[test]
    fn absent_declared_fields_pass() {
        let mut props = BTreeMap::new();
        props.insert(
            "nickname".to_string(),
            Schema {
                kind: Some("string".to_string()),
                ..Schema::default()
            },
        );
        let schema = Schema {
            kind: Some("object".to_string()),
            properties: Some(props),
            ..Schema::default()
        };
        // Not required, so absence is fine
        assert!(schema.validate(&json!({})).is_ok());
    }

    #[test]
    fn advisory_fields_round_trip() {
        let schema = Schema {
            kind: Some("string".to_string()),
            min_length: Some(3),
            format: Some("email".to_string()),
            ..Schema::default()
        };
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["type"], "string");
        assert_eq!(json["minLength"], 3);
        let back: Schema = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema);
    }
}
