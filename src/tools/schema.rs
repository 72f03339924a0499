//! Structural input schemas for tools.
//!
//! A schema is a flat list of typed fields. It serializes to the JSON-Schema
//! shape callers expect in `tools/list` and validates call arguments before a
//! handler ever sees them.

use crate::errors::ErrorInfo;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub description: String,
    pub required: bool,
    pub enum_values: Option<Vec<Value>>,
    pub uri: bool,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub default: Option<Value>,
}

impl Field {
    pub fn new(name: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            description: description.to_string(),
            required: false,
            enum_values: None,
            uri: false,
            minimum: None,
            maximum: None,
            default: None,
        }
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::new(name, FieldType::String, description)
    }

    pub fn integer(name: &str, description: &str) -> Self {
        Self::new(name, FieldType::Integer, description)
    }

    pub fn number(name: &str, description: &str) -> Self {
        Self::new(name, FieldType::Number, description)
    }

    pub fn boolean(name: &str, description: &str) -> Self {
        Self::new(name, FieldType::Boolean, description)
    }

    pub fn object(name: &str, description: &str) -> Self {
        Self::new(name, FieldType::Object, description)
    }

    pub fn array(name: &str, description: &str) -> Self {
        Self::new(name, FieldType::Array, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| json!(v)).collect());
        self
    }

    /// Requires the string to parse as an absolute URL.
    pub fn uri(mut self) -> Self {
        self.uri = true;
        self
    }

    pub fn range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn min(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    fn to_json(&self) -> Value {
        let mut property = Map::new();
        property.insert("type".to_string(), json!(self.field_type.as_str()));
        property.insert("description".to_string(), json!(self.description));
        if let Some(values) = &self.enum_values {
            property.insert("enum".to_string(), Value::Array(values.clone()));
        }
        if self.uri {
            property.insert("format".to_string(), json!("uri"));
        }
        if let Some(minimum) = self.minimum {
            property.insert("minimum".to_string(), json!(minimum));
        }
        if let Some(maximum) = self.maximum {
            property.insert("maximum".to_string(), json!(maximum));
        }
        if let Some(default) = &self.default {
            property.insert("default".to_string(), default.clone());
        }
        Value::Object(property)
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        if !self.field_type.matches(value) {
            return Err(format!(
                "expected {}, got {}",
                self.field_type.as_str(),
                json_type_name(value)
            ));
        }
        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                let names: Vec<String> = allowed.iter().map(Value::to_string).collect();
                return Err(format!("must be one of {}", names.join(", ")));
            }
        }
        if self.uri {
            let raw = value.as_str().unwrap_or_default();
            url::Url::parse(raw).map_err(|e| format!("not an absolute URL ({})", e))?;
        }
        if let Some(n) = value.as_f64() {
            if let Some(minimum) = self.minimum {
                if n < minimum {
                    return Err(format!("must be >= {}", minimum));
                }
            }
            if let Some(maximum) = self.maximum {
                if n > maximum {
                    return Err(format!("must be <= {}", maximum));
                }
            }
        }
        Ok(())
    }
}

/// Object schema: declared fields in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema {
    fields: Vec<Field>,
}

impl InputSchema {
    pub fn object() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }

    pub fn to_json(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.to_json()))
            .collect();
        let required: Vec<&str> = self.required_fields().collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Checks `arguments`, reporting the first violated field in declaration order.
    /// Undeclared extra arguments are accepted.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<(), ErrorInfo> {
        for field in &self.fields {
            match arguments.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(ErrorInfo::invalid_input(format!(
                        "missing required field '{}'",
                        field.name
                    ))
                    .with_leading_suggestion(format!(
                        "Provide '{}' ({}): {}",
                        field.name,
                        field.field_type.as_str(),
                        field.description
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    if let Err(reason) = field.check(value) {
                        return Err(ErrorInfo::invalid_input(format!(
                            "invalid field '{}': {}",
                            field.name, reason
                        ))
                        .with_leading_suggestion(format!(
                            "Expected '{}' to be {}: {}",
                            field.name,
                            field.field_type.as_str(),
                            field.description
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Serialize for InputSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn navigate_schema() -> InputSchema {
        InputSchema::object()
            .field(Field::string("url", "Page to open").uri().required())
            .field(Field::integer("wait_ms", "Settle time").range(0.0, 60_000.0))
            .field(Field::string("direction", "Scroll direction").one_of(&["up", "down"]))
    }

    #[test]
    fn test_accepts_valid_arguments_and_extras() {
        let schema = navigate_schema();
        let result = schema.validate(&args(json!({
            "url": "https://example.com",
            "wait_ms": 100,
            "unrelated": true
        })));
        assert!(result.is_ok());
    }

    #[test]
    fn test_reports_missing_required_field() {
        let err = navigate_schema().validate(&Map::new()).unwrap_err();
        assert_eq!(err.category, ErrorCategory::InvalidInput);
        assert!(err.message.contains("'url'"));
    }

    #[test]
    fn test_reports_first_violation_in_declaration_order() {
        let err = navigate_schema()
            .validate(&args(json!({"url": 7, "wait_ms": "soon"})))
            .unwrap_err();
        assert!(err.message.contains("'url'"));
        assert!(err.message.contains("expected string, got integer"));
    }

    #[test]
    fn test_rejects_relative_urls() {
        let err = navigate_schema()
            .validate(&args(json!({"url": "/relative/path"})))
            .unwrap_err();
        assert!(err.message.contains("absolute URL"));
    }

    #[test]
    fn test_enforces_enum_and_range() {
        let schema = navigate_schema();
        let err = schema
            .validate(&args(json!({"url": "https://a.test", "direction": "sideways"})))
            .unwrap_err();
        assert!(err.message.contains("'direction'"));

        let err = schema
            .validate(&args(json!({"url": "https://a.test", "wait_ms": 120000})))
            .unwrap_err();
        assert!(err.message.contains("<= 60000"));
    }

    #[test]
    fn test_serializes_json_schema_shape() {
        let value = serde_json::to_value(navigate_schema()).unwrap();
        assert_eq!(value["type"], "object");
        assert_eq!(value["required"], json!(["url"]));
        assert_eq!(value["properties"]["url"]["format"], "uri");
        assert_eq!(value["properties"]["direction"]["enum"], json!(["up", "down"]));
    }
}
