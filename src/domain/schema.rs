use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::state::value_kind;

// ---------------------------------------------------------------------------
// Parameter schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ParamType::String, Value::String(_))
                | (ParamType::Number, Value::Number(_))
                | (ParamType::Boolean, Value::Bool(_))
                | (ParamType::Object, Value::Object(_))
                | (ParamType::Array, Value::Array(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default = "Parameter::default_required")]
    pub required: bool,
    /// Child nodes for `object` parameters, or the element shape of an
    /// `array` of objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Parameter>,
}

impl Parameter {
    fn default_required() -> bool {
        true
    }

    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Parameter {
            name: name.into(),
            param_type,
            description: String::new(),
            required: true,
            attributes: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_attributes(mut self, attributes: Vec<Parameter>) -> Self {
        self.attributes = attributes;
        self
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = json!({ "type": self.param_type.as_str() });
        if !self.description.is_empty() {
            schema["description"] = json!(self.description);
        }
        match self.param_type {
            ParamType::Object if !self.attributes.is_empty() => {
                let (properties, required) = properties_schema(&self.attributes);
                schema["properties"] = properties;
                schema["required"] = required;
            }
            ParamType::Array if !self.attributes.is_empty() => {
                let (properties, required) = properties_schema(&self.attributes);
                schema["items"] = json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                });
            }
            _ => {}
        }
        schema
    }
}

/// The declaration shape registered by collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl ActionDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        ActionDeclaration {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Check a fully parsed argument value against the declared parameters.
    pub fn validate(&self, args: &Value) -> Result<(), SchemaViolation> {
        match args {
            Value::Object(_) => validate_fields(&self.parameters, args, ""),
            other => Err(SchemaViolation {
                path: "$".into(),
                kind: ViolationKind::WrongType {
                    expected: "object",
                    found: value_kind(other),
                },
            }),
        }
    }

    /// JSON-schema form of the parameters, as advertised to the agent.
    pub fn to_json_schema(&self) -> Value {
        let (properties, required) = properties_schema(&self.parameters);
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn properties_schema(params: &[Parameter]) -> (Value, Value) {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for p in params {
        properties.insert(p.name.clone(), p.to_json_schema());
        if p.required {
            required.push(Value::String(p.name.clone()));
        }
    }
    (Value::Object(properties), Value::Array(required))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    #[error("missing required parameter")]
    Missing,
    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("`{path}`: {kind}")]
pub struct SchemaViolation {
    pub path: String,
    pub kind: ViolationKind,
}

fn validate_fields(params: &[Parameter], value: &Value, prefix: &str) -> Result<(), SchemaViolation> {
    for param in params {
        let path = if prefix.is_empty() {
            param.name.clone()
        } else {
            format!("{prefix}.{}", param.name)
        };
        match value.get(&param.name) {
            None | Some(Value::Null) if !param.required => {}
            None => {
                return Err(SchemaViolation {
                    path,
                    kind: ViolationKind::Missing,
                })
            }
            Some(field) => validate_param(param, field, &path)?,
        }
    }
    Ok(())
}

fn validate_param(param: &Parameter, value: &Value, path: &str) -> Result<(), SchemaViolation> {
    if !param.param_type.matches(value) {
        return Err(SchemaViolation {
            path: path.to_string(),
            kind: ViolationKind::WrongType {
                expected: param.param_type.as_str(),
                found: value_kind(value),
            },
        });
    }
    if param.attributes.is_empty() {
        return Ok(());
    }
    match value {
        Value::Object(_) => validate_fields(&param.attributes, value, path),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{i}]");
                if !item.is_object() {
                    return Err(SchemaViolation {
                        path: item_path,
                        kind: ViolationKind::WrongType {
                            expected: "object",
                            found: value_kind(item),
                        },
                    });
                }
                validate_fields(&param.attributes, item, &item_path)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
