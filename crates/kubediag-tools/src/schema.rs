//! Typed parameter schemas for tools and skills
//!
//! Schemas are deliberately shallow: they check that the input is an
//! object, that required parameters are present, that no undeclared
//! parameters are passed, and that each value has the declared JSON type.
//! Value semantics (does the pod exist, is the namespace sensible) are left
//! to the safety gate and the tool itself.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// JSON type of a single parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// UTF-8 string
    String,
    /// Signed or unsigned integer
    Integer,
    /// Any JSON number
    Number,
    /// `true` / `false`
    Boolean,
    /// JSON object
    Object,
    /// JSON array
    Array,
}

impl ParamType {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Check whether a JSON value has this type
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Declaration of one parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name
    pub name: String,
    /// Expected JSON type
    #[serde(rename = "type")]
    pub kind: ParamType,
    /// Whether the parameter must be supplied
    #[serde(default)]
    pub required: bool,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

impl ParamSpec {
    /// Required parameter
    #[must_use]
    pub fn required(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: String::new(),
        }
    }

    /// Optional parameter
    #[must_use]
    pub fn optional(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: String::new(),
        }
    }

    /// Attach a description
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Why a parameter object was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    /// Input was not a JSON object
    NotAnObject,
    /// A required parameter is absent or null
    MissingRequired(String),
    /// A parameter is not declared by the schema
    UnknownParam(String),
    /// A parameter has the wrong JSON type
    WrongType {
        /// Parameter name
        name: String,
        /// Declared type
        expected: ParamType,
        /// Observed JSON type
        found: &'static str,
    },
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "params must be an object"),
            Self::MissingRequired(name) => write!(f, "missing required param '{}'", name),
            Self::UnknownParam(name) => write!(f, "undeclared param '{}'", name),
            Self::WrongType {
                name,
                expected,
                found,
            } => write!(f, "param '{}' must be {}, got {}", name, expected, found),
        }
    }
}

impl std::error::Error for SchemaViolation {}

/// Ordered list of parameter declarations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamsSchema {
    params: Vec<ParamSpec>,
}

impl ParamsSchema {
    /// Create a schema from parameter declarations
    #[must_use]
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    /// All declared parameters
    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Look up a declared parameter
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Whether a parameter is declared
    #[must_use]
    pub fn declares(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Copy of this schema with some parameters removed
    #[must_use]
    pub fn without<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let removed: Vec<&str> = names.into_iter().collect();
        Self {
            params: self
                .params
                .iter()
                .filter(|p| !removed.contains(&p.name.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Validate an input object against the schema
    pub fn validate(&self, input: &Value) -> std::result::Result<(), SchemaViolation> {
        let object = input.as_object().ok_or(SchemaViolation::NotAnObject)?;
        self.validate_object(object)
    }

    /// Validate an already-destructured input object
    pub fn validate_object(
        &self,
        object: &Map<String, Value>,
    ) -> std::result::Result<(), SchemaViolation> {
        for spec in &self.params {
            match object.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(SchemaViolation::MissingRequired(spec.name.clone()));
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.matches(value) => {
                    return Err(SchemaViolation::WrongType {
                        name: spec.name.clone(),
                        expected: spec.kind,
                        found: json_type_name(value),
                    });
                }
                Some(_) => {}
            }
        }

        if let Some(unknown) = object.keys().find(|k| !self.declares(k)) {
            return Err(SchemaViolation::UnknownParam(unknown.clone()));
        }

        Ok(())
    }

    /// Render as a JSON Schema object for planning collaborators
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for spec in &self.params {
            properties.insert(
                spec.name.clone(),
                json!({ "type": spec.kind.as_str(), "description": spec.description }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }
}
