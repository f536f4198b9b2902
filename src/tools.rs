//! Tool capability and registry.
//!
//! This module provides:
//!
//! - [`Tool`] trait - the capability every callable tool implements
//! - [`ToolSpec`] - what a tool tells the model about itself
//! - [`ParameterSchema`] - typed parameters synthesized from JSON Schema
//! - [`ToolRegistry`] - ordered, name-unique collection of tools
//!
//! # Implementing a Tool
//!
//! ```ignore
//! use agent_bridge::{Tool, ToolResult, ToolSpec};
//!
//! struct Echo { spec: ToolSpec }
//!
//! #[async_trait]
//! impl Tool for Echo {
//!     fn describe(&self) -> &ToolSpec { &self.spec }
//!
//!     async fn invoke(&self, arguments: Value) -> anyhow::Result<ToolResult> {
//!         Ok(ToolResult::success(arguments.to_string()))
//!     }
//! }
//! ```

use crate::error::BridgeError;
use crate::llm;
use crate::types::ToolResult;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Tool Trait
// ============================================================================

/// A callable unit the agent can use.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name, description and parameters.
    fn describe(&self) -> &ToolSpec;

    /// Run the tool with model-supplied arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool cannot run at all. Failures the model
    /// should see are better returned as [`ToolResult::error`].
    async fn invoke(&self, arguments: Value) -> anyhow::Result<ToolResult>;
}

/// Description of a tool as presented to the model.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    /// Never empty
    pub description: String,
    pub parameters: ParameterSchema,
}

impl ToolSpec {
    /// Builds a spec, replacing an empty description with `execute <name>`.
    #[must_use]
    pub fn new(name: impl Into<String>, description: Option<&str>, parameters: ParameterSchema) -> Self {
        let name = name.into();
        let description = match description.map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => format!("execute {name}"),
        };
        Self {
            name,
            description,
            parameters,
        }
    }

    #[must_use]
    pub fn to_llm_tool(&self) -> llm::Tool {
        llm::Tool {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.parameters.to_json_schema(),
        }
    }
}

// ============================================================================
// Parameter Schema
// ============================================================================

/// Native parameter types. Unrecognized JSON Schema types map to `String`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
}

impl ParamType {
    fn from_json_type(ty: Option<&str>) -> Self {
        match ty {
            Some("integer") => Self::Integer,
            Some("number") => Self::Number,
            Some("boolean") => Self::Boolean,
            Some("array") => Self::Array,
            _ => Self::String,
        }
    }

    const fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
        }
    }

    /// Converts a model-supplied value, accepting the usual lenient forms
    /// (`"5"` for an integer, `"true"` for a boolean).
    fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (Self::String, Value::String(s)) => Some(Value::String(s)),
            (Self::String, other) => Some(Value::String(other.to_string())),
            (Self::Integer, Value::Number(n)) => n
                .as_i64()
                .map(Value::from)
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                        .map(|f| json!(f as i64))
                }),
            (Self::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (Self::Number, Value::Number(n)) => Some(Value::Number(n)),
            (Self::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            (Self::Boolean, Value::Bool(b)) => Some(Value::Bool(b)),
            (Self::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (Self::Array, Value::Array(items)) => Some(Value::Array(items)),
            _ => None,
        }
    }
}

/// One named parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamField {
    pub name: String,
    pub ty: ParamType,
    pub description: Option<String>,
    pub required: bool,
}

/// Typed parameter list synthesized from a JSON Schema object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterSchema {
    pub fields: Vec<ParamField>,
}

impl ParameterSchema {
    /// Reads `properties` and `required` from an object schema. Anything that
    /// is not an object schema yields no parameters.
    #[must_use]
    pub fn from_json_schema(schema: &Value) -> Self {
        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return Self::default();
        };
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let fields = properties
            .iter()
            .map(|(name, prop)| ParamField {
                name: name.clone(),
                ty: ParamType::from_json_type(prop.get("type").and_then(Value::as_str)),
                description: prop
                    .get("description")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
                required: required.contains(&name.as_str()),
            })
            .collect();

        Self { fields }
    }

    /// Renders the schema back to JSON Schema for the model.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(field.ty.json_type()));
            if let Some(description) = &field.description {
                prop.insert("description".into(), json!(description));
            }
            properties.insert(field.name.clone(), Value::Object(prop));
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validates and coerces call arguments.
    ///
    /// Missing required fields and uncoercible values are errors. Optional
    /// fields that are absent or `null` are left out, and undeclared keys are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending argument.
    pub fn bind(&self, arguments: Value) -> Result<Value, String> {
        let mut supplied = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(format!("arguments must be an object, got {other}")),
        };

        let mut bound = Map::new();
        for field in &self.fields {
            match supplied.remove(&field.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    let value = field.ty.coerce(value).ok_or_else(|| {
                        format!(
                            "argument `{}` must be of type {}",
                            field.name,
                            field.ty.json_type()
                        )
                    })?;
                    bound.insert(field.name.clone(), value);
                }
                None if field.required => {
                    return Err(format!("missing required argument `{}`", field.name));
                }
                None => {}
            }
        }

        if !supplied.is_empty() {
            let extra: Vec<&String> = supplied.keys().collect();
            log::debug!("Dropping undeclared arguments {extra:?}");
        }
        Ok(Value::Object(bound))
    }
}

// ============================================================================
// Tool Registry
// ============================================================================

/// Ordered collection of tools with unique, non-empty names.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MalformedInput`] if the name is empty or taken.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<&mut Self, BridgeError> {
        self.register_arc(Arc::new(tool))
    }

    /// Add a shared tool.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MalformedInput`] if the name is empty or taken.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<&mut Self, BridgeError> {
        let name = tool.describe().name.clone();
        if name.trim().is_empty() {
            return Err(BridgeError::MalformedInput("tool name is empty".to_string()));
        }
        if self.by_name.contains_key(&name) {
            return Err(BridgeError::MalformedInput(format!(
                "duplicate tool name {name:?}"
            )));
        }
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(self)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.by_name.get(name).map(|&idx| &self.tools[idx])
    }

    /// Exact lookup, falling back to a match that ignores case, `_` and `-`.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.get(name).or_else(|| {
            let wanted = normalize_tool_name(name);
            self.tools
                .iter()
                .find(|t| normalize_tool_name(&t.describe().name) == wanted)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.describe().name.as_str())
    }

    /// Sorted, comma-joined tool names; equal for equal name sets.
    #[must_use]
    pub fn signature(&self) -> String {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        names.join(",")
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions in registration order.
    #[must_use]
    pub fn to_llm_tools(&self) -> Vec<llm::Tool> {
        self.tools.iter().map(|t| t.describe().to_llm_tool()).collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn normalize_tool_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-') && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
