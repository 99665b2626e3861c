//! Action schema registry: static tool contracts and argument validation.

use proto::{DispatchError, ToolDefinition, ValidationError};
use serde_json::{Map, Value, json};

use crate::bash::{BashArgs, BashCommandTool};
use crate::computer::{ComputerAction, ComputerUseTool};
use crate::sandbox::Point;
use crate::Tool;

/// Value type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    /// One of a fixed set of string values.
    Enum(&'static [&'static str]),
    /// Array of exactly two numbers.
    NumberPair,
}

/// One declared argument of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Required regardless of action. Action-specific requirements are
    /// enforced during validation.
    pub required: bool,
    pub description: &'static str,
}

/// Immutable contract of one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
}

impl ToolSchema {
    /// Looks up a declared field.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// JSON-Schema description derived from the field list.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in self.fields {
            let mut prop = match field.kind {
                FieldKind::String => json!({"type": "string"}),
                FieldKind::Number => json!({"type": "number"}),
                FieldKind::Enum(values) => json!({"type": "string", "enum": values}),
                FieldKind::NumberPair => json!({
                    "type": "array",
                    "items": {"type": "number"},
                    "minItems": 2,
                    "maxItems": 2
                }),
            };
            prop["description"] = Value::from(field.description);
            properties.insert(field.name.to_string(), prop);
        }

        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Tool listing entry for this schema.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name, self.description, self.input_schema())
    }
}

/// The closed set of tools this server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ComputerUse,
    BashCommand,
}

impl ToolKind {
    /// All tools, in listing order.
    pub const ALL: [ToolKind; 2] = [ToolKind::ComputerUse, ToolKind::BashCommand];

    /// Resolves a registered tool name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.schema().name == name)
    }

    pub fn name(self) -> &'static str {
        self.schema().name
    }

    pub fn schema(self) -> &'static ToolSchema {
        match self {
            Self::ComputerUse => ComputerUseTool.schema(),
            Self::BashCommand => BashCommandTool.schema(),
        }
    }

    /// Validates raw arguments into the typed form for this tool.
    pub fn validate(self, raw: &Value) -> Result<ValidatedArgs, ValidationError> {
        match self {
            Self::ComputerUse => ComputerUseTool.validate(raw).map(ValidatedArgs::Computer),
            Self::BashCommand => BashCommandTool.validate(raw).map(ValidatedArgs::Bash),
        }
    }
}

/// Strongly-typed arguments produced by validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedArgs {
    Computer(ComputerAction),
    Bash(BashArgs),
}

/// All tool schemas, in listing order.
pub fn describe() -> Vec<&'static ToolSchema> {
    ToolKind::ALL.iter().map(|kind| kind.schema()).collect()
}

/// Validates `raw` against the schema registered under `tool_name`.
pub fn validate(tool_name: &str, raw: &Value) -> Result<ValidatedArgs, DispatchError> {
    let kind =
        ToolKind::from_name(tool_name).ok_or_else(|| DispatchError::UnknownTool(tool_name.to_string()))?;
    Ok(kind.validate(raw)?)
}

/// Typed accessors over a raw argument object.
///
/// Absent keys and explicit `null` both read as `None`; unknown keys are
/// ignored.
pub(crate) struct Fields<'a> {
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(tool: &str, raw: &'a Value) -> Result<Self, ValidationError> {
        match raw {
            Value::Object(map) => Ok(Self { map: Some(map) }),
            Value::Null => Ok(Self { map: None }),
            _ => Err(ValidationError::NotAnObject {
                tool: tool.to_string(),
            }),
        }
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.map?.get(name).filter(|v| !v.is_null())
    }

    pub(crate) fn string(&self, name: &str) -> Result<Option<&'a str>, ValidationError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(ValidationError::invalid(name, "expected a string")),
        }
    }

    pub(crate) fn number(&self, name: &str) -> Result<Option<f64>, ValidationError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => finite_number(name, value).map(Some),
        }
    }

    pub(crate) fn point(&self, name: &str) -> Result<Option<Point>, ValidationError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let items = value
            .as_array()
            .ok_or_else(|| ValidationError::invalid(name, "expected an array of two numbers"))?;
        if items.len() != 2 {
            return Err(ValidationError::invalid(
                name,
                format!("expected exactly 2 numbers, got {}", items.len()),
            ));
        }
        let x = finite_number(name, &items[0])?;
        let y = finite_number(name, &items[1])?;
        Ok(Some(Point::new(x, y)))
    }

    /// Reads a string constrained to `allowed`.
    pub(crate) fn one_of(
        &self,
        name: &str,
        allowed: &[&str],
    ) -> Result<Option<&'a str>, ValidationError> {
        match self.string(name)? {
            Some(value) if !allowed.contains(&value) => Err(ValidationError::invalid(
                name,
                format!("expected one of {}; got {value:?}", allowed.join(", ")),
            )),
            other => Ok(other),
        }
    }
}

fn finite_number(name: &str, value: &Value) -> Result<f64, ValidationError> {
    value
        .as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ValidationError::invalid(name, "expected a number"))
}
