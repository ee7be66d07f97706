//! Extraction schema: the ordered field list the model must populate,
//! plus verification and type coercion of candidate answers.

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::dates;
use crate::error::{MaidxError, SchemaError};

/// An extracted record, keyed by field name in schema order.
pub type Record = IndexMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Date,
    #[serde(alias = "date-time", alias = "timestamp")]
    Datetime,
    Array,
    Object,
}

impl FieldType {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => Some(Self::String),
            "number" | "float" => Some(Self::Number),
            "integer" | "int" => Some(Self::Integer),
            "boolean" | "bool" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "datetime" | "date-time" | "timestamp" => Some(Self::Datetime),
            "array" | "list" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    /// JSON Schema fragment for this type.
    fn json_schema(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Number => json!({"type": "number"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Date => json!({"type": "string", "format": "date"}),
            Self::Datetime => json!({"type": "string", "format": "date-time"}),
            Self::Array => json!({"type": "array"}),
            Self::Object => json!({"type": "object"}),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// A field-level problem found while verifying a candidate answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefect {
    /// Field name, or `(root)` / `(parsing)` for whole-answer problems.
    pub field: String,
    pub message: String,
}

impl FieldDefect {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at '{}': {}", self.field, self.message)
    }
}

/// Ordered, immutable set of fields to extract from each document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    fields: Vec<FieldSpec>,
}

#[derive(Deserialize)]
struct NativeSchemaFile {
    title: Option<String>,
    fields: Vec<RawField>,
}

#[derive(Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_required")]
    required: bool,
}

impl ExtractionSchema {
    pub fn new(title: Option<String>, fields: Vec<FieldSpec>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if field.name.trim().is_empty() {
                return Err(SchemaError::Malformed("field with empty name".to_string()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
        }
        Ok(Self { title, fields })
    }

    /// Parse either the native `{"fields": [...]}` layout or a JSON Schema
    /// object with `properties` / `required`.
    pub fn from_json_str(raw: &str) -> Result<Self, SchemaError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| SchemaError::InvalidJson(e.to_string()))?;
        if value.get("fields").is_some() {
            let file: NativeSchemaFile = serde_json::from_value(value)
                .map_err(|e| SchemaError::Malformed(e.to_string()))?;
            let fields = file
                .fields
                .into_iter()
                .map(|raw| {
                    let field_type =
                        FieldType::parse(&raw.tag).ok_or_else(|| SchemaError::UnknownType {
                            field: raw.name.clone(),
                            tag: raw.tag.clone(),
                        })?;
                    Ok(FieldSpec {
                        name: raw.name,
                        field_type,
                        description: raw.description,
                        required: raw.required,
                    })
                })
                .collect::<Result<Vec<_>, SchemaError>>()?;
            Self::new(file.title, fields)
        } else if let Some(props) = value.get("properties").and_then(Value::as_object) {
            Self::from_json_schema(&value, props)
        } else {
            Err(SchemaError::Malformed(
                "expected a 'fields' array or a JSON Schema 'properties' object".to_string(),
            ))
        }
    }

    fn from_json_schema(root: &Value, props: &Map<String, Value>) -> Result<Self, SchemaError> {
        let required: Vec<&str> = root
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let fields = props
            .iter()
            .map(|(name, prop)| {
                let tag = prop.get("type").and_then(Value::as_str).unwrap_or("string");
                let format = prop.get("format").and_then(Value::as_str);
                let field_type = match (tag, format) {
                    ("string", Some("date")) => FieldType::Date,
                    ("string", Some("date-time")) => FieldType::Datetime,
                    _ => FieldType::parse(tag).ok_or_else(|| SchemaError::UnknownType {
                        field: name.clone(),
                        tag: tag.to_string(),
                    })?,
                };
                Ok(FieldSpec {
                    name: name.clone(),
                    field_type,
                    description: prop
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    required: required.contains(&name.as_str()),
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;
        let title = root.get("title").and_then(Value::as_str).map(String::from);
        Self::new(title, fields)
    }

    pub fn load(path: &Path) -> Result<Self, MaidxError> {
        let raw = std::fs::read_to_string(path)?;
        let schema = Self::from_json_str(&raw)?;
        tracing::debug!(path = %path.display(), fields = schema.fields.len(), "Loaded extraction schema");
        Ok(schema)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Data")
    }

    /// JSON Schema rendering used in prompts.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = field.field_type.json_schema();
            if !field.description.is_empty() {
                prop["description"] = Value::String(field.description.clone());
            }
            properties.insert(field.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        json!({
            "title": self.display_title(),
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// One line per field, for the system prompt.
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(|f| {
                let req = if f.required { "required" } else { "optional" };
                if f.description.is_empty() {
                    format!("- {} ({}, {})", f.name, f.field_type, req)
                } else {
                    format!("- {} ({}, {}): {}", f.name, f.field_type, req, f.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Check a candidate answer and coerce it into a record.
    ///
    /// Every defect is collected so the model sees the full list at once.
    pub fn coerce(&self, candidate: &Value) -> Result<Record, Vec<FieldDefect>> {
        let Some(obj) = candidate.as_object() else {
            return Err(vec![FieldDefect::new(
                "(root)",
                format!("expected a JSON object, got {}", json_kind(candidate)),
            )]);
        };

        let mut record = Record::with_capacity(self.fields.len());
        let mut defects = Vec::new();
        for field in &self.fields {
            match obj.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        defects.push(FieldDefect::new(&field.name, "missing required field"));
                    } else {
                        record.insert(field.name.clone(), Value::Null);
                    }
                }
                Some(value) => match coerce_value(field.field_type, value) {
                    Ok(v) => {
                        record.insert(field.name.clone(), v);
                    }
                    Err(msg) => defects.push(FieldDefect::new(&field.name, msg)),
                },
            }
        }

        if defects.is_empty() {
            Ok(record)
        } else {
            Err(defects)
        }
    }

    /// Verification without keeping the coerced record.
    pub fn verify(&self, candidate: &Value) -> Vec<FieldDefect> {
        self.coerce(candidate).err().unwrap_or_default()
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn coerce_value(ty: FieldType, value: &Value) -> Result<Value, String> {
    let mismatch = || format!("expected {}, got {}", ty, json_kind(value));
    match ty {
        FieldType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch()),
        },
        FieldType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => parse_number(s)
                .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                .ok_or_else(|| format!("'{}' is not a number", s)),
            _ => Err(mismatch()),
        },
        FieldType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() != 0.0 => Err(format!("{} is not an integer", n)),
                // i64::MAX rounds up to 2^63 as f64, so the upper bound is exclusive.
                Some(f) if f >= i64::MIN as f64 && f < i64::MAX as f64 => Ok(json!(f as i64)),
                _ => Err(format!("{} is out of integer range", n)),
            },
            Value::String(s) => s
                .trim()
                .replace(',', "")
                .parse::<i64>()
                .map(|i| json!(i))
                .map_err(|_| format!("'{}' is not an integer", s)),
            _ => Err(mismatch()),
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Ok(Value::Bool(true)),
                "false" | "no" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },
            _ => Err(mismatch()),
        },
        FieldType::Date => match value {
            Value::String(s) => dates::parse_date_lenient(s)
                .map(|d| Value::String(dates::to_iso_date(d)))
                .ok_or_else(|| format!("'{}' is not a recognizable date", s)),
            _ => Err(mismatch()),
        },
        FieldType::Datetime => match value {
            Value::String(s) => dates::parse_datetime_lenient(s)
                .map(|dt| Value::String(dates::to_iso_datetime(dt)))
                .ok_or_else(|| format!("'{}' is not a recognizable timestamp", s)),
            _ => Err(mismatch()),
        },
        FieldType::Array => match value {
            Value::Array(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
        FieldType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
    }
}

/// Accepts thousands separators (`1,234.5`).
fn parse_number(s: &str) -> Option<f64> {
    let cleaned = s.trim().replace(',', "");
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}
