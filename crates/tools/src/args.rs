//! Typed access to a tool call's JSON arguments.

use crate::error::ToolFailure;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// The argument object of one tool call.
///
/// Extraction helpers treat JSON `null` as absent. Required strings must be
/// non-empty; optional empty strings read as `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Map<String, Value>);

impl Args {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Accepts an object or `null`; anything else is not an argument set.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            Value::Null => Some(Self::default()),
            _ => None,
        }
    }

    fn present(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    pub fn required_str(&self, field: &'static str) -> Result<&str, ToolFailure> {
        match self.present(field) {
            None => Err(ToolFailure::MissingArgument(field)),
            Some(Value::String(s)) if s.is_empty() => Err(ToolFailure::MissingArgument(field)),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(ToolFailure::invalid(field, "a string")),
        }
    }

    pub fn optional_str(&self, field: &'static str) -> Result<Option<&str>, ToolFailure> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(ToolFailure::invalid(field, "a string")),
        }
    }

    pub fn optional_string(&self, field: &'static str) -> Result<Option<String>, ToolFailure> {
        Ok(self.optional_str(field)?.map(str::to_string))
    }

    pub fn required_object(&self, field: &'static str) -> Result<&Map<String, Value>, ToolFailure> {
        match self.present(field) {
            None => Err(ToolFailure::MissingArgument(field)),
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(ToolFailure::invalid(field, "an object")),
        }
    }

    /// Non-negative integer; floats are truncated the way JSON numbers
    /// from most models arrive (`20.0`).
    pub fn optional_u64(&self, field: &'static str) -> Result<Option<u64>, ToolFailure> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .map(Some)
                .ok_or_else(|| ToolFailure::invalid(field, "a non-negative integer")),
            Some(_) => Err(ToolFailure::invalid(field, "a non-negative integer")),
        }
    }

    pub fn optional_bool(&self, field: &'static str) -> Result<Option<bool>, ToolFailure> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(ToolFailure::invalid(field, "a boolean")),
        }
    }

    pub fn required_array(&self, field: &'static str) -> Result<&[Value], ToolFailure> {
        match self.present(field) {
            None => Err(ToolFailure::MissingArgument(field)),
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(ToolFailure::invalid(field, "an array")),
        }
    }

    /// String elements of an array argument; other elements are skipped.
    pub fn required_str_list(&self, field: &'static str) -> Result<Vec<String>, ToolFailure> {
        Ok(strings(self.required_array(field)?))
    }

    pub fn optional_str_list(&self, field: &'static str) -> Result<Option<Vec<String>>, ToolFailure> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(strings(items))),
            Some(_) => Err(ToolFailure::invalid(field, "an array of strings")),
        }
    }

    /// Deserialize an optional structured argument.
    pub fn optional_typed<T: DeserializeOwned>(
        &self,
        field: &'static str,
        expected: &'static str,
    ) -> Result<Option<T>, ToolFailure> {
        match self.present(field) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| ToolFailure::invalid(field, format!("{expected} ({e})"))),
        }
    }
}

fn strings(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}
