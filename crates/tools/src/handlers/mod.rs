//! Tool handlers, grouped by the backend area they drive.
//!
//! Each module owns both the catalog entries (name, description, input
//! schema) and the handler functions for its tools, and registers them via
//! its `register` function.

pub mod analytics;
pub mod apps;
pub mod context;
pub mod dashboards;
pub mod records;
pub mod recycle_bin;
pub mod schema;
pub mod themes;

use crate::error::ToolFailure;
use serde::Serialize;
use serde_json::{json, Value};

/// Two-space indented JSON, the form results are shown to the model in.
pub(crate) fn pretty<T: Serialize + ?Sized>(value: &T) -> Result<String, ToolFailure> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Object schema with the given properties and required keys.
pub(crate) fn object_schema(properties: Value, required: &[&str]) -> Value {
    if required.is_empty() {
        json!({ "type": "object", "properties": properties })
    } else {
        json!({ "type": "object", "properties": properties, "required": required })
    }
}

pub(crate) fn no_arguments() -> Value {
    object_schema(json!({}), &[])
}
