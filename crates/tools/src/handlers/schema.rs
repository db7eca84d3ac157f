//! Object and field metadata tools.

use super::{object_schema, pretty};
use crate::error::ToolFailure;
use crate::registry::{HandlerResult, ToolInvocation, ToolRegistry};
use crmpilot_core::records::{FieldMetadata, FieldPatch, FieldType, ObjectMetadata, ObjectPatch};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;

const DEFAULT_LIST_LIMIT: u64 = 50;

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "list_objects",
        "List all available objects/tables in the CRM. Use this FIRST to discover what data is available before searching or creating records.",
        object_schema(
            json!({
                "query": {
                    "type": "string",
                    "description": "Regex pattern to filter objects (case-insensitive). Matches against Name or Label."
                },
                "limit": {"type": "integer", "description": "Max results to return (default 50)"}
            }),
            &[],
        ),
        |i| list_objects(i).boxed(),
    );
    registry.register(
        "describe_object",
        "Get the full schema for an object, including all fields and their types. Use this to understand what fields are required before creating or updating records.",
        object_schema(
            json!({
                "object_name": {
                    "type": "string",
                    "description": "The API name of the object from list_objects (e.g., 'account', 'jira_issue')"
                }
            }),
            &["object_name"],
        ),
        |i| describe_object(i).boxed(),
    );
    registry.register(
        "create_object",
        "Create a new custom object/table. Example: Create a 'Vehicle' object.",
        object_schema(
            json!({
                "api_name": {"type": "string", "description": "API name (snake_case, e.g. 'vehicle'). Must be unique."},
                "label": {"type": "string", "description": "Human readable label (e.g. 'Vehicle')"},
                "plural_label": {"type": "string", "description": "Plural label (e.g. 'Vehicles')"},
                "description": {"type": "string", "description": "Description of the object"}
            }),
            &["api_name", "label", "plural_label"],
        ),
        |i| create_object(i).boxed(),
    );
    registry.register(
        "update_object",
        "Update an object's label, plural label, or description.",
        object_schema(
            json!({
                "object_name": {"type": "string", "description": "API name of the object to update"},
                "label": {"type": "string"},
                "plural_label": {"type": "string"},
                "description": {"type": "string"}
            }),
            &["object_name"],
        ),
        |i| update_object(i).boxed(),
    );
    registry.register(
        "delete_object",
        "Delete a custom object and all of its records. This action cannot be undone.",
        object_schema(
            json!({"object_name": {"type": "string", "description": "API name of the object to delete"}}),
            &["object_name"],
        ),
        |i| delete_object(i).boxed(),
    );
    registry.register(
        "create_field",
        "Create a new field on an existing object.",
        object_schema(
            json!({
                "object_name": {"type": "string", "description": "API name of the object (e.g. 'account')"},
                "api_name": {"type": "string", "description": "API name of the field (snake_case, e.g. 'model_year')"},
                "label": {"type": "string", "description": "Field label"},
                "type": {"type": "string", "enum": FieldType::names(), "description": "Field type"},
                "required": {"type": "boolean"},
                "options": {"type": "array", "items": {"type": "string"}, "description": "Options for Select type"},
                "reference_to": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Target object for Lookup type (e.g. ['account'])"
                }
            }),
            &["object_name", "api_name", "label", "type"],
        ),
        |i| create_field(i).boxed(),
    );
    registry.register(
        "update_field",
        "Update a field's label, required flag, or select options.",
        object_schema(
            json!({
                "object_name": {"type": "string"},
                "field_name": {"type": "string", "description": "API name of the field"},
                "label": {"type": "string"},
                "required": {"type": "boolean"},
                "options": {"type": "array", "items": {"type": "string"}}
            }),
            &["object_name", "field_name"],
        ),
        |i| update_field(i).boxed(),
    );
    registry.register(
        "delete_field",
        "Delete a field from an object. Existing values in that field are lost.",
        object_schema(
            json!({
                "object_name": {"type": "string"},
                "field_name": {"type": "string", "description": "API name of the field"}
            }),
            &["object_name", "field_name"],
        ),
        |i| delete_field(i).boxed(),
    );
}

#[derive(Serialize)]
struct ObjectSummary<'a> {
    name: &'a str,
    label: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'a str,
}

/// Case-insensitive filter for `list_objects`. A query that is not a valid
/// regex is matched as a literal substring.
enum NameMatcher {
    Pattern(regex_lite::Regex),
    Literal(String),
}

impl NameMatcher {
    fn new(query: &str) -> Self {
        match regex_lite::Regex::new(&format!("(?i){query}")) {
            Ok(re) => Self::Pattern(re),
            Err(_) => Self::Literal(query.to_lowercase()),
        }
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Pattern(re) => re.is_match(text),
            Self::Literal(needle) => text.to_lowercase().contains(needle.as_str()),
        }
    }
}

async fn list_objects(inv: ToolInvocation) -> HandlerResult {
    let query = inv.args.optional_str("query")?;
    let limit = inv.args.optional_u64("limit")?.unwrap_or(DEFAULT_LIST_LIMIT).max(1) as usize;

    let objects = inv
        .backend
        .list_objects(&inv.credential)
        .await
        .map_err(ToolFailure::backend("Failed to list objects"))?;

    let matcher = query.map(NameMatcher::new);
    let matching: Vec<ObjectSummary<'_>> = objects
        .iter()
        .filter(|o| {
            matcher
                .as_ref()
                .is_none_or(|m| m.is_match(&o.api_name) || m.is_match(&o.label))
        })
        .map(|o| ObjectSummary {
            name: &o.api_name,
            label: &o.label,
            description: o.description.as_deref().unwrap_or_default(),
        })
        .collect();

    let total = matching.len();
    let shown = &matching[..total.min(limit)];

    let mut header = format!("Found {} objects", shown.len());
    if total > shown.len() {
        header.push_str(&format!(" (showing top {})", shown.len()));
    }
    Ok(format!(
        "{header}:\n{}\n\nUse describe_object to get full field details.",
        pretty(shown)?
    ))
}

async fn describe_object(inv: ToolInvocation) -> HandlerResult {
    let object = inv.args.required_str("object_name")?;
    let meta = inv
        .backend
        .describe_object(&inv.credential, object)
        .await
        .map_err(ToolFailure::backend("Describe failed"))?;
    pretty(&meta)
}

async fn create_object(inv: ToolInvocation) -> HandlerResult {
    let schema = ObjectMetadata {
        api_name: inv.args.required_str("api_name")?.to_string(),
        label: inv.args.required_str("label")?.to_string(),
        plural_label: inv.args.required_str("plural_label")?.to_string(),
        description: inv.args.optional_string("description")?,
        is_custom: true,
        ..Default::default()
    };

    inv.backend
        .create_object(&inv.credential, &schema)
        .await
        .map_err(ToolFailure::backend("Failed to create object"))?;

    Ok(format!(
        "Successfully created object '{}' ({})",
        schema.label, schema.api_name
    ))
}

async fn update_object(inv: ToolInvocation) -> HandlerResult {
    let object = inv.args.required_str("object_name")?;
    let patch = ObjectPatch {
        label: inv.args.optional_string("label")?,
        plural_label: inv.args.optional_string("plural_label")?,
        description: inv.args.optional_string("description")?,
    };
    if patch.is_empty() {
        return Err(ToolFailure::NothingToUpdate("label, plural_label, description"));
    }

    inv.backend
        .update_object(&inv.credential, object, &patch)
        .await
        .map_err(ToolFailure::backend("Failed to update object"))?;
    Ok(format!("Successfully updated object {object}"))
}

async fn delete_object(inv: ToolInvocation) -> HandlerResult {
    let object = inv.args.required_str("object_name")?;
    inv.backend
        .delete_object(&inv.credential, object)
        .await
        .map_err(ToolFailure::backend("Failed to delete object"))?;
    Ok(format!("Successfully deleted object {object}"))
}

async fn create_field(inv: ToolInvocation) -> HandlerResult {
    let object = inv.args.required_str("object_name")?;
    let api_name = inv.args.required_str("api_name")?;
    let label = inv.args.required_str("label")?;
    let raw_type = inv.args.required_str("type")?;
    let field_type = FieldType::parse(raw_type)
        .ok_or_else(|| ToolFailure::invalid("type", format!("one of {}", FieldType::names().join(", "))))?;

    let field = FieldMetadata {
        api_name: api_name.to_string(),
        label: label.to_string(),
        field_type: field_type.as_str().to_string(),
        required: inv.args.optional_bool("required")?.unwrap_or(false),
        options: inv.args.optional_str_list("options")?.unwrap_or_default(),
        reference_to: inv.args.optional_str_list("reference_to")?.unwrap_or_default(),
        ..Default::default()
    };

    inv.backend
        .create_field(&inv.credential, object, &field)
        .await
        .map_err(ToolFailure::backend("Failed to create field"))?;
    Ok(format!("Successfully created field '{api_name}' on {object}"))
}

async fn update_field(inv: ToolInvocation) -> HandlerResult {
    let object = inv.args.required_str("object_name")?;
    let field = inv.args.required_str("field_name")?;
    let patch = FieldPatch {
        label: inv.args.optional_string("label")?,
        required: inv.args.optional_bool("required")?,
        options: inv.args.optional_str_list("options")?,
    };
    if patch.is_empty() {
        return Err(ToolFailure::NothingToUpdate("label, required, options"));
    }

    inv.backend
        .update_field(&inv.credential, object, field, &patch)
        .await
        .map_err(ToolFailure::backend("Failed to update field"))?;
    Ok(format!("Successfully updated field '{field}' on {object}"))
}

async fn delete_field(inv: ToolInvocation) -> HandlerResult {
    let object = inv.args.required_str("object_name")?;
    let field = inv.args.required_str("field_name")?;
    inv.backend
        .delete_field(&inv.credential, object, field)
        .await
        .map_err(ToolFailure::backend("Failed to delete field"))?;
    Ok(format!("Successfully deleted field '{field}' from {object}"))
}
