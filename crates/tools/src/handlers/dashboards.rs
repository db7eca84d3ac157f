//! Dashboard tools.

use super::{no_arguments, object_schema, pretty};
use crate::error::ToolFailure;
use crate::registry::{HandlerResult, ToolInvocation, ToolRegistry};
use crmpilot_core::records::{DashboardCreate, DashboardPatch, DashboardWidget};
use futures::FutureExt;
use serde_json::{json, Value};

const DEFAULT_LAYOUT: &str = "two-column";

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "list_dashboards",
        "List all dashboards.",
        no_arguments(),
        |i| list_dashboards(i).boxed(),
    );
    registry.register(
        "get_dashboard",
        "Get a dashboard's full configuration, including its widgets.",
        object_schema(json!({"id": {"type": "string", "description": "Dashboard ID"}}), &["id"]),
        |i| get_dashboard(i).boxed(),
    );
    registry.register(
        "create_dashboard",
        "Create a dashboard with widgets. Widgets are passed as a structured array, NOT as a JSON string.",
        object_schema(
            json!({
                "name": {"type": "string", "description": "Dashboard name (required)"},
                "label": {"type": "string", "description": "Dashboard label (optional, defaults to name)"},
                "description": {"type": "string", "description": "Dashboard description"},
                "layout": {
                    "type": "string",
                    "description": "Layout type: 'two-column', 'grid', or 'single'",
                    "default": DEFAULT_LAYOUT
                },
                "widgets": {
                    "type": "array",
                    "description": "Widget configurations. Each widget has a title and a type ('list', 'chart', 'metric', 'sql_chart'). list: object, filter, columns. chart: object, chart_type ('pie', 'bar', 'line'), group_by, agg_function ('count', 'sum', 'avg'). metric: object, agg_field, agg_function. sql_chart: sql.",
                    "items": widget_schema()
                }
            }),
            &["name", "widgets"],
        ),
        |i| create_dashboard(i).boxed(),
    );
    registry.register(
        "update_dashboard",
        "Update a dashboard's label, description, or layout.",
        object_schema(
            json!({
                "id": {"type": "string", "description": "Dashboard ID"},
                "label": {"type": "string"},
                "description": {"type": "string"},
                "layout": {"type": "string"}
            }),
            &["id"],
        ),
        |i| update_dashboard(i).boxed(),
    );
    registry.register(
        "delete_dashboard",
        "Delete a dashboard.",
        object_schema(json!({"id": {"type": "string", "description": "Dashboard ID"}}), &["id"]),
        |i| delete_dashboard(i).boxed(),
    );
}

fn widget_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string", "description": "Widget title"},
            "type": {"type": "string", "description": "'list', 'chart', 'metric', or 'sql_chart'"},
            "object": {"type": "string", "description": "Target object API name"},
            "filter": {"type": "string", "description": "Filter expression"},
            "columns": {"type": "array", "items": {"type": "string"}, "description": "Columns"},
            "chart_type": {"type": "string", "description": "'pie', 'bar', 'line'"},
            "group_by": {"type": "string", "description": "Field to group by"},
            "agg_field": {"type": "string", "description": "Field to aggregate"},
            "agg_function": {"type": "string", "description": "'count', 'sum', 'avg', 'min', 'max'"},
            "sql": {"type": "string", "description": "SQL query for sql_chart type"},
            "size": {"type": "string", "description": "'small', 'medium', 'large'"}
        },
        "required": ["title", "type"]
    })
}

/// Widgets that are not objects are skipped; objects must carry a title
/// and a type.
fn parse_widgets(raw: &[Value]) -> Result<Vec<DashboardWidget>, ToolFailure> {
    raw.iter()
        .enumerate()
        .filter(|(_, w)| w.is_object())
        .map(|(index, widget)| {
            serde_json::from_value(widget.clone()).map_err(|e| {
                ToolFailure::invalid("widgets", format!("objects with a title and a type (widget {index}: {e})"))
            })
        })
        .collect()
}

async fn list_dashboards(inv: ToolInvocation) -> HandlerResult {
    let dashboards = inv
        .backend
        .list_dashboards(&inv.credential)
        .await
        .map_err(ToolFailure::backend("Failed to list dashboards"))?;
    if dashboards.is_empty() {
        return Ok("No dashboards found.".into());
    }
    Ok(format!("Found {} dashboards:\n{}", dashboards.len(), pretty(&dashboards)?))
}

async fn get_dashboard(inv: ToolInvocation) -> HandlerResult {
    let id = inv.args.required_str("id")?;
    let dashboard = inv
        .backend
        .get_dashboard(&inv.credential, id)
        .await
        .map_err(ToolFailure::backend("Get dashboard failed"))?;
    pretty(&dashboard)
}

async fn create_dashboard(inv: ToolInvocation) -> HandlerResult {
    let name = inv.args.required_str("name")?;
    let widgets = parse_widgets(inv.args.required_array("widgets")?)?;

    let dashboard = DashboardCreate {
        name: name.to_string(),
        label: inv.args.optional_str("label")?.unwrap_or(name).to_string(),
        description: inv.args.optional_string("description")?,
        layout: inv.args.optional_str("layout")?.unwrap_or(DEFAULT_LAYOUT).to_string(),
        widgets,
    };

    let id = inv
        .backend
        .create_dashboard(&inv.credential, &dashboard)
        .await
        .map_err(ToolFailure::backend("Create dashboard failed"))?;
    Ok(format!("Successfully created dashboard '{name}' with ID: {id}"))
}

async fn update_dashboard(inv: ToolInvocation) -> HandlerResult {
    let id = inv.args.required_str("id")?;
    let patch = DashboardPatch {
        label: inv.args.optional_string("label")?,
        description: inv.args.optional_string("description")?,
        layout: inv.args.optional_string("layout")?,
    };
    if patch.is_empty() {
        return Err(ToolFailure::NothingToUpdate("label, description, layout"));
    }

    inv.backend
        .update_dashboard(&inv.credential, id, &patch)
        .await
        .map_err(ToolFailure::backend("Update dashboard failed"))?;
    Ok(format!("Successfully updated dashboard {id}"))
}

async fn delete_dashboard(inv: ToolInvocation) -> HandlerResult {
    let id = inv.args.required_str("id")?;
    inv.backend
        .delete_dashboard(&inv.credential, id)
        .await
        .map_err(ToolFailure::backend("Delete dashboard failed"))?;
    Ok(format!("Successfully deleted dashboard {id}"))
}
