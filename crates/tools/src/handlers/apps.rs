//! App (navigation bundle) tools.

use super::{no_arguments, object_schema, pretty};
use crate::error::ToolFailure;
use crate::registry::{HandlerResult, ToolInvocation, ToolRegistry};
use crmpilot_core::records::{AppDefinition, AppPatch, NavigationItem};
use futures::FutureExt;
use serde_json::{json, Value};

const NAV_ITEMS_EXPECTED: &str = "an array of navigation items with id, type and label";

pub fn register(registry: &mut ToolRegistry) {
    registry.register("list_apps", "List all apps and their navigation.", no_arguments(), |i| {
        list_apps(i).boxed()
    });
    registry.register(
        "create_app",
        "Create an app: a named bundle of navigation items pointing at objects, dashboards, or pages.",
        object_schema(
            json!({
                "id": {"type": "string", "description": "App ID (snake_case, unique)"},
                "label": {"type": "string"},
                "description": {"type": "string"},
                "icon": {"type": "string", "description": "Icon name"},
                "color": {"type": "string", "description": "Accent color"},
                "navigation_items": navigation_schema()
            }),
            &["id", "label"],
        ),
        |i| create_app(i).boxed(),
    );
    registry.register(
        "update_app",
        "Update an app. navigation_items, when given, replaces the whole navigation list.",
        object_schema(
            json!({
                "id": {"type": "string"},
                "label": {"type": "string"},
                "description": {"type": "string"},
                "icon": {"type": "string"},
                "color": {"type": "string"},
                "navigation_items": navigation_schema()
            }),
            &["id"],
        ),
        |i| update_app(i).boxed(),
    );
    registry.register(
        "delete_app",
        "Delete an app. Objects and dashboards it links to are kept.",
        object_schema(json!({"id": {"type": "string"}}), &["id"]),
        |i| delete_app(i).boxed(),
    );
}

fn navigation_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "type": {"type": "string", "enum": ["object", "page", "web", "dashboard"]},
                "label": {"type": "string"},
                "icon": {"type": "string"},
                "object_api_name": {"type": "string"},
                "page_url": {"type": "string"},
                "dashboard_id": {"type": "string"}
            },
            "required": ["id", "type", "label"]
        }
    })
}

async fn list_apps(inv: ToolInvocation) -> HandlerResult {
    let apps = inv
        .backend
        .list_apps(&inv.credential)
        .await
        .map_err(ToolFailure::backend("Failed to list apps"))?;
    if apps.is_empty() {
        return Ok("No apps found.".into());
    }
    Ok(format!("Found {} apps:\n{}", apps.len(), pretty(&apps)?))
}

async fn create_app(inv: ToolInvocation) -> HandlerResult {
    let app = AppDefinition {
        id: inv.args.required_str("id")?.to_string(),
        label: inv.args.required_str("label")?.to_string(),
        description: inv.args.optional_string("description")?.unwrap_or_default(),
        icon: inv.args.optional_string("icon")?.unwrap_or_default(),
        color: inv.args.optional_string("color")?.unwrap_or_default(),
        is_default: false,
        navigation_items: inv
            .args
            .optional_typed::<Vec<NavigationItem>>("navigation_items", NAV_ITEMS_EXPECTED)?
            .unwrap_or_default(),
    };

    let id = inv
        .backend
        .create_app(&inv.credential, &app)
        .await
        .map_err(ToolFailure::backend("Create app failed"))?;
    Ok(format!("Successfully created app '{}' with ID: {id}", app.label))
}

async fn update_app(inv: ToolInvocation) -> HandlerResult {
    let id = inv.args.required_str("id")?;
    let patch = AppPatch {
        label: inv.args.optional_string("label")?,
        description: inv.args.optional_string("description")?,
        icon: inv.args.optional_string("icon")?,
        color: inv.args.optional_string("color")?,
        navigation_items: inv.args.optional_typed("navigation_items", NAV_ITEMS_EXPECTED)?,
    };
    if patch.is_empty() {
        return Err(ToolFailure::NothingToUpdate(
            "label, description, icon, color, navigation_items",
        ));
    }

    inv.backend
        .update_app(&inv.credential, id, &patch)
        .await
        .map_err(ToolFailure::backend("Update app failed"))?;
    Ok(format!("Successfully updated app {id}"))
}

async fn delete_app(inv: ToolInvocation) -> HandlerResult {
    let id = inv.args.required_str("id")?;
    inv.backend
        .delete_app(&inv.credential, id)
        .await
        .map_err(ToolFailure::backend("Delete app failed"))?;
    Ok(format!("Successfully deleted app {id}"))
}
