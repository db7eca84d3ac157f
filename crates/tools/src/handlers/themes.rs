use super::{no_arguments, object_schema, pretty};
use crate::error::ToolFailure;
use crate::registry::{HandlerResult, ToolInvocation, ToolRegistry};
use futures::FutureExt;
use serde_json::json;

pub fn register(registry: &mut ToolRegistry) {
    registry.register("get_theme", "Get the currently active UI theme.", no_arguments(), |i| {
        get_theme(i).boxed()
    });
    registry.register(
        "activate_theme",
        "Switch the active UI theme.",
        object_schema(json!({"id": {"type": "string", "description": "Theme ID"}}), &["id"]),
        |i| activate_theme(i).boxed(),
    );
}

async fn get_theme(inv: ToolInvocation) -> HandlerResult {
    let theme = inv
        .backend
        .active_theme(&inv.credential)
        .await
        .map_err(ToolFailure::backend("Failed to get theme"))?;
    pretty(&theme)
}

async fn activate_theme(inv: ToolInvocation) -> HandlerResult {
    let id = inv.args.required_str("id")?;
    inv.backend
        .activate_theme(&inv.credential, id)
        .await
        .map_err(ToolFailure::backend("Failed to activate theme"))?;
    Ok(format!("Activated theme {id}"))
}
