//! Recycle bin tools: list, restore, and permanently purge deleted records.

use super::{object_schema, pretty};
use crate::error::ToolFailure;
use crate::registry::{HandlerResult, ToolInvocation, ToolRegistry};
use crmpilot_core::records::RecycleScope;
use futures::FutureExt;
use serde_json::json;

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "list_recycle_bin",
        "List deleted records that can still be restored.",
        object_schema(
            json!({
                "scope": {
                    "type": "string",
                    "enum": ["mine", "all"],
                    "description": "'mine' for records you deleted (default), 'all' for everyone's"
                }
            }),
            &[],
        ),
        |i| list_recycle_bin(i).boxed(),
    );
    registry.register(
        "restore_record",
        "Restore a deleted record from the recycle bin.",
        object_schema(
            json!({"id": {"type": "string", "description": "Recycle bin item ID from list_recycle_bin"}}),
            &["id"],
        ),
        |i| restore_record(i).boxed(),
    );
    registry.register(
        "purge_record",
        "Permanently delete a record from the recycle bin. This action cannot be undone.",
        object_schema(
            json!({"id": {"type": "string", "description": "Recycle bin item ID from list_recycle_bin"}}),
            &["id"],
        ),
        |i| purge_record(i).boxed(),
    );
}

async fn list_recycle_bin(inv: ToolInvocation) -> HandlerResult {
    let scope = match inv.args.optional_str("scope")? {
        None => RecycleScope::Mine,
        Some(raw) => RecycleScope::parse(raw).ok_or_else(|| ToolFailure::invalid("scope", "'mine' or 'all'"))?,
    };

    let items = inv
        .backend
        .list_recycle_bin(&inv.credential, scope)
        .await
        .map_err(ToolFailure::backend("Failed to list recycle bin"))?;
    if items.is_empty() {
        return Ok("Recycle bin is empty.".into());
    }
    Ok(format!("Found {} items in recycle bin:\n{}", items.len(), pretty(&items)?))
}

async fn restore_record(inv: ToolInvocation) -> HandlerResult {
    let id = inv.args.required_str("id")?;
    inv.backend
        .restore_record(&inv.credential, id)
        .await
        .map_err(ToolFailure::backend("Restore failed"))?;
    Ok(format!("Restored record {id} from recycle bin"))
}

async fn purge_record(inv: ToolInvocation) -> HandlerResult {
    let id = inv.args.required_str("id")?;
    inv.backend
        .purge_record(&inv.credential, id)
        .await
        .map_err(ToolFailure::backend("Purge failed"))?;
    Ok(format!("Permanently deleted record {id}"))
}
