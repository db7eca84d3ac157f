//! Active-context tools. These touch the caller's session in the context
//! store, never the backend.

use super::{no_arguments, object_schema};
use crate::registry::{HandlerResult, ToolInvocation, ToolRegistry};
use futures::FutureExt;
use serde_json::json;
use std::fmt::Write;

pub fn register(registry: &mut ToolRegistry) {
    let files = json!({
        "files": {
            "type": "array",
            "items": {"type": "string"},
            "description": "List of file paths"
        }
    });

    registry.register(
        "context_add",
        "Add files to the conversation context. The content of these files will be available to the AI.",
        object_schema(files.clone(), &["files"]),
        |i| context_add(i).boxed(),
    );
    registry.register(
        "context_remove",
        "Remove files from the conversation context.",
        object_schema(files, &["files"]),
        |i| context_remove(i).boxed(),
    );
    registry.register(
        "context_list",
        "List all files currently in the conversation context.",
        no_arguments(),
        |i| context_list(i).boxed(),
    );
    registry.register(
        "context_clear",
        "Clear all files from the conversation context.",
        no_arguments(),
        |i| context_clear(i).boxed(),
    );
}

async fn context_add(inv: ToolInvocation) -> HandlerResult {
    let paths = inv.args.required_str_list("files")?;
    let session = inv.contexts.session(&inv.credential);

    let mut added = 0usize;
    let mut errors = Vec::new();
    for path in &paths {
        match session.add_file(path).await {
            Ok(_) => added += 1,
            Err(e) => errors.push(format!("Failed to add {path}: {e}")),
        }
    }

    if added > 0 {
        inv.contexts.persist().await;
    }

    let mut message = format!("Added {added} files to context.");
    if !errors.is_empty() {
        message.push_str("\nErrors:\n");
        message.push_str(&errors.join("\n"));
    }
    Ok(message)
}

async fn context_remove(inv: ToolInvocation) -> HandlerResult {
    let paths = inv.args.required_str_list("files")?;
    let session = inv.contexts.session(&inv.credential);
    let removed = paths.iter().filter(|p| session.remove_file(p)).count();
    if removed > 0 {
        inv.contexts.persist().await;
    }
    Ok(format!("Removed {removed} files from context."))
}

async fn context_list(inv: ToolInvocation) -> HandlerResult {
    let session = inv.contexts.session(&inv.credential);
    let items = session.list_items();
    let total: usize = items.iter().map(|i| i.token_size).sum();

    let mut text = format!("Active Context ({} files, ~{} tokens):\n", items.len(), total);
    for item in &items {
        let _ = writeln!(text, "- {} (~{} tokens)", item.path, item.token_size);
    }
    Ok(text)
}

async fn context_clear(inv: ToolInvocation) -> HandlerResult {
    inv.contexts.session(&inv.credential).clear();
    inv.contexts.persist().await;
    Ok("Context cleared.".into())
}
