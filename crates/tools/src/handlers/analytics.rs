use super::{object_schema, pretty};
use crate::error::ToolFailure;
use crate::registry::{HandlerResult, ToolInvocation, ToolRegistry};
use crmpilot_core::records::AnalyticsQuery;
use futures::FutureExt;
use serde_json::json;

const OPERATIONS: [&str; 4] = ["count", "sum", "avg", "group_by"];

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "run_analytics",
        "Run an aggregate over an object's records: count, sum or avg of a field, or counts grouped by a field.",
        object_schema(
            json!({
                "object_name": {"type": "string", "description": "The API name of the object"},
                "operation": {"type": "string", "enum": OPERATIONS},
                "field": {"type": "string", "description": "Field to aggregate (required for sum and avg)"},
                "group_by": {"type": "string", "description": "Field to group by (required for group_by)"},
                "filter": {"type": "string", "description": "Filter expression, same syntax as query_object"}
            }),
            &["object_name", "operation"],
        ),
        |i| run_analytics(i).boxed(),
    );
}

async fn run_analytics(inv: ToolInvocation) -> HandlerResult {
    let object = inv.args.required_str("object_name")?;
    let operation = inv.args.required_str("operation")?;
    if !OPERATIONS.contains(&operation) {
        return Err(ToolFailure::invalid("operation", format!("one of {}", OPERATIONS.join(", "))));
    }

    let field = inv.args.optional_string("field")?;
    let group_by = inv.args.optional_string("group_by")?;
    match operation {
        "sum" | "avg" if field.is_none() => return Err(ToolFailure::MissingArgument("field")),
        "group_by" if group_by.is_none() => return Err(ToolFailure::MissingArgument("group_by")),
        _ => {}
    }

    let query = AnalyticsQuery {
        object_api_name: object.to_string(),
        operation: operation.to_string(),
        field,
        group_by,
        filter_expr: inv.args.optional_string("filter")?,
    };

    let result = inv
        .backend
        .run_analytics(&inv.credential, &query)
        .await
        .map_err(ToolFailure::backend("Analytics failed"))?;
    Ok(format!("Analytics result ({operation} on {object}):\n{}", pretty(&result)?))
}
