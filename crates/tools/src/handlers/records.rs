//! Record query and CRUD tools.

use super::{object_schema, pretty};
use crate::error::ToolFailure;
use crate::registry::{HandlerResult, ToolInvocation, ToolRegistry};
use crmpilot_core::records::{QueryRequest, SortDirection};
use futures::FutureExt;
use serde_json::json;

const DEFAULT_QUERY_LIMIT: u64 = 20;

pub fn register(registry: &mut ToolRegistry) {
    registry.register(
        "query_object",
        "Query records from a specific object using a filter formula. Use 'filter' to specify conditions like \"status == 'Open'\" or \"amount > 1000\".",
        object_schema(
            json!({
                "object_name": {
                    "type": "string",
                    "description": "The API name of the object to search (e.g., 'account', 'jira_issue')"
                },
                "filter": {
                    "type": "string",
                    "description": "Filter expression using formula syntax. Operators: ==, !=, >, <, >=, <=, &&, ||. String matching: CONTAINS(field, 'text'), STARTS_WITH(field, 'text'). Null checks: field == null, field != null. Examples: \"status == 'Open'\", \"amount > 1000 && type == 'Enterprise'\". TIP: If a query returns 0 but the object exists, try limit 1 without a filter to verify data exists."
                },
                "sort_field": {"type": "string", "description": "Field to sort by (e.g. 'created_date')"},
                "sort_order": {"type": "string", "enum": ["ASC", "DESC"], "description": "Sort direction (default DESC)"},
                "limit": {"type": "integer", "description": "Max results (default 20)"}
            }),
            &["object_name"],
        ),
        |i| query_object(i).boxed(),
    );
    registry.register(
        "search_records",
        "Full-text search across records. Pass object_name to search within a single object.",
        object_schema(
            json!({
                "term": {"type": "string", "description": "Text to search for"},
                "object_name": {"type": "string", "description": "Restrict the search to this object"}
            }),
            &["term"],
        ),
        |i| search_records(i).boxed(),
    );
    registry.register(
        "get_record",
        "Fetch a single record by ID.",
        object_schema(
            json!({
                "object_name": {"type": "string", "description": "The API name of the object"},
                "id": {"type": "string", "description": "The record ID"}
            }),
            &["object_name", "id"],
        ),
        |i| get_record(i).boxed(),
    );
    registry.register(
        "create_record",
        "Create a new record in any object/table. Use describe_object first to see required fields.",
        object_schema(
            json!({
                "object_name": {"type": "string", "description": "The API name of the object"},
                "data": {"type": "object", "description": "Field values for the new record"}
            }),
            &["object_name", "data"],
        ),
        |i| create_record(i).boxed(),
    );
    registry.register(
        "update_record",
        "Update an existing record. Use query_object or search_records first to find the record ID.",
        object_schema(
            json!({
                "object_name": {"type": "string", "description": "The API name of the object"},
                "id": {"type": "string", "description": "The record ID to update"},
                "data": {"type": "object", "description": "Fields to update"}
            }),
            &["object_name", "id", "data"],
        ),
        |i| update_record(i).boxed(),
    );
    registry.register(
        "delete_record",
        "Delete a record. Use query_object or search_records first to find the record ID. Deleted records go to the recycle bin.",
        object_schema(
            json!({
                "object_name": {"type": "string", "description": "The API name of the object"},
                "id": {"type": "string", "description": "The record ID to delete"}
            }),
            &["object_name", "id"],
        ),
        |i| delete_record(i).boxed(),
    );
}

async fn query_object(inv: ToolInvocation) -> HandlerResult {
    let object = inv.args.required_str("object_name")?;
    let sort_direction = inv
        .args
        .optional_str("sort_order")?
        .map(|raw| SortDirection::parse(raw).ok_or_else(|| ToolFailure::invalid("sort_order", "ASC or DESC")))
        .transpose()?;

    let request = QueryRequest {
        object_api_name: object.to_string(),
        filter_expr: inv.args.optional_string("filter")?,
        sort_field: inv.args.optional_string("sort_field")?,
        sort_direction,
        limit: Some(inv.args.optional_u64("limit")?.unwrap_or(DEFAULT_QUERY_LIMIT)),
    };

    let records = inv
        .backend
        .query(&inv.credential, &request)
        .await
        .map_err(ToolFailure::backend("Query failed"))?;

    if records.is_empty() {
        return Ok(format!("No records found for {object}"));
    }
    Ok(format!("Found {} records:\n{}", records.len(), pretty(&records)?))
}

async fn search_records(inv: ToolInvocation) -> HandlerResult {
    let term = inv.args.required_str("term")?;

    match inv.args.optional_str("object_name")? {
        Some(object) => {
            let records = inv
                .backend
                .search_object(&inv.credential, object, term)
                .await
                .map_err(ToolFailure::backend("Search failed"))?;
            if records.is_empty() {
                return Ok(format!("No records found for {object}"));
            }
            Ok(format!("Found {} records:\n{}", records.len(), pretty(&records)?))
        }
        None => {
            let hits = inv
                .backend
                .search(&inv.credential, term)
                .await
                .map_err(ToolFailure::backend("Search failed"))?;
            if hits.is_empty() {
                return Ok(format!("No results found for '{term}'"));
            }
            Ok(format!("Found {} results:\n{}", hits.len(), pretty(&hits)?))
        }
    }
}

async fn get_record(inv: ToolInvocation) -> HandlerResult {
    let object = inv.args.required_str("object_name")?;
    let id = inv.args.required_str("id")?;
    let record = inv
        .backend
        .get_record(&inv.credential, object, id)
        .await
        .map_err(ToolFailure::backend("Get failed"))?;
    pretty(&record)
}

async fn create_record(inv: ToolInvocation) -> HandlerResult {
    let object = inv.args.required_str("object_name")?;
    let data = inv.args.required_object("data")?;

    let id = inv
        .backend
        .create_record(&inv.credential, object, data)
        .await
        .map_err(ToolFailure::backend("Create failed"))?;
    Ok(format!("Successfully created {object} record with ID: {id}"))
}

async fn update_record(inv: ToolInvocation) -> HandlerResult {
    let object = inv.args.required_str("object_name")?;
    let id = inv.args.required_str("id")?;
    let data = inv.args.required_object("data")?;

    inv.backend
        .update_record(&inv.credential, object, id, data)
        .await
        .map_err(ToolFailure::backend("Update failed"))?;
    Ok(format!("Successfully updated {object} record {id}"))
}

async fn delete_record(inv: ToolInvocation) -> HandlerResult {
    let object = inv.args.required_str("object_name")?;
    let id = inv.args.required_str("id")?;

    inv.backend
        .delete_record(&inv.credential, object, id)
        .await
        .map_err(ToolFailure::backend("Delete failed"))?;
    Ok(format!("Successfully deleted {object} record {id}"))
}
