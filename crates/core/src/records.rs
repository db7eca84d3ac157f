//! Record backend data model.
//!
//! Mirrors the JSON the backend's REST API speaks. Backend-owned types that
//! the tools only pass through keep unknown fields in a flattened `extra`
//! map so nothing the backend returns is dropped on the way to the model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A business record: field API name → value.
pub type Record = Map<String, Value>;

/// Schema of an object (table).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub api_name: String,
    pub label: String,
    pub plural_label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_custom: bool,

    #[serde(default)]
    pub fields: Vec<FieldMetadata>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Partial update of an object's schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural_label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ObjectPatch {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.plural_label.is_none() && self.description.is_none()
    }
}

/// A single field on an object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub api_name: String,
    pub label: String,

    /// Kept as a string: the backend knows more types than tools may create.
    #[serde(rename = "type")]
    pub field_type: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_to: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Partial update of a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl FieldPatch {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.required.is_none() && self.options.is_none()
    }
}

/// Field types a tool is allowed to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
    Currency,
    Boolean,
    Date,
    DateTime,
    Email,
    Phone,
    Url,
    Select,
    Lookup,
    Rollup,
}

impl FieldType {
    pub const ALL: [FieldType; 12] = [
        FieldType::Text,
        FieldType::Number,
        FieldType::Currency,
        FieldType::Boolean,
        FieldType::Date,
        FieldType::DateTime,
        FieldType::Email,
        FieldType::Phone,
        FieldType::Url,
        FieldType::Select,
        FieldType::Lookup,
        FieldType::Rollup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "Text",
            FieldType::Number => "Number",
            FieldType::Currency => "Currency",
            FieldType::Boolean => "Boolean",
            FieldType::Date => "Date",
            FieldType::DateTime => "DateTime",
            FieldType::Email => "Email",
            FieldType::Phone => "Phone",
            FieldType::Url => "URL",
            FieldType::Select => "Select",
            FieldType::Lookup => "Lookup",
            FieldType::Rollup => "Rollup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(FieldType::as_str).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Some(SortDirection::Asc),
            "DESC" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

/// A filtered, sorted, limited query against one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub object_api_name: String,

    /// Formula expression evaluated by the backend, e.g. `status == 'Open'`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_expr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_direction: Option<SortDirection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsQuery {
    pub object_api_name: String,

    /// count, sum, avg, or group_by
    pub operation: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_expr: Option<String>,
}

/// Widget layout accepted by the dashboard create endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardWidget {
    pub title: String,

    /// list, chart, metric, or sql_chart
    #[serde(rename = "type")]
    pub widget_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg_field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg_function: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardCreate {
    pub name: String,
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub layout: String,
    pub widgets: Vec<DashboardWidget>,
}

/// A stored dashboard as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub id: String,
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,

    #[serde(default)]
    pub widgets: Vec<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
}

impl DashboardPatch {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.description.is_none() && self.layout.is_none()
    }
}

/// An entry in an app's navigation bar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationItem {
    pub id: String,

    /// object, page, or web
    #[serde(rename = "type")]
    pub item_type: String,

    pub label: String,

    #[serde(default)]
    pub icon: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_api_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_id: Option<String>,
}

/// An application: a named bundle of navigation items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppDefinition {
    pub id: String,
    pub label: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub icon: String,

    #[serde(default)]
    pub color: String,

    #[serde(default)]
    pub is_default: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub navigation_items: Vec<NavigationItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation_items: Option<Vec<NavigationItem>>,
}

impl AppPatch {
    pub fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.description.is_none()
            && self.icon.is_none()
            && self.color.is_none()
            && self.navigation_items.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecycleBinItem {
    pub id: String,
    pub record_id: String,
    pub object_api_name: String,

    #[serde(default)]
    pub record_name: String,

    #[serde(default)]
    pub deleted_by: String,

    #[serde(default)]
    pub deleted_date: String,
}

/// Whose deleted records to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecycleScope {
    Mine,
    All,
}

impl RecycleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecycleScope::Mine => "mine",
            RecycleScope::All => "all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mine" => Some(RecycleScope::Mine),
            "all" => Some(RecycleScope::All),
            _ => None,
        }
    }
}
