//! RecordBackend trait: the contract of the record/schema backend.
//!
//! Every operation takes the caller's credential explicitly; the backend
//! has no implicit session affinity. Tools map one-to-one onto these
//! methods, so a failed call is always attributable to a single operation.

use async_trait::async_trait;
use serde_json::Value;
use crate::error::BackendError;
use crate::records::{
    AnalyticsQuery, AppDefinition, AppPatch, DashboardConfig, DashboardCreate, DashboardPatch,
    FieldMetadata, FieldPatch, ObjectMetadata, ObjectPatch, QueryRequest, Record, RecycleBinItem,
    RecycleScope,
};

type BackendResult<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait RecordBackend: Send + Sync {
    // --- Schema ---
    async fn list_objects(&self, credential: &str) -> BackendResult<Vec<ObjectMetadata>>;
    async fn describe_object(&self, credential: &str, object: &str) -> BackendResult<ObjectMetadata>;
    async fn create_object(&self, credential: &str, schema: &ObjectMetadata) -> BackendResult<()>;
    async fn update_object(&self, credential: &str, object: &str, patch: &ObjectPatch) -> BackendResult<()>;
    async fn delete_object(&self, credential: &str, object: &str) -> BackendResult<()>;
    async fn create_field(&self, credential: &str, object: &str, field: &FieldMetadata) -> BackendResult<()>;
    async fn update_field(
        &self,
        credential: &str,
        object: &str,
        field: &str,
        patch: &FieldPatch,
    ) -> BackendResult<()>;
    async fn delete_field(&self, credential: &str, object: &str, field: &str) -> BackendResult<()>;

    // --- Records ---
    async fn query(&self, credential: &str, request: &QueryRequest) -> BackendResult<Vec<Record>>;
    async fn search(&self, credential: &str, term: &str) -> BackendResult<Vec<Value>>;
    async fn search_object(&self, credential: &str, object: &str, term: &str) -> BackendResult<Vec<Record>>;
    async fn get_record(&self, credential: &str, object: &str, id: &str) -> BackendResult<Record>;
    /// Returns the new record's ID.
    async fn create_record(&self, credential: &str, object: &str, data: &Record) -> BackendResult<String>;
    async fn update_record(&self, credential: &str, object: &str, id: &str, data: &Record) -> BackendResult<()>;
    async fn delete_record(&self, credential: &str, object: &str, id: &str) -> BackendResult<()>;
    async fn run_analytics(&self, credential: &str, query: &AnalyticsQuery) -> BackendResult<Value>;

    // --- Dashboards ---
    async fn list_dashboards(&self, credential: &str) -> BackendResult<Vec<DashboardConfig>>;
    async fn get_dashboard(&self, credential: &str, id: &str) -> BackendResult<DashboardConfig>;
    /// Returns the new dashboard's ID.
    async fn create_dashboard(&self, credential: &str, dashboard: &DashboardCreate) -> BackendResult<String>;
    async fn update_dashboard(&self, credential: &str, id: &str, patch: &DashboardPatch) -> BackendResult<()>;
    async fn delete_dashboard(&self, credential: &str, id: &str) -> BackendResult<()>;

    // --- Apps ---
    async fn list_apps(&self, credential: &str) -> BackendResult<Vec<AppDefinition>>;
    /// Returns the new app's ID.
    async fn create_app(&self, credential: &str, app: &AppDefinition) -> BackendResult<String>;
    async fn update_app(&self, credential: &str, id: &str, patch: &AppPatch) -> BackendResult<()>;
    async fn delete_app(&self, credential: &str, id: &str) -> BackendResult<()>;

    // --- Themes ---
    async fn active_theme(&self, credential: &str) -> BackendResult<Value>;
    async fn activate_theme(&self, credential: &str, id: &str) -> BackendResult<()>;

    // --- Recycle bin ---
    async fn list_recycle_bin(&self, credential: &str, scope: RecycleScope) -> BackendResult<Vec<RecycleBinItem>>;
    async fn restore_record(&self, credential: &str, id: &str) -> BackendResult<()>;
    async fn purge_record(&self, credential: &str, id: &str) -> BackendResult<()>;
}
