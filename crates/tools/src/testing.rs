//! In-memory [`RecordBackend`] for tests.
//!
//! Keeps objects, records, dashboards, apps and the recycle bin in a single
//! mutex-guarded state, records which operations were invoked, and can be
//! switched into a failing mode.

use async_trait::async_trait;
use crmpilot_core::backend::RecordBackend;
use crmpilot_core::error::BackendError;
use crmpilot_core::records::{
    AnalyticsQuery, AppDefinition, AppPatch, DashboardConfig, DashboardCreate, DashboardPatch,
    FieldMetadata, FieldPatch, ObjectMetadata, ObjectPatch, QueryRequest, Record, RecycleBinItem,
    RecycleScope,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

type BackendResult<T> = Result<T, BackendError>;

#[derive(Default)]
struct MockState {
    objects: Vec<ObjectMetadata>,
    records: BTreeMap<String, Vec<Record>>,
    dashboards: Vec<DashboardConfig>,
    apps: Vec<AppDefinition>,
    recycle_bin: Vec<RecycleBinItem>,
    active_theme: String,
    next_id: u64,
    calls: Vec<&'static str>,
    last_credential: Option<String>,
    failure: Option<(u16, String)>,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    fn object_index(&self, object: &str) -> BackendResult<usize> {
        self.objects
            .iter()
            .position(|o| o.api_name == object)
            .ok_or_else(|| not_found(format!("object '{object}' not found")))
    }
}

fn not_found(message: String) -> BackendError {
    BackendError::Api { status: 404, message }
}

fn record_id(record: &Record) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

pub struct MockBackend {
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                active_theme: "default".into(),
                ..MockState::default()
            }),
        }
    }

    pub fn with_object(self, object: ObjectMetadata) -> Self {
        self.lock().objects.push(object);
        self
    }

    /// Seed a record. An `id` is assigned when the record has none.
    pub fn with_record(self, object: &str, mut record: Record) -> Self {
        {
            let mut state = self.lock();
            if record_id(&record).is_none() {
                let id = state.next_id("rec");
                record.insert("id".into(), Value::String(id));
            }
            state.records.entry(object.to_string()).or_default().push(record);
        }
        self
    }

    /// Every following call fails with an API error of this status.
    pub fn fail_with(&self, status: u16, message: &str) {
        self.lock().failure = Some((status, message.to_string()));
    }

    pub fn recover(&self) {
        self.lock().failure = None;
    }

    /// Names of the backend operations invoked so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub fn last_credential(&self) -> Option<String> {
        self.lock().last_credential.clone()
    }

    pub fn records(&self, object: &str) -> Vec<Record> {
        self.lock().records.get(object).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log the call, then fail if a failure is armed.
    fn enter(&self, operation: &'static str, credential: &str) -> BackendResult<MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        state.calls.push(operation);
        state.last_credential = Some(credential.to_string());
        if let Some((status, message)) = state.failure.clone() {
            return Err(BackendError::Api { status, message });
        }
        Ok(state)
    }
}

#[async_trait]
impl RecordBackend for MockBackend {
    async fn list_objects(&self, credential: &str) -> BackendResult<Vec<ObjectMetadata>> {
        Ok(self.enter("list_objects", credential)?.objects.clone())
    }

    async fn describe_object(&self, credential: &str, object: &str) -> BackendResult<ObjectMetadata> {
        let state = self.enter("describe_object", credential)?;
        let index = state.object_index(object)?;
        Ok(state.objects[index].clone())
    }

    async fn create_object(&self, credential: &str, schema: &ObjectMetadata) -> BackendResult<()> {
        let mut state = self.enter("create_object", credential)?;
        if state.objects.iter().any(|o| o.api_name == schema.api_name) {
            return Err(BackendError::Api {
                status: 409,
                message: format!("object '{}' already exists", schema.api_name),
            });
        }
        state.objects.push(schema.clone());
        Ok(())
    }

    async fn update_object(&self, credential: &str, object: &str, patch: &ObjectPatch) -> BackendResult<()> {
        let mut state = self.enter("update_object", credential)?;
        let index = state.object_index(object)?;
        let target = &mut state.objects[index];
        if let Some(label) = &patch.label {
            target.label = label.clone();
        }
        if let Some(plural) = &patch.plural_label {
            target.plural_label = plural.clone();
        }
        if patch.description.is_some() {
            target.description = patch.description.clone();
        }
        Ok(())
    }

    async fn delete_object(&self, credential: &str, object: &str) -> BackendResult<()> {
        let mut state = self.enter("delete_object", credential)?;
        let index = state.object_index(object)?;
        state.objects.remove(index);
        state.records.remove(object);
        Ok(())
    }

    async fn create_field(&self, credential: &str, object: &str, field: &FieldMetadata) -> BackendResult<()> {
        let mut state = self.enter("create_field", credential)?;
        let index = state.object_index(object)?;
        state.objects[index].fields.push(field.clone());
        Ok(())
    }

    async fn update_field(
        &self,
        credential: &str,
        object: &str,
        field: &str,
        patch: &FieldPatch,
    ) -> BackendResult<()> {
        let mut state = self.enter("update_field", credential)?;
        let index = state.object_index(object)?;
        let target = state.objects[index]
            .fields
            .iter_mut()
            .find(|f| f.api_name == field)
            .ok_or_else(|| not_found(format!("field '{field}' not found")))?;
        if let Some(label) = &patch.label {
            target.label = label.clone();
        }
        if let Some(required) = patch.required {
            target.required = required;
        }
        if let Some(options) = &patch.options {
            target.options = options.clone();
        }
        Ok(())
    }

    async fn delete_field(&self, credential: &str, object: &str, field: &str) -> BackendResult<()> {
        let mut state = self.enter("delete_field", credential)?;
        let index = state.object_index(object)?;
        let fields = &mut state.objects[index].fields;
        let before = fields.len();
        fields.retain(|f| f.api_name != field);
        if fields.len() == before {
            return Err(not_found(format!("field '{field}' not found")));
        }
        Ok(())
    }

    async fn query(&self, credential: &str, request: &QueryRequest) -> BackendResult<Vec<Record>> {
        let state = self.enter("query", credential)?;
        let limit = request.limit.unwrap_or(u64::MAX) as usize;
        Ok(state
            .records
            .get(&request.object_api_name)
            .map(|records| records.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn search(&self, credential: &str, term: &str) -> BackendResult<Vec<Value>> {
        let state = self.enter("search", credential)?;
        let needle = term.to_lowercase();
        Ok(state
            .records
            .iter()
            .flat_map(|(object, records)| records.iter().map(move |r| (object, r)))
            .filter(|(_, r)| matches_term(r, &needle))
            .map(|(object, r)| json!({"object_api_name": object, "record": r}))
            .collect())
    }

    async fn search_object(&self, credential: &str, object: &str, term: &str) -> BackendResult<Vec<Record>> {
        let state = self.enter("search_object", credential)?;
        let needle = term.to_lowercase();
        Ok(state
            .records
            .get(object)
            .map(|records| records.iter().filter(|r| matches_term(r, &needle)).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_record(&self, credential: &str, object: &str, id: &str) -> BackendResult<Record> {
        let state = self.enter("get_record", credential)?;
        state
            .records
            .get(object)
            .and_then(|records| records.iter().find(|r| record_id(r) == Some(id)))
            .cloned()
            .ok_or_else(|| not_found(format!("record '{id}' not found")))
    }

    async fn create_record(&self, credential: &str, object: &str, data: &Record) -> BackendResult<String> {
        let mut state = self.enter("create_record", credential)?;
        let id = state.next_id("rec");
        let mut record = data.clone();
        record.insert("id".into(), Value::String(id.clone()));
        state.records.entry(object.to_string()).or_default().push(record);
        Ok(id)
    }

    async fn update_record(&self, credential: &str, object: &str, id: &str, data: &Record) -> BackendResult<()> {
        let mut state = self.enter("update_record", credential)?;
        let record = state
            .records
            .get_mut(object)
            .and_then(|records| records.iter_mut().find(|r| record_id(r) == Some(id)))
            .ok_or_else(|| not_found(format!("record '{id}' not found")))?;
        for (key, value) in data {
            record.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn delete_record(&self, credential: &str, object: &str, id: &str) -> BackendResult<()> {
        let mut state = self.enter("delete_record", credential)?;
        let records = state
            .records
            .get_mut(object)
            .ok_or_else(|| not_found(format!("record '{id}' not found")))?;
        let position = records
            .iter()
            .position(|r| record_id(r) == Some(id))
            .ok_or_else(|| not_found(format!("record '{id}' not found")))?;
        let removed = records.remove(position);

        let bin_id = state.next_id("bin");
        state.recycle_bin.push(RecycleBinItem {
            id: bin_id,
            record_id: id.to_string(),
            object_api_name: object.to_string(),
            record_name: removed.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            deleted_by: credential.to_string(),
            deleted_date: String::new(),
        });
        Ok(())
    }

    async fn run_analytics(&self, credential: &str, query: &AnalyticsQuery) -> BackendResult<Value> {
        let state = self.enter("run_analytics", credential)?;
        let records = state.records.get(&query.object_api_name).cloned().unwrap_or_default();
        let numbers = || {
            records
                .iter()
                .filter_map(|r| query.field.as_deref().and_then(|f| r.get(f)).and_then(Value::as_f64))
        };
        Ok(match query.operation.as_str() {
            "count" => json!({"count": records.len()}),
            "sum" => json!({"sum": numbers().sum::<f64>()}),
            "avg" => {
                let count = numbers().count();
                let avg = if count == 0 { 0.0 } else { numbers().sum::<f64>() / count as f64 };
                json!({"avg": avg})
            }
            _ => {
                let mut groups: BTreeMap<String, u64> = BTreeMap::new();
                for record in &records {
                    let key = query
                        .group_by
                        .as_deref()
                        .and_then(|g| record.get(g))
                        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                        .unwrap_or_else(|| "null".into());
                    *groups.entry(key).or_default() += 1;
                }
                json!({"groups": groups})
            }
        })
    }

    async fn list_dashboards(&self, credential: &str) -> BackendResult<Vec<DashboardConfig>> {
        Ok(self.enter("list_dashboards", credential)?.dashboards.clone())
    }

    async fn get_dashboard(&self, credential: &str, id: &str) -> BackendResult<DashboardConfig> {
        let state = self.enter("get_dashboard", credential)?;
        state
            .dashboards
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| not_found(format!("dashboard '{id}' not found")))
    }

    async fn create_dashboard(&self, credential: &str, dashboard: &DashboardCreate) -> BackendResult<String> {
        let mut state = self.enter("create_dashboard", credential)?;
        let id = state.next_id("dash");
        let widgets = dashboard
            .widgets
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        state.dashboards.push(DashboardConfig {
            id: id.clone(),
            label: dashboard.label.clone(),
            description: dashboard.description.clone(),
            layout: Some(dashboard.layout.clone()),
            widgets,
            ..DashboardConfig::default()
        });
        Ok(id)
    }

    async fn update_dashboard(&self, credential: &str, id: &str, patch: &DashboardPatch) -> BackendResult<()> {
        let mut state = self.enter("update_dashboard", credential)?;
        let target = state
            .dashboards
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| not_found(format!("dashboard '{id}' not found")))?;
        if let Some(label) = &patch.label {
            target.label = label.clone();
        }
        if patch.description.is_some() {
            target.description = patch.description.clone();
        }
        if patch.layout.is_some() {
            target.layout = patch.layout.clone();
        }
        Ok(())
    }

    async fn delete_dashboard(&self, credential: &str, id: &str) -> BackendResult<()> {
        let mut state = self.enter("delete_dashboard", credential)?;
        let before = state.dashboards.len();
        state.dashboards.retain(|d| d.id != id);
        if state.dashboards.len() == before {
            return Err(not_found(format!("dashboard '{id}' not found")));
        }
        Ok(())
    }

    async fn list_apps(&self, credential: &str) -> BackendResult<Vec<AppDefinition>> {
        Ok(self.enter("list_apps", credential)?.apps.clone())
    }

    async fn create_app(&self, credential: &str, app: &AppDefinition) -> BackendResult<String> {
        let mut state = self.enter("create_app", credential)?;
        state.apps.push(app.clone());
        Ok(app.id.clone())
    }

    async fn update_app(&self, credential: &str, id: &str, patch: &AppPatch) -> BackendResult<()> {
        let mut state = self.enter("update_app", credential)?;
        let target = state
            .apps
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| not_found(format!("app '{id}' not found")))?;
        if let Some(label) = &patch.label {
            target.label = label.clone();
        }
        if let Some(items) = &patch.navigation_items {
            target.navigation_items = items.clone();
        }
        Ok(())
    }

    async fn delete_app(&self, credential: &str, id: &str) -> BackendResult<()> {
        let mut state = self.enter("delete_app", credential)?;
        state.apps.retain(|a| a.id != id);
        Ok(())
    }

    async fn active_theme(&self, credential: &str) -> BackendResult<Value> {
        let state = self.enter("active_theme", credential)?;
        Ok(json!({"id": state.active_theme, "is_active": true}))
    }

    async fn activate_theme(&self, credential: &str, id: &str) -> BackendResult<()> {
        let mut state = self.enter("activate_theme", credential)?;
        state.active_theme = id.to_string();
        Ok(())
    }

    async fn list_recycle_bin(&self, credential: &str, scope: RecycleScope) -> BackendResult<Vec<RecycleBinItem>> {
        let state = self.enter("list_recycle_bin", credential)?;
        Ok(state
            .recycle_bin
            .iter()
            .filter(|item| scope == RecycleScope::All || item.deleted_by == credential)
            .cloned()
            .collect())
    }

    async fn restore_record(&self, credential: &str, id: &str) -> BackendResult<()> {
        let mut state = self.enter("restore_record", credential)?;
        let position = state
            .recycle_bin
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| not_found(format!("recycle bin item '{id}' not found")))?;
        let item = state.recycle_bin.remove(position);
        let mut record = Record::new();
        record.insert("id".into(), Value::String(item.record_id));
        if !item.record_name.is_empty() {
            record.insert("name".into(), Value::String(item.record_name));
        }
        state.records.entry(item.object_api_name).or_default().push(record);
        Ok(())
    }

    async fn purge_record(&self, credential: &str, id: &str) -> BackendResult<()> {
        let mut state = self.enter("purge_record", credential)?;
        let before = state.recycle_bin.len();
        state.recycle_bin.retain(|item| item.id != id);
        if state.recycle_bin.len() == before {
            return Err(not_found(format!("recycle bin item '{id}' not found")));
        }
        Ok(())
    }
}

fn matches_term(record: &Record, needle: &str) -> bool {
    record
        .values()
        .filter_map(Value::as_str)
        .any(|v| v.to_lowercase().contains(needle))
}
