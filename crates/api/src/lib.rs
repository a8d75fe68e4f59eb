//! crudkit collaborator contracts.
//!
//! This crate defines the traits the engine talks to (schema provider, model
//! data service), the status-coded error those collaborators return, the
//! model event bus, and an in-memory `MockApi` for tests and demos.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod cache;
pub mod events;
pub mod filter;
pub mod mock;

pub use cache::SchemaCache;
pub use crudkit_core::columns::ColumnMeta;
pub use crudkit_schema::ModelSchema; // Re-export schema type
pub use events::{EventBus, ModelEvent, ModelEventKind, Subscription};
pub use mock::MockApi;

/// One server-reported validation problem for a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFieldError {
    pub field: String,
    pub messages: Vec<String>,
}

/// Error returned by collaborators. `status` is the HTTP status (0 for transport failures).
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("status {status}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    #[serde(default)]
    pub field_errors: Vec<ServerFieldError>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), field_errors: Vec::new() }
    }

    pub fn transport(message: impl Into<String>) -> Self { Self::new(0, message) }

    pub fn not_found(message: impl Into<String>) -> Self { Self::new(404, message) }

    pub fn validation(field_errors: Vec<ServerFieldError>) -> Self {
        Self { status: 400, message: "validation failed".to_string(), field_errors }
    }

    /// A 400/422 response carrying field-level errors.
    pub fn is_validation(&self) -> bool { matches!(self.status, 400 | 422) && !self.field_errors.is_empty() }

    /// Build an error from a non-2xx response body.
    ///
    /// Understands `{ message, errors: [...] }` as well as bodies whose `message`
    /// is itself the error list. List entries are `{ property|field|path,
    /// constraints{..} | message | messages, children[] }`.
    pub fn from_response(status: u16, body: &Value) -> Self {
        let mut field_errors = Vec::new();
        for key in ["errors", "message"] {
            if let Some(Value::Array(items)) = body.get(key) {
                for item in items { collect_field_errors(item, "", &mut field_errors); }
            }
        }
        let message = match body.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) if items.iter().all(|i| i.is_string()) && !items.is_empty() => {
                items.iter().filter_map(|i| i.as_str()).collect::<Vec<_>>().join("; ")
            }
            _ => body.get("error").and_then(|v| v.as_str()).map(|s| s.to_string()).unwrap_or_else(|| format!("request failed with status {}", status)),
        };
        Self { status, message, field_errors }
    }
}

fn collect_field_errors(item: &Value, prefix: &str, out: &mut Vec<ServerFieldError>) {
    let Some(obj) = item.as_object() else { return };
    let Some(name) = ["property", "field", "path"].iter().find_map(|k| obj.get(*k).and_then(|v| v.as_str())) else { return };
    let field = if prefix.is_empty() { name.to_string() } else { format!("{}.{}", prefix, name) };
    let mut messages: Vec<String> = Vec::new();
    if let Some(c) = obj.get("constraints").and_then(|v| v.as_object()) {
        messages.extend(c.values().filter_map(|v| v.as_str().map(|s| s.to_string())));
    }
    if let Some(m) = obj.get("message").and_then(|v| v.as_str()) { messages.push(m.to_string()); }
    if let Some(ms) = obj.get("messages").and_then(|v| v.as_array()) {
        messages.extend(ms.iter().filter_map(|v| v.as_str().map(|s| s.to_string())));
    }
    if !messages.is_empty() {
        out.push(ServerFieldError { field: field.clone(), messages });
    }
    if let Some(children) = obj.get("children").and_then(|v| v.as_array()) {
        for ch in children { collect_field_errors(ch, &field, out); }
    }
}

/// Map a raw response to a result: a 2xx status is the only success signal.
pub fn check_status(status: u16, body: Value) -> ApiResult<Value> {
    if (200..300).contains(&status) { Ok(body) } else { Err(ApiError::from_response(status, &body)) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorter {
    pub field: String,
    pub order: SortOrder,
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub size: usize,
}

impl Default for Pagination {
    fn default() -> Self { Self { page: 1, size: 20 } }
}

/// Query for `load_models`. Filter values are either a scalar (equality),
/// `{"$like": "%text%"}` or `{"$in": [..]}`; see [`filter::matches_filters`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadQuery {
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default)]
    pub sorter: Option<Sorter>,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub relations: Vec<String>,
    /// Fields to select; empty selects everything.
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page: usize,
    pub size: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Value>,
    pub pagination: PageInfo,
}

/// Model data service consumed by forms and tables.
#[async_trait::async_trait]
pub trait ModelService: Send + Sync {
    async fn load_models(&self, model: &str, query: LoadQuery) -> ApiResult<Page>;

    /// Insert (no `id` in body) or update; returns the stored entity.
    async fn upsert(&self, model: &str, body: Map<String, Value>) -> ApiResult<Value>;

    async fn remove(&self, model: &str, record: &Value) -> ApiResult<()>;

    async fn fetch(&self, model: &str, id: &Value) -> ApiResult<Value>;

    /// Distinct values of one field, for list filters.
    async fn distinct_values(&self, model: &str, field: &str) -> ApiResult<Vec<Value>>;
}

/// Source of model schemas.
#[async_trait::async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn form_schema(&self, model: &str) -> ApiResult<ModelSchema>;

    async fn column_info(&self, model: &str, field: &str) -> ApiResult<ColumnMeta> {
        let schema = self.form_schema(model).await?;
        schema
            .column(field)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("column {} of {}", field, model)))
    }
}
