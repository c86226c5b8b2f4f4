//! Data-access contract.
//!
//! Every console operation reads and writes records through [`EntityStore`]: list, get,
//! create, partial update and delete over untyped [`Document`]s, addressed by entity name.
//! Two transports satisfy the contract and are selected once at startup through
//! [`Backend`]:
//!
//! - [`rest::RestStore`] proxies to the remote REST API.
//! - [`document::DocumentStore`] talks to a document database (native timestamps, id derived
//!   from the document key).
//!
//! A third implementation, [`local::LocalStore`], keeps the Effects/Cases table in local
//! durable key-value storage behind the same contract.
//!
//! ## Partial updates
//!
//! Writes take a [`Patch`]: fields that are absent stay unchanged, [`PatchValue::Set`] writes
//! a value, and [`PatchValue::Clear`] marks a field for removal. The REST transport omits
//! cleared fields from the request body (a no-op server side); the document store deletes the
//! key from the stored document.

pub mod document;
pub mod local;
pub mod rest;

use crate::config::{BackendKind, ConsoleConfig};
use crate::entities::Document;
use crate::{ConsoleError, ConsoleResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Server-side ordering instruction, written as `"field asc"` or `"field desc"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Parse a `"field asc|desc"` instruction.
    ///
    /// Blank input yields `None`; a missing or unrecognised direction means ascending.
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split_whitespace();
        let field = parts.next()?;
        let descending = parts
            .next()
            .is_some_and(|d| d.eq_ignore_ascii_case("desc"));
        Some(Self {
            field: field.to_string(),
            descending,
        })
    }
}

impl std::fmt::Display for SortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let direction = if self.descending { "desc" } else { "asc" };
        write!(f, "{} {}", self.field, direction)
    }
}

/// A single field change inside a [`Patch`].
#[derive(Clone, Debug, PartialEq)]
pub enum PatchValue {
    Set(Value),
    Clear,
}

/// Partial update: omitted fields are unchanged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Patch {
    fields: BTreeMap<String, PatchValue>,
}

/// Keys owned by the transports; never sent as part of a write.
const SERVER_OWNED_KEYS: &[&str] = &["id", "created_date", "updated_date"];

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), PatchValue::Set(value.into()));
        self
    }

    pub fn clear(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), PatchValue::Clear);
        self
    }

    /// Build a patch setting every serialised field of `record`.
    ///
    /// `None` options are skipped by the entity serialisers, so they stay unchanged.
    /// Server-owned keys (`id`, timestamps) are dropped.
    pub fn from_record<T: Serialize>(record: &T) -> ConsoleResult<Self> {
        match serde_json::to_value(record)? {
            Value::Object(map) => Ok(Self::from_document(map)),
            other => Err(ConsoleError::InvalidInput(format!(
                "expected a JSON object payload, got {other}"
            ))),
        }
    }

    /// Build a patch setting every key of `doc` except server-owned keys.
    pub fn from_document(doc: Document) -> Self {
        let fields = doc
            .into_iter()
            .filter(|(k, _)| !SERVER_OWNED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k, PatchValue::Set(v)))
            .collect();
        Self { fields }
    }

    /// Combine two patches; fields in `other` win.
    pub fn merge(mut self, other: Patch) -> Self {
        self.fields.extend(other.fields);
        self
    }

    pub fn get(&self, field: &str) -> Option<&PatchValue> {
        self.fields.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PatchValue)> {
        self.fields.iter()
    }

    /// Fields to write, with cleared fields omitted.
    pub fn to_set_document(&self) -> Document {
        self.fields
            .iter()
            .filter_map(|(k, v)| match v {
                PatchValue::Set(value) => Some((k.clone(), value.clone())),
                PatchValue::Clear => None,
            })
            .collect()
    }
}

/// Uniform CRUD over stored records of any entity kind.
///
/// Implementations must normalise "record absent" to [`ConsoleError::NotFound`] and report
/// non-success responses as [`ConsoleError::Request`].
pub trait EntityStore: Send + Sync {
    fn list(
        &self,
        entity: &str,
        sort: Option<&SortSpec>,
    ) -> impl Future<Output = ConsoleResult<Vec<Document>>> + Send;

    fn get(&self, entity: &str, id: &str) -> impl Future<Output = ConsoleResult<Document>> + Send;

    /// Insert a record; the store assigns `id`, `created_date` and `updated_date`.
    fn create(
        &self,
        entity: &str,
        data: Patch,
    ) -> impl Future<Output = ConsoleResult<Document>> + Send;

    /// Merge `patch` into the record; the store refreshes `updated_date`.
    fn update(
        &self,
        entity: &str,
        id: &str,
        patch: Patch,
    ) -> impl Future<Output = ConsoleResult<Document>> + Send;

    fn delete(&self, entity: &str, id: &str) -> impl Future<Output = ConsoleResult<()>> + Send;
}

impl<S: EntityStore> EntityStore for Arc<S> {
    fn list(
        &self,
        entity: &str,
        sort: Option<&SortSpec>,
    ) -> impl Future<Output = ConsoleResult<Vec<Document>>> + Send {
        (**self).list(entity, sort)
    }

    fn get(&self, entity: &str, id: &str) -> impl Future<Output = ConsoleResult<Document>> + Send {
        (**self).get(entity, id)
    }

    fn create(
        &self,
        entity: &str,
        data: Patch,
    ) -> impl Future<Output = ConsoleResult<Document>> + Send {
        (**self).create(entity, data)
    }

    fn update(
        &self,
        entity: &str,
        id: &str,
        patch: Patch,
    ) -> impl Future<Output = ConsoleResult<Document>> + Send {
        (**self).update(entity, id, patch)
    }

    fn delete(&self, entity: &str, id: &str) -> impl Future<Output = ConsoleResult<()>> + Send {
        (**self).delete(entity, id)
    }
}

/// The transport chosen at startup. Page logic only ever sees [`EntityStore`].
#[derive(Clone, Debug)]
pub enum Backend {
    Rest(rest::RestStore),
    Document(document::DocumentStore),
}

impl Backend {
    /// Build the configured transport.
    ///
    /// # Errors
    ///
    /// Returns `ConsoleError::Config` if the REST backend is selected without settings, or
    /// an I/O error if the document directory cannot be prepared.
    pub fn from_config(cfg: &ConsoleConfig) -> ConsoleResult<Self> {
        match cfg.backend() {
            BackendKind::Rest => {
                let http = rest::HttpClient::new(cfg.require_rest()?.clone())?;
                Ok(Backend::Rest(rest::RestStore::new(http)))
            }
            BackendKind::Document => {
                let backend = document::JsonDirBackend::open(cfg.document_dir())?;
                Ok(Backend::Document(document::DocumentStore::new(Arc::new(
                    backend,
                ))))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Rest(_) => BackendKind::Rest,
            Backend::Document(_) => BackendKind::Document,
        }
    }
}

impl EntityStore for Backend {
    async fn list(&self, entity: &str, sort: Option<&SortSpec>) -> ConsoleResult<Vec<Document>> {
        match self {
            Backend::Rest(s) => s.list(entity, sort).await,
            Backend::Document(s) => s.list(entity, sort).await,
        }
    }

    async fn get(&self, entity: &str, id: &str) -> ConsoleResult<Document> {
        match self {
            Backend::Rest(s) => s.get(entity, id).await,
            Backend::Document(s) => s.get(entity, id).await,
        }
    }

    async fn create(&self, entity: &str, data: Patch) -> ConsoleResult<Document> {
        match self {
            Backend::Rest(s) => s.create(entity, data).await,
            Backend::Document(s) => s.create(entity, data).await,
        }
    }

    async fn update(&self, entity: &str, id: &str, patch: Patch) -> ConsoleResult<Document> {
        match self {
            Backend::Rest(s) => s.update(entity, id, patch).await,
            Backend::Document(s) => s.update(entity, id, patch).await,
        }
    }

    async fn delete(&self, entity: &str, id: &str) -> ConsoleResult<()> {
        match self {
            Backend::Rest(s) => s.delete(entity, id).await,
            Backend::Document(s) => s.delete(entity, id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sort_spec_parsing() {
        assert_eq!(SortSpec::parse("   "), None);
        assert_eq!(SortSpec::parse("vitaminNameHe"), Some(SortSpec::asc("vitaminNameHe")));
        assert_eq!(
            SortSpec::parse("created_date DESC"),
            Some(SortSpec::desc("created_date"))
        );
        assert_eq!(SortSpec::parse("name sideways"), Some(SortSpec::asc("name")));
        assert_eq!(SortSpec::desc("created_date").to_string(), "created_date desc");
    }

    #[test]
    fn patch_from_document_drops_server_owned_keys() {
        let doc = json!({ "id": "x", "updated_date": "t", "foodNameHe": "תפוח" });
        let patch = Patch::from_document(doc.as_object().unwrap().clone());
        assert!(patch.get("id").is_none());
        assert!(patch.get("updated_date").is_none());
        assert_eq!(
            patch.get("foodNameHe"),
            Some(&PatchValue::Set(json!("תפוח")))
        );
    }

    #[test]
    fn set_document_omits_cleared_fields() {
        let patch = Patch::new()
            .clear("labTestDeficiency")
            .set("labTestDeficiencyDescription", "")
            .set("labTestDeficiencyDetails", "<p>x</p>");
        let doc = patch.to_set_document();
        assert!(!doc.contains_key("labTestDeficiency"));
        assert_eq!(doc["labTestDeficiencyDescription"], json!(""));
        assert_eq!(doc.len(), 2);
    }
}
