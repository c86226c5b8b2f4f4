//! Document-database transport.
//!
//! Records live in one collection per entity kind, keyed by a generated document key. The
//! key is the record id; it is never stored as a field. Write stamps are native timestamp
//! values ([`DocValue::Timestamp`]) and are rendered as ISO-8601 strings when read back.
//!
//! Two backends are provided: [`MemoryBackend`] for tests and throwaway sessions, and
//! [`JsonDirBackend`], which keeps one JSON file per collection in a directory.

use super::{EntityStore, Patch, PatchValue, SortSpec};
use crate::entities::Document;
use crate::{ConsoleError, ConsoleResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Length of generated document keys.
const DOCUMENT_KEY_LEN: usize = 20;

/// Key used to tag native timestamps in the JSON file encoding.
const TIMESTAMP_TAG: &str = "$timestamp";

/// A value as held by the document database.
#[derive(Clone, Debug, PartialEq)]
pub enum DocValue {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<DocValue>),
    Map(NativeDoc),
}

pub type NativeDoc = BTreeMap<String, DocValue>;

fn iso(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl DocValue {
    /// Convert an incoming JSON value. Strings are kept as text, even when they look like dates.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => DocValue::Null,
            Value::Bool(b) => DocValue::Bool(b),
            Value::Number(n) => DocValue::Number(n),
            Value::String(s) => DocValue::Text(s),
            Value::Array(items) => DocValue::Array(items.into_iter().map(Self::from_json).collect()),
            Value::Object(map) => DocValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render for callers: timestamps become ISO-8601 strings.
    pub fn to_json(&self) -> Value {
        match self {
            DocValue::Null => Value::Null,
            DocValue::Bool(b) => Value::Bool(*b),
            DocValue::Number(n) => Value::Number(n.clone()),
            DocValue::Text(s) => Value::String(s.clone()),
            DocValue::Timestamp(ts) => Value::String(iso(ts)),
            DocValue::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            DocValue::Map(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// File encoding: like [`DocValue::to_json`] but timestamps keep their type as
    /// `{"$timestamp": "<iso>"}`.
    fn encode(&self) -> Value {
        match self {
            DocValue::Timestamp(ts) => {
                let mut tagged = Map::new();
                tagged.insert(TIMESTAMP_TAG.into(), Value::String(iso(ts)));
                Value::Object(tagged)
            }
            DocValue::Array(items) => Value::Array(items.iter().map(Self::encode).collect()),
            DocValue::Map(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.encode())).collect(),
            ),
            other => other.to_json(),
        }
    }

    fn decode(value: Value) -> Self {
        match value {
            Value::Object(map) if map.len() == 1 && map.contains_key(TIMESTAMP_TAG) => {
                let parsed = map
                    .get(TIMESTAMP_TAG)
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|ts| ts.with_timezone(&Utc));
                match parsed {
                    Some(ts) => DocValue::Timestamp(ts),
                    None => DocValue::Map(
                        map.into_iter().map(|(k, v)| (k, Self::decode(v))).collect(),
                    ),
                }
            }
            Value::Object(map) => {
                DocValue::Map(map.into_iter().map(|(k, v)| (k, Self::decode(v))).collect())
            }
            Value::Array(items) => DocValue::Array(items.into_iter().map(Self::decode).collect()),
            other => Self::from_json(other),
        }
    }
}

/// Raw collection access offered by a document database.
pub trait DocumentBackend: Send + Sync + Debug {
    /// Every document in `collection`, with its key.
    fn all(&self, collection: &str) -> ConsoleResult<Vec<(String, NativeDoc)>>;

    fn read(&self, collection: &str, key: &str) -> ConsoleResult<Option<NativeDoc>>;

    /// Create or replace the document at `key`.
    fn write(&self, collection: &str, key: &str, doc: NativeDoc) -> ConsoleResult<()>;

    /// Remove the document at `key`; removing a missing key is not an error.
    fn remove(&self, collection: &str, key: &str) -> ConsoleResult<()>;
}

type Collections = HashMap<String, BTreeMap<String, NativeDoc>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: Mutex<Collections>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentBackend for MemoryBackend {
    fn all(&self, collection: &str) -> ConsoleResult<Vec<(String, NativeDoc)>> {
        Ok(lock(&self.collections)
            .get(collection)
            .map(|docs| docs.iter().map(|(k, d)| (k.clone(), d.clone())).collect())
            .unwrap_or_default())
    }

    fn read(&self, collection: &str, key: &str) -> ConsoleResult<Option<NativeDoc>> {
        Ok(lock(&self.collections)
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    fn write(&self, collection: &str, key: &str, doc: NativeDoc) -> ConsoleResult<()> {
        lock(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), doc);
        Ok(())
    }

    fn remove(&self, collection: &str, key: &str) -> ConsoleResult<()> {
        if let Some(docs) = lock(&self.collections).get_mut(collection) {
            docs.remove(key);
        }
        Ok(())
    }
}

/// One `<collection>.json` file per collection under a directory.
///
/// Each file holds a JSON object mapping document key to document. Whole files are rewritten
/// on every write, under a process-wide lock.
#[derive(Debug)]
pub struct JsonDirBackend {
    dir: PathBuf,
    guard: Mutex<()>,
}

impl JsonDirBackend {
    /// Open (and create if needed) the storage directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> ConsoleResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            guard: Mutex::new(()),
        })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    fn load(&self, collection: &str) -> ConsoleResult<BTreeMap<String, NativeDoc>> {
        let path = self.collection_path(collection);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&path)?;
        let raw: Map<String, Value> = serde_json::from_str(&text)?;
        Ok(raw
            .into_iter()
            .filter_map(|(key, value)| match DocValue::decode(value) {
                DocValue::Map(doc) => Some((key, doc)),
                _ => {
                    tracing::warn!(collection, key = %key, "skipping non-object document");
                    None
                }
            })
            .collect())
    }

    fn save(&self, collection: &str, docs: &BTreeMap<String, NativeDoc>) -> ConsoleResult<()> {
        let encoded: Map<String, Value> = docs
            .iter()
            .map(|(k, d)| (k.clone(), DocValue::Map(d.clone()).encode()))
            .collect();
        let text = serde_json::to_string_pretty(&Value::Object(encoded))?;
        std::fs::write(self.collection_path(collection), text)?;
        Ok(())
    }
}

impl DocumentBackend for JsonDirBackend {
    fn all(&self, collection: &str) -> ConsoleResult<Vec<(String, NativeDoc)>> {
        let _guard = lock(&self.guard);
        Ok(self.load(collection)?.into_iter().collect())
    }

    fn read(&self, collection: &str, key: &str) -> ConsoleResult<Option<NativeDoc>> {
        let _guard = lock(&self.guard);
        Ok(self.load(collection)?.remove(key))
    }

    fn write(&self, collection: &str, key: &str, doc: NativeDoc) -> ConsoleResult<()> {
        let _guard = lock(&self.guard);
        let mut docs = self.load(collection)?;
        docs.insert(key.to_string(), doc);
        self.save(collection, &docs)
    }

    fn remove(&self, collection: &str, key: &str) -> ConsoleResult<()> {
        let _guard = lock(&self.guard);
        let mut docs = self.load(collection)?;
        if docs.remove(key).is_some() {
            self.save(collection, &docs)?;
        }
        Ok(())
    }
}

/// Entity CRUD over a [`DocumentBackend`].
///
/// Cleared patch fields are deleted from the stored document.
#[derive(Clone, Debug)]
pub struct DocumentStore {
    backend: Arc<dyn DocumentBackend>,
}

impl DocumentStore {
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        Self { backend }
    }

    /// A store over a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Create a record under a caller-chosen key, stamping both timestamps.
    pub fn put(&self, entity: &str, id: &str, data: Patch) -> ConsoleResult<Document> {
        let now = Utc::now();
        let mut doc: NativeDoc = data
            .to_set_document()
            .into_iter()
            .map(|(k, v)| (k, DocValue::from_json(v)))
            .collect();
        doc.insert("created_date".into(), DocValue::Timestamp(now));
        doc.insert("updated_date".into(), DocValue::Timestamp(now));
        self.backend.write(entity, id, doc.clone())?;
        Ok(to_document(id, &doc))
    }
}

fn new_document_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DOCUMENT_KEY_LEN)
        .map(char::from)
        .collect()
}

/// Caller view of a stored document: id from the key, timestamps as ISO strings.
fn to_document(key: &str, doc: &NativeDoc) -> Document {
    let mut out: Document = doc.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
    out.insert("id".into(), Value::String(key.to_string()));
    out
}

fn not_found(entity: &str, id: &str) -> ConsoleError {
    ConsoleError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

/// Order two stored values for a single-field sort. Absent values sort first.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

impl EntityStore for DocumentStore {
    async fn list(&self, entity: &str, sort: Option<&SortSpec>) -> ConsoleResult<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .backend
            .all(entity)?
            .iter()
            .map(|(key, doc)| to_document(key, doc))
            .collect();
        if let Some(sort) = sort {
            docs.sort_by(|a, b| {
                let ord = compare_values(a.get(&sort.field), b.get(&sort.field));
                if sort.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        Ok(docs)
    }

    async fn get(&self, entity: &str, id: &str) -> ConsoleResult<Document> {
        self.backend
            .read(entity, id)?
            .map(|doc| to_document(id, &doc))
            .ok_or_else(|| not_found(entity, id))
    }

    async fn create(&self, entity: &str, data: Patch) -> ConsoleResult<Document> {
        let key = new_document_key();
        let doc = self.put(entity, &key, data)?;
        tracing::debug!(entity, id = %key, "document created");
        Ok(doc)
    }

    async fn update(&self, entity: &str, id: &str, patch: Patch) -> ConsoleResult<Document> {
        let mut doc = self
            .backend
            .read(entity, id)?
            .ok_or_else(|| not_found(entity, id))?;
        for (field, change) in patch.iter() {
            match change {
                PatchValue::Set(value) => {
                    doc.insert(field.clone(), DocValue::from_json(value.clone()));
                }
                PatchValue::Clear => {
                    doc.remove(field);
                }
            }
        }
        doc.insert("updated_date".into(), DocValue::Timestamp(Utc::now()));
        self.backend.write(entity, id, doc.clone())?;
        Ok(to_document(id, &doc))
    }

    async fn delete(&self, entity: &str, id: &str) -> ConsoleResult<()> {
        self.backend.remove(entity, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_assigns_key_and_iso_timestamps() {
        let store = DocumentStore::in_memory();
        let doc = store
            .create("Food", Patch::new().set("foodNameHe", "תרד"))
            .await
            .unwrap();

        let id = doc["id"].as_str().unwrap();
        assert_eq!(id.len(), DOCUMENT_KEY_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        let created = doc["created_date"].as_str().unwrap();
        assert!(created.ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(created).is_ok());

        let fetched = store.get("Food", id).await.unwrap();
        assert_eq!(fetched["foodNameHe"], "תרד");
    }

    #[tokio::test]
    async fn update_deletes_cleared_keys() {
        let store = DocumentStore::in_memory();
        let doc = store
            .create(
                "Vitamin",
                Patch::new()
                    .set("vitaminNameHe", "ברזל")
                    .set("labTestDeficiency", "legacy"),
            )
            .await
            .unwrap();
        let id = doc["id"].as_str().unwrap();

        let updated = store
            .update(
                "Vitamin",
                id,
                Patch::new()
                    .clear("labTestDeficiency")
                    .set("labTestDeficiencyDetails", "merged"),
            )
            .await
            .unwrap();

        assert!(!updated.contains_key("labTestDeficiency"));
        assert_eq!(updated["labTestDeficiencyDetails"], "merged");
        assert_eq!(updated["vitaminNameHe"], "ברזל");
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let store = DocumentStore::in_memory();
        assert!(store.get("Food", "nope").await.unwrap_err().is_not_found());
        assert!(store
            .update("Food", "nope", Patch::new())
            .await
            .unwrap_err()
            .is_not_found());
        store.delete("Food", "nope").await.unwrap();
    }

    #[tokio::test]
    async fn list_sorts_by_single_field() {
        let store = DocumentStore::in_memory();
        for (name, order) in [("b", 2), ("a", 1), ("c", 3)] {
            store
                .create(
                    "DeficiencySymptom",
                    Patch::new().set("symptomNameHe", name).set("sortOrder", order),
                )
                .await
                .unwrap();
        }

        let docs = store
            .list("DeficiencySymptom", Some(&SortSpec::desc("sortOrder")))
            .await
            .unwrap();
        let names: Vec<_> = docs.iter().map(|d| d["symptomNameHe"].clone()).collect();
        assert_eq!(names, vec![json!("c"), json!("b"), json!("a")]);
    }

    #[tokio::test]
    async fn json_dir_backend_persists_native_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = DocumentStore::new(Arc::new(JsonDirBackend::open(dir.path()).unwrap()));
            let doc = store
                .create("Article", Patch::new().set("titleHe", "מאמר"))
                .await
                .unwrap();
            doc["id"].as_str().unwrap().to_string()
        };

        let raw: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("Article.json")).unwrap(),
        )
        .unwrap();
        assert!(raw[&id]["created_date"][TIMESTAMP_TAG].is_string());
        assert!(raw[&id].get("id").is_none());

        let reopened = DocumentStore::new(Arc::new(JsonDirBackend::open(dir.path()).unwrap()));
        let doc = reopened.get("Article", &id).await.unwrap();
        assert_eq!(doc["titleHe"], "מאמר");
        assert!(doc["created_date"].is_string());
    }
}
