//! Local durable key-value storage and the Effects/Cases repository built on it.
//!
//! [`LocalKv`] is a single JSON file mapping string keys to JSON values. It holds console
//! state that is not part of the authoritative data model: the Effects/Cases table and the
//! user-added choice options.

use super::{EntityStore, Patch, PatchValue, SortSpec};
use crate::constants::EFFECTS_CASES_KEY;
use crate::entities::{Document, EffectsCase, Entity};
use crate::{ConsoleError, ConsoleResult};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// File-backed string-keyed JSON storage.
///
/// Without a path the store lives in memory only.
#[derive(Debug)]
pub struct LocalKv {
    path: Option<PathBuf>,
    entries: Mutex<Map<String, Value>>,
}

impl LocalKv {
    /// Open the state file, starting empty if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be read, or a serialization error if
    /// it is not a JSON object.
    pub fn open(path: impl AsRef<Path>) -> ConsoleResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Map::new()
        };
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(Map::new()),
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    /// Read and decode the value under `key`.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> ConsoleResult<Option<T>> {
        self.get_raw(key)
            .map(serde_json::from_value)
            .transpose()
            .map_err(ConsoleError::from)
    }

    /// Store `value` under `key` and flush the file.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> ConsoleResult<()> {
        let value = serde_json::to_value(value)?;
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.to_string(), value);
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&*entries)?)?;
        }
        Ok(())
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// `fx_<millis in base 36>_<6 random base-36 chars>`.
fn new_case_id() -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| char::from(DIGITS[rng.gen_range(0..DIGITS.len())]))
        .collect();
    format!("fx_{}_{suffix}", base36(millis))
}

/// Effects/Cases records kept in [`LocalKv`] behind the [`EntityStore`] contract.
#[derive(Clone, Debug)]
pub struct LocalStore {
    kv: Arc<LocalKv>,
}

impl LocalStore {
    pub fn new(kv: Arc<LocalKv>) -> Self {
        Self { kv }
    }

    fn check_entity(entity: &str) -> ConsoleResult<()> {
        if entity == EffectsCase::NAME {
            Ok(())
        } else {
            Err(ConsoleError::InvalidInput(format!(
                "local storage only holds {} records, not {entity}",
                EffectsCase::NAME
            )))
        }
    }

    /// Load the stored rows, dropping any without a phenomenon name, newest first.
    fn load(&self) -> Vec<Document> {
        let rows = match self.kv.get_raw(EFFECTS_CASES_KEY) {
            Some(Value::Array(rows)) => rows,
            Some(_) => {
                tracing::warn!(key = EFFECTS_CASES_KEY, "stored cases are not a list; ignoring");
                return Vec::new();
            }
            None => return Vec::new(),
        };

        let mut docs: Vec<Document> = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(doc) => normalize_row(doc),
                _ => None,
            })
            .collect();
        sort_newest_first(&mut docs);
        docs
    }

    fn persist(&self, docs: &[Document]) -> ConsoleResult<()> {
        self.kv.set(EFFECTS_CASES_KEY, &docs)
    }
}

fn normalize_row(mut doc: Document) -> Option<Document> {
    let name = doc
        .get("phenomenonName")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())?
        .to_string();
    doc.insert("phenomenonName".into(), Value::String(name));
    if !doc.get("id").is_some_and(Value::is_string) {
        doc.insert("id".into(), Value::String(new_case_id()));
    }
    let created = doc
        .get("created_date")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(now_iso);
    if !doc.get("updated_date").is_some_and(Value::is_string) {
        doc.insert("updated_date".into(), Value::String(created.clone()));
    }
    doc.insert("created_date".into(), Value::String(created));
    Some(doc)
}

fn updated(doc: &Document) -> &str {
    doc.get("updated_date").and_then(Value::as_str).unwrap_or("")
}

fn sort_newest_first(docs: &mut [Document]) {
    docs.sort_by(|a, b| updated(b).cmp(updated(a)));
}

fn doc_id(doc: &Document) -> Option<&str> {
    doc.get("id").and_then(Value::as_str)
}

fn not_found(id: &str) -> ConsoleError {
    ConsoleError::NotFound {
        entity: EffectsCase::NAME.to_string(),
        id: id.to_string(),
    }
}

impl EntityStore for LocalStore {
    async fn list(&self, entity: &str, sort: Option<&SortSpec>) -> ConsoleResult<Vec<Document>> {
        Self::check_entity(entity)?;
        if sort.is_some_and(|s| s.field != "updated_date" || !s.descending) {
            tracing::debug!("local cases are always listed newest first");
        }
        Ok(self.load())
    }

    async fn get(&self, entity: &str, id: &str) -> ConsoleResult<Document> {
        Self::check_entity(entity)?;
        self.load()
            .into_iter()
            .find(|d| doc_id(d) == Some(id))
            .ok_or_else(|| not_found(id))
    }

    async fn create(&self, entity: &str, data: Patch) -> ConsoleResult<Document> {
        Self::check_entity(entity)?;
        let mut doc = data.to_set_document();
        let now = now_iso();
        doc.insert("id".into(), Value::String(new_case_id()));
        doc.insert("created_date".into(), Value::String(now.clone()));
        doc.insert("updated_date".into(), Value::String(now));

        let mut docs = self.load();
        docs.push(doc.clone());
        sort_newest_first(&mut docs);
        self.persist(&docs)?;
        Ok(doc)
    }

    async fn update(&self, entity: &str, id: &str, patch: Patch) -> ConsoleResult<Document> {
        Self::check_entity(entity)?;
        let mut docs = self.load();
        let doc = docs
            .iter_mut()
            .find(|d| doc_id(d) == Some(id))
            .ok_or_else(|| not_found(id))?;
        for (field, change) in patch.iter() {
            match change {
                PatchValue::Set(value) => {
                    doc.insert(field.clone(), value.clone());
                }
                PatchValue::Clear => {
                    doc.remove(field);
                }
            }
        }
        doc.insert("updated_date".into(), Value::String(now_iso()));
        let result = doc.clone();
        sort_newest_first(&mut docs);
        self.persist(&docs)?;
        Ok(result)
    }

    async fn delete(&self, entity: &str, id: &str) -> ConsoleResult<()> {
        Self::check_entity(entity)?;
        let mut docs = self.load();
        docs.retain(|d| doc_id(d) != Some(id));
        self.persist(&docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base36_matches_radix_formatting() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
        assert_eq!(base36(1_700_000_000_000), "loyw3v28");
    }

    #[test]
    fn case_ids_have_expected_shape() {
        let id = new_case_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts[0], "fx");
        assert_eq!(parts[2].len(), 6);
    }

    #[test]
    fn kv_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/local.json");
        let kv = LocalKv::open(&path).unwrap();
        kv.set("opts", &vec!["מים"]).unwrap();

        let reopened = LocalKv::open(&path).unwrap();
        let opts: Option<Vec<String>> = reopened.get("opts").unwrap();
        assert_eq!(opts, Some(vec!["מים".to_string()]));
        assert_eq!(reopened.get::<Vec<String>>("missing").unwrap(), None);
    }

    #[tokio::test]
    async fn load_drops_unnamed_rows_and_sorts_newest_first() {
        let kv = Arc::new(LocalKv::in_memory());
        kv.set(
            EFFECTS_CASES_KEY,
            &json!([
                { "id": "a", "phenomenonName": " old ", "updated_date": "2024-01-01T00:00:00.000Z" },
                { "id": "b", "phenomenonName": "   " },
                { "id": "c", "phenomenonName": "new", "updated_date": "2025-01-01T00:00:00.000Z" },
                "garbage"
            ]),
        )
        .unwrap();
        let store = LocalStore::new(kv);

        let docs = store.list("EffectsCase", None).await.unwrap();
        let ids: Vec<_> = docs.iter().filter_map(doc_id).collect();
        assert_eq!(ids, vec!["c", "a"]);
        assert_eq!(docs[1]["phenomenonName"], "old");
    }

    #[tokio::test]
    async fn crud_cycle() {
        let store = LocalStore::new(Arc::new(LocalKv::in_memory()));
        let created = store
            .create(
                "EffectsCase",
                Patch::new()
                    .set("phenomenonName", "נמנום")
                    .set("foodIds", json!(["f1"])),
            )
            .await
            .unwrap();
        let id = doc_id(&created).unwrap().to_string();
        assert!(id.starts_with("fx_"));

        let updated = store
            .update("EffectsCase", &id, Patch::new().set("notes", "x").clear("foodIds"))
            .await
            .unwrap();
        assert_eq!(updated["notes"], "x");
        assert!(!updated.contains_key("foodIds"));

        store.delete("EffectsCase", &id).await.unwrap();
        assert!(store.get("EffectsCase", &id).await.unwrap_err().is_not_found());
        assert!(store.list("Vitamin", None).await.is_err());
    }
}
