//! Document store for trackcore entities.
//!
//! The store is the narrow persistence seam: by-id lookup, create, whole-
//! document save, delete, and filtered paginated query. Entities live as JSON
//! documents wrapped in a `Document` carrying a version token; `save` checks
//! the token so concurrent read-modify-write cycles fail with
//! `VersionConflict` instead of silently losing updates.
//!
//! Two implementations ship with the crate:
//! - `MemoryStore`: mutex-held map, the default for embedding and tests
//! - `JsonStore`: one JSON file per entity kind, lock-guarded atomic writes

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::model::EntityKind;

/// A stored document: entity body plus identity and a version token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub kind: EntityKind,
    pub id: String,
    /// Optimistic-concurrency token, bumped on every save.
    pub version: u64,
    pub body: Value,
}

impl Document {
    /// Decode the body into a typed entity.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Replace the body with a typed entity, keeping id and version.
    pub fn encode<T: Serialize>(&mut self, entity: &T) -> Result<()> {
        let mut body = serde_json::to_value(entity)?;
        if let Value::Object(ref mut map) = body {
            map.insert("id".to_string(), Value::String(self.id.clone()));
        }
        self.body = body;
        Ok(())
    }
}

/// Filter tree evaluated against the JSON body of each document.
///
/// Field paths are dotted (`"workspace.id"`, `"tracker.id"`).
#[derive(Debug, Clone)]
pub enum Filter {
    /// Matches every document
    All,
    /// Field equals the given value
    Eq(String, Value),
    /// Array field contains an element whose `id` equals the given id
    ElemMatchId(String, String),
    /// String field contains the needle, case-insensitively
    ContainsCi(String, String),
    /// At least one branch matches
    AnyOf(Vec<Filter>),
    /// Every branch matches
    AllOf(Vec<Filter>),
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Filter {
        Filter::Eq(path.into(), value.into())
    }

    pub fn elem_match_id(field: impl Into<String>, id: impl Into<String>) -> Filter {
        Filter::ElemMatchId(field.into(), id.into())
    }

    pub fn contains_ci(field: impl Into<String>, needle: impl Into<String>) -> Filter {
        Filter::ContainsCi(field.into(), needle.into())
    }

    pub fn and(self, other: Filter) -> Filter {
        match self {
            Filter::All => other,
            Filter::AllOf(mut branches) => {
                branches.push(other);
                Filter::AllOf(branches)
            }
            first => Filter::AllOf(vec![first, other]),
        }
    }

    pub fn matches(&self, body: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(path, expected) => lookup_path(body, path) == Some(expected),
            Filter::ElemMatchId(field, id) => match lookup_path(body, field) {
                Some(Value::Array(items)) => items.iter().any(|item| {
                    item.get("id").and_then(Value::as_str) == Some(id.as_str())
                }),
                _ => false,
            },
            Filter::ContainsCi(field, needle) => match lookup_path(body, field) {
                Some(Value::String(text)) => {
                    text.to_lowercase().contains(&needle.to_lowercase())
                }
                _ => false,
            },
            Filter::AnyOf(branches) => branches.iter().any(|branch| branch.matches(body)),
            Filter::AllOf(branches) => branches.iter().all(|branch| branch.matches(body)),
        }
    }
}

fn lookup_path<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = body;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Query options in the shape the original pagination layer accepted:
/// `sort_by` is `field:asc` or `field:desc`, pages are 1-based.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub sort_by: Option<String>,
    pub limit: Option<usize>,
    pub page: Option<usize>,
}

/// One page of query results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
    pub total_results: usize,
}

impl<T> Page<T> {
    /// Map the results into another type, keeping page metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            results: self.results.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
            total_results: self.total_results,
        }
    }

    /// Fallible map; the first error aborts the whole page.
    pub fn try_map<U>(self, f: impl FnMut(T) -> Result<U>) -> Result<Page<U>> {
        Ok(Page {
            results: self
                .results
                .into_iter()
                .map(f)
                .collect::<Result<Vec<U>>>()?,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
            total_results: self.total_results,
        })
    }
}

/// Persistence seam consumed by every service.
pub trait EntityStore: Send + Sync {
    /// Fetch a document by id, `None` when absent.
    fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Document>>;

    /// Insert a new document. An `id` is generated and injected into the body
    /// unless the body already carries a non-empty one.
    fn create(&self, kind: EntityKind, body: Value) -> Result<Document>;

    /// Whole-document overwrite. Fails with `VersionConflict` when the stored
    /// version differs from `doc.version`.
    fn save(&self, doc: &Document) -> Result<Document>;

    /// Remove a document, returning it when it existed.
    fn delete(&self, kind: EntityKind, id: &str) -> Result<Option<Document>>;

    /// Filtered, sorted, paginated query over one kind.
    fn query(&self, kind: EntityKind, filter: &Filter, options: &QueryOptions)
        -> Result<Page<Document>>;
}

/// Fetch a document or fail with `NotFound` naming the kind.
pub fn require(store: &dyn EntityStore, kind: EntityKind, id: &str) -> Result<Document> {
    store
        .get(kind, id)?
        .ok_or_else(|| Error::not_found(kind, id))
}

/// Fetch and decode an entity or fail with `NotFound`.
pub fn require_entity<T: DeserializeOwned>(
    store: &dyn EntityStore,
    kind: EntityKind,
    id: &str,
) -> Result<T> {
    require(store, kind, id)?.decode()
}

/// Insert a typed entity, returning it with the generated id filled in.
pub fn create_entity<T: Serialize + DeserializeOwned>(
    store: &dyn EntityStore,
    kind: EntityKind,
    entity: &T,
) -> Result<T> {
    let doc = store.create(kind, serde_json::to_value(entity)?)?;
    doc.decode()
}

/// Read-modify-write with bounded retries on version conflicts.
///
/// The mutation closure runs against a fresh decode of the document on every
/// attempt; a conflict on save triggers a re-read rather than surfacing to
/// the caller until `max_retries` is exhausted.
pub fn update_entity<T, F>(
    store: &dyn EntityStore,
    kind: EntityKind,
    id: &str,
    max_retries: u32,
    mut mutate: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(&mut T) -> Result<()>,
{
    let mut attempt = 0;
    loop {
        let mut doc = require(store, kind, id)?;
        let mut entity: T = doc.decode()?;
        mutate(&mut entity)?;
        doc.encode(&entity)?;
        match store.save(&doc) {
            Ok(saved) => return saved.decode(),
            Err(err) if err.is_version_conflict() && attempt < max_retries => {
                attempt += 1;
                tracing::debug!(kind = kind.as_str(), id, attempt, "retrying after version conflict");
            }
            Err(err) => return Err(err),
        }
    }
}

fn paginate(
    mut docs: Vec<Document>,
    options: &QueryOptions,
) -> Result<Page<Document>> {
    if let Some(sort_by) = options.sort_by.as_deref() {
        let (field, descending) = match sort_by.split_once(':') {
            Some((field, "desc")) => (field.to_string(), true),
            Some((field, "asc")) => (field.to_string(), false),
            Some((_, other)) => {
                return Err(Error::InvalidArgument(format!(
                    "sort order must be asc or desc, got {other}"
                )))
            }
            None => (sort_by.to_string(), false),
        };
        docs.sort_by(|left, right| {
            let ordering = compare_fields(&left.body, &right.body, &field);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    let limit = options.limit.unwrap_or(10).max(1);
    let page = options.page.unwrap_or(1).max(1);
    let total_results = docs.len();
    let total_pages = total_results.div_ceil(limit);
    let results = docs
        .into_iter()
        .skip((page - 1) * limit)
        .take(limit)
        .collect();

    Ok(Page {
        results,
        page,
        limit,
        total_pages,
        total_results,
    })
}

fn compare_fields(left: &Value, right: &Value, field: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let left = lookup_path(left, field);
    let right = lookup_path(right, field);
    match (left, right) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn inject_id(body: &mut Value) -> Result<String> {
    let existing = body
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let id = existing.unwrap_or_else(|| Ulid::new().to_string());
    match body {
        Value::Object(map) => {
            map.insert("id".to_string(), Value::String(id.clone()));
            Ok(id)
        }
        _ => Err(Error::InvalidArgument(
            "entity body must be a JSON object".to_string(),
        )),
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-process store backed by a mutex-held map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<(EntityKind, String), Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for MemoryStore {
    fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Document>> {
        let documents = self.documents.lock().expect("store mutex poisoned");
        Ok(documents.get(&(kind, id.to_string())).cloned())
    }

    fn create(&self, kind: EntityKind, mut body: Value) -> Result<Document> {
        let id = inject_id(&mut body)?;
        let doc = Document {
            kind,
            id: id.clone(),
            version: 1,
            body,
        };
        let mut documents = self.documents.lock().expect("store mutex poisoned");
        documents.insert((kind, id), doc.clone());
        Ok(doc)
    }

    fn save(&self, doc: &Document) -> Result<Document> {
        let mut documents = self.documents.lock().expect("store mutex poisoned");
        let key = (doc.kind, doc.id.clone());
        let current = documents
            .get(&key)
            .ok_or_else(|| Error::not_found(doc.kind, &doc.id))?;
        if current.version != doc.version {
            return Err(Error::VersionConflict {
                kind: doc.kind,
                id: doc.id.clone(),
                expected: doc.version,
                found: current.version,
            });
        }
        let mut updated = doc.clone();
        updated.version += 1;
        documents.insert(key, updated.clone());
        Ok(updated)
    }

    fn delete(&self, kind: EntityKind, id: &str) -> Result<Option<Document>> {
        let mut documents = self.documents.lock().expect("store mutex poisoned");
        Ok(documents.remove(&(kind, id.to_string())))
    }

    fn query(
        &self,
        kind: EntityKind,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Page<Document>> {
        let documents = self.documents.lock().expect("store mutex poisoned");
        let mut matched: Vec<Document> = documents
            .values()
            .filter(|doc| doc.kind == kind && filter.matches(&doc.body))
            .cloned()
            .collect();
        // Map iteration order is arbitrary; keep unsorted output stable.
        matched.sort_by(|left, right| left.id.cmp(&right.id));
        paginate(matched, options)
    }
}

// =============================================================================
// JsonStore
// =============================================================================

/// File-backed store: one JSON collection file per entity kind under a
/// directory, every mutation guarded by the collection's lock file.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
    lock_timeout_ms: u64,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    fn collection_path(&self, kind: EntityKind) -> PathBuf {
        self.dir.join(format!("{}s.json", kind.as_str()))
    }

    fn lock_path(&self, kind: EntityKind) -> PathBuf {
        self.dir.join(format!("{}s.json.lock", kind.as_str()))
    }

    fn load_collection(&self, path: &Path) -> Result<Vec<Document>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read(path)?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&raw)?)
    }

    fn store_collection(&self, path: &Path, docs: &[Document]) -> Result<()> {
        let data = serde_json::to_vec_pretty(docs)?;
        lock::write_atomic(path, &data)
    }

    /// Run a closure over the collection while holding its lock, persisting
    /// the result. The lock covers the full read-modify-write cycle.
    fn with_collection_mut<R>(
        &self,
        kind: EntityKind,
        f: impl FnOnce(&mut Vec<Document>) -> Result<R>,
    ) -> Result<R> {
        let _lock = FileLock::acquire(self.lock_path(kind), self.lock_timeout_ms)?;
        let path = self.collection_path(kind);
        let mut docs = self.load_collection(&path)?;
        let outcome = f(&mut docs)?;
        self.store_collection(&path, &docs)?;
        Ok(outcome)
    }

    fn read_collection(&self, kind: EntityKind) -> Result<Vec<Document>> {
        let _lock = FileLock::acquire(self.lock_path(kind), self.lock_timeout_ms)?;
        self.load_collection(&self.collection_path(kind))
    }
}

impl EntityStore for JsonStore {
    fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Document>> {
        let docs = self.read_collection(kind)?;
        Ok(docs.into_iter().find(|doc| doc.id == id))
    }

    fn create(&self, kind: EntityKind, mut body: Value) -> Result<Document> {
        let id = inject_id(&mut body)?;
        let doc = Document {
            kind,
            id,
            version: 1,
            body,
        };
        self.with_collection_mut(kind, |docs| {
            docs.push(doc.clone());
            Ok(doc)
        })
    }

    fn save(&self, doc: &Document) -> Result<Document> {
        self.with_collection_mut(doc.kind, |docs| {
            let current = docs
                .iter_mut()
                .find(|candidate| candidate.id == doc.id)
                .ok_or_else(|| Error::not_found(doc.kind, &doc.id))?;
            if current.version != doc.version {
                return Err(Error::VersionConflict {
                    kind: doc.kind,
                    id: doc.id.clone(),
                    expected: doc.version,
                    found: current.version,
                });
            }
            let mut updated = doc.clone();
            updated.version += 1;
            *current = updated.clone();
            Ok(updated)
        })
    }

    fn delete(&self, kind: EntityKind, id: &str) -> Result<Option<Document>> {
        self.with_collection_mut(kind, |docs| {
            let position = docs.iter().position(|doc| doc.id == id);
            Ok(position.map(|index| docs.remove(index)))
        })
    }

    fn query(
        &self,
        kind: EntityKind,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Page<Document>> {
        let docs = self.read_collection(kind)?;
        let matched = docs
            .into_iter()
            .filter(|doc| filter.matches(&doc.body))
            .collect();
        paginate(matched, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracker_body(name: &str, workspace_id: &str) -> Value {
        json!({
            "name": name,
            "workspace": { "id": workspace_id },
            "members": [{ "id": "u1" }],
        })
    }

    #[test]
    fn create_generates_id_and_injects_it() {
        let store = MemoryStore::new();
        let doc = store
            .create(EntityKind::Tracker, tracker_body("alpha", "w1"))
            .unwrap();
        assert!(!doc.id.is_empty());
        assert_eq!(doc.body["id"], Value::String(doc.id.clone()));
        assert_eq!(doc.version, 1);
    }

    #[test]
    fn save_bumps_version_and_detects_conflicts() {
        let store = MemoryStore::new();
        let doc = store
            .create(EntityKind::Tracker, tracker_body("alpha", "w1"))
            .unwrap();

        let mut first = doc.clone();
        first.body["name"] = json!("alpha-renamed");
        let saved = store.save(&first).unwrap();
        assert_eq!(saved.version, 2);

        // Stale writer still holds version 1.
        let mut second = doc;
        second.body["name"] = json!("alpha-conflicting");
        let err = store.save(&second).unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[test]
    fn filters_match_nested_paths_and_arrays() {
        let body = json!({
            "name": "Release Tracker",
            "workspace": { "id": "w1" },
            "members": [{ "id": "u1" }, { "id": "u2" }],
        });

        assert!(Filter::eq("workspace.id", "w1").matches(&body));
        assert!(!Filter::eq("workspace.id", "w2").matches(&body));
        assert!(Filter::elem_match_id("members", "u2").matches(&body));
        assert!(!Filter::elem_match_id("members", "u9").matches(&body));
        assert!(Filter::contains_ci("name", "release").matches(&body));
        assert!(Filter::eq("workspace.id", "w1")
            .and(Filter::elem_match_id("members", "u1"))
            .matches(&body));
    }

    #[test]
    fn query_paginates_and_sorts() {
        let store = MemoryStore::new();
        for name in ["charlie", "alpha", "bravo"] {
            store
                .create(EntityKind::Tracker, tracker_body(name, "w1"))
                .unwrap();
        }

        let options = QueryOptions {
            sort_by: Some("name:asc".to_string()),
            limit: Some(2),
            page: Some(1),
        };
        let page = store
            .query(EntityKind::Tracker, &Filter::All, &options)
            .unwrap();
        assert_eq!(page.total_results, 3);
        assert_eq!(page.total_pages, 2);
        let names: Vec<String> = page
            .results
            .iter()
            .map(|doc| doc.body["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "bravo"]);
    }

    #[test]
    fn update_entity_retries_through_conflicts() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Named {
            id: String,
            name: String,
        }

        let store = MemoryStore::new();
        let doc = store
            .create(EntityKind::Team, json!({ "name": "old" }))
            .unwrap();

        let updated: Named =
            update_entity(&store, EntityKind::Team, &doc.id, 3, |team: &mut Named| {
                team.name = "new".to_string();
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.name, "new");
    }
}
