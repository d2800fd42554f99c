//! Persistent six-category memory store with vector and keyword retrieval.
//!
//! The store is an append-mostly log persisted as line-delimited JSON, with
//! an in-memory forward map for id lookups and a dense vector scan for
//! cosine similarity. A single mutex guards the maps and the dirty flag;
//! `save()` snapshots under the lock and writes atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pigo_core::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Profile,
    Preferences,
    Entities,
    Events,
    Cases,
    Patterns,
}

impl Category {
    /// Parse a candidate category; anything outside the closed set is None.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "profile" => Some(Category::Profile),
            "preferences" => Some(Category::Preferences),
            "entities" => Some(Category::Entities),
            "events" => Some(Category::Events),
            "cases" => Some(Category::Cases),
            "patterns" => Some(Category::Patterns),
            _ => None,
        }
    }

    /// Events and cases are historical records: duplicates are skipped,
    /// never merged.
    pub fn is_append_only(&self) -> bool {
        matches!(self, Category::Events | Category::Cases)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::Profile => "profile",
            Category::Preferences => "preferences",
            Category::Entities => "entities",
            Category::Events => "events",
            Category::Cases => "cases",
            Category::Patterns => "patterns",
        };
        write!(f, "{}", name)
    }
}

/// One remembered fact at three levels of detail: `abstract` (one sentence,
/// the index entry), `overview` (2-4 sentences), `content` (full).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub category: Category,
    #[serde(rename = "abstract")]
    pub abstract_: String,
    pub overview: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub active_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    pub fn new(
        category: Category,
        abstract_: impl Into<String>,
        overview: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            category,
            abstract_: abstract_.into(),
            overview: overview.into(),
            content: content.into(),
            vector: None,
            active_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_vector(mut self, vector: Option<Vec<f32>>) -> Self {
        self.vector = vector;
        self
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cap on the similar-memory list handed to dedup arbitration.
const SIMILAR_CAP: usize = 10;

struct Inner {
    memories: Vec<Memory>,
    index: HashMap<String, usize>,
    dirty: bool,
}

impl Inner {
    fn rebuild_index(&mut self) {
        self.index = self
            .memories
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();
    }

    /// Dimensionality shared by every stored vector, if any vector exists.
    fn vector_dims(&self) -> Option<usize> {
        self.memories
            .iter()
            .find_map(|m| m.vector.as_ref().map(|v| v.len()))
    }
}

pub struct MemoryStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// A store persisted at `path`. The file is created on first `save()`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            inner: Mutex::new(Inner {
                memories: Vec::new(),
                index: HashMap::new(),
                dirty: false,
            }),
        }
    }

    /// An unpersisted store; `save()` is a no-op. Used by tests and `/memory clear`.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner {
                memories: Vec::new(),
                index: HashMap::new(),
                dirty: false,
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Assign an id and timestamps, then append. Returns the new id.
    /// A vector whose dimensionality disagrees with the store is dropped.
    pub fn add(&self, mut memory: Memory) -> Result<String, Error> {
        let mut inner = self.lock();
        if memory.id.is_empty() {
            memory.id = uuid::Uuid::new_v4().to_string();
        }
        if inner.index.contains_key(&memory.id) {
            return Err(Error::invalid_argument(format!(
                "memory id '{}' already exists",
                memory.id
            )));
        }
        let now = Utc::now();
        memory.created_at = now;
        memory.updated_at = now;
        let store_dims = inner.vector_dims();
        let memory_dims = memory.vector.as_ref().map(|v| v.len());
        if let (Some(expected), Some(got)) = (store_dims, memory_dims) {
            if got != expected {
                tracing::warn!(
                    id = %memory.id,
                    got,
                    expected,
                    "Dropping vector with mismatched dimensionality"
                );
                memory.vector = None;
            }
        }
        let id = memory.id.clone();
        let slot = inner.memories.len();
        inner.index.insert(id.clone(), slot);
        inner.memories.push(memory);
        inner.dirty = true;
        Ok(id)
    }

    /// Replace a memory in place, refreshing `updated_at`.
    pub fn update(&self, mut memory: Memory) -> Result<(), Error> {
        let mut inner = self.lock();
        let Some(&idx) = inner.index.get(&memory.id) else {
            return Err(Error::not_found(format!("memory '{}'", memory.id)));
        };
        memory.updated_at = Utc::now();
        inner.memories[idx] = memory;
        inner.dirty = true;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<Memory, Error> {
        let mut inner = self.lock();
        let Some(&idx) = inner.index.get(id) else {
            return Err(Error::not_found(format!("memory '{}'", id)));
        };
        let removed = inner.memories.remove(idx);
        inner.rebuild_index();
        inner.dirty = true;
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<Memory> {
        let inner = self.lock();
        inner.index.get(id).map(|&idx| inner.memories[idx].clone())
    }

    pub fn all(&self) -> Vec<Memory> {
        self.lock().memories.clone()
    }

    pub fn count(&self) -> usize {
        self.lock().memories.len()
    }

    pub fn increment_active(&self, id: &str) -> Result<(), Error> {
        let mut inner = self.lock();
        let Some(&idx) = inner.index.get(id) else {
            return Err(Error::not_found(format!("memory '{}'", id)));
        };
        inner.memories[idx].active_count += 1;
        inner.dirty = true;
        Ok(())
    }

    /// Memories above `threshold` cosine similarity, best first, capped for
    /// the dedup pre-filter.
    pub fn find_similar(
        &self,
        vector: &[f32],
        threshold: f32,
        category: Option<Category>,
    ) -> Vec<(Memory, f32)> {
        let mut scored = self.scan(vector, category);
        scored.retain(|(_, score)| *score >= threshold);
        scored.truncate(SIMILAR_CAP);
        scored
    }

    /// Top-`top_k` memories by cosine similarity, best first.
    pub fn search_by_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        category: Option<Category>,
    ) -> Vec<(Memory, f32)> {
        let mut scored = self.scan(vector, category);
        scored.truncate(top_k);
        scored
    }

    /// Case-insensitive token overlap over abstract + overview + content,
    /// ties broken by recency.
    pub fn search_by_keyword(&self, query: &str, top_k: usize) -> Vec<Memory> {
        let query_tokens: Vec<String> = tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let inner = self.lock();
        let mut scored: Vec<(usize, &Memory)> = inner
            .memories
            .iter()
            .filter_map(|m| {
                let haystack = format!("{} {} {}", m.abstract_, m.overview, m.content);
                let tokens: std::collections::HashSet<String> =
                    tokenize(&haystack).into_iter().collect();
                let overlap = query_tokens.iter().filter(|t| tokens.contains(*t)).count();
                (overlap > 0).then_some((overlap, m))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.updated_at.cmp(&a.1.updated_at))
        });
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Serialize every memory as one JSON line, written atomically.
    pub fn save(&self) -> Result<(), Error> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot = {
            let mut inner = self.lock();
            inner.dirty = false;
            inner.memories.clone()
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::internal(format!("create {}: {}", parent.display(), e)))?;
        }

        let mut out = String::new();
        for memory in &snapshot {
            out.push_str(&serde_json::to_string(memory)?);
            out.push('\n');
        }

        let tmp = path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, out)
            .map_err(|e| Error::internal(format!("write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| Error::internal(format!("rename {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Replace the in-memory state with the persisted log. A missing file
    /// loads as empty; individual malformed lines are skipped with a warning.
    pub fn load(&self) -> Result<(), Error> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut memories = Vec::new();
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                for (lineno, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Memory>(line) {
                        Ok(memory) => memories.push(memory),
                        Err(e) => {
                            tracing::warn!(
                                path = %path.display(),
                                line = lineno + 1,
                                error = %e,
                                "Skipping malformed memory line"
                            );
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::internal(format!("read {}: {}", path.display(), e)));
            }
        }

        let mut inner = self.lock();
        inner.memories = memories;
        inner.rebuild_index();
        inner.dirty = false;
        Ok(())
    }

    /// Drop every memory. The next `save()` rewrites the log empty.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.memories.clear();
        inner.index.clear();
        inner.dirty = true;
    }

    fn scan(&self, vector: &[f32], category: Option<Category>) -> Vec<(Memory, f32)> {
        let inner = self.lock();
        let mut scored: Vec<(Memory, f32)> = inner
            .memories
            .iter()
            .filter(|m| category.map(|c| m.category == c).unwrap_or(true))
            .filter_map(|m| {
                m.vector
                    .as_ref()
                    .map(|v| (m.clone(), cosine_similarity(vector, v)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(category: Category, abstract_: &str) -> Memory {
        Memory::new(category, abstract_, "An overview sentence.", "Full content.")
    }

    #[test]
    fn test_category_parse_closed_set() {
        assert_eq!(Category::parse("profile"), Some(Category::Profile));
        assert_eq!(Category::parse("EVENTS"), Some(Category::Events));
        assert_eq!(Category::parse("musings"), None);
        assert_eq!(Category::parse(""), None);
    }

    #[test]
    fn test_add_assigns_id_and_timestamps() {
        let store = MemoryStore::in_memory();
        let id = store.add(sample(Category::Entities, "A fact")).unwrap();
        assert!(!id.is_empty());
        let got = store.get(&id).unwrap();
        assert_eq!(got.abstract_, "A fact");
        assert_eq!(got.created_at, got.updated_at);
    }

    #[test]
    fn test_update_refreshes_updated_at() {
        let store = MemoryStore::in_memory();
        let id = store.add(sample(Category::Entities, "A fact")).unwrap();
        let mut memory = store.get(&id).unwrap();
        let created = memory.created_at;
        memory.content = "revised".to_string();
        store.update(memory).unwrap();
        let got = store.get(&id).unwrap();
        assert_eq!(got.content, "revised");
        assert!(got.updated_at >= created);
    }

    #[test]
    fn test_delete_and_missing() {
        let store = MemoryStore::in_memory();
        let id = store.add(sample(Category::Cases, "Bug fix")).unwrap();
        let removed = store.delete(&id).unwrap();
        assert_eq!(removed.abstract_, "Bug fix");
        assert!(store.get(&id).is_none());
        assert!(store.delete(&id).is_err());
    }

    #[test]
    fn test_increment_active() {
        let store = MemoryStore::in_memory();
        let id = store.add(sample(Category::Patterns, "Uses tabs")).unwrap();
        store.increment_active(&id).unwrap();
        store.increment_active(&id).unwrap();
        assert_eq!(store.get(&id).unwrap().active_count, 2);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_find_similar_threshold_and_category() {
        let store = MemoryStore::in_memory();
        store
            .add(sample(Category::Entities, "Close").with_vector(Some(vec![1.0, 0.0])))
            .unwrap();
        store
            .add(sample(Category::Entities, "Far").with_vector(Some(vec![0.0, 1.0])))
            .unwrap();
        store
            .add(sample(Category::Events, "Other kind").with_vector(Some(vec![1.0, 0.0])))
            .unwrap();

        let hits = store.find_similar(&[1.0, 0.0], 0.8, Some(Category::Entities));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.abstract_, "Close");
        assert!(hits[0].1 > 0.99);
    }

    #[test]
    fn test_search_by_vector_ordering() {
        let store = MemoryStore::in_memory();
        store
            .add(sample(Category::Entities, "a").with_vector(Some(vec![1.0, 0.0])))
            .unwrap();
        store
            .add(sample(Category::Entities, "b").with_vector(Some(vec![0.9, 0.1])))
            .unwrap();
        store
            .add(sample(Category::Entities, "c").with_vector(Some(vec![0.0, 1.0])))
            .unwrap();

        let hits = store.search_by_vector(&[1.0, 0.0], 2, None);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.abstract_, "a");
        assert_eq!(hits[1].0.abstract_, "b");
    }

    #[test]
    fn test_keyword_search_overlap_and_tiebreak() {
        let store = MemoryStore::in_memory();
        store
            .add(sample(Category::Preferences, "Prefers dark editor theme"))
            .unwrap();
        store
            .add(sample(Category::Preferences, "Prefers light terminal"))
            .unwrap();

        let hits = store.search_by_keyword("DARK THEME", 5);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].abstract_.contains("dark"));

        let hits = store.search_by_keyword("prefers", 5);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_mismatched_vector_dropped() {
        let store = MemoryStore::in_memory();
        store
            .add(sample(Category::Entities, "a").with_vector(Some(vec![1.0, 0.0])))
            .unwrap();
        let id = store
            .add(sample(Category::Entities, "b").with_vector(Some(vec![1.0, 0.0, 0.0])))
            .unwrap();
        assert!(store.get(&id).unwrap().vector.is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.jsonl");

        let store = MemoryStore::new(&path);
        let mut ids = Vec::new();
        for i in 0..5 {
            let memory = sample(Category::Cases, &format!("case {}", i))
                .with_vector(Some(vec![i as f32, 1.0, 0.5]));
            ids.push(store.add(memory).unwrap());
        }
        store.increment_active(&ids[2]).unwrap();
        store.save().unwrap();

        let before = store.all();
        let probe = vec![0.3, 0.7, 0.1];
        let order_before: Vec<String> = store
            .search_by_vector(&probe, 5, None)
            .into_iter()
            .map(|(m, _)| m.id)
            .collect();

        let reloaded = MemoryStore::new(&path);
        reloaded.load().unwrap();
        let after = reloaded.all();

        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.category, b.category);
            assert_eq!(a.abstract_, b.abstract_);
            assert_eq!(a.overview, b.overview);
            assert_eq!(a.content, b.content);
            assert_eq!(a.vector, b.vector);
            assert_eq!(a.active_count, b.active_count);
            assert_eq!(a.created_at, b.created_at);
            assert_eq!(a.updated_at, b.updated_at);
        }

        let order_after: Vec<String> = reloaded
            .search_by_vector(&probe, 5, None)
            .into_iter()
            .map(|(m, _)| m.id)
            .collect();
        assert_eq!(order_before, order_after);
    }

    #[test]
    fn test_delete_compacts_on_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.jsonl");

        let store = MemoryStore::new(&path);
        let id1 = store.add(sample(Category::Events, "kept")).unwrap();
        let id2 = store.add(sample(Category::Events, "dropped")).unwrap();
        store.save().unwrap();

        store.delete(&id2).unwrap();
        store.save().unwrap();

        let reloaded = MemoryStore::new(&path);
        reloaded.load().unwrap();
        assert_eq!(reloaded.count(), 1);
        assert!(reloaded.get(&id1).is_some());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path().join("nope.jsonl"));
        store.load().unwrap();
        assert_eq!(store.count(), 0);
    }
}
