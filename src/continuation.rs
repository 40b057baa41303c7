//! Continuation store: resumption token → original query.
//!
//! Backends forget the intersection sets and target prefix of a paged
//! query; the proxy remembers them per resumption token so every page of a
//! harvest is filtered identically.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::query::OaiQuery;
use crate::{Error, Result};

/// Token → query mapping shared by all in-flight requests.
///
/// Reads and writes are atomic per token; nothing is ordered across tokens.
/// Writing an existing token replaces its query.
pub trait ContinuationStore: Send + Sync {
    /// Query stored for `token`
    fn get(&self, token: &str) -> Option<OaiQuery>;

    /// Store `query` under `token`
    fn put(&self, token: &str, query: &OaiQuery) -> Result<()>;
}

/// Process-local store
#[derive(Default)]
pub struct MemoryContinuationStore {
    entries: DashMap<String, OaiQuery>,
}

impl MemoryContinuationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no token is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ContinuationStore for MemoryContinuationStore {
    fn get(&self, token: &str) -> Option<OaiQuery> {
        self.entries.get(token).map(|entry| entry.value().clone())
    }

    fn put(&self, token: &str, query: &OaiQuery) -> Result<()> {
        self.entries.insert(token.to_string(), query.clone());
        Ok(())
    }
}

/// One journal line
#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    token: String,
    query: OaiQuery,
    created_at: DateTime<Utc>,
}

/// Store backed by an append-only JSON Lines journal.
///
/// The journal is replayed on open, later lines overriding earlier ones.
/// Pruning old entries is left to the operator; each line carries its
/// creation time.
pub struct FileContinuationStore {
    path: PathBuf,
    entries: DashMap<String, OaiQuery>,
    journal: Mutex<File>,
}

impl FileContinuationStore {
    /// Open (or create) the journal at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| {
                Error::Store(format!("Failed to create {}: {e}", dir.display()))
            })?;
        }

        let entries = DashMap::new();
        if path.exists() {
            let replayed = Self::replay(&path, &entries)?;
            info!(path = %path.display(), entries = replayed, "Loaded continuation journal");
        }

        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Store(format!("Failed to open {}: {e}", path.display())))?;

        Ok(Self {
            path,
            entries,
            journal: Mutex::new(journal),
        })
    }

    /// Journal location
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn replay(path: &Path, entries: &DashMap<String, OaiQuery>) -> Result<usize> {
        let file = File::open(path)
            .map_err(|e| Error::Store(format!("Failed to read {}: {e}", path.display())))?;
        let mut count = 0;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| Error::Store(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => {
                    entries.insert(entry.token, entry.query);
                    count += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), line = index + 1, error = %e, "Skipping corrupt journal line");
                }
            }
        }
        Ok(count)
    }
}

impl ContinuationStore for FileContinuationStore {
    fn get(&self, token: &str) -> Option<OaiQuery> {
        self.entries.get(token).map(|entry| entry.value().clone())
    }

    fn put(&self, token: &str, query: &OaiQuery) -> Result<()> {
        let entry = JournalEntry {
            token: token.to_string(),
            query: query.clone(),
            created_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        {
            let mut journal = self.journal.lock();
            journal
                .write_all(line.as_bytes())
                .and_then(|()| journal.flush())
                .map_err(|e| Error::Store(format!("Failed to append to {}: {e}", self.path.display())))?;
        }

        self.entries.insert(entry.token, entry.query);
        debug!(token = %token, "Stored continuation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn query(set: &str) -> OaiQuery {
        let mut q = OaiQuery::from_pairs([("verb", "ListRecords"), ("set", set)]);
        q.sets = vec![set.to_string(), "z".to_string()];
        q
    }

    #[test]
    fn test_memory_get_put() {
        let store = MemoryContinuationStore::new();
        assert!(store.get("t1").is_none());
        store.put("t1", &query("a")).unwrap();
        assert_eq!(store.get("t1"), Some(query("a")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_last_write_wins() {
        let store = MemoryContinuationStore::new();
        store.put("t1", &query("a")).unwrap();
        store.put("t1", &query("b")).unwrap();
        assert_eq!(store.get("t1"), Some(query("b")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_concurrent_puts() {
        let store = Arc::new(MemoryContinuationStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        store.put(&format!("t{i}-{j}"), &query(&i.to_string())).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 400);
        assert_eq!(store.get("t3-49"), Some(query("3")));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens").join("journal.jsonl");

        {
            let store = FileContinuationStore::open(&path).unwrap();
            store.put("t1", &query("a")).unwrap();
            store.put("t2", &query("b")).unwrap();
            store.put("t1", &query("c")).unwrap();
            assert_eq!(store.get("t1"), Some(query("c")));
        }

        let reopened = FileContinuationStore::open(&path).unwrap();
        assert_eq!(reopened.get("t1"), Some(query("c")));
        assert_eq!(reopened.get("t2"), Some(query("b")));
        assert!(reopened.get("t3").is_none());
    }

    #[test]
    fn test_file_store_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        {
            let store = FileContinuationStore::open(&path).unwrap();
            store.put("good", &query("a")).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        drop(file);

        let store = FileContinuationStore::open(&path).unwrap();
        assert_eq!(store.get("good"), Some(query("a")));
    }
}
