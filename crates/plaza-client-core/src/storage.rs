//! The two storage tiers backing the token store.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

const SESSION_SCHEMA_VERSION: u32 = 1;
const SESSION_FILE_NAME: &str = "session.v1.json";

/// A namespaced string key/value backend for session state.
///
/// Reads must be cheap. Writes may touch disk but never fail the caller;
/// a tier that cannot persist degrades to logging and in-memory state.
pub trait StorageTier: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
    version: u32,
    entries: BTreeMap<String, String>,
}

/// Persistent tier: a schema-versioned JSON document that survives shell
/// restarts. The in-memory map is authoritative; the file mirrors it.
#[derive(Debug)]
pub struct FileTier {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileTier {
    /// Opens the tier at `path`, tolerating a missing or corrupt document.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_document(&path);
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    /// Default document location under the platform data dir.
    #[must_use]
    pub fn default_path() -> PathBuf {
        if let Some(mut data_dir) = dirs::data_local_dir() {
            data_dir.push("plaza");
            data_dir.push(SESSION_FILE_NAME);
            return data_dir;
        }

        if let Some(mut home_dir) = dirs::home_dir() {
            home_dir.push(".plaza");
            home_dir.push(SESSION_FILE_NAME);
            return home_dir;
        }

        PathBuf::from(SESSION_FILE_NAME)
    }

    /// Document location inside a caller-chosen directory.
    #[must_use]
    pub fn document_path(dir: &Path) -> PathBuf {
        dir.join(SESSION_FILE_NAME)
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|error| format!("session mkdir failed: {error}"))?;
        }
        let encoded = serde_json::to_string_pretty(&SessionDocument {
            version: SESSION_SCHEMA_VERSION,
            entries: entries.clone(),
        })
        .map_err(|error| format!("session encode failed: {error}"))?;
        fs::write(&self.path, encoded).map_err(|error| format!("session write failed: {error}"))
    }
}

fn load_document(path: &Path) -> BTreeMap<String, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return BTreeMap::new(),
    };
    let parsed = serde_json::from_str::<SessionDocument>(raw.as_str());
    match parsed {
        Ok(document) if document.version == SESSION_SCHEMA_VERSION => document.entries,
        Ok(document) => {
            tracing::warn!(
                target: "plaza.storage",
                version = document.version,
                "unsupported session document version, starting empty"
            );
            BTreeMap::new()
        }
        Err(error) => {
            tracing::warn!(
                target: "plaza.storage",
                error = %error,
                path = %path.display(),
                "corrupt session document, starting empty"
            );
            BTreeMap::new()
        }
    }
}

impl StorageTier for FileTier {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().ok()?;
        entries.get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), value.to_string());
            if let Err(error) = self.flush(&entries) {
                tracing::warn!(target: "plaza.storage", error, "session document not persisted");
            }
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.write() {
            if entries.remove(key).is_none() {
                return;
            }
            if let Err(error) = self.flush(&entries) {
                tracing::warn!(target: "plaza.storage", error, "session document not persisted");
            }
        }
    }
}

/// Process-scoped tier. Gone when the shell exits, like its tab.
#[derive(Debug, Default)]
pub struct MemoryTier {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryTier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageTier for MemoryTier {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().ok()?;
        entries.get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
    }
}
