//! Durable mirror for the ledger
//!
//! A store maps a key to one JSON document that is rewritten wholesale on
//! every save. `JsonFileStore` keeps one pretty-printed file per key;
//! `MemoryStore` backs tests and throwaway runs.

use anyhow::Context;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub trait DurableStore: Send + Sync {
    /// Load the document stored under `key`; an empty JSON array if absent or unreadable
    fn load(&self, key: &str) -> Value;

    /// Replace the document stored under `key`
    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()>;
}

/// One JSON file per key, resolved relative to a root directory
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl DurableStore for JsonFileStore {
    fn load(&self, key: &str) -> Value {
        let path = self.path_for(key);
        if !path.exists() {
            debug!(path = %path.display(), "store_file_absent");
            return Value::Array(Vec::new());
        }

        let parsed = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))
            .and_then(|content| {
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))
            });

        match parsed {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "store_load_failed");
                Value::Array(Vec::new())
            }
        }
    }

    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        let path = self.path_for(key);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let body = serde_json::to_vec_pretty(value).context("Failed to serialize document")?;

        // Write beside the target and rename so readers never see a torn file
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &body).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!(path = %path.display(), bytes = %body.len(), "store_saved");
        Ok(())
    }
}

/// In-process store; contents are lost with the process
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<FxHashMap<String, Value>>,
    fail_saves: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with one document
    pub fn with_document(key: &str, value: Value) -> Self {
        let store = Self::new();
        store.documents.lock().insert(key.to_string(), value);
        store
    }

    /// Store whose saves always fail, for exercising best-effort persistence
    pub fn failing() -> Self {
        Self { documents: Mutex::new(FxHashMap::default()), fail_saves: true }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.documents.lock().get(key).cloned()
    }
}

impl DurableStore for MemoryStore {
    fn load(&self, key: &str) -> Value {
        self.get(key).unwrap_or_else(|| Value::Array(Vec::new()))
    }

    fn save(&self, key: &str, value: &Value) -> anyhow::Result<()> {
        if self.fail_saves {
            anyhow::bail!("memory store configured to fail saves");
        }
        self.documents.lock().insert(key.to_string(), value.clone());
        Ok(())
    }
}
