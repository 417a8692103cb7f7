use std::fs;
use std::io;
use std::path::PathBuf;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::types::RelayConfig;

/// Operating configuration backed by a JSON document. Loaded once at startup;
/// every mutation is applied in memory first and then persisted wholesale.
/// Persistence is best-effort by contract: a failed write never rolls back the
/// in-memory state, and the caller decides to log-and-continue.
pub struct ConfigStore {
    path: PathBuf,
    current: Mutex<RelayConfig>,
}

impl ConfigStore {
    pub fn load(path: PathBuf) -> Self {
        let current = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<RelayConfig>(&raw).ok())
            .unwrap_or_default();
        ConfigStore {
            path,
            current: Mutex::new(current),
        }
    }

    pub async fn get(&self) -> RelayConfig {
        self.current.lock().await.clone()
    }

    /// Apply a permissive-merge patch in memory and return the new snapshot.
    pub async fn update(&self, patch: &Value) -> RelayConfig {
        let mut current = self.current.lock().await;
        current.apply_patch(patch);
        current.clone()
    }

    pub async fn persist(&self) -> io::Result<()> {
        let snapshot = self.current.lock().await.clone();
        let raw = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, raw)
    }
}

/// A single opaque text blob, replaced wholesale on every write.
pub struct KnowledgeStore {
    path: PathBuf,
    current: Mutex<String>,
}

impl KnowledgeStore {
    pub fn load(path: PathBuf) -> Self {
        let current = fs::read_to_string(&path).unwrap_or_default();
        KnowledgeStore {
            path,
            current: Mutex::new(current),
        }
    }

    pub async fn get(&self) -> String {
        self.current.lock().await.clone()
    }

    pub async fn set(&self, text: String) -> String {
        let mut current = self.current.lock().await;
        *current = text;
        current.clone()
    }

    pub async fn persist(&self) -> io::Result<()> {
        let snapshot = self.current.lock().await.clone();
        fs::write(&self.path, snapshot)
    }
}

/// Append-only JSONL event log, one object per line. Never read back by the
/// running process; exists purely for external forensics.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        AuditLog { path }
    }

    pub fn append(&self, event: &Value) -> io::Result<()> {
        use std::io::Write;
        let mut line = serde_json::to_string(event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}
