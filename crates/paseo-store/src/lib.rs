// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! The `paseoHome/agents.json` persistence contract (§4.5).
//!
//! The registry is loaded once at daemon boot and rewritten atomically
//! (write-to-temp + rename) after every `turn_completed`, so a crash mid-write
//! never leaves a half-written `agents.json` behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use paseo_provider::PersistenceBlob;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading registry {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing registry {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("writing registry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One persisted agent entry (§4.5 contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub provider: String,
    pub cwd: PathBuf,
    pub title: Option<String>,
    pub mode_id: Option<String>,
    pub last_activity_at: DateTime<Utc>,
    pub persistence: PersistenceBlob,
}

/// The on-disk registry snapshot: `paseoHome/agents.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    pub agents: HashMap<String, AgentRecord>,
}

impl Registry {
    /// Load the registry from `path`. A missing file is treated as an empty
    /// registry (first daemon boot), matching a fresh `paseoHome`.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Registry::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Atomically persist the registry: serialize to a sibling temp file,
    /// then rename over the target. A rename within the same directory is
    /// atomic on POSIX filesystems, so readers never observe a partial
    /// write.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).expect("Registry always serializes");
        let tmp_path = tmp_path_for(path);
        std::fs::write(&tmp_path, json.as_bytes()).map_err(|source| StoreError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn upsert(&mut self, record: AgentRecord) {
        self.agents.insert(record.id.clone(), record);
    }

    pub fn remove(&mut self, id: &str) -> Option<AgentRecord> {
        self.agents.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&AgentRecord> {
        self.agents.get(id)
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("agents.json");
    tmp.set_file_name(format!("{file_name}.tmp"));
    tmp
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> AgentRecord {
        AgentRecord {
            id: id.to_string(),
            provider: "mock".to_string(),
            cwd: PathBuf::from("/tmp/work"),
            title: None,
            mode_id: Some("auto".to_string()),
            last_activity_at: Utc::now(),
            persistence: PersistenceBlob(json!({"marker": "MARK_123"})),
        }
    }

    #[test]
    fn load_missing_file_returns_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Registry::load(&dir.path().join("agents.json")).unwrap();
        assert!(reg.agents.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let mut reg = Registry::default();
        reg.upsert(record("a1"));
        reg.save(&path).unwrap();

        let loaded = Registry::load(&path).unwrap();
        assert_eq!(loaded.get("a1").unwrap().provider, "mock");
    }

    #[test]
    fn save_does_not_leave_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let mut reg = Registry::default();
        reg.upsert(record("a1"));
        reg.save(&path).unwrap();
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn upsert_replaces_existing_entry() {
        let mut reg = Registry::default();
        reg.upsert(record("a1"));
        let mut second = record("a1");
        second.provider = "updated".to_string();
        reg.upsert(second);
        assert_eq!(reg.get("a1").unwrap().provider, "updated");
    }

    #[test]
    fn remove_drops_entry() {
        let mut reg = Registry::default();
        reg.upsert(record("a1"));
        reg.remove("a1");
        assert!(reg.get("a1").is_none());
    }

    #[test]
    fn save_overwrites_previous_contents_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let mut reg = Registry::default();
        reg.upsert(record("a1"));
        reg.save(&path).unwrap();

        let mut reg2 = Registry::default();
        reg2.upsert(record("a2"));
        reg2.save(&path).unwrap();

        let loaded = Registry::load(&path).unwrap();
        assert!(loaded.get("a1").is_none());
        assert!(loaded.get("a2").is_some());
    }
}
