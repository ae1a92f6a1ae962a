//! Durable state: last-known remote objects keyed by logical name.
//!
//! The state file is what plans diff against and what cross-run reference
//! resolution reads. Saves use optimistic locking: the serial loaded from
//! disk must still match at save time, and a run-scoped lock file guards
//! against two concurrent runs on the same state.

use crate::error::StateError;
use crate::provider::AttrMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Last-known record for one provisioned resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_type: String,
    /// Provider-assigned identifier
    pub id: String,
    /// Resolved input attributes at last apply
    pub inputs: AttrMap,
    /// blake3 over the canonical JSON of `inputs`
    pub input_hash: String,
    /// Computed output attributes at last apply
    pub outputs: AttrMap,
    /// Logical names this resource depended on, for delete ordering
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub protect: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    /// Output attribute lookup, falling back to stored inputs.
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.outputs.get(name).or_else(|| self.inputs.get(name))
    }
}

/// The whole state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub serial: u64,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    /// Exported outputs from the last successful run
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    pub last_updated: DateTime<Utc>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            serial: 0,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

impl StateFile {
    pub fn get(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }

    /// Names of resources whose records list `name` as a dependency.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.resources
            .iter()
            .filter(|(_, record)| record.dependencies.iter().any(|d| d == name))
            .map(|(n, _)| n.clone())
            .collect()
    }
}

/// Canonical input hash: blake3 over sorted-key JSON.
pub fn input_hash(inputs: &AttrMap) -> String {
    let bytes = serde_json::to_vec(inputs).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// Loads and saves a state file with optimistic locking.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Load state from disk, or return an empty state if the file is absent.
    pub fn load(&self) -> Result<StateFile, StateError> {
        if !self.path.exists() {
            log::debug!("state file {} absent, starting empty", self.path.display());
            return Ok(StateFile::default());
        }
        let content = fs::read_to_string(&self.path)?;
        let state: StateFile = serde_json::from_str(&content)?;
        log::debug!(
            "loaded state from {} (serial {})",
            self.path.display(),
            state.serial
        );
        Ok(state)
    }

    /// Save state, bumping the serial.
    ///
    /// Fails with [`StateError::SerialMismatch`] if the file on disk has a
    /// different serial than the one this state was loaded with.
    pub fn save(&self, state: &mut StateFile) -> Result<(), StateError> {
        if self.path.exists() {
            let content = fs::read_to_string(&self.path)?;
            let on_disk: StateFile = serde_json::from_str(&content)?;
            if on_disk.serial != state.serial {
                return Err(StateError::SerialMismatch {
                    loaded: state.serial,
                    found: on_disk.serial,
                });
            }
        } else if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        state.serial += 1;
        state.last_updated = Utc::now();
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, content)?;
        log::debug!(
            "saved state to {} (serial {})",
            self.path.display(),
            state.serial
        );
        Ok(())
    }

    /// Take the run-scoped lock. Released when the guard drops.
    pub fn lock(&self) -> Result<StateLock, StateError> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => {
                use std::io::Write;
                let mut file = file;
                let _ = writeln!(file, "pid {} at {}", std::process::id(), Utc::now());
                Ok(StateLock { path: lock_path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&lock_path).unwrap_or_default();
                Err(StateError::Locked {
                    holder: holder.trim().to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Guard for the state lock file.
pub struct StateLock {
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
