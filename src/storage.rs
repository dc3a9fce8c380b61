//! Persisted configuration store: a named-scalar key/value mapping.
//!
//! The controller only depends on the [`ConfigStore`] trait; the default
//! implementation is a write-through JSON file, with an in-memory store as
//! the fallback (and for tests).

use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub mod keys {
    pub const BREW_SETPOINT: &str = "brew_setpoint";
    pub const STEAM_SETPOINT: &str = "steam_setpoint";
    pub const SHOT_TIME_LIMIT: &str = "shot_time_limit";
    pub const FEEDFORWARD_COMPENSATION: &str = "brew_feedforward_compensation";
}

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Format(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "config store I/O error: {}", e),
            StoreError::Format(e) => write!(f, "config store format error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Format(e)
    }
}

pub trait ConfigStore: Send {
    /// Missing keys are represented as `None`; callers fall back to defaults.
    fn get_f32(&mut self, key: &str) -> Option<f32>;
    fn set_f32(&mut self, key: &str, value: f32) -> Result<(), StoreError>;
}

/// In-memory store. Also serves as the degraded mode when the file-backed
/// store cannot be opened.
#[derive(Default)]
pub struct MemoryStore {
    values: HashMap<String, f32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn get_f32(&mut self, key: &str) -> Option<f32> {
        self.values.get(key).copied()
    }

    fn set_f32(&mut self, key: &str, value: f32) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Write-through JSON file store. The whole mapping is cached in memory and
/// rewritten on every accepted change; settings writes are rare and small,
/// so the synchronous rewrite never stalls the sampling loop noticeably.
pub struct JsonFileStore {
    path: PathBuf,
    values: HashMap<String, f32>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(contents) => {
                let values: HashMap<String, f32> = serde_json::from_str(&contents)?;
                info!("Loaded {} config entries from {:?}", values.len(), path);
                values
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config file at {:?}, starting with defaults", path);
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    fn flush(&self) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl ConfigStore for JsonFileStore {
    fn get_f32(&mut self, key: &str) -> Option<f32> {
        self.values.get(key).copied()
    }

    fn set_f32(&mut self, key: &str, value: f32) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        self.flush()?;
        debug!("Saved {} = {} to {:?}", key, value, self.path);
        Ok(())
    }
}

/// Open the file store, degrading to an in-memory store when that fails.
pub fn open_default_store(path: impl AsRef<Path>) -> Box<dyn ConfigStore + Send> {
    match JsonFileStore::open(&path) {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!("Config store unavailable: {} - settings will not persist", e);
            Box::new(MemoryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get_f32(keys::BREW_SETPOINT), None);
        store.set_f32(keys::BREW_SETPOINT, 95.0).unwrap();
        assert_eq!(store.get_f32(keys::BREW_SETPOINT), Some(95.0));
    }

    #[test]
    fn test_json_file_store_persists_across_reopen() {
        let path = std::env::temp_dir().join("gaggia-rs-store-test.json");
        let _ = fs::remove_file(&path);

        {
            let mut store = JsonFileStore::open(&path).unwrap();
            assert_eq!(store.get_f32(keys::STEAM_SETPOINT), None);
            store.set_f32(keys::STEAM_SETPOINT, 152.0).unwrap();
        }
        {
            let mut store = JsonFileStore::open(&path).unwrap();
            assert_eq!(store.get_f32(keys::STEAM_SETPOINT), Some(152.0));
        }

        let _ = fs::remove_file(&path);
    }
}
