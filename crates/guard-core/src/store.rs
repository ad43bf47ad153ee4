//! Violation state persistence: in-memory or Sled-backed.
//!
//! Whether counts survive a restart is a deployment choice (`persist_violations`).

use crate::error::GuardResult;
use crate::penalty::ViolationState;
use dashmap::DashMap;
use sled::Db;
use std::path::Path;

const KEY_PREFIX: &str = "violation/";

fn state_key(machine_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, machine_id)
}

pub trait ViolationStore: Send + Sync {
    fn load(&self, machine_id: &str) -> GuardResult<Option<ViolationState>>;
    fn save(&self, machine_id: &str, state: &ViolationState) -> GuardResult<()>;
}

/// Process-lifetime store; counts reset on restart.
#[derive(Debug, Default)]
pub struct MemoryViolationStore {
    states: DashMap<String, ViolationState>,
}

impl MemoryViolationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViolationStore for MemoryViolationStore {
    fn load(&self, machine_id: &str) -> GuardResult<Option<ViolationState>> {
        Ok(self.states.get(machine_id).map(|s| s.clone()))
    }

    fn save(&self, machine_id: &str, state: &ViolationState) -> GuardResult<()> {
        self.states.insert(machine_id.to_string(), state.clone());
        Ok(())
    }
}

/// Durable store. Sled is single-writer: only one agent process may open a path.
pub struct SledViolationStore {
    db: Db,
}

impl SledViolationStore {
    pub fn open_path<P: AsRef<Path>>(path: P) -> GuardResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }
}

impl ViolationStore for SledViolationStore {
    fn load(&self, machine_id: &str) -> GuardResult<Option<ViolationState>> {
        match self.db.get(state_key(machine_id).as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, machine_id: &str, state: &ViolationState) -> GuardResult<()> {
        let bytes = serde_json::to_vec(state)?;
        self.db.insert(state_key(machine_id).as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn sled_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledViolationStore::open_path(dir.path().join("state_db")).unwrap();
        let state = ViolationState {
            count: 2,
            last_violation_at: Some(Utc::now()),
            ..Default::default()
        };
        assert!(store.load("kiosk-1").unwrap().is_none());
        store.save("kiosk-1", &state).unwrap();
        assert_eq!(store.load("kiosk-1").unwrap(), Some(state));
        assert!(store.load("kiosk-2").unwrap().is_none());
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryViolationStore::new();
        let state = ViolationState {
            count: 1,
            ..Default::default()
        };
        store.save("m", &state).unwrap();
        assert_eq!(store.load("m").unwrap(), Some(state));
    }
}
