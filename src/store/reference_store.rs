use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Serialize, Deserialize};

use crate::options::guiding::FlipState;

/// Partitions reference images and guide decisions. Any change invalidates
/// the current reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObservingKey {
    pub field: String,
    pub filter: String,
    pub xbin: u32,
    pub ybin: u32,
    pub xsize: u32,
    pub ysize: u32,
    pub xorigin: u32,
    pub yorigin: u32,
    pub flip_status: FlipStatusKey,
}

/// A hashable, serialisable mirror of [`FlipState`] for use as part of the
/// observing key (the richer enum carries no payload worth keying on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlipStatusKey {
    Before,
    After,
    Fork,
    Unknown,
}

impl From<FlipState> for FlipStatusKey {
    fn from(flip: FlipState) -> Self {
        match flip {
            FlipState::Before => FlipStatusKey::Before,
            FlipState::After => FlipStatusKey::After,
            FlipState::Fork => FlipStatusKey::Fork,
            FlipState::Unknown | FlipState::Error => FlipStatusKey::Unknown,
        }
    }
}

impl From<FlipStatusKey> for FlipState {
    fn from(key: FlipStatusKey) -> Self {
        match key {
            FlipStatusKey::Before => FlipState::Before,
            FlipStatusKey::After => FlipState::After,
            FlipStatusKey::Fork => FlipState::Fork,
            FlipStatusKey::Unknown => FlipState::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
struct ReferenceRecord {
    path: PathBuf,
    valid_from: SystemTime,
    valid_until: Option<SystemTime>,
}

/// `(key, reference_path, valid_from, valid_until | ∞)`. At most one record
/// per key may have `valid_until = None` at any time.
///
/// This in-process implementation stands in for the MySQL-backed store the
/// system design calls for; callers only ever see `lookup`/`insert`/`retire`,
/// so swapping in a real database-backed store later is a matter of
/// re-implementing this type.
#[derive(Debug, Default)]
pub struct ReferenceStore {
    records: Mutex<HashMap<ObservingKey, Vec<ReferenceRecord>>>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        Self { records: Mutex::new(HashMap::new()) }
    }

    /// Returns the currently active reference for `key`, i.e. the record
    /// with `valid_from < now` and `valid_until = None`.
    pub fn lookup(&self, key: &ObservingKey) -> Option<PathBuf> {
        let now = SystemTime::now();
        let records = self.records.lock().unwrap();
        records.get(key)?.iter()
            .find(|r| r.valid_until.is_none() && r.valid_from < now)
            .map(|r| r.path.clone())
    }

    /// Registers `path` as the new active reference for `key`. Never
    /// mutates an existing record's `valid_until`; retirement is a separate,
    /// explicit administrative action.
    pub fn insert(&self, key: ObservingKey, path: PathBuf) {
        let mut records = self.records.lock().unwrap();
        records.entry(key).or_default().push(ReferenceRecord {
            path,
            valid_from: SystemTime::now(),
            valid_until: None,
        });
    }

    /// Administrative action: retires the currently active record for
    /// `key`, if any, by setting its `valid_until` to now.
    pub fn retire(&self, key: &ObservingKey) {
        let mut records = self.records.lock().unwrap();
        if let Some(list) = records.get_mut(key) {
            if let Some(active) = list.iter_mut().find(|r| r.valid_until.is_none()) {
                active.valid_until = Some(SystemTime::now());
            }
        }
    }
}

/// Copies `src` into the long-term reference directory under a
/// content-stable name and registers it with the store, atomically: the
/// file lands via a staging path so a reader never observes a
/// partially-written reference frame.
pub fn promote_reference(
    store: &ReferenceStore,
    key: ObservingKey,
    src: &Path,
    reference_dir: &Path,
) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(reference_dir)?;
    let file_name = src.file_name()
        .ok_or_else(|| anyhow::anyhow!("reference source path {src:?} has no file name"))?;
    let dst = reference_dir.join(file_name);
    crate::io_utils::copy_atomic(src, &dst)?;
    store.insert(key, dst.clone());
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(field: &str) -> ObservingKey {
        ObservingKey {
            field: field.to_string(),
            filter: "R".to_string(),
            xbin: 1, ybin: 1,
            xsize: 100, ysize: 100,
            xorigin: 0, yorigin: 0,
            flip_status: FlipStatusKey::Before,
        }
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let store = ReferenceStore::new();
        let k = key("M31");
        assert!(store.lookup(&k).is_none());
        store.insert(k.clone(), PathBuf::from("/refs/m31.fits"));
        assert_eq!(store.lookup(&k), Some(PathBuf::from("/refs/m31.fits")));
    }

    #[test]
    fn retired_record_no_longer_resolves() {
        let store = ReferenceStore::new();
        let k = key("M42");
        store.insert(k.clone(), PathBuf::from("/refs/m42.fits"));
        store.retire(&k);
        assert!(store.lookup(&k).is_none());
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let store = ReferenceStore::new();
        let a = key("A");
        let mut b = key("A");
        b.xbin = 2;
        store.insert(a.clone(), PathBuf::from("/refs/a.fits"));
        assert!(store.lookup(&b).is_none());
    }
}
