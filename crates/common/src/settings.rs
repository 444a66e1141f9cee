//! Settings backends
//!
//! The configuration database persists itself as named binary records in a
//! key-value store. Two backends are provided: [`crate::Database`] (SQLite)
//! and [`MemorySettings`], a log-structured in-memory store.

use crate::{Error, Result};
use parking_lot::Mutex;
use tracing::debug;

/// Key-value store consumed by the configuration database
pub trait SettingsBackend {
    /// Store one named record, replacing any previous value
    fn save_one(&self, path: &str, value: &[u8]) -> Result<()>;

    /// Remove one named record
    fn delete(&self, path: &str) -> Result<()>;

    /// Replay every record stored under `prefix`.
    ///
    /// The visitor receives the name relative to `prefix` (without the
    /// separating `/`) and the stored value. An empty value is a deletion
    /// marker. A visitor error aborts the replay.
    fn load(&self, prefix: &str, visitor: &mut dyn FnMut(&str, &[u8]) -> Result<()>) -> Result<()>;
}

/// Strip `prefix/` from `path`, returning the relative name
pub(crate) fn relative_name<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    path.strip_prefix(prefix)?.strip_prefix('/')
}

/// In-memory append-only settings store.
///
/// Every save appends `(path, value)` and every delete appends `(path, [])`,
/// the way flash-backed settings stores record deletions. [`load`] replays
/// the log in order, deletion markers included.
///
/// [`load`]: SettingsBackend::load
#[derive(Default)]
pub struct MemorySettings {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    log: Vec<(String, Vec<u8>)>,
    ops: Vec<SettingsOp>,
    writes: usize,
    deletes: usize,
    fail_writes: bool,
}

/// One backend operation, as observed by tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsOp {
    Save { path: String, value: Vec<u8> },
    Delete { path: String },
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw record, bypassing counters and failure injection
    pub fn seed(&self, path: &str, value: &[u8]) {
        self.inner.lock().log.push((path.to_string(), value.to_vec()));
    }

    /// Make every subsequent save and delete fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Number of successful saves
    pub fn writes(&self) -> usize {
        self.inner.lock().writes
    }

    /// Number of successful deletes
    pub fn deletes(&self) -> usize {
        self.inner.lock().deletes
    }

    /// Saves and deletes issued since creation or the last [`compact`],
    /// oldest first. Seeded records are not included.
    ///
    /// [`compact`]: MemorySettings::compact
    pub fn ops(&self) -> Vec<SettingsOp> {
        self.inner.lock().ops.clone()
    }

    /// Latest live value of `path`, if any
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .log
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .and_then(|(_, v)| if v.is_empty() { None } else { Some(v.clone()) })
    }

    /// Forget recorded operations and counters while keeping live values
    pub fn compact(&self) {
        let mut inner = self.inner.lock();
        let mut live: Vec<(String, Vec<u8>)> = Vec::new();
        for (path, value) in inner.log.drain(..) {
            live.retain(|(p, _)| *p != path);
            if !value.is_empty() {
                live.push((path, value));
            }
        }
        inner.log = live;
        inner.ops.clear();
        inner.writes = 0;
        inner.deletes = 0;
    }
}

impl SettingsBackend for MemorySettings {
    fn save_one(&self, path: &str, value: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(Error::PersistenceFailure(format!("write to {} rejected", path)));
        }
        inner.log.push((path.to_string(), value.to_vec()));
        inner.ops.push(SettingsOp::Save {
            path: path.to_string(),
            value: value.to_vec(),
        });
        inner.writes += 1;
        debug!("Saved {} ({} bytes)", path, value.len());
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(Error::PersistenceFailure(format!("delete of {} rejected", path)));
        }
        inner.log.push((path.to_string(), Vec::new()));
        inner.ops.push(SettingsOp::Delete {
            path: path.to_string(),
        });
        inner.deletes += 1;
        debug!("Deleted {}", path);
        Ok(())
    }

    fn load(&self, prefix: &str, visitor: &mut dyn FnMut(&str, &[u8]) -> Result<()>) -> Result<()> {
        // Snapshot first so the visitor may write back without deadlocking.
        let log = self.inner.lock().log.clone();
        for (path, value) in &log {
            if let Some(name) = relative_name(prefix, path) {
                visitor(name, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_name() {
        assert_eq!(relative_name("bt/mesh/cdb", "bt/mesh/cdb/Node/1"), Some("Node/1"));
        assert_eq!(relative_name("bt/mesh/cdb", "bt/mesh/cdbx/Node/1"), None);
        assert_eq!(relative_name("bt/mesh/cdb", "bt/mesh/other"), None);
    }

    #[test]
    fn test_memory_replays_tombstones() {
        let store = MemorySettings::new();
        store.save_one("root/Node/1", &[1, 2, 3]).unwrap();
        store.delete("root/Node/1").unwrap();
        store.save_one("other/Node/2", &[4]).unwrap();

        let mut seen = Vec::new();
        store
            .load("root", &mut |name, value| {
                seen.push((name.to_string(), value.len()));
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, vec![("Node/1".to_string(), 3), ("Node/1".to_string(), 0)]);
        assert_eq!(store.get("root/Node/1"), None);
        assert_eq!(store.writes(), 2);
        assert_eq!(store.deletes(), 1);
        assert_eq!(
            store.ops()[1],
            SettingsOp::Delete {
                path: "root/Node/1".into()
            }
        );
    }

    #[test]
    fn test_memory_failure_injection() {
        let store = MemorySettings::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.save_one("root/Net", &[0]),
            Err(Error::PersistenceFailure(_))
        ));
        assert!(store.delete("root/Net").is_err());
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn test_memory_compact_keeps_live_values() {
        let store = MemorySettings::new();
        store.save_one("root/a", &[1]).unwrap();
        store.save_one("root/a", &[2]).unwrap();
        store.save_one("root/b", &[3]).unwrap();
        store.delete("root/b").unwrap();
        store.compact();

        assert!(store.ops().is_empty());
        assert_eq!(store.writes(), 0);
        assert_eq!(store.get("root/a"), Some(vec![2]));
        assert_eq!(store.get("root/b"), None);

        let mut names = Vec::new();
        store
            .load("root", &mut |name, _| {
                names.push(name.to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(names, vec!["a".to_string()]);
    }
}
