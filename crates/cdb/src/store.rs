//! Deferred persistence
//!
//! Mutations record a pending outcome in the update tables and arm a single
//! store deadline. [`Cdb::store_pending`] drains the tables once the deadline
//! passes, issuing one write or delete per identity. When a table has no room
//! left the record is written synchronously instead.

use crate::cdb::Cdb;
use crate::record::{self, AppKeyRecord, NetRecord, NodeRecord, SubnetRecord, NODE_FLAG_CONFIGURED};
use crate::tracker::{KeyId, KeyKind, Outcome, Tracked};
use meshcdb_common::{Error, Result, SettingsBackend};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Sticky bits telling the flush which groups have work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingFlag {
    Net,
    Nodes,
    Keys,
}

/// Re-armable store deadline.
///
/// Arming while already armed keeps whichever deadline is sooner, so a burst
/// of changes results in a single flush.
#[derive(Debug, Default)]
pub(crate) struct StoreSchedule {
    deadline: Option<Instant>,
}

impl StoreSchedule {
    pub fn arm(&mut self, timeout: Duration) {
        let at = Instant::now() + timeout;
        match self.deadline {
            Some(current) if current <= at => {}
            _ => self.deadline = Some(at),
        }
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

impl<B: SettingsBackend> Cdb<B> {
    /// When the pending changes are due to be flushed, if any are
    pub fn store_deadline(&self) -> Option<Instant> {
        self.schedule.deadline()
    }

    /// Whether any change is waiting for a flush
    pub fn has_pending(&self) -> bool {
        self.flags.net_pending || self.flags.nodes_pending || self.flags.keys_pending
    }

    /// Flush every pending change to the settings backend.
    ///
    /// Each pending identity produces exactly one write or delete. Failures
    /// are logged; the entries are dropped and only a later mutation of the
    /// same identity will persist it again.
    pub fn store_pending(&mut self) {
        self.schedule.disarm();

        if std::mem::take(&mut self.flags.net_pending) {
            let res = if self.flags.valid {
                self.write_net()
            } else {
                self.clear_net()
            };
            if let Err(e) = res {
                debug!("Dropped pending Net record: {}", e);
            }
        }

        if std::mem::take(&mut self.flags.nodes_pending) {
            for update in self.node_updates.drain() {
                let res = match update.outcome {
                    Outcome::Clear => self.clear_node(update.id),
                    Outcome::Store => self.write_node(update.id),
                };
                if let Err(e) = res {
                    debug!("Dropped pending node 0x{:04x}: {}", update.id, e);
                }
            }
        }

        if std::mem::take(&mut self.flags.keys_pending) {
            for update in self.key_updates.drain() {
                let res = match update.outcome {
                    Outcome::Clear => self.clear_key(update.id),
                    Outcome::Store => self.write_key(update.id),
                };
                if let Err(e) = res {
                    debug!("Dropped pending {:?} 0x{:03x}: {}", update.id.kind, update.id.idx, e);
                }
            }
        }
    }

    pub(crate) fn schedule_store(&mut self, flag: PendingFlag) {
        match flag {
            PendingFlag::Net => self.flags.net_pending = true,
            PendingFlag::Nodes => self.flags.nodes_pending = true,
            PendingFlag::Keys => self.flags.keys_pending = true,
        }
        let timeout = self.config.store_timeout();
        self.schedule.arm(timeout);
    }

    pub(crate) fn update_node_settings(&mut self, addr: u16, outcome: Outcome) -> Result<()> {
        debug!("Node 0x{:04x} pending {:?}", addr, outcome);

        match self.node_updates.record(addr, outcome) {
            Tracked::Coalesced | Tracked::Queued => {
                self.schedule_store(PendingFlag::Nodes);
                Ok(())
            }
            Tracked::Exhausted => match outcome {
                Outcome::Store => self.write_node(addr),
                Outcome::Clear => self.clear_node(addr),
            },
        }
    }

    pub(crate) fn update_key_settings(&mut self, id: KeyId, outcome: Outcome) -> Result<()> {
        debug!("{:?} 0x{:03x} pending {:?}", id.kind, id.idx, outcome);

        match self.key_updates.record(id, outcome) {
            Tracked::Coalesced | Tracked::Queued => {
                self.schedule_store(PendingFlag::Keys);
                Ok(())
            }
            Tracked::Exhausted => match outcome {
                Outcome::Store => self.write_key(id),
                Outcome::Clear => self.clear_key(id),
            },
        }
    }

    // ========================================================================
    // Record writers
    // ========================================================================

    fn persist(&self, path: &str, value: Option<&[u8]>) -> Result<()> {
        let res = match value {
            Some(value) => self.backend.save_one(path, value),
            None => self.backend.delete(path),
        };

        match res {
            Ok(()) => {
                debug!(
                    "{} {}",
                    if value.is_some() { "Stored" } else { "Cleared" },
                    path
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to {} {}: {}",
                    if value.is_some() { "store" } else { "clear" },
                    path,
                    e
                );
                Err(Error::PersistenceFailure(format!("{}: {}", path, e)))
            }
        }
    }

    fn write_net(&self) -> Result<()> {
        let rec = NetRecord {
            iv_index: self.iv_index,
            iv_update: self.flags.ivu_in_progress,
            lowest_avail_addr: self.lowest_avail_addr,
        };
        self.persist(&record::net_path(&self.config.settings_root), Some(&rec.encode()))
    }

    fn clear_net(&self) -> Result<()> {
        self.persist(&record::net_path(&self.config.settings_root), None)
    }

    fn write_node(&self, addr: u16) -> Result<()> {
        let Some(node) = self.node_exact(addr) else {
            warn!("Node 0x{:04x} not found, nothing to store", addr);
            return Ok(());
        };

        let rec = NodeRecord {
            net_idx: node.net_idx(),
            num_elem: node.num_elem(),
            flags: if node.is_configured() { NODE_FLAG_CONFIGURED } else { 0 },
            uuid: *node.uuid().as_bytes(),
            dev_key: node.dev_key().clone(),
        };
        self.persist(&record::node_path(&self.config.settings_root, addr), Some(&rec.encode()))
    }

    fn clear_node(&self, addr: u16) -> Result<()> {
        self.persist(&record::node_path(&self.config.settings_root, addr), None)
    }

    fn write_key(&self, id: KeyId) -> Result<()> {
        let root = &self.config.settings_root;
        match id.kind {
            KeyKind::Subnet => {
                let Some(sub) = self.subnet_get(id.idx) else {
                    warn!("Subnet 0x{:03x} not found, nothing to store", id.idx);
                    return Ok(());
                };
                let rec = SubnetRecord {
                    kr_phase: sub.kr_phase(),
                    keys: sub.keys.clone(),
                };
                self.persist(&record::subnet_path(root, id.idx), Some(&rec.encode()))
            }
            KeyKind::AppKey => {
                let Some(key) = self.app_key_get(id.idx) else {
                    warn!("AppKey 0x{:03x} not found, nothing to store", id.idx);
                    return Ok(());
                };
                let rec = AppKeyRecord {
                    net_idx: key.net_idx(),
                    keys: key.keys.clone(),
                };
                self.persist(&record::app_key_path(root, id.idx), Some(&rec.encode()))
            }
        }
    }

    fn clear_key(&self, id: KeyId) -> Result<()> {
        let root = &self.config.settings_root;
        let path = match id.kind {
            KeyKind::Subnet => record::subnet_path(root, id.idx),
            KeyKind::AppKey => record::app_key_path(root, id.idx),
        };
        self.persist(&path, None)
    }
}
