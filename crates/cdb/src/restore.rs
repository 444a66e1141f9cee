//! Boot-time restore
//!
//! Replays every record under the settings root into the in-memory tables.
//! A zero-length value is a deletion marker. Records that cannot be applied
//! are logged and skipped so one bad entry never hides the rest.

use crate::alloc::AddrCheck;
use crate::app_key::AppKey;
use crate::cdb::Cdb;
use crate::node::Node;
use crate::record::{self, AppKeyRecord, NetRecord, NodeRecord, SubnetRecord, NODE_FLAG_CONFIGURED};
use crate::subnet::Subnet;
use meshcdb_common::{key_idx_is_valid, Error, Result, SettingsBackend};
use tracing::{debug, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// What a restore pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Records written into the tables
    pub applied: usize,
    /// Deletion markers that removed an entry
    pub deleted: usize,
    /// Records that were ignored
    pub skipped: usize,
}

enum Applied {
    Set,
    Deleted,
    Nothing,
}

impl<B: SettingsBackend> Cdb<B> {
    /// Restore the database from the settings backend.
    ///
    /// Only a failure to enumerate the backend is returned as an error.
    /// Nothing is scheduled for storage by a restore.
    pub fn load(&mut self) -> Result<RestoreSummary> {
        let mut records: Vec<(String, Zeroizing<Vec<u8>>)> = Vec::new();
        self.backend.load(&self.config.settings_root, &mut |name, value| {
            records.push((name.to_string(), Zeroizing::new(value.to_vec())));
            Ok(())
        })?;

        let mut summary = RestoreSummary::default();
        for (name, value) in &records {
            match self.restore_record(name, value) {
                Ok(Applied::Set) => summary.applied += 1,
                Ok(Applied::Deleted) => summary.deleted += 1,
                Ok(Applied::Nothing) => {}
                Err(e) => {
                    warn!("Skipping record {}: {}", name, e);
                    summary.skipped += 1;
                }
            }
        }

        debug!(
            "Restore done: {} applied, {} deleted, {} skipped",
            summary.applied, summary.deleted, summary.skipped
        );
        Ok(summary)
    }

    fn restore_record(&mut self, name: &str, value: &[u8]) -> Result<Applied> {
        let (module, id) = match name.split_once('/') {
            Some((module, id)) => (module, Some(id)),
            None => (name, None),
        };

        match (module, id) {
            ("Net", None) => self.restore_net(value),
            ("Node", Some(id)) => self.restore_node(record::parse_id(id)?, value),
            ("Subnet", Some(id)) => self.restore_subnet(record::parse_id(id)?, value),
            ("AppKey", Some(id)) => self.restore_app_key(record::parse_id(id)?, value),
            _ => Err(Error::Decode(format!("unknown record {:?}", name))),
        }
    }

    fn restore_net(&mut self, value: &[u8]) -> Result<Applied> {
        if value.is_empty() {
            self.flags.valid = false;
            return Ok(Applied::Deleted);
        }

        let rec = NetRecord::decode(value)?;
        self.iv_index = rec.iv_index;
        self.flags.ivu_in_progress = rec.iv_update;
        self.lowest_avail_addr = rec.lowest_avail_addr;
        self.flags.valid = true;

        debug!(
            "Restored IV index {} (update {}), lowest address 0x{:04x}",
            rec.iv_index, rec.iv_update, rec.lowest_avail_addr
        );
        Ok(Applied::Set)
    }

    fn restore_node(&mut self, addr: u16, value: &[u8]) -> Result<Applied> {
        let existing = self
            .nodes
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|node| node.addr == addr));

        if value.is_empty() {
            return match existing {
                Some(i) => {
                    self.remove_node(i, false)?;
                    debug!("Removed node 0x{:04x}", addr);
                    Ok(Applied::Deleted)
                }
                None => Ok(Applied::Nothing),
            };
        }

        let rec = NodeRecord::decode(value)?;
        if let AddrCheck::Conflict { .. } = self.check_range(addr, rec.num_elem, existing)? {
            return Err(Error::already_exists("node", format!("0x{:04x}", addr)));
        }

        let mut node = Node::new(Uuid::from_bytes(rec.uuid), addr, rec.num_elem, rec.net_idx);
        node.dev_key = rec.dev_key;
        node.configured = rec.flags & NODE_FLAG_CONFIGURED != 0;

        match existing {
            Some(i) => self.nodes[i] = Some(node),
            None => {
                self.claim_node_slot(node)?;
            }
        }

        debug!("Restored node 0x{:04x}", addr);
        Ok(Applied::Set)
    }

    fn restore_subnet(&mut self, net_idx: u16, value: &[u8]) -> Result<Applied> {
        if !key_idx_is_valid(net_idx) {
            return Err(Error::Decode(format!("invalid NetKey index 0x{:04x}", net_idx)));
        }

        if value.is_empty() {
            return match self.subnet_get(net_idx) {
                Some(_) => {
                    self.subnet_del(net_idx, false)?;
                    Ok(Applied::Deleted)
                }
                None => Ok(Applied::Nothing),
            };
        }

        let rec = SubnetRecord::decode(value)?;
        if self.subnet_get(net_idx).is_none() {
            self.claim_subnet_slot(Subnet::new(net_idx))?;
        }
        if let Some(sub) = self.subnet_get_mut(net_idx) {
            sub.kr_phase = rec.kr_phase;
            sub.keys = rec.keys;
        }

        debug!("Restored subnet 0x{:03x}", net_idx);
        Ok(Applied::Set)
    }

    fn restore_app_key(&mut self, app_idx: u16, value: &[u8]) -> Result<Applied> {
        if !key_idx_is_valid(app_idx) {
            return Err(Error::Decode(format!("invalid AppKey index 0x{:04x}", app_idx)));
        }

        if value.is_empty() {
            return match self.app_key_get(app_idx) {
                Some(_) => {
                    self.app_key_del(app_idx, false)?;
                    Ok(Applied::Deleted)
                }
                None => Ok(Applied::Nothing),
            };
        }

        let rec = AppKeyRecord::decode(value)?;
        if self.app_key_get(app_idx).is_none() {
            self.claim_app_key_slot(AppKey::new(rec.net_idx, app_idx))?;
        }
        if let Some(key) = self.app_key_get_mut(app_idx) {
            key.net_idx = rec.net_idx;
            key.keys = rec.keys;
        }

        debug!("Restored AppKey 0x{:03x}", app_idx);
        Ok(Applied::Set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CdbConfig;
    use meshcdb_common::{KeySlot, KrPhase, MemorySettings, MeshKey};

    fn fresh(backend: MemorySettings) -> Cdb<MemorySettings> {
        Cdb::new(CdbConfig::default(), backend).unwrap()
    }

    fn node_bytes(num_elem: u8, flags: u8) -> Vec<u8> {
        NodeRecord {
            net_idx: 0,
            num_elem,
            flags,
            uuid: [0xab; 16],
            dev_key: MeshKey::from_bytes([0xdd; 16]),
        }
        .encode()
        .to_vec()
    }

    #[test]
    fn test_restore_full_database() {
        let backend = MemorySettings::new();
        backend.seed(
            "bt/mesh/cdb/Net",
            &NetRecord {
                iv_index: 9,
                iv_update: true,
                lowest_avail_addr: 0x20,
            }
            .encode(),
        );
        backend.seed("bt/mesh/cdb/Node/21", &node_bytes(2, NODE_FLAG_CONFIGURED));
        backend.seed(
            "bt/mesh/cdb/Subnet/0",
            &SubnetRecord {
                kr_phase: KrPhase::Phase1,
                keys: [MeshKey::from_bytes([1; 16]), MeshKey::from_bytes([2; 16])],
            }
            .encode(),
        );
        backend.seed(
            "bt/mesh/cdb/AppKey/3",
            &AppKeyRecord {
                net_idx: 0,
                keys: [MeshKey::from_bytes([3; 16]), MeshKey::default()],
            }
            .encode(),
        );

        let mut cdb = fresh(backend);
        let summary = cdb.load().unwrap();
        assert_eq!(
            summary,
            RestoreSummary {
                applied: 4,
                deleted: 0,
                skipped: 0
            }
        );

        assert!(cdb.is_valid());
        assert_eq!(cdb.iv_index(), 9);
        assert!(cdb.iv_update_in_progress());
        assert_eq!(cdb.lowest_avail_addr(), 0x20);

        let node = cdb.node_get(0x22).unwrap();
        assert_eq!(node.addr(), 0x21);
        assert!(node.is_configured());
        assert_eq!(node.uuid().as_bytes(), &[0xab; 16]);

        let sub = cdb.subnet_get(0).unwrap();
        assert_eq!(sub.kr_phase(), KrPhase::Phase1);
        assert_eq!(sub.key(KeySlot::Next), &MeshKey::from_bytes([2; 16]));

        assert_eq!(cdb.app_key_get(3).unwrap().key(KeySlot::Current), &MeshKey::from_bytes([3; 16]));

        // Nothing is written back
        assert!(!cdb.has_pending());
        assert!(cdb.store_deadline().is_none());
    }

    #[test]
    fn test_tombstones_remove_entries() {
        let backend = MemorySettings::new();
        backend.seed("bt/mesh/cdb/Node/5", &node_bytes(1, 0));
        backend.seed("bt/mesh/cdb/Node/5", &[]);
        backend.seed("bt/mesh/cdb/Node/9", &[]);

        let mut cdb = fresh(backend);
        let summary = cdb.load().unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.deleted, 1);
        assert!(cdb.node_get(5).is_none());
        assert!(!cdb.has_pending());
    }

    #[test]
    fn test_key_and_net_tombstones() {
        let backend = MemorySettings::new();
        backend.seed(
            "bt/mesh/cdb/Net",
            &NetRecord {
                iv_index: 1,
                iv_update: false,
                lowest_avail_addr: 1,
            }
            .encode(),
        );
        backend.seed(
            "bt/mesh/cdb/Subnet/0",
            &SubnetRecord {
                kr_phase: KrPhase::Normal,
                keys: [MeshKey::from_bytes([1; 16]), MeshKey::default()],
            }
            .encode(),
        );
        backend.seed(
            "bt/mesh/cdb/AppKey/3",
            &AppKeyRecord {
                net_idx: 0,
                keys: [MeshKey::from_bytes([3; 16]), MeshKey::default()],
            }
            .encode(),
        );
        backend.seed("bt/mesh/cdb/Subnet/0", &[]);
        backend.seed("bt/mesh/cdb/AppKey/3", &[]);
        // Marker for a key that was never restored
        backend.seed("bt/mesh/cdb/AppKey/7", &[]);
        backend.seed("bt/mesh/cdb/Net", &[]);

        let mut cdb = fresh(backend);
        let summary = cdb.load().unwrap();
        assert_eq!(
            summary,
            RestoreSummary {
                applied: 3,
                deleted: 3,
                skipped: 0
            }
        );

        assert!(!cdb.is_valid());
        assert!(cdb.subnet_get(0).is_none());
        assert!(cdb.app_key_get(3).is_none());
        assert!(cdb.app_key_get(7).is_none());
        assert_eq!(cdb.subnets().count(), 0);
        assert_eq!(cdb.app_keys().count(), 0);
        assert!(!cdb.has_pending());
    }

    #[test]
    fn test_later_record_overwrites() {
        let backend = MemorySettings::new();
        backend.seed("bt/mesh/cdb/Node/5", &node_bytes(1, 0));
        backend.seed("bt/mesh/cdb/Node/5", &node_bytes(3, NODE_FLAG_CONFIGURED));

        let mut cdb = fresh(backend);
        cdb.load().unwrap();
        assert_eq!(cdb.nodes().count(), 1);
        let node = cdb.node_get(7).unwrap();
        assert_eq!(node.num_elem(), 3);
        assert!(node.is_configured());
    }

    #[test]
    fn test_restore_ignores_floor_but_not_overlap() {
        let backend = MemorySettings::new();
        backend.seed(
            "bt/mesh/cdb/Net",
            &NetRecord {
                iv_index: 0,
                iv_update: false,
                lowest_avail_addr: 0x100,
            }
            .encode(),
        );
        backend.seed("bt/mesh/cdb/Node/10", &node_bytes(4, 0));
        backend.seed("bt/mesh/cdb/Node/12", &node_bytes(1, 0));

        let mut cdb = fresh(backend);
        let summary = cdb.load().unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(cdb.node_get(0x12).unwrap().addr(), 0x10);
    }

    #[test]
    fn test_bad_records_are_skipped() {
        let backend = MemorySettings::new();
        backend.seed("bt/mesh/cdb/Bogus/1", &[1, 2, 3]);
        backend.seed("bt/mesh/cdb/Node/zz", &node_bytes(1, 0));
        backend.seed("bt/mesh/cdb/Node/1", &[0; 3]);
        backend.seed("bt/mesh/cdb/Node/0", &node_bytes(1, 0));
        backend.seed("bt/mesh/cdb/Subnet/1000", &[0; SubnetRecord::LEN]);
        backend.seed("bt/mesh/cdb/Node/2", &node_bytes(0, 0));
        backend.seed("bt/mesh/cdb/Node/3", &node_bytes(1, 0));
        // Outside the root
        backend.seed("bt/mesh/other/Node/4", &node_bytes(1, 0));

        let mut cdb = fresh(backend);
        let summary = cdb.load().unwrap();
        assert_eq!(summary.skipped, 6);
        assert_eq!(summary.applied, 1);
        assert_eq!(cdb.nodes().map(Node::addr).collect::<Vec<_>>(), vec![3]);
        assert!(!cdb.is_valid());
    }

    #[test]
    fn test_full_table_skips_extra_records() {
        let backend = MemorySettings::new();
        for addr in 1..=3u16 {
            backend.seed(&format!("bt/mesh/cdb/Node/{:x}", addr), &node_bytes(1, 0));
        }
        let config = CdbConfig {
            node_count: 2,
            ..Default::default()
        };
        let mut cdb = Cdb::new(config, backend).unwrap();
        let summary = cdb.load().unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.skipped, 1);
    }
}
