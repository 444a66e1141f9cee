//! Serializable view of the database
//!
//! Key material is rendered as hex. Snapshots are meant for inspection and
//! diagnostics; they are never read back into a [`Cdb`].

use crate::app_key::AppKey;
use crate::cdb::Cdb;
use crate::node::Node;
use crate::subnet::Subnet;
use meshcdb_common::{Error, KeySlot, KrPhase, Result, SettingsBackend};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeView {
    pub uuid: Uuid,
    pub addr: u16,
    pub net_idx: u16,
    pub num_elem: u8,
    pub dev_key: String,
    pub configured: bool,
}

impl From<&Node> for NodeView {
    fn from(node: &Node) -> Self {
        Self {
            uuid: *node.uuid(),
            addr: node.addr(),
            net_idx: node.net_idx(),
            num_elem: node.num_elem(),
            dev_key: node.dev_key().to_hex(),
            configured: node.is_configured(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetView {
    pub net_idx: u16,
    pub kr_phase: KrPhase,
    pub keys: [String; 2],
}

impl From<&Subnet> for SubnetView {
    fn from(sub: &Subnet) -> Self {
        Self {
            net_idx: sub.net_idx(),
            kr_phase: sub.kr_phase(),
            keys: [
                sub.key(KeySlot::Current).to_hex(),
                sub.key(KeySlot::Next).to_hex(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppKeyView {
    pub net_idx: u16,
    pub app_idx: u16,
    pub keys: [String; 2],
}

impl From<&AppKey> for AppKeyView {
    fn from(key: &AppKey) -> Self {
        Self {
            net_idx: key.net_idx(),
            app_idx: key.app_idx(),
            keys: [
                key.key(KeySlot::Current).to_hex(),
                key.key(KeySlot::Next).to_hex(),
            ],
        }
    }
}

/// Point-in-time copy of the whole database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdbSnapshot {
    pub valid: bool,
    pub iv_index: u32,
    pub iv_update: bool,
    pub lowest_avail_addr: u16,
    pub nodes: Vec<NodeView>,
    pub subnets: Vec<SubnetView>,
    pub app_keys: Vec<AppKeyView>,
}

impl CdbSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Decode(format!("snapshot serialization failed: {}", e)))
    }
}

impl<B: SettingsBackend> Cdb<B> {
    /// Take a snapshot of the current in-memory state
    pub fn snapshot(&self) -> CdbSnapshot {
        CdbSnapshot {
            valid: self.is_valid(),
            iv_index: self.iv_index,
            iv_update: self.flags.ivu_in_progress,
            lowest_avail_addr: self.lowest_avail_addr,
            nodes: self.nodes().map(NodeView::from).collect(),
            subnets: self.subnets().map(SubnetView::from).collect(),
            app_keys: self.app_keys().map(AppKeyView::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CdbConfig;
    use meshcdb_common::{MemorySettings, MeshKey};

    #[test]
    fn test_snapshot_contents() {
        let mut cdb = Cdb::new(CdbConfig::default(), MemorySettings::new()).unwrap();
        cdb.create(&MeshKey::from_bytes([0x01; 16])).unwrap();
        let uuid = Uuid::new_v4();
        cdb.node_alloc(uuid, 0, 2, 0).unwrap();
        cdb.node_set_configured(1, true).unwrap();

        let snap = cdb.snapshot();
        assert!(snap.valid);
        assert_eq!(snap.lowest_avail_addr, 1);
        assert_eq!(snap.nodes.len(), 1);
        assert_eq!(snap.nodes[0].uuid, uuid);
        assert!(snap.nodes[0].configured);
        assert_eq!(snap.subnets[0].keys[0], "01".repeat(16));
        assert_eq!(snap.subnets[0].keys[1], "00".repeat(16));
        assert!(snap.app_keys.is_empty());
    }

    #[test]
    fn test_snapshot_json() {
        let mut cdb = Cdb::new(CdbConfig::default(), MemorySettings::new()).unwrap();
        cdb.create(&MeshKey::generate()).unwrap();
        cdb.app_key_alloc(0, 4).unwrap();

        let json = cdb.snapshot().to_json().unwrap();
        let parsed: CdbSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cdb.snapshot());
        assert_eq!(parsed.app_keys[0].app_idx, 4);
    }
}
