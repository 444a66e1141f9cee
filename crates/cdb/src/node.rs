//! Node table
//!
//! A node owns the contiguous unicast range `[addr, addr + num_elem)`. Any
//! address inside the range resolves to the node.

use crate::alloc::AddrCheck;
use crate::cdb::Cdb;
use crate::tracker::Outcome;
use meshcdb_common::{
    Error, IterAction, KeyImport, MeshKey, Result, SettingsBackend, ADDR_UNASSIGNED,
};
use tracing::debug;
use uuid::Uuid;

/// A provisioned node
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) uuid: Uuid,
    pub(crate) addr: u16,
    pub(crate) net_idx: u16,
    pub(crate) num_elem: u8,
    pub(crate) dev_key: MeshKey,
    pub(crate) configured: bool,
}

impl Node {
    pub(crate) fn new(uuid: Uuid, addr: u16, num_elem: u8, net_idx: u16) -> Self {
        Self {
            uuid,
            addr,
            net_idx,
            num_elem,
            dev_key: MeshKey::default(),
            configured: false,
        }
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// Primary element address
    pub fn addr(&self) -> u16 {
        self.addr
    }

    pub fn net_idx(&self) -> u16 {
        self.net_idx
    }

    pub fn num_elem(&self) -> u8 {
        self.num_elem
    }

    pub fn dev_key(&self) -> &MeshKey {
        &self.dev_key
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Whether `addr` belongs to one of this node's elements
    pub fn contains(&self, addr: u16) -> bool {
        addr >= self.addr && u32::from(addr) < self.range_end()
    }

    /// One past the last element address
    pub(crate) fn range_end(&self) -> u32 {
        u32::from(self.addr) + u32::from(self.num_elem)
    }

    /// Import a device key
    pub fn import_dev_key(&mut self, key: &MeshKey) -> KeyImport {
        self.dev_key.import(key)
    }
}

impl<B: SettingsBackend> Cdb<B> {
    /// Allocate a node.
    ///
    /// With `addr == 0` the lowest free range is chosen. An explicit address
    /// must not lie below the address floor and its range must be free. The
    /// node is not persisted until [`Cdb::node_store`] is called.
    pub fn node_alloc(&mut self, uuid: Uuid, addr: u16, num_elem: u8, net_idx: u16) -> Result<&mut Node> {
        if num_elem == 0 {
            return Err(Error::InvalidArgument("element count must be non-zero".into()));
        }

        let addr = if addr == ADDR_UNASSIGNED {
            let addr = self.find_lowest_free_addr(num_elem);
            if addr == ADDR_UNASSIGNED {
                return Err(Error::OutOfResources(format!(
                    "no free address range for {} elements",
                    num_elem
                )));
            }
            addr
        } else if addr < self.lowest_avail_addr {
            return Err(Error::InvalidArgument(format!(
                "address 0x{:04x} is below the lowest available address 0x{:04x}",
                addr, self.lowest_avail_addr
            )));
        } else {
            if let AddrCheck::Conflict { .. } = self.addr_is_free(addr, num_elem)? {
                debug!(
                    "Address range 0x{:04x}-0x{:04x} is not free",
                    addr,
                    u32::from(addr) + u32::from(num_elem) - 1
                );
                return Err(Error::already_exists("node", format!("0x{:04x}", addr)));
            }
            addr
        };

        self.claim_node_slot(Node::new(uuid, addr, num_elem, net_idx))
    }

    /// Put `node` into the first free slot
    pub(crate) fn claim_node_slot(&mut self, node: Node) -> Result<&mut Node> {
        let Some(slot) = self.nodes.iter_mut().find(|slot| slot.is_none()) else {
            return Err(Error::OutOfResources("node table full".into()));
        };

        debug!("Allocated node 0x{:04x} ({} elements)", node.addr, node.num_elem);
        Ok(slot.insert(node))
    }

    /// Find the node that owns `addr`
    pub fn node_get(&self, addr: u16) -> Option<&Node> {
        self.node_index(addr).and_then(|i| self.nodes[i].as_ref())
    }

    pub fn node_get_mut(&mut self, addr: u16) -> Option<&mut Node> {
        let i = self.node_index(addr)?;
        self.nodes[i].as_mut()
    }

    pub(crate) fn node_index(&self, addr: u16) -> Option<usize> {
        self.nodes
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|node| node.contains(addr)))
    }

    /// Node whose primary address is exactly `addr`
    pub(crate) fn node_exact(&self, addr: u16) -> Option<&Node> {
        self.nodes.iter().flatten().find(|node| node.addr == addr)
    }

    fn node_required(&self, addr: u16) -> Result<usize> {
        self.node_index(addr)
            .ok_or_else(|| Error::not_found("node", format!("0x{:04x}", addr)))
    }

    /// Move a node to a new address range.
    ///
    /// The record under the old address is cleared and a new one stored.
    pub fn node_update(&mut self, addr: u16, new_addr: u16, num_elem: u8) -> Result<()> {
        let i = self.node_required(addr)?;

        if let AddrCheck::Conflict { .. } = self.check_range(new_addr, num_elem, Some(i))? {
            return Err(Error::already_exists("node", format!("0x{:04x}", new_addr)));
        }

        let Some(node) = self.nodes[i].as_mut() else {
            return Err(Error::not_found("node", format!("0x{:04x}", addr)));
        };
        let old_addr = node.addr;
        node.addr = new_addr;
        node.num_elem = num_elem;

        debug!("Node 0x{:04x} moved to 0x{:04x} ({} elements)", old_addr, new_addr, num_elem);

        let cleared = self.update_node_settings(old_addr, Outcome::Clear);
        let stored = self.update_node_settings(new_addr, Outcome::Store);
        cleared.and(stored)
    }

    /// Mark a node as configured (or not). Persist with [`Cdb::node_store`].
    pub fn node_set_configured(&mut self, addr: u16, configured: bool) -> Result<()> {
        let i = self.node_required(addr)?;
        if let Some(node) = self.nodes[i].as_mut() {
            node.configured = configured;
        }
        Ok(())
    }

    /// Import a node's device key. Persist with [`Cdb::node_store`].
    pub fn node_key_import(&mut self, addr: u16, key: &MeshKey) -> Result<KeyImport> {
        let i = self.node_required(addr)?;
        match self.nodes[i].as_mut() {
            Some(node) => Ok(node.import_dev_key(key)),
            None => Err(Error::not_found("node", format!("0x{:04x}", addr))),
        }
    }

    /// Export a node's device key
    pub fn node_key_export(&self, addr: u16) -> Result<MeshKey> {
        self.node_get(addr)
            .map(|node| node.dev_key.clone())
            .ok_or_else(|| Error::not_found("node", format!("0x{:04x}", addr)))
    }

    /// Schedule the node for storage
    pub fn node_store(&mut self, addr: u16) -> Result<()> {
        let i = self.node_required(addr)?;
        let addr = self.nodes[i].as_ref().map_or(addr, |node| node.addr);
        self.update_node_settings(addr, Outcome::Store)
    }

    /// Delete a node.
    ///
    /// With `store` the deletion is persisted and the address floor is raised
    /// past the node's range, so the addresses are not handed out again until
    /// the next IV index update. Without `store` only memory is touched.
    pub fn node_del(&mut self, addr: u16, store: bool) -> Result<()> {
        let i = self.node_required(addr)?;
        self.remove_node(i, store)
    }

    pub(crate) fn remove_node(&mut self, i: usize, store: bool) -> Result<()> {
        let Some(mut node) = self.nodes[i].take() else {
            return Ok(());
        };

        debug!("Deleting node 0x{:04x} (store {})", node.addr, store);

        let mut result = Ok(());
        if store {
            result = self.update_node_settings(node.addr, Outcome::Clear);

            let end = node.range_end();
            if end > u32::from(self.lowest_avail_addr) {
                // Ranges never extend past 0x7fff, so the end fits
                self.lowest_avail_addr = end as u16;
                self.schedule_store(crate::store::PendingFlag::Net);
            }
        }

        node.dev_key.destroy();
        result
    }

    /// Iterate over valid nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().flatten()
    }

    /// Call `func` for each valid node until it returns [`IterAction::Stop`]
    pub fn node_foreach<F>(&self, mut func: F)
    where
        F: FnMut(&Node) -> IterAction,
    {
        for node in self.nodes() {
            if func(node) == IterAction::Stop {
                break;
            }
        }
    }
}
