//! Unicast address allocation

use crate::cdb::Cdb;
use meshcdb_common::{addr_is_unicast, Error, Result, SettingsBackend, ADDR_UNASSIGNED, ADDR_UNICAST_MAX};

/// Result of checking an address range against the node table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrCheck {
    /// No valid node overlaps the range
    Free,
    /// The range overlaps a node; `next` is the first address after that node
    Conflict { next: u16 },
}

impl<B: SettingsBackend> Cdb<B> {
    /// Check whether `[start, start + num_elem)` is free
    pub fn addr_is_free(&self, start: u16, num_elem: u8) -> Result<AddrCheck> {
        self.check_range(start, num_elem, None)
    }

    /// Same as [`Cdb::addr_is_free`], ignoring the node in table slot `skip`
    pub(crate) fn check_range(&self, start: u16, num_elem: u8, skip: Option<usize>) -> Result<AddrCheck> {
        if num_elem == 0 {
            return Err(Error::InvalidArgument("element count must be non-zero".into()));
        }

        let start = u32::from(start);
        let end = start + u32::from(num_elem) - 1;
        if !addr_is_unicast(start as u16) || end > u32::from(ADDR_UNICAST_MAX) {
            return Err(Error::InvalidArgument(format!(
                "address range 0x{:04x}-0x{:04x} is not unicast",
                start, end
            )));
        }

        for (i, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            if skip == Some(i) {
                continue;
            }

            let other_start = u32::from(node.addr());
            let other_end = other_start + u32::from(node.num_elem()) - 1;
            if !(end < other_start || start > other_end) {
                return Ok(AddrCheck::Conflict {
                    next: (other_end + 1) as u16,
                });
            }
        }

        Ok(AddrCheck::Free)
    }

    /// Lowest address at or above the floor with room for `num_elem`
    /// elements, or [`ADDR_UNASSIGNED`] if there is none.
    pub fn find_lowest_free_addr(&self, num_elem: u8) -> u16 {
        let mut addr = self.lowest_avail_addr;

        // Every conflict skips past a distinct node, so this is enough
        for _ in 0..self.nodes.len() + 2 {
            match self.addr_is_free(addr, num_elem) {
                Ok(AddrCheck::Free) => return addr,
                Ok(AddrCheck::Conflict { next }) => addr = next,
                Err(_) => return ADDR_UNASSIGNED,
            }
        }

        ADDR_UNASSIGNED
    }

    /// Free address query for provisioners
    pub fn free_addr_get(&self, num_elem: u8) -> u16 {
        self.find_lowest_free_addr(num_elem)
    }
}
