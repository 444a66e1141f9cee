//! Core types for MeshCDB

use serde::{Deserialize, Serialize};

/// Unassigned address, also the "no node" sentinel
pub const ADDR_UNASSIGNED: u16 = 0x0000;

/// Highest unicast address
pub const ADDR_UNICAST_MAX: u16 = 0x7fff;

/// Primary NetKey index
pub const KEY_PRIMARY: u16 = 0x0000;

/// Key indexes are 12-bit values
pub const KEY_IDX_MAX: u16 = 0x0fff;

/// Beacon flag: key refresh phase 2 in progress
pub const NET_FLAG_KR: u8 = 0x01;

/// Beacon flag: IV update in progress
pub const NET_FLAG_IVU: u8 = 0x02;

/// Whether `addr` is a unicast address
pub fn addr_is_unicast(addr: u16) -> bool {
    addr != ADDR_UNASSIGNED && addr <= ADDR_UNICAST_MAX
}

/// Whether `idx` is a usable NetKey/AppKey index
pub fn key_idx_is_valid(idx: u16) -> bool {
    idx <= KEY_IDX_MAX
}

/// Key refresh phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KrPhase {
    Normal,
    Phase1,
    Phase2,
}

impl Default for KrPhase {
    fn default() -> Self {
        Self::Normal
    }
}

impl KrPhase {
    /// Whether moving from `self` to `next` is a legal key refresh step
    pub fn can_transition_to(self, next: KrPhase) -> bool {
        matches!(
            (self, next),
            (KrPhase::Normal, KrPhase::Phase1)
                | (KrPhase::Phase1, KrPhase::Phase2)
                | (KrPhase::Phase2, KrPhase::Normal)
        )
    }

    pub fn as_u8(self) -> u8 {
        match self {
            KrPhase::Normal => 0,
            KrPhase::Phase1 => 1,
            KrPhase::Phase2 => 2,
        }
    }
}

impl TryFrom<u8> for KrPhase {
    type Error = crate::Error;

    fn try_from(value: u8) -> crate::Result<Self> {
        match value {
            0 => Ok(KrPhase::Normal),
            1 => Ok(KrPhase::Phase1),
            2 => Ok(KrPhase::Phase2),
            other => Err(crate::Error::Decode(format!("unknown key refresh phase {}", other))),
        }
    }
}

impl std::fmt::Display for KrPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KrPhase::Normal => write!(f, "normal"),
            KrPhase::Phase1 => write!(f, "phase1"),
            KrPhase::Phase2 => write!(f, "phase2"),
        }
    }
}

/// Key slot of a subnet or application key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySlot {
    /// Key in force outside of key refresh
    Current,
    /// Candidate key distributed during key refresh
    Next,
}

impl KeySlot {
    pub fn index(self) -> usize {
        match self {
            KeySlot::Current => 0,
            KeySlot::Next => 1,
        }
    }
}

/// Return value of foreach callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterAction {
    Continue,
    Stop,
}
