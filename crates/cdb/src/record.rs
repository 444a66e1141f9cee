//! Stored record layouts
//!
//! All records are packed little-endian structures:
//!
//! | Path                 | Layout                                                   |
//! |----------------------|----------------------------------------------------------|
//! | `<root>/Net`         | iv_index u32, iv_update u8, lowest_avail_addr u16        |
//! | `<root>/Node/<a>`    | net_idx u16, num_elem u8, flags u8, uuid [16], dev_key [16] |
//! | `<root>/Subnet/<n>`  | kr_flag:1 + kr_phase:7 u8, keys [16] x 2                 |
//! | `<root>/AppKey/<i>`  | net_idx u16, updated u8, keys [16] x 2                   |
//!
//! Identities in paths are lowercase hex without padding.

use bytes::{Buf, BufMut};
use meshcdb_common::{Error, KrPhase, MeshKey, Result};
use zeroize::Zeroizing;

/// Node flag: configuration completed
pub const NODE_FLAG_CONFIGURED: u8 = 0x01;

pub fn net_path(root: &str) -> String {
    format!("{}/Net", root)
}

pub fn node_path(root: &str, addr: u16) -> String {
    format!("{}/Node/{:x}", root, addr)
}

pub fn subnet_path(root: &str, net_idx: u16) -> String {
    format!("{}/Subnet/{:x}", root, net_idx)
}

pub fn app_key_path(root: &str, app_idx: u16) -> String {
    format!("{}/AppKey/{:x}", root, app_idx)
}

/// Parse the hex identity at the end of a record name
pub fn parse_id(s: &str) -> Result<u16> {
    if s.is_empty() || s.len() > 4 {
        return Err(Error::Decode(format!("invalid record id {:?}", s)));
    }
    u16::from_str_radix(s, 16).map_err(|e| Error::Decode(format!("invalid record id {:?}: {}", s, e)))
}

fn check_len(kind: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() != expected {
        return Err(Error::Decode(format!(
            "{} record is {} bytes, expected {}",
            kind,
            data.len(),
            expected
        )));
    }
    Ok(())
}

fn get_key(buf: &mut &[u8]) -> MeshKey {
    let mut raw = Zeroizing::new([0u8; MeshKey::LEN]);
    buf.copy_to_slice(&mut raw[..]);
    MeshKey::from_bytes(*raw)
}

// ============================================================================
// Net
// ============================================================================

/// Database-wide state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetRecord {
    pub iv_index: u32,
    pub iv_update: bool,
    pub lowest_avail_addr: u16,
}

impl NetRecord {
    pub const LEN: usize = 7;
    /// Records written before the address floor existed
    pub const LEGACY_LEN: usize = 5;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.put_u32_le(self.iv_index);
        buf.put_u8(self.iv_update as u8);
        buf.put_u16_le(self.lowest_avail_addr);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != Self::LEN && data.len() != Self::LEGACY_LEN {
            return Err(Error::Decode(format!(
                "Net record is {} bytes, expected {} or {}",
                data.len(),
                Self::LEN,
                Self::LEGACY_LEN
            )));
        }

        let mut buf = data;
        let iv_index = buf.get_u32_le();
        let iv_update = buf.get_u8() != 0;
        let lowest_avail_addr = if buf.has_remaining() {
            buf.get_u16_le()
        } else {
            1
        };

        Ok(Self {
            iv_index,
            iv_update,
            lowest_avail_addr,
        })
    }
}

// ============================================================================
// Node
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub net_idx: u16,
    pub num_elem: u8,
    pub flags: u8,
    pub uuid: [u8; 16],
    pub dev_key: MeshKey,
}

impl NodeRecord {
    pub const LEN: usize = 2 + 1 + 1 + 16 + MeshKey::LEN;

    pub fn encode(&self) -> Zeroizing<Vec<u8>> {
        let mut buf = Zeroizing::new(Vec::with_capacity(Self::LEN));
        buf.put_u16_le(self.net_idx);
        buf.put_u8(self.num_elem);
        buf.put_u8(self.flags);
        buf.put_slice(&self.uuid);
        buf.put_slice(self.dev_key.as_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        check_len("Node", data, Self::LEN)?;

        let mut buf = data;
        let net_idx = buf.get_u16_le();
        let num_elem = buf.get_u8();
        let flags = buf.get_u8();
        let mut uuid = [0u8; 16];
        buf.copy_to_slice(&mut uuid);
        let dev_key = get_key(&mut buf);

        Ok(Self {
            net_idx,
            num_elem,
            flags,
            uuid,
            dev_key,
        })
    }
}

// ============================================================================
// Subnet
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetRecord {
    pub kr_phase: KrPhase,
    pub keys: [MeshKey; 2],
}

impl SubnetRecord {
    pub const LEN: usize = 1 + 2 * MeshKey::LEN;

    pub fn encode(&self) -> Zeroizing<Vec<u8>> {
        let mut buf = Zeroizing::new(Vec::with_capacity(Self::LEN));
        // kr_flag occupies bit 0 and is always written as 0
        buf.put_u8(self.kr_phase.as_u8() << 1);
        buf.put_slice(self.keys[0].as_bytes());
        buf.put_slice(self.keys[1].as_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        check_len("Subnet", data, Self::LEN)?;

        let mut buf = data;
        let kr_phase = KrPhase::try_from(buf.get_u8() >> 1)?;
        let keys = [get_key(&mut buf), get_key(&mut buf)];

        Ok(Self { kr_phase, keys })
    }
}

// ============================================================================
// AppKey
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppKeyRecord {
    pub net_idx: u16,
    pub keys: [MeshKey; 2],
}

impl AppKeyRecord {
    pub const LEN: usize = 2 + 1 + 2 * MeshKey::LEN;

    pub fn encode(&self) -> Zeroizing<Vec<u8>> {
        let mut buf = Zeroizing::new(Vec::with_capacity(Self::LEN));
        buf.put_u16_le(self.net_idx);
        // Deprecated "updated" flag
        buf.put_u8(0);
        buf.put_slice(self.keys[0].as_bytes());
        buf.put_slice(self.keys[1].as_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        check_len("AppKey", data, Self::LEN)?;

        let mut buf = data;
        let net_idx = buf.get_u16_le();
        let _updated = buf.get_u8();
        let keys = [get_key(&mut buf), get_key(&mut buf)];

        Ok(Self { net_idx, keys })
    }
}
