//! Key material for MeshCDB
//!
//! Network, application and device keys are 128-bit secrets. They are held in
//! [`MeshKey`], which wipes its buffer when dropped or destroyed and never
//! prints key bytes through `Debug`.

use crate::{Error, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 128-bit mesh key
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MeshKey([u8; 16]);

/// Outcome of importing key material into a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyImport {
    /// Slot already held identical material; nothing was touched
    Unchanged,
    /// Previous material was destroyed and replaced
    Replaced,
}

impl MeshKey {
    /// Key length in bytes
    pub const LEN: usize = 16;

    /// Generate a new random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; Self::LEN];
        OsRng.fill_bytes(&mut bytes);
        let key = Self(bytes);
        bytes.zeroize();
        key
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create a key from a slice, which must be exactly 16 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| {
            Error::InvalidArgument(format!("key must be {} bytes, got {}", Self::LEN, bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Parse a key from 32 hex characters
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| Error::InvalidArgument(format!("invalid key hex: {}", e)))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// An all-zero key marks an empty slot
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Wipe the key material in place
    pub fn destroy(&mut self) {
        self.0.zeroize();
    }

    /// Import `incoming` into this slot.
    ///
    /// Identical material leaves the slot untouched; anything else destroys
    /// the previous key before the new one is copied in.
    pub fn import(&mut self, incoming: &MeshKey) -> KeyImport {
        if self == incoming {
            return KeyImport::Unchanged;
        }
        self.destroy();
        self.0 = incoming.0;
        KeyImport::Replaced
    }
}

impl std::fmt::Debug for MeshKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_zero() {
            f.write_str("MeshKey(empty)")
        } else {
            f.write_str("MeshKey(..)")
        }
    }
}

impl std::str::FromStr for MeshKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}
