//! Subnet table and network key refresh

use crate::cdb::Cdb;
use crate::tracker::{KeyId, Outcome};
use meshcdb_common::{
    key_idx_is_valid, Error, IterAction, KeyImport, KeySlot, KrPhase, MeshKey, Result,
    SettingsBackend, NET_FLAG_IVU, NET_FLAG_KR,
};
use tracing::{debug, info};

/// A subnet and its network keys
#[derive(Debug, Clone)]
pub struct Subnet {
    pub(crate) net_idx: u16,
    pub(crate) kr_phase: KrPhase,
    pub(crate) keys: [MeshKey; 2],
}

impl Subnet {
    pub(crate) fn new(net_idx: u16) -> Self {
        Self {
            net_idx,
            kr_phase: KrPhase::Normal,
            keys: Default::default(),
        }
    }

    pub fn net_idx(&self) -> u16 {
        self.net_idx
    }

    pub fn kr_phase(&self) -> KrPhase {
        self.kr_phase
    }

    pub fn key(&self, slot: KeySlot) -> &MeshKey {
        &self.keys[slot.index()]
    }

    /// Key used for transmission in the current phase
    pub fn tx_key(&self) -> &MeshKey {
        match self.kr_phase {
            KrPhase::Phase2 => self.key(KeySlot::Next),
            _ => self.key(KeySlot::Current),
        }
    }
}

fn subnet_id(net_idx: u16) -> String {
    format!("0x{:03x}", net_idx)
}

impl<B: SettingsBackend> Cdb<B> {
    /// Allocate a subnet with empty key slots
    pub fn subnet_alloc(&mut self, net_idx: u16) -> Result<&mut Subnet> {
        if !key_idx_is_valid(net_idx) {
            return Err(Error::InvalidArgument(format!("invalid NetKey index 0x{:04x}", net_idx)));
        }
        if self.subnet_get(net_idx).is_some() {
            return Err(Error::already_exists("subnet", subnet_id(net_idx)));
        }
        self.claim_subnet_slot(Subnet::new(net_idx))
    }

    pub(crate) fn claim_subnet_slot(&mut self, sub: Subnet) -> Result<&mut Subnet> {
        let Some(slot) = self.subnets.iter_mut().find(|slot| slot.is_none()) else {
            return Err(Error::OutOfResources("subnet table full".into()));
        };

        debug!("Allocated subnet 0x{:03x}", sub.net_idx);
        Ok(slot.insert(sub))
    }

    pub fn subnet_get(&self, net_idx: u16) -> Option<&Subnet> {
        self.subnets.iter().flatten().find(|sub| sub.net_idx == net_idx)
    }

    pub fn subnet_get_mut(&mut self, net_idx: u16) -> Option<&mut Subnet> {
        self.subnets.iter_mut().flatten().find(|sub| sub.net_idx == net_idx)
    }

    fn subnet_required(&mut self, net_idx: u16) -> Result<&mut Subnet> {
        self.subnet_get_mut(net_idx)
            .ok_or_else(|| Error::not_found("subnet", subnet_id(net_idx)))
    }

    /// Delete a subnet. With `store` the deletion is persisted.
    pub fn subnet_del(&mut self, net_idx: u16, store: bool) -> Result<()> {
        let Some(slot) = self
            .subnets
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|sub| sub.net_idx == net_idx))
        else {
            return Err(Error::not_found("subnet", subnet_id(net_idx)));
        };

        if let Some(mut sub) = slot.take() {
            sub.keys.iter_mut().for_each(MeshKey::destroy);
        }
        debug!("Deleted subnet 0x{:03x} (store {})", net_idx, store);

        if store {
            self.update_key_settings(KeyId::subnet(net_idx), Outcome::Clear)
        } else {
            Ok(())
        }
    }

    /// Schedule the subnet for storage
    pub fn subnet_store(&mut self, net_idx: u16) -> Result<()> {
        if self.subnet_get(net_idx).is_none() {
            return Err(Error::not_found("subnet", subnet_id(net_idx)));
        }
        self.update_key_settings(KeyId::subnet(net_idx), Outcome::Store)
    }

    /// Beacon flags for the subnet: Key Refresh and IV Update
    pub fn subnet_flags(&self, net_idx: u16) -> Result<u8> {
        let sub = self
            .subnet_get(net_idx)
            .ok_or_else(|| Error::not_found("subnet", subnet_id(net_idx)))?;

        let mut flags = 0;
        if sub.kr_phase == KrPhase::Phase2 {
            flags |= NET_FLAG_KR;
        }
        if self.flags.ivu_in_progress {
            flags |= NET_FLAG_IVU;
        }
        Ok(flags)
    }

    /// Import key material into one of the subnet's slots.
    /// Persist with [`Cdb::subnet_store`].
    pub fn subnet_key_import(&mut self, net_idx: u16, slot: KeySlot, key: &MeshKey) -> Result<KeyImport> {
        let sub = self.subnet_required(net_idx)?;
        Ok(sub.keys[slot.index()].import(key))
    }

    pub fn subnet_key_export(&self, net_idx: u16, slot: KeySlot) -> Result<MeshKey> {
        self.subnet_get(net_idx)
            .map(|sub| sub.key(slot).clone())
            .ok_or_else(|| Error::not_found("subnet", subnet_id(net_idx)))
    }

    /// Start a key refresh with `key` as the new network key.
    ///
    /// Repeating the call with the same key during phase 1 is accepted and
    /// changes nothing.
    pub fn subnet_kr_update(&mut self, net_idx: u16, key: &MeshKey) -> Result<()> {
        let sub = self.subnet_required(net_idx)?;

        match sub.kr_phase {
            KrPhase::Normal => {
                sub.keys[KeySlot::Next.index()].import(key);
                sub.kr_phase = KrPhase::Phase1;
            }
            KrPhase::Phase1 if sub.key(KeySlot::Next) == key => return Ok(()),
            phase => return Err(Error::invalid_state(phase, KrPhase::Phase1)),
        }

        info!("Subnet 0x{:03x} entered key refresh phase 1", net_idx);
        self.subnet_store(net_idx)
    }

    /// Move the subnet's key refresh procedure to `phase`.
    ///
    /// Completing the procedure commits the new network key and the new key
    /// of every bound application key that has one.
    pub fn subnet_kr_phase_set(&mut self, net_idx: u16, phase: KrPhase) -> Result<()> {
        let sub = self.subnet_required(net_idx)?;
        let current = sub.kr_phase;

        if current == phase {
            return Ok(());
        }
        if !current.can_transition_to(phase) {
            return Err(Error::invalid_state(current, phase));
        }

        sub.kr_phase = phase;
        if phase == KrPhase::Normal {
            commit_keys(&mut sub.keys);
        }
        info!("Subnet 0x{:03x} key refresh {} -> {}", net_idx, current, phase);

        let mut result = self.subnet_store(net_idx);

        if phase == KrPhase::Normal {
            let mut committed = Vec::new();
            for key in self.app_keys.iter_mut().flatten() {
                if key.net_idx == net_idx && !key.keys[KeySlot::Next.index()].is_zero() {
                    commit_keys(&mut key.keys);
                    committed.push(key.app_idx);
                }
            }
            for app_idx in committed {
                debug!("AppKey 0x{:03x} committed its new key", app_idx);
                let stored = self.app_key_store(app_idx);
                if result.is_ok() {
                    result = stored;
                }
            }
        }

        result
    }

    /// Iterate over valid subnets
    pub fn subnets(&self) -> impl Iterator<Item = &Subnet> {
        self.subnets.iter().flatten()
    }

    /// Call `func` for each valid subnet until it returns [`IterAction::Stop`]
    pub fn subnet_foreach<F>(&self, mut func: F)
    where
        F: FnMut(&Subnet) -> IterAction,
    {
        for sub in self.subnets() {
            if func(sub) == IterAction::Stop {
                break;
            }
        }
    }
}

/// Promote the next key to current and wipe the next slot
pub(crate) fn commit_keys(keys: &mut [MeshKey; 2]) {
    let [current, next] = keys;
    current.import(next);
    next.destroy();
}
