//! Application key table

use crate::cdb::Cdb;
use crate::tracker::{KeyId, Outcome};
use meshcdb_common::{
    key_idx_is_valid, Error, IterAction, KeyImport, KeySlot, KrPhase, MeshKey, Result,
    SettingsBackend,
};
use tracing::debug;

/// An application key bound to one subnet
#[derive(Debug, Clone)]
pub struct AppKey {
    pub(crate) net_idx: u16,
    pub(crate) app_idx: u16,
    pub(crate) keys: [MeshKey; 2],
}

impl AppKey {
    pub(crate) fn new(net_idx: u16, app_idx: u16) -> Self {
        Self {
            net_idx,
            app_idx,
            keys: Default::default(),
        }
    }

    /// Index of the bound subnet
    pub fn net_idx(&self) -> u16 {
        self.net_idx
    }

    pub fn app_idx(&self) -> u16 {
        self.app_idx
    }

    pub fn key(&self, slot: KeySlot) -> &MeshKey {
        &self.keys[slot.index()]
    }

    /// Key used for transmission while the bound subnet is in `phase`
    pub fn tx_key(&self, phase: KrPhase) -> &MeshKey {
        match phase {
            KrPhase::Phase2 => self.key(KeySlot::Next),
            _ => self.key(KeySlot::Current),
        }
    }
}

fn app_key_id(app_idx: u16) -> String {
    format!("0x{:03x}", app_idx)
}

impl<B: SettingsBackend> Cdb<B> {
    /// Allocate an application key bound to `net_idx`.
    ///
    /// The subnet does not have to exist yet; restore may see the key first.
    pub fn app_key_alloc(&mut self, net_idx: u16, app_idx: u16) -> Result<&mut AppKey> {
        if !key_idx_is_valid(net_idx) || !key_idx_is_valid(app_idx) {
            return Err(Error::InvalidArgument(format!(
                "invalid key index pair 0x{:04x}/0x{:04x}",
                net_idx, app_idx
            )));
        }
        if self.app_key_get(app_idx).is_some() {
            return Err(Error::already_exists("app key", app_key_id(app_idx)));
        }
        self.claim_app_key_slot(AppKey::new(net_idx, app_idx))
    }

    pub(crate) fn claim_app_key_slot(&mut self, key: AppKey) -> Result<&mut AppKey> {
        let Some(slot) = self.app_keys.iter_mut().find(|slot| slot.is_none()) else {
            return Err(Error::OutOfResources("app key table full".into()));
        };

        debug!("Allocated AppKey 0x{:03x} on subnet 0x{:03x}", key.app_idx, key.net_idx);
        Ok(slot.insert(key))
    }

    pub fn app_key_get(&self, app_idx: u16) -> Option<&AppKey> {
        self.app_keys.iter().flatten().find(|key| key.app_idx == app_idx)
    }

    pub fn app_key_get_mut(&mut self, app_idx: u16) -> Option<&mut AppKey> {
        self.app_keys.iter_mut().flatten().find(|key| key.app_idx == app_idx)
    }

    /// Delete an application key. With `store` the deletion is persisted.
    pub fn app_key_del(&mut self, app_idx: u16, store: bool) -> Result<()> {
        let Some(slot) = self
            .app_keys
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|key| key.app_idx == app_idx))
        else {
            return Err(Error::not_found("app key", app_key_id(app_idx)));
        };

        if let Some(mut key) = slot.take() {
            key.keys.iter_mut().for_each(MeshKey::destroy);
        }
        debug!("Deleted AppKey 0x{:03x} (store {})", app_idx, store);

        if store {
            self.update_key_settings(KeyId::app_key(app_idx), Outcome::Clear)
        } else {
            Ok(())
        }
    }

    /// Schedule the application key for storage
    pub fn app_key_store(&mut self, app_idx: u16) -> Result<()> {
        if self.app_key_get(app_idx).is_none() {
            return Err(Error::not_found("app key", app_key_id(app_idx)));
        }
        self.update_key_settings(KeyId::app_key(app_idx), Outcome::Store)
    }

    /// Import key material into one of the key's slots.
    /// Persist with [`Cdb::app_key_store`].
    pub fn app_key_key_import(&mut self, app_idx: u16, slot: KeySlot, key: &MeshKey) -> Result<KeyImport> {
        let app_key = self
            .app_key_get_mut(app_idx)
            .ok_or_else(|| Error::not_found("app key", app_key_id(app_idx)))?;
        Ok(app_key.keys[slot.index()].import(key))
    }

    pub fn app_key_key_export(&self, app_idx: u16, slot: KeySlot) -> Result<MeshKey> {
        self.app_key_get(app_idx)
            .map(|key| key.key(slot).clone())
            .ok_or_else(|| Error::not_found("app key", app_key_id(app_idx)))
    }

    /// Stage a new key for the next key refresh commit.
    ///
    /// Only allowed while the bound subnet is in phase 1.
    pub fn app_key_kr_update(&mut self, app_idx: u16, key: &MeshKey) -> Result<()> {
        let net_idx = self
            .app_key_get(app_idx)
            .map(AppKey::net_idx)
            .ok_or_else(|| Error::not_found("app key", app_key_id(app_idx)))?;

        let phase = self
            .subnet_get(net_idx)
            .map(|sub| sub.kr_phase())
            .ok_or_else(|| Error::not_found("subnet", format!("0x{:03x}", net_idx)))?;
        if phase != KrPhase::Phase1 {
            return Err(Error::invalid_state(phase, KrPhase::Phase1));
        }

        let imported = match self.app_key_get_mut(app_idx) {
            Some(app_key) => app_key.keys[KeySlot::Next.index()].import(key),
            None => return Err(Error::not_found("app key", app_key_id(app_idx))),
        };
        if imported == KeyImport::Unchanged {
            return Ok(());
        }

        debug!("AppKey 0x{:03x} staged a new key", app_idx);
        self.app_key_store(app_idx)
    }

    /// Iterate over valid application keys
    pub fn app_keys(&self) -> impl Iterator<Item = &AppKey> {
        self.app_keys.iter().flatten()
    }

    /// Call `func` for each valid key until it returns [`IterAction::Stop`]
    pub fn app_key_foreach<F>(&self, mut func: F)
    where
        F: FnMut(&AppKey) -> IterAction,
    {
        for key in self.app_keys() {
            if func(key) == IterAction::Stop {
                break;
            }
        }
    }
}
