//! Pending update tracking
//!
//! Mutations do not touch storage directly. Each one records the outcome the
//! flush should produce for the touched identity (store its current state or
//! clear its record). Repeated mutations of one identity collapse into a
//! single entry; the latest outcome wins. When every slot is taken the caller
//! is told to persist synchronously instead.

/// What the flush should do for an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Store,
    Clear,
}

/// A pending outcome for one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUpdate<K> {
    pub id: K,
    pub outcome: Outcome,
}

/// Result of recording an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracked {
    /// An entry for the identity already existed and was overwritten
    Coalesced,
    /// A free slot was claimed
    Queued,
    /// No slot was free; the caller must persist now
    Exhausted,
}

/// Kind of key record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Subnet,
    AppKey,
}

/// Identity of a subnet or application key record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId {
    pub kind: KeyKind,
    pub idx: u16,
}

impl KeyId {
    pub fn subnet(net_idx: u16) -> Self {
        Self {
            kind: KeyKind::Subnet,
            idx: net_idx,
        }
    }

    pub fn app_key(app_idx: u16) -> Self {
        Self {
            kind: KeyKind::AppKey,
            idx: app_idx,
        }
    }
}

/// Fixed-capacity table of pending outcomes
#[derive(Debug)]
pub struct UpdateTable<K> {
    slots: Vec<Option<PendingUpdate<K>>>,
}

impl<K: Copy + Eq> UpdateTable<K> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Record `outcome` for `id`
    pub fn record(&mut self, id: K, outcome: Outcome) -> Tracked {
        let mut free_slot = None;

        for (i, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(update) if update.id == id => {
                    update.outcome = outcome;
                    return Tracked::Coalesced;
                }
                Some(_) => {}
                None => {
                    if free_slot.is_none() {
                        free_slot = Some(i);
                    }
                }
            }
        }

        match free_slot {
            Some(i) => {
                self.slots[i] = Some(PendingUpdate { id, outcome });
                Tracked::Queued
            }
            None => Tracked::Exhausted,
        }
    }

    /// Pending outcome for `id`, if any
    pub fn pending(&self, id: K) -> Option<Outcome> {
        self.slots
            .iter()
            .flatten()
            .find(|update| update.id == id)
            .map(|update| update.outcome)
    }

    /// Take every pending entry, leaving all slots free
    pub fn drain(&mut self) -> Vec<PendingUpdate<K>> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_outcome_wins() {
        let mut table = UpdateTable::with_capacity(2);
        assert_eq!(table.record(1u16, Outcome::Store), Tracked::Queued);
        assert_eq!(table.record(1u16, Outcome::Clear), Tracked::Coalesced);
        assert_eq!(table.record(1u16, Outcome::Store), Tracked::Coalesced);

        assert_eq!(table.len(), 1);
        assert_eq!(table.pending(1), Some(Outcome::Store));
    }

    #[test]
    fn test_exhaustion() {
        let mut table = UpdateTable::with_capacity(2);
        assert_eq!(table.record(1u16, Outcome::Store), Tracked::Queued);
        assert_eq!(table.record(2u16, Outcome::Store), Tracked::Queued);
        assert_eq!(table.record(3u16, Outcome::Clear), Tracked::Exhausted);

        // Known identities still coalesce when full
        assert_eq!(table.record(2u16, Outcome::Clear), Tracked::Coalesced);
        assert_eq!(table.pending(3), None);
    }

    #[test]
    fn test_drain_frees_slots() {
        let mut table = UpdateTable::with_capacity(3);
        table.record(KeyId::subnet(0), Outcome::Store);
        table.record(KeyId::app_key(0), Outcome::Clear);

        let drained = table.drain();
        assert_eq!(
            drained,
            vec![
                PendingUpdate { id: KeyId::subnet(0), outcome: Outcome::Store },
                PendingUpdate { id: KeyId::app_key(0), outcome: Outcome::Clear },
            ]
        );
        assert!(table.is_empty());
        assert_eq!(table.capacity(), 3);
    }

    #[test]
    fn test_subnet_and_app_key_ids_are_distinct() {
        let mut table = UpdateTable::with_capacity(2);
        table.record(KeyId::subnet(5), Outcome::Store);
        assert_eq!(table.record(KeyId::app_key(5), Outcome::Clear), Tracked::Queued);
        assert_eq!(table.pending(KeyId::subnet(5)), Some(Outcome::Store));
    }

    #[test]
    fn test_freed_slot_is_reused() {
        let mut table = UpdateTable::with_capacity(1);
        table.record(7u16, Outcome::Store);
        table.drain();
        assert_eq!(table.record(8u16, Outcome::Store), Tracked::Queued);
    }
}
