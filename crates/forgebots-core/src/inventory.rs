//! Multiset of entities with a case-insensitive name index.
//!
//! Two structures are kept consistent: a primary count map keyed by entity
//! structural hash, and a secondary index from lowercase name to the hash
//! keys present. The invariant is that a hash key appears in a name bucket
//! if and only if its count is positive; the operations below are the only
//! legal mutation paths.

use crate::entity::Entity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    count: usize,
    entity: Entity,
}

/// A multiset of entities with counts, indexed by lowercase name.
///
/// Serialization goes through [`InventoryRecord`], a bare slot list: both
/// the hash keys and the name index are rebuilt on decode through
/// [`Inventory::insert_count`], so the two-index invariant cannot be
/// violated by an edited snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "InventoryRecord", into = "InventoryRecord")]
pub struct Inventory {
    counts: BTreeMap<u64, Slot>,
    by_name: HashMap<String, BTreeSet<u64>>,
}

/// The wire shape of an [`Inventory`]: `(count, entity)` pairs only.
#[derive(Serialize, Deserialize)]
struct InventoryRecord {
    slots: Vec<(usize, Entity)>,
}

impl From<InventoryRecord> for Inventory {
    fn from(record: InventoryRecord) -> Self {
        let mut inventory = Inventory::new();
        for (count, entity) in record.slots {
            inventory.insert_count(count, entity);
        }
        inventory
    }
}

impl From<Inventory> for InventoryRecord {
    fn from(inventory: Inventory) -> Self {
        Self {
            slots: inventory
                .counts
                .into_values()
                .map(|slot| (slot.count, slot.entity))
                .collect(),
        }
    }
}

impl Inventory {
    /// An empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one copy of `entity`.
    pub fn insert(&mut self, entity: Entity) {
        self.insert_count(1, entity);
    }

    /// Insert `n` copies of `entity`. Counts accumulate under the entity's
    /// hash key; the representative instance stored at that key is the most
    /// recently inserted one.
    pub fn insert_count(&mut self, n: usize, entity: Entity) {
        if n == 0 {
            return;
        }
        let key = entity.structural_hash();
        self.by_name
            .entry(entity.name().to_lowercase())
            .or_default()
            .insert(key);
        match self.counts.get_mut(&key) {
            Some(slot) => {
                slot.count += n;
                slot.entity = entity;
            }
            None => {
                self.counts.insert(key, Slot { count: n, entity });
            }
        }
    }

    /// Remove one copy of `entity`, returning how many copies were removed.
    pub fn delete(&mut self, entity: &Entity) -> usize {
        self.delete_count(1, entity)
    }

    /// Remove up to `n` copies of `entity`. Removing the last copy also
    /// removes the key from its name bucket.
    pub fn delete_count(&mut self, n: usize, entity: &Entity) -> usize {
        let key = entity.structural_hash();
        let Some(slot) = self.counts.get_mut(&key) else {
            return 0;
        };
        if n >= slot.count {
            let removed = slot.count;
            let name = slot.entity.name().to_lowercase();
            self.counts.remove(&key);
            self.prune_name(&name, key);
            removed
        } else {
            slot.count -= n;
            n
        }
    }

    /// Remove every copy of `entity` unconditionally.
    pub fn delete_all(&mut self, entity: &Entity) -> usize {
        self.delete_count(usize::MAX, entity)
    }

    /// Remove up to `n` entities matching `name` (case-insensitive), across
    /// every matching hash key. Returns how many were removed.
    pub fn delete_by_name(&mut self, name: &str, n: usize) -> usize {
        let mut remaining = n;
        let entities: Vec<Entity> = self.lookup_by_name(name).into_iter().cloned().collect();
        for entity in entities {
            if remaining == 0 {
                break;
            }
            remaining -= self.delete_count(remaining, &entity);
        }
        n - remaining
    }

    /// Number of copies of `entity` present.
    #[must_use]
    pub fn count_of(&self, entity: &Entity) -> usize {
        self.counts
            .get(&entity.structural_hash())
            .map_or(0, |slot| slot.count)
    }

    /// Whether at least one copy of `entity` is present.
    #[must_use]
    pub fn contains(&self, entity: &Entity) -> bool {
        self.count_of(entity) > 0
    }

    /// All distinct entities matching `name`, case-insensitively, without
    /// scanning the whole inventory.
    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Vec<&Entity> {
        let Some(bucket) = self.by_name.get(&name.to_lowercase()) else {
            return Vec::new();
        };
        bucket
            .iter()
            .filter_map(|key| self.counts.get(key))
            .map(|slot| &slot.entity)
            .collect()
    }

    /// Total copies matching `name`, case-insensitively.
    #[must_use]
    pub fn count_by_name(&self, name: &str) -> usize {
        self.by_name.get(&name.to_lowercase()).map_or(0, |bucket| {
            bucket
                .iter()
                .filter_map(|key| self.counts.get(key))
                .map(|slot| slot.count)
                .sum()
        })
    }

    /// Iterate `(count, entity)` pairs in hash-key order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Entity)> {
        self.counts.values().map(|slot| (slot.count, &slot.entity))
    }

    /// Number of distinct entity keys present.
    #[must_use]
    pub fn distinct_len(&self) -> usize {
        self.counts.len()
    }

    /// Whether the inventory holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Feed the inventory contents into a hasher in deterministic key
    /// order; used by entities hashing their nested inventories.
    pub(crate) fn hash_contents<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.counts.len());
        for (key, slot) in &self.counts {
            key.hash(state);
            slot.count.hash(state);
        }
    }

    /// Drop `key` from the bucket for `name`, removing the bucket when it
    /// empties so no stale hash key survives.
    fn prune_name(&mut self, name: &str, key: u64) {
        if let Some(bucket) = self.by_name.get_mut(name) {
            bucket.remove(&key);
            if bucket.is_empty() {
                self.by_name.remove(name);
            }
        }
    }

    #[cfg(test)]
    fn name_index_consistent(&self) -> bool {
        let indexed: BTreeSet<u64> = self
            .by_name
            .values()
            .flat_map(|bucket| bucket.iter().copied())
            .collect();
        let counted: BTreeSet<u64> = self.counts.keys().copied().collect();
        indexed == counted && self.counts.values().all(|slot| slot.count > 0)
    }
}
