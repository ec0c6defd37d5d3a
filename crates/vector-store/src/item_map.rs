use crate::error::{Result, VectorStoreError};
use crate::types::{ItemId, Slot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bijection between the slots of one generation and catalog item ids.
///
/// Serialized as the plain list of item ids in slot order; the reverse lookup
/// is rebuilt (and the bijection re-checked) on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ItemId>", into = "Vec<ItemId>")]
pub struct ItemMap {
    items: Vec<ItemId>,
    slots: HashMap<ItemId, Slot>,
}

impl ItemMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `item` under the next free slot.
    pub fn push(&mut self, item: ItemId) -> Result<Slot> {
        if self.slots.contains_key(&item) {
            return Err(VectorStoreError::InconsistentState(format!(
                "item {item} is already mapped to slot {}",
                self.slots[&item]
            )));
        }
        let slot = Slot(u32::try_from(self.items.len()).map_err(|_| {
            VectorStoreError::InconsistentState("item map exceeds u32 slots".into())
        })?);
        self.items.push(item);
        self.slots.insert(item, slot);
        Ok(slot)
    }

    #[must_use]
    pub fn item(&self, slot: Slot) -> Option<ItemId> {
        self.items.get(slot.index()).copied()
    }

    #[must_use]
    pub fn slot(&self, item: ItemId) -> Option<Slot> {
        self.slots.get(&item).copied()
    }

    #[must_use]
    pub fn contains(&self, item: ItemId) -> bool {
        self.slots.contains_key(&item)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, ItemId)> + '_ {
        self.items
            .iter()
            .enumerate()
            .map(|(idx, item)| (Slot(idx as u32), *item))
    }
}

impl TryFrom<Vec<ItemId>> for ItemMap {
    type Error = VectorStoreError;

    fn try_from(items: Vec<ItemId>) -> Result<Self> {
        let mut map = Self {
            items: Vec::with_capacity(items.len()),
            slots: HashMap::with_capacity(items.len()),
        };
        for item in items {
            map.push(item)?;
        }
        Ok(map)
    }
}

impl From<ItemMap> for Vec<ItemId> {
    fn from(map: ItemMap) -> Self {
        map.items
    }
}
