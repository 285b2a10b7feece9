//! The card collection, persisted as one JSON array in a named storage slot
//!
//! The array is kept newest-first. Every write serializes the whole array and replaces the
//! slot; there are no partial updates.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::models::{CollectionEntry, SortOption};
use crate::traits::{CollectionStore, SlotStore};

/// Slot name holding the collection
pub const COLLECTION_SLOT: &str = "one_piece_crew_collection";

/// Collection stored in any [`SlotStore`]
pub struct Collection<S: SlotStore> {
    slots: S,
    key: String,
}

impl<S: SlotStore> Collection<S> {
    pub fn new(slots: S) -> Self {
        Self {
            slots,
            key: COLLECTION_SLOT.to_string(),
        }
    }

    /// Strict read used before writes, so a corrupt slot is never overwritten
    async fn load(&self) -> Result<Vec<CollectionEntry>, StoreError> {
        match self.slots.read_slot(&self.key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, entries: &[CollectionEntry]) -> Result<(), StoreError> {
        let raw = to_slot_json(entries)?;
        self.slots.write_slot(&self.key, &raw).await
    }
}

#[async_trait]
impl<S: SlotStore> CollectionStore for Collection<S> {
    async fn list(&self) -> Vec<CollectionEntry> {
        match self.load().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, slot = %self.key, "Could not read collection, showing it as empty");
                Vec::new()
            }
        }
    }

    async fn add(&self, entry: CollectionEntry) -> Result<(), StoreError> {
        let mut entries = self.load().await?;
        info!(id = %entry.id, name = %entry.name, "Adding card to collection");
        entries.insert(0, entry);
        self.save(&entries).await
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let mut entries = self.load().await?;
        let Some(index) = entries.iter().position(|entry| entry.id == id) else {
            return Ok(());
        };

        let removed = entries.remove(index);
        info!(id = %removed.id, name = %removed.name, "Removing card from collection");
        self.save(&entries).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        info!(slot = %self.key, "Clearing collection");
        self.slots.delete_slot(&self.key).await
    }
}

/// Serialization failures are write errors, not corruption of what is stored
fn to_slot_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|e| StoreError::Persistence(format!("could not serialize collection: {e}")))
}

/// Stable in-place sort for display
pub fn sort_entries(entries: &mut [CollectionEntry], option: SortOption) {
    match option {
        SortOption::Newest => entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        SortOption::Bounty => entries.sort_by(|a, b| b.price.total_cmp(&a.price)),
        SortOption::Set => entries.sort_by(|a, b| a.set.cmp(&b.set)),
        // Plain string order, not a rarity ranking
        SortOption::Rarity => entries.sort_by(|a, b| a.rarity.cmp(&b.rarity)),
    }
}

pub fn total_bounty(entries: &[CollectionEntry]) -> f64 {
    entries.iter().map(|entry| entry.price).sum()
}
