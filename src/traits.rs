//! Traits at the seams of the scan pipeline, so each stage can be swapped for a fake

use async_trait::async_trait;

use crate::error::{CaptureError, IdentifyError, StoreError};
use crate::models::{CollectionEntry, IdentificationResult, Snapshot, SortOption};

/// A camera-like device producing still frames from a live stream
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Handle to an acquired stream; holds the device until passed to `release`.
    /// Dropping it must also free the device, though possibly not before the drop returns.
    type Stream: Send;

    /// Opens the device at its preferred resolution
    ///
    /// # Returns
    /// * `Result<Self::Stream, CaptureError>` - A live stream, or `PermissionDenied` /
    ///   `DeviceUnavailable`
    async fn acquire(&self) -> Result<Self::Stream, CaptureError>;

    /// Encodes the current frame of `stream` as a JPEG snapshot at its native size
    fn capture(&self, stream: &Self::Stream) -> Result<Snapshot, CaptureError>;

    /// Stops the stream; the device is free once this returns
    async fn release(&self, stream: Self::Stream);
}

/// Turns a snapshot into a normalized identification
#[async_trait]
pub trait CardIdentifier: Send + Sync {
    async fn identify(&self, snapshot: &Snapshot) -> Result<IdentificationResult, IdentifyError>;
}

/// One named storage slot holding a serialized value, written wholesale
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Reads the slot; `Ok(None)` when it was never written
    async fn read_slot(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replaces the slot contents
    async fn write_slot(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Deletes the slot; missing slots are not an error
    async fn delete_slot(&self, key: &str) -> Result<(), StoreError>;
}

/// The persisted card collection
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Entries in persisted order, newest insertion first. Read failures yield an empty list.
    async fn list(&self) -> Vec<CollectionEntry>;

    /// Prepends `entry`
    async fn add(&self, entry: CollectionEntry) -> Result<(), StoreError>;

    /// Removes the entry with `id`, if any
    async fn remove(&self, id: &str) -> Result<(), StoreError>;

    /// Removes every entry
    async fn clear(&self) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Option<CollectionEntry> {
        self.list().await.into_iter().find(|entry| entry.id == id)
    }

    /// A sorted copy of the collection; stored order is untouched and ties keep it
    async fn sorted(&self, option: SortOption) -> Vec<CollectionEntry> {
        let mut entries = self.list().await;
        crate::collection::sort_entries(&mut entries, option);
        entries
    }

    /// Sum of all prices
    async fn total_bounty(&self) -> f64 {
        crate::collection::total_bounty(&self.list().await)
    }
}
