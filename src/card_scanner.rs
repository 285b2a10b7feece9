use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::capture::CameraSession;
use crate::error::{CaptureError, ScanError};
use crate::models::{CollectionEntry, IdentificationResult, Snapshot};
use crate::traits::{CaptureSource, CardIdentifier, CollectionStore};

/// An identified card waiting for the user to keep or discard it
#[derive(Debug, Clone)]
pub struct PendingCard {
    pub result: IdentificationResult,
    pub snapshot: Snapshot,
}

/// Runs capture -> identify -> confirm -> store
pub struct CardScanner<C: CaptureSource, I, S> {
    camera: Mutex<CameraSession<C>>,
    identifier: I,
    store: S,
    identifying: AtomicBool,
    pending: Mutex<Option<PendingCard>>,
}

/// Marks an identification as in flight until dropped
struct IdentifyLease<'a>(&'a AtomicBool);

impl<'a> IdentifyLease<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ScanError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| ScanError::Busy)
    }
}

impl Drop for IdentifyLease<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<C, I, S> CardScanner<C, I, S>
where
    C: CaptureSource,
    I: CardIdentifier,
    S: CollectionStore,
{
    pub fn new(camera: C, identifier: I, store: S) -> Self {
        Self {
            camera: Mutex::new(CameraSession::new(camera)),
            identifier,
            store,
            identifying: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_identifying(&self) -> bool {
        self.identifying.load(Ordering::Acquire)
    }

    /// Starts (or restarts) the camera; call again to retry after an error
    pub async fn start_camera(&self) -> Result<(), CaptureError> {
        let result = self.camera.lock().await.start().await;
        if let Err(e) = &result {
            error!(error = %e, "Camera could not be started");
        }
        result
    }

    pub async fn stop_camera(&self) {
        self.camera.lock().await.stop().await;
    }

    /// Takes a snapshot from the running camera and identifies it
    pub async fn shutter(&self) -> Result<IdentificationResult, ScanError> {
        if self.is_identifying() {
            return Err(ScanError::Busy);
        }

        let snapshot = {
            let camera = self.camera.lock().await;
            if !camera.is_active() {
                return Err(ScanError::CameraStopped);
            }
            camera.snapshot()?
        };

        self.on_capture(snapshot).await
    }

    /// Identifies a captured snapshot and keeps the result pending for confirmation.
    ///
    /// Refused with `ScanError::Busy` while another identification is running. On failure
    /// nothing is left pending, so the user can simply capture again.
    pub async fn on_capture(&self, snapshot: Snapshot) -> Result<IdentificationResult, ScanError> {
        let _lease = IdentifyLease::acquire(&self.identifying)?;
        self.pending.lock().await.take();

        info!(width = snapshot.width, height = snapshot.height, "Identifying card");

        match self.identifier.identify(&snapshot).await {
            Ok(result) => {
                *self.pending.lock().await = Some(PendingCard {
                    result: result.clone(),
                    snapshot,
                });
                Ok(result)
            }
            Err(e) => {
                error!(error = %e, user_message = %e.user_message(), "Identification failed");
                Err(e.into())
            }
        }
    }

    pub async fn pending(&self) -> Option<PendingCard> {
        self.pending.lock().await.clone()
    }

    /// Stores the pending card. If the write fails the card stays pending.
    pub async fn confirm(&self) -> Result<CollectionEntry, ScanError> {
        let mut pending = self.pending.lock().await;
        let card = pending.take().ok_or(ScanError::NothingPending)?;

        let entry = CollectionEntry::from_result(
            Uuid::new_v4().to_string(),
            &card.result,
            Some(card.snapshot.to_data_url()),
            Utc::now().timestamp_millis(),
        );

        if let Err(e) = self.store.add(entry.clone()).await {
            error!(error = %e, "Could not save card");
            *pending = Some(card);
            return Err(e.into());
        }

        info!(id = %entry.id, name = %entry.name, "Card added to collection");
        Ok(entry)
    }

    pub async fn discard(&self) {
        if self.pending.lock().await.take().is_some() {
            info!("Discarded identified card");
        }
    }
}
