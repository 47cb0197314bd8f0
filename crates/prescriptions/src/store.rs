use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;

use crate::{
    errors::Error,
    model::{
        Prescription, PrescriptionFile, PrescriptionStats, PrescriptionStatus, UploadMetadata,
        UploadState,
    },
    service::{PrescriptionService, ProgressCallback},
};

pub const DEFAULT_PAGE_SIZE: u32 = 50;

const FIRST_PAGE: u32 = 1;

const UPLOAD_FAILED: &str = "Failed to upload prescription";
const FETCH_FAILED: &str = "Failed to fetch prescriptions";
const STATS_FAILED: &str = "Failed to fetch prescription statistics";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoreConfig {
    /// Page size used by `fetch_prescriptions`
    pub page_size: u32,
    /// Drop responses overtaken by a newer fetch of the same kind
    pub discard_stale_fetches: bool,
    /// Count optimistic inserts under their own status instead of `pending`
    pub count_added_by_status: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            discard_stale_fetches: true,
            count_added_by_status: false,
        }
    }
}

/// Everything a consumer can observe about the current session
#[derive(Clone, Debug, Default, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    pub prescriptions: Vec<Prescription>,
    pub stats: PrescriptionStats,
    pub loading: bool,
    pub error: Option<String>,
    pub upload_state: UploadState,
}

impl StoreState {
    pub fn find(&self, id: &str) -> Option<&Prescription> {
        self.prescriptions.iter().find(|rx| rx.id == id)
    }
}

/// In-memory owner of the session's prescriptions, statistics and upload
/// state. The backend stays the system of record.
///
/// Every action publishes the new state to subscribers. Overlapping calls
/// interleave freely; only fetches are ordered, through a generation
/// counter when `discard_stale_fetches` is set.
pub struct PrescriptionStore {
    service: Arc<dyn PrescriptionService>,
    config: StoreConfig,
    state: Arc<watch::Sender<StoreState>>,
    list_generation: AtomicU64,
    stats_generation: AtomicU64,
}

impl PrescriptionStore {
    pub fn new(service: Arc<dyn PrescriptionService>, config: StoreConfig) -> Self {
        let (state, _) = watch::channel(StoreState::default());

        Self {
            service,
            config,
            state: Arc::new(state),
            list_generation: AtomicU64::new(0),
            stats_generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Receiver that sees every published state; bursts may be coalesced.
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> StoreState {
        self.state.borrow().clone()
    }

    /// Upload a new prescription and refresh stats and list on success.
    ///
    /// Progress ticks update `upload_state.upload_progress` before being
    /// forwarded to `on_progress`. Failures are recorded in both
    /// `upload_state.upload_error` and `error`, then returned.
    ///
    /// Dropping the returned future before it resolves clears
    /// `is_uploading` and `upload_progress`.
    pub async fn upload_prescription(
        &self,
        file: PrescriptionFile,
        metadata: UploadMetadata,
        on_progress: Option<ProgressCallback>,
    ) -> Result<(), Error> {
        let file_name = file.file_name.clone();
        tracing::debug!("Uploading {} ({} bytes)", file_name, file.size());

        self.state.send_modify(|s| {
            s.upload_state = UploadState {
                is_uploading: true,
                upload_progress: 0,
                upload_error: None,
            };
        });
        let guard = RestoreOnDrop::new(|| {
            tracing::debug!("Upload of {} abandoned", file_name);
            self.state.send_modify(|s| {
                s.upload_state.is_uploading = false;
                s.upload_state.upload_progress = 0;
            });
        });

        let state = Arc::clone(&self.state);
        let progress: ProgressCallback = Arc::new(move |percent: u8| {
            let percent = percent.min(100);
            state.send_modify(|s| s.upload_state.upload_progress = percent);
            if let Some(forward) = &on_progress {
                forward(percent);
            }
        });

        match self
            .service
            .upload_prescription(file, metadata, progress)
            .await
        {
            Ok(()) => {
                tracing::info!("Uploaded prescription {}", file_name);

                // Two separate calls; a failure here only leaves stats stale.
                self.fetch_prescription_stats().await;
                self.fetch_prescriptions(None).await;

                guard.disarm();
                self.state.send_modify(|s| {
                    s.upload_state.is_uploading = false;
                    s.upload_state.upload_progress = 100;
                });
                Ok(())
            }
            Err(err) => {
                let message = err.message_or(UPLOAD_FAILED);
                tracing::error!("Upload of {} failed: {}", file_name, message);

                guard.disarm();
                self.state.send_modify(|s| {
                    s.upload_state = UploadState {
                        is_uploading: false,
                        upload_progress: 0,
                        upload_error: Some(message.clone()),
                    };
                    s.error = Some(message);
                });
                Err(err)
            }
        }
    }

    /// Replace the list with the first page from the backend.
    ///
    /// On failure `error` is set and the previous list is kept. A dropped
    /// call clears `loading` unless a newer fetch has taken over.
    pub async fn fetch_prescriptions(&self, status: Option<PrescriptionStatus>) {
        let generation = self.list_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|s| s.loading = true);
        let guard = RestoreOnDrop::new(move || {
            if self.is_current(&self.list_generation, generation) {
                self.state.send_modify(|s| s.loading = false);
            }
        });

        let result = self
            .service
            .get_prescriptions(FIRST_PAGE, self.config.page_size, status)
            .await;
        guard.disarm();

        if !self.is_current(&self.list_generation, generation) {
            tracing::debug!("Discarding stale prescription list (generation {})", generation);
            return;
        }

        match result {
            Ok(page) => {
                tracing::debug!("Fetched {} prescriptions", page.data.len());
                self.state.send_modify(|s| {
                    s.prescriptions = page.data;
                    s.loading = false;
                });
            }
            Err(err) => {
                let message = err.message_or(FETCH_FAILED);
                tracing::warn!("Fetching prescriptions failed: {}", message);
                self.state.send_modify(|s| {
                    s.error = Some(message);
                    s.loading = false;
                });
            }
        }
    }

    /// Reload the per-status counters. Failure keeps the previous counters.
    pub async fn fetch_prescription_stats(&self) {
        let generation = self.stats_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let result = self.service.get_prescription_stats().await;

        if !self.is_current(&self.stats_generation, generation) {
            tracing::debug!("Discarding stale statistics (generation {})", generation);
            return;
        }

        match result {
            Ok(stats) => {
                tracing::debug!("Fetched statistics, {} prescriptions in total", stats.total);
                self.state.send_modify(|s| s.stats = stats);
            }
            Err(err) => {
                let message = err.message_or(STATS_FAILED);
                tracing::warn!("Fetching statistics failed: {}", message);
                self.state.send_modify(|s| s.error = Some(message));
            }
        }
    }

    /// Optimistically insert a record the caller knows the backend holds.
    ///
    /// Unless `count_added_by_status` is set, the `pending` counter is bumped
    /// whatever the record status.
    pub fn add_prescription(&self, prescription: Prescription) {
        let bucket = if self.config.count_added_by_status {
            prescription.status
        } else {
            PrescriptionStatus::Pending
        };

        tracing::debug!("Adding prescription {} locally", prescription.id);
        self.state.send_modify(|s| {
            s.prescriptions.insert(0, prescription);
            s.stats.total = s.stats.total.saturating_add(1);
            let counter = s.stats.bucket_mut(bucket);
            *counter = counter.saturating_add(1);
        });
    }

    /// Rewrite a record's status locally, then refresh the counters.
    ///
    /// No backend mutation is issued. Returns whether the record was in
    /// the local list.
    pub async fn update_prescription_status(
        &self,
        id: &str,
        status: PrescriptionStatus,
        notes: Option<String>,
    ) -> bool {
        let found = self.state.send_if_modified(|s| {
            let Some(rx) = s.prescriptions.iter_mut().find(|rx| rx.id == id) else {
                return false;
            };
            rx.status = status;
            rx.updated_at = Utc::now();
            if let Some(notes) = notes {
                if status == PrescriptionStatus::Rejected {
                    rx.rejection_reason = Some(notes.clone());
                }
                rx.pharmacist_notes = Some(notes);
            }
            true
        });

        if found {
            tracing::debug!("Prescription {} marked {} locally", id, status);
        } else {
            tracing::debug!("Prescription {} not loaded, nothing rewritten", id);
        }

        self.fetch_prescription_stats().await;
        found
    }

    /// Delete on the backend, then drop the record and its counters locally.
    ///
    /// Errors are returned untouched and leave the state as it was.
    pub async fn delete_prescription(&self, id: &str) -> Result<(), Error> {
        if let Err(err) = self.service.delete_prescription(id).await {
            tracing::warn!("Deleting prescription {} failed: {}", id, err);
            return Err(err);
        }

        self.state.send_modify(|s| {
            let removed = s
                .prescriptions
                .iter()
                .position(|rx| rx.id == id)
                .map(|index| s.prescriptions.remove(index));

            s.stats.total = s.stats.total.saturating_sub(1);
            if let Some(rx) = removed {
                let counter = s.stats.bucket_mut(rx.status);
                *counter = counter.saturating_sub(1);
            }
        });

        tracing::info!("Deleted prescription {}", id);
        Ok(())
    }

    pub fn clear_error(&self) {
        self.state.send_if_modified(|s| s.error.take().is_some());
    }

    pub fn reset_upload_state(&self) {
        self.state
            .send_modify(|s| s.upload_state = UploadState::default());
    }

    /// Back to the empty initial state. With `discard_stale_fetches` set,
    /// fetches still in flight are orphaned.
    pub fn reset(&self) {
        self.list_generation.fetch_add(1, Ordering::SeqCst);
        self.stats_generation.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(StoreState::default());
    }

    fn is_current(&self, counter: &AtomicU64, generation: u64) -> bool {
        !self.config.discard_stale_fetches || counter.load(Ordering::SeqCst) == generation
    }
}

/// Runs `restore` when dropped unless disarmed first. Keeps a cancelled
/// action from leaving its in-progress flags published.
struct RestoreOnDrop<F: FnOnce()> {
    restore: Option<F>,
}

impl<F: FnOnce()> RestoreOnDrop<F> {
    fn new(restore: F) -> Self {
        Self {
            restore: Some(restore),
        }
    }

    fn disarm(mut self) {
        self.restore = None;
    }
}

impl<F: FnOnce()> Drop for RestoreOnDrop<F> {
    fn drop(&mut self) {
        if let Some(restore) = self.restore.take() {
            restore();
        }
    }
}
