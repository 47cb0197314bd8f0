use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    errors::Error,
    model::{PrescriptionFile, PrescriptionPage, PrescriptionStats, PrescriptionStatus, UploadMetadata},
};

/// Receives upload progress as a percentage in 0..=100.
///
/// Invoked zero or more times; values are expected to be non-decreasing
/// but callers must not rely on it.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Remote system of record for prescriptions.
///
/// Every call is fallible; failures carry a human readable message and the
/// store never looks past it.
#[async_trait]
pub trait PrescriptionService: Send + Sync {
    /// Transfer the file and persist its metadata.
    async fn upload_prescription(
        &self,
        file: PrescriptionFile,
        metadata: UploadMetadata,
        on_progress: ProgressCallback,
    ) -> Result<(), Error>;

    /// One page of the current user's prescriptions, optionally filtered.
    async fn get_prescriptions(
        &self,
        page: u32,
        page_size: u32,
        status: Option<PrescriptionStatus>,
    ) -> Result<PrescriptionPage, Error>;

    async fn get_prescription_stats(&self) -> Result<PrescriptionStats, Error>;

    async fn delete_prescription(&self, id: &str) -> Result<(), Error>;
}
