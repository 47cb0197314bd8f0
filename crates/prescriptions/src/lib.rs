//! Prescription lifecycle state

/// Prescription records, statistics and upload state
pub mod model;

/// Domain errors
pub mod errors;

/// Status change events
pub mod events;

/// Backend contract
pub mod service;

/// Observable prescription store
pub mod store;

/// Status change detection
pub mod observer;

pub use errors::Error;
pub use events::StatusChange;
pub use model::{
    Prescription, PrescriptionFile, PrescriptionPage, PrescriptionStats, PrescriptionStatus,
    UploadMetadata, UploadState,
};
pub use observer::{watch_status_changes, StatusObserver};
pub use service::{PrescriptionService, ProgressCallback};
pub use store::{PrescriptionStore, StoreConfig, StoreState};
