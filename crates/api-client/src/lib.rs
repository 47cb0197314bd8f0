//! Pharmacy REST backend client

/// Environment configuration
pub mod config;

/// `PrescriptionService` over HTTP
pub mod http;

pub use config::ClientConfig;
pub use http::HttpPrescriptionService;
