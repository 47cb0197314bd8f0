use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Prescription review status
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    /// Uploaded by the customer, not yet picked up
    #[default]
    Pending,
    /// A pharmacist is reviewing the document
    UnderReview,
    /// Accepted for dispensing
    Approved,
    /// Refused, see `rejection_reason`
    Rejected,
    /// Dispensed and closed
    Completed,
}

impl PrescriptionStatus {
    pub const ALL: [PrescriptionStatus; 5] = [
        Self::Pending,
        Self::UnderReview,
        Self::Approved,
        Self::Rejected,
        Self::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
        }
    }

    /// Whether `next` follows this status in the review lifecycle.
    ///
    /// Staying on the same status is allowed. Nothing in the store enforces
    /// this; the backend's answer always wins.
    pub fn can_transition_to(&self, next: PrescriptionStatus) -> bool {
        use PrescriptionStatus::*;

        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, UnderReview)
                | (UnderReview, Approved)
                | (UnderReview, Rejected)
                | (Approved, Completed)
                | (Rejected, Completed)
        )
    }
}

impl fmt::Display for PrescriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrescriptionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Validation {
                message: format!("Unknown prescription status: {}", s),
            })
    }
}

/// Customer submitted prescription document
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    pub id: String,

    // File data
    pub file_name: String,
    pub file_url: String,
    pub file_size: u64,
    pub file_type: String,
    #[serde(default)]
    pub drive_file_id: Option<String>,

    pub status: PrescriptionStatus,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Review notes
    #[serde(default)]
    pub patient_notes: Option<String>,
    #[serde(default)]
    pub pharmacist_notes: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,

    // Prescriber data
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub prescription_date: Option<NaiveDate>,
}

/// Per-status counters as reported by the backend
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionStats {
    pub total: u32,
    pub pending: u32,
    pub under_review: u32,
    pub approved: u32,
    pub rejected: u32,
    pub completed: u32,
}

impl PrescriptionStats {
    pub fn bucket_mut(&mut self, status: PrescriptionStatus) -> &mut u32 {
        match status {
            PrescriptionStatus::Pending => &mut self.pending,
            PrescriptionStatus::UnderReview => &mut self.under_review,
            PrescriptionStatus::Approved => &mut self.approved,
            PrescriptionStatus::Rejected => &mut self.rejected,
            PrescriptionStatus::Completed => &mut self.completed,
        }
    }

    pub fn bucket(&self, status: PrescriptionStatus) -> u32 {
        match status {
            PrescriptionStatus::Pending => self.pending,
            PrescriptionStatus::UnderReview => self.under_review,
            PrescriptionStatus::Approved => self.approved,
            PrescriptionStatus::Rejected => self.rejected,
            PrescriptionStatus::Completed => self.completed,
        }
    }
}

/// Transient state of the current upload attempt
#[derive(Clone, Debug, Default, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadState {
    pub is_uploading: bool,
    /// 0..=100
    pub upload_progress: u8,
    pub upload_error: Option<String>,
}

/// File handed to the upload service
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrescriptionFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PrescriptionFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Optional details sent along with an upload
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub patient_notes: Option<String>,
    pub doctor_name: Option<String>,
    pub prescription_date: Option<NaiveDate>,
}

/// One page of the prescription listing
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct PrescriptionPage {
    pub data: Vec<Prescription>,
}
