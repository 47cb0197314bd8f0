use chrono::{DateTime, Utc};
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::model::PrescriptionStatus;

pub const STATUS_CHANGED: &str = "Prescription:StatusChanged";

/// A prescription whose status differs between two store snapshots
#[derive(new, Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub id: String,
    pub file_name: String,
    pub from: PrescriptionStatus,
    pub to: PrescriptionStatus,
    #[new(value = "Utc::now()")]
    pub observed_at: DateTime<Utc>,
}

impl StatusChange {
    pub fn event_type(&self) -> String {
        STATUS_CHANGED.to_string()
    }

    /// False when the backend moved the record against the review lifecycle.
    pub fn is_expected(&self) -> bool {
        self.from.can_transition_to(self.to)
    }
}
