use std::collections::HashMap;

use tokio::sync::watch;

use crate::{
    events::StatusChange,
    model::{Prescription, PrescriptionStatus},
    store::StoreState,
};

/// Detects status changes between consecutive snapshots of the list.
///
/// Only the previous snapshot is kept. Records that appear for the first
/// time are not reported, so the very first snapshot never yields changes.
#[derive(Debug, Default)]
pub struct StatusObserver {
    previous: HashMap<String, PrescriptionStatus>,
}

impl StatusObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diff(&mut self, snapshot: &[Prescription]) -> Vec<StatusChange> {
        let changes = snapshot
            .iter()
            .filter_map(|rx| {
                let before = *self.previous.get(&rx.id)?;
                (before != rx.status).then(|| {
                    StatusChange::new(rx.id.clone(), rx.file_name.clone(), before, rx.status)
                })
            })
            .collect();

        self.previous = snapshot
            .iter()
            .map(|rx| (rx.id.clone(), rx.status))
            .collect();

        changes
    }
}

/// Run a `StatusObserver` over store updates until the store is dropped.
pub async fn watch_status_changes<F>(mut updates: watch::Receiver<StoreState>, mut on_change: F)
where
    F: FnMut(StatusChange),
{
    let mut observer = StatusObserver::new();

    loop {
        let changes = {
            let state = updates.borrow_and_update();
            observer.diff(&state.prescriptions)
        };

        for change in changes {
            if change.is_expected() {
                tracing::info!(
                    "Prescription {} ({}) moved from {} to {}",
                    change.id,
                    change.file_name,
                    change.from,
                    change.to
                );
            } else {
                tracing::warn!(
                    "Prescription {} ({}) moved from {} to {} outside the review lifecycle",
                    change.id,
                    change.file_name,
                    change.from,
                    change.to
                );
            }
            on_change(change);
        }

        if updates.changed().await.is_err() {
            tracing::debug!("Prescription store dropped, stopping status watch");
            break;
        }
    }
}
