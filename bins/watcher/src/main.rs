use std::{
    env,
    path::Path,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use api_client::{ClientConfig, HttpPrescriptionService};
use prescriptions::{
    watch_status_changes, PrescriptionFile, PrescriptionStore, ProgressCallback, StoreConfig,
    UploadMetadata,
};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

const USAGE: &str = "usage: prescription-watcher [upload <path> [notes]]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let lookup = |key: &str| env::var(key).ok();
    let service = HttpPrescriptionService::new(&ClientConfig::from_env())?;
    let store = Arc::new(PrescriptionStore::new(
        Arc::new(service),
        store_config(lookup),
    ));

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None => watch(store, poll_interval(lookup)).await,
        Some("upload") => {
            let path = args.get(1).context(USAGE)?;
            upload(&store, Path::new(path), args.get(2).cloned()).await
        }
        Some(other) => anyhow::bail!("Unknown command {}\n{}", other, USAGE),
    }
}

fn store_config(lookup: impl Fn(&str) -> Option<String>) -> StoreConfig {
    let defaults = StoreConfig::default();
    StoreConfig {
        page_size: lookup("PRESCRIPTIONS_PAGE_SIZE")
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|size| *size > 0)
            .unwrap_or(defaults.page_size),
        ..defaults
    }
}

fn poll_interval(lookup: impl Fn(&str) -> Option<String>) -> Duration {
    let secs = lookup("WATCHER_POLL_INTERVAL_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    Duration::from_secs(secs)
}

// Poll the backend and log status changes until Ctrl-C
async fn watch(store: Arc<PrescriptionStore>, interval: Duration) -> anyhow::Result<()> {
    tracing::info!("Polling prescriptions every {}s", interval.as_secs());

    let mut notified: u64 = 0;
    let observer = tokio::spawn(watch_status_changes(store.subscribe(), move |change| {
        notified += 1;
        tracing::debug!("{} #{} for {}", change.event_type(), notified, change.id);
    }));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => refresh(&store).await,
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    // The observer stops once the last store handle is gone.
    drop(store);
    observer.await?;
    Ok(())
}

async fn refresh(store: &PrescriptionStore) {
    store.fetch_prescription_stats().await;
    store.fetch_prescriptions(None).await;

    let state = store.snapshot();
    match state.error {
        Some(error) => {
            tracing::warn!("Refresh failed: {}", error);
            store.clear_error();
        }
        None => tracing::info!(
            "{} prescriptions: {} pending, {} under review, {} approved, {} rejected, {} completed",
            state.stats.total,
            state.stats.pending,
            state.stats.under_review,
            state.stats.approved,
            state.stats.rejected,
            state.stats.completed
        ),
    }
}

async fn upload(store: &PrescriptionStore, path: &Path, notes: Option<String>) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let file = PrescriptionFile {
        file_name: path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("prescription")
            .to_string(),
        content_type: mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
        bytes,
    };
    let metadata = UploadMetadata {
        patient_notes: notes,
        ..Default::default()
    };

    let last_logged = AtomicU8::new(0);
    let on_progress: ProgressCallback = Arc::new(move |percent: u8| {
        let last = last_logged.load(Ordering::Relaxed);
        if percent >= last.saturating_add(10) || (percent == 100 && last < 100) {
            last_logged.store(percent, Ordering::Relaxed);
            tracing::info!("Upload progress: {}%", percent);
        }
    });

    tracing::info!("Uploading {} ({})", file.file_name, file.content_type);
    store
        .upload_prescription(file, metadata, Some(on_progress))
        .await?;

    let stats = store.snapshot().stats;
    tracing::info!(
        "Upload complete, {} prescriptions on file, {} pending",
        stats.total,
        stats.pending
    );
    Ok(())
}
