use std::path::{Path, PathBuf};

use common::RemoteItem;
use indexmap::IndexMap;
use library::{filter_dispatch, scan_folder, IdentityStore, LibraryError};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::activity_store::{KIND_DISPATCH, KIND_RUN};
use crate::config::{resolve_path, PlaylistConfig, ServerConfig};
use crate::monitor::{run_monitor, MonitorSettings, MonitorSummary};
use crate::playlist::PlaylistSource;
use crate::progress::Progress;
use crate::queue::DownloadQueue;

#[derive(Clone, Debug)]
pub struct PlaylistTarget {
    pub name: String,
    pub url: String,
    pub folder: PathBuf,
    pub queue_folder: String,
}

#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub playlists: Vec<PlaylistTarget>,
    pub history_path: PathBuf,
    pub id_map_path: PathBuf,
    pub monitor: Option<MonitorSettings>,
}

impl SyncSettings {
    pub fn from_config(config_path: &Path, config: &ServerConfig) -> Self {
        let monitor = if config.monitor_downloads {
            Some(MonitorSettings {
                poll_interval: config.poll_interval(),
                error_backoff: config.error_backoff(),
            })
        } else {
            None
        };
        Self {
            playlists: playlist_targets(config_path, &config.playlists),
            history_path: resolve_path(config_path, &config.history_path),
            id_map_path: resolve_path(config_path, &config.id_map_path),
            monitor,
        }
    }
}

pub fn playlist_targets(config_path: &Path, playlists: &[PlaylistConfig]) -> Vec<PlaylistTarget> {
    playlists
        .iter()
        .map(|playlist| PlaylistTarget {
            name: playlist.name.clone(),
            url: playlist.url.clone(),
            folder: resolve_path(config_path, &playlist.folder),
            queue_folder: playlist.metube_folder.clone(),
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub recovered: usize,
    pub dispatched: usize,
    pub dispatch_failures: usize,
    pub skipped_playlists: usize,
    /// State file writes that failed; the changes stay in memory.
    pub write_failures: usize,
    pub monitor: MonitorSummary,
    pub cancelled: bool,
}

#[derive(Debug)]
pub enum SyncError {
    Library(LibraryError),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Library(err) => write!(f, "state error: {}", err),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Library(err) => Some(err),
        }
    }
}

impl From<LibraryError> for SyncError {
    fn from(err: LibraryError) -> Self {
        SyncError::Library(err)
    }
}

/// One full reconciliation pass: recover state from the queue, dispatch what
/// is missing for each playlist, then watch the dispatched items complete.
pub struct SyncEngine<S, Q> {
    settings: RwLock<SyncSettings>,
    source: S,
    queue: Q,
}

impl<S: PlaylistSource, Q: DownloadQueue> SyncEngine<S, Q> {
    pub fn new(settings: SyncSettings, source: S, queue: Q) -> Self {
        Self {
            settings: RwLock::new(settings),
            source,
            queue,
        }
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings.read().clone()
    }

    /// Replaces the playlist set. A run already in progress keeps the set it
    /// started with.
    pub fn set_playlists(&self, playlists: Vec<PlaylistTarget>) {
        self.settings.write().playlists = playlists;
    }

    pub async fn run(
        &self,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, SyncError> {
        let settings = self.settings();
        let mut summary = RunSummary::default();
        let mut identity = IdentityStore::open(&settings.history_path, &settings.id_map_path)?;

        summary.recovered = self.recover_from_queue(&mut identity, &mut summary, progress).await;

        let mut pending: IndexMap<String, RemoteItem> = IndexMap::new();
        for playlist in &settings.playlists {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            self.sync_playlist(
                playlist,
                &mut identity,
                &mut pending,
                &mut summary,
                progress,
                cancel,
            )
            .await;
        }

        if let Some(monitor) = settings.monitor {
            if !summary.cancelled && !pending.is_empty() {
                summary.monitor =
                    run_monitor(&self.queue, &mut identity, pending, monitor, progress, cancel)
                        .await;
                summary.cancelled = summary.monitor.cancelled;
            }
        }

        persist(&mut identity, &mut summary, progress);
        Ok(summary)
    }

    /// Folds the queue's own record of finished downloads into the store so
    /// that completions missed by an earlier run are not lost.
    async fn recover_from_queue(
        &self,
        identity: &mut IdentityStore,
        summary: &mut RunSummary,
        progress: &Progress,
    ) -> usize {
        let history = match self.queue.history().await {
            Ok(history) => history,
            Err(err) => {
                progress.warn(format!("Skipping startup sync, queue unavailable: {}", err));
                return 0;
            }
        };
        let completed = history.completed_files();
        let recovered =
            identity.fold_remote_done(completed.iter().map(|(id, name)| (*id, name.as_str())));
        persist(identity, summary, progress);
        if recovered > 0 {
            progress.line(format!("Recovered {} completed downloads from the queue", recovered));
        }
        recovered
    }

    async fn sync_playlist(
        &self,
        playlist: &PlaylistTarget,
        identity: &mut IdentityStore,
        pending: &mut IndexMap<String, RemoteItem>,
        summary: &mut RunSummary,
        progress: &Progress,
        cancel: &CancellationToken,
    ) {
        progress.line(format!("Processing playlist: {}...", playlist.name));

        let items = match self.source.fetch(&playlist.url).await {
            Ok(items) => items,
            Err(err) => {
                progress.warn(format!(
                    "Failed to fetch playlist {}: {}; skipping",
                    playlist.name, err
                ));
                summary.skipped_playlists += 1;
                return;
            }
        };
        progress.line(format!("Found {} items in playlist.", items.len()));

        let inventory = scan_folder(&playlist.folder);
        progress.line(format!(
            "Found {} existing files in {}.",
            inventory.len(),
            playlist.folder.display()
        ));

        let to_dispatch = filter_dispatch(&items, &inventory, identity);
        let mut added = 0usize;
        for item in to_dispatch {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            // the same id may appear in more than one playlist
            if pending.contains_key(&item.id) {
                continue;
            }
            progress.line(format!("Queueing download: {}", item.title));
            match self.queue.submit(item, &playlist.queue_folder).await {
                Ok(()) => {
                    identity.record_dispatch(&item.id);
                    persist(identity, summary, progress);
                    pending.insert(item.id.clone(), item.clone());
                    added += 1;
                    summary.dispatched += 1;
                }
                Err(err) => {
                    warn!("Dispatch of {} failed: {}", item.id, err);
                    progress.warn(format!("Error sending to queue: {}: {}", item.title, err));
                    summary.dispatch_failures += 1;
                }
            }
        }

        if added > 0 {
            progress.event(
                KIND_DISPATCH,
                format!("Queued {} new items for {}", added, playlist.name),
            );
        }
        progress.line(format!(
            "Finished processing {}. Added {} new items.",
            playlist.name, added
        ));
    }
}

/// Writes pending store changes. A failed write is reported and the store
/// stays dirty, so the next flush retries it.
fn persist(identity: &mut IdentityStore, summary: &mut RunSummary, progress: &Progress) {
    if let Err(err) = identity.flush() {
        summary.write_failures += 1;
        progress.warn(format!("Failed to save sync state: {}", err));
    }
}

/// Closing line for a run, also kept in the activity log.
pub fn report_summary(progress: &Progress, summary: &RunSummary) {
    let state = if summary.cancelled { "stopped" } else { "finished" };
    progress.event(
        KIND_RUN,
        format!(
            "Sync {}: {} dispatched, {} dispatch errors, {} downloaded, {} failed, {} lost, {} unconfirmed.",
            state,
            summary.dispatched,
            summary.dispatch_failures,
            summary.monitor.done,
            summary.monitor.failed,
            summary.monitor.lost,
            summary.monitor.abandoned
        ),
    );
}
