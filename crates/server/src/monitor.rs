use std::time::Duration;

use common::{RemoteItem, Resolution};
use indexmap::IndexMap;
use library::IdentityStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::activity_store::{KIND_DONE, KIND_ERROR, KIND_LOST};
use crate::progress::Progress;
use crate::queue::{DownloadQueue, QueueHistory};

#[derive(Clone, Copy, Debug)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// Wait after a failed history fetch; longer than the poll interval.
    pub error_backoff: Duration,
}

/// Terminal state of a pending item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Done(Option<String>),
    Error(String),
    Lost,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub resolved: Vec<(RemoteItem, Outcome)>,
    pub mutated: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    pub done: usize,
    pub failed: usize,
    pub lost: usize,
    /// Ids still pending when the loop ended.
    pub abandoned: usize,
    pub cancelled: bool,
}

impl MonitorSummary {
    fn absorb(&mut self, report: &CycleReport) {
        for (_, outcome) in &report.resolved {
            match outcome {
                Outcome::Done(_) => self.done += 1,
                Outcome::Error(_) => self.failed += 1,
                Outcome::Lost => self.lost += 1,
            }
        }
    }
}

/// Advances every pending id against one snapshot of the queue. Resolved ids
/// leave `pending`; ids still queued or downloading stay, even when an older
/// done entry exists for them from an earlier download. Pending order is
/// dispatch order, so store updates happen in that order too.
pub fn apply_cycle(
    pending: &mut IndexMap<String, RemoteItem>,
    snapshot: &QueueHistory,
    identity: &mut IdentityStore,
) -> CycleReport {
    let mut report = CycleReport::default();
    let mut finished: Vec<(String, Outcome)> = Vec::new();

    for (id, item) in pending.iter() {
        if snapshot.is_active(id) {
            continue;
        }
        let outcome = match snapshot.find_done(id) {
            Some(entry) if entry.is_error() => {
                let message = entry.error_message();
                identity.resolve(id, Resolution::Failed(message.clone()));
                report.mutated = true;
                Outcome::Error(message)
            }
            Some(entry) => match entry.file_name() {
                Some(filename) => {
                    identity.resolve(id, Resolution::File(filename.clone()));
                    report.mutated = true;
                    Outcome::Done(Some(filename))
                }
                None => {
                    warn!("{} finished without a reported filename", item.title);
                    identity.record_dispatch(id);
                    report.mutated = true;
                    Outcome::Done(None)
                }
            },
            None => Outcome::Lost,
        };
        finished.push((id.clone(), outcome));
    }

    for (id, outcome) in finished {
        if let Some(item) = pending.shift_remove(&id) {
            report.resolved.push((item, outcome));
        }
    }
    report
}

fn notify(progress: &Progress, report: &CycleReport) {
    for (item, outcome) in &report.resolved {
        match outcome {
            Outcome::Done(Some(filename)) => {
                progress.event(KIND_DONE, format!("Downloaded: {} -> {}", item.title, filename))
            }
            Outcome::Done(None) => {
                progress.event(KIND_DONE, format!("Downloaded: {} (no filename)", item.title))
            }
            Outcome::Error(message) => progress.event(
                KIND_ERROR,
                format!("Download failed: {} ({}): {}", item.title, item.url, message),
            ),
            Outcome::Lost => progress.event(
                KIND_LOST,
                format!(
                    "Download lost (cancelled or dropped by the queue): {} ({})",
                    item.title, item.url
                ),
            ),
        }
    }
}

/// Polls the queue until every pending id reaches a terminal state or `cancel`
/// fires. A failed fetch only lengthens the wait before the next cycle.
pub async fn run_monitor<Q: DownloadQueue>(
    queue: &Q,
    identity: &mut IdentityStore,
    mut pending: IndexMap<String, RemoteItem>,
    settings: MonitorSettings,
    progress: &Progress,
    cancel: &CancellationToken,
) -> MonitorSummary {
    let mut summary = MonitorSummary::default();
    if pending.is_empty() {
        return summary;
    }
    progress.line(format!("Monitoring {} queued downloads...", pending.len()));

    loop {
        let wait = match queue.history().await {
            Ok(snapshot) => {
                let report = apply_cycle(&mut pending, &snapshot, identity);
                if report.mutated {
                    if let Err(err) = identity.flush() {
                        warn!("Failed to persist identity store: {}", err);
                    }
                }
                notify(progress, &report);
                summary.absorb(&report);
                debug!("{} downloads still pending", pending.len());
                settings.poll_interval
            }
            Err(err) => {
                progress.warn(format!(
                    "Failed to fetch queue history: {}; retrying in {}s",
                    err,
                    settings.error_backoff.as_secs()
                ));
                settings.error_backoff
            }
        };

        if pending.is_empty() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                summary.cancelled = true;
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }

    summary.abandoned = pending.len();
    if summary.cancelled && summary.abandoned > 0 {
        progress.line(format!(
            "Monitoring stopped; {} downloads left unconfirmed",
            summary.abandoned
        ));
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use common::{RemoteItem, Resolution};
    use indexmap::IndexMap;
    use library::{IdentityStore, KeyValueStore};
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    use super::{apply_cycle, run_monitor, MonitorSettings, Outcome};
    use crate::progress::Progress;
    use crate::queue::{DownloadQueue, QueueEntry, QueueError, QueueHistory};

    fn item(id: &str) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            title: format!("Title {}", id),
            url: format!("https://www.youtube.com/watch?v={}", id),
        }
    }

    fn pending(ids: &[&str]) -> IndexMap<String, RemoteItem> {
        ids.iter().map(|id| (id.to_string(), item(id))).collect()
    }

    fn done(id: &str, filename: Option<&str>, error: Option<&str>) -> QueueEntry {
        QueueEntry {
            id: id.to_string(),
            filename: filename.map(str::to_string),
            status: Some(if error.is_some() { "error" } else { "finished" }.to_string()),
            msg: error.map(str::to_string),
            ..QueueEntry::default()
        }
    }

    fn active(id: &str) -> QueueEntry {
        QueueEntry {
            id: id.to_string(),
            ..QueueEntry::default()
        }
    }

    fn store(dir: &tempfile::TempDir) -> IdentityStore {
        IdentityStore::open(
            &dir.path().join("history.json"),
            &dir.path().join("id_map.json"),
        )
        .unwrap()
    }

    #[test]
    fn one_cycle_resolves_done_error_and_lost() {
        let dir = tempfile::tempdir().unwrap();
        let mut identity = store(&dir);
        for id in ["ok", "bad", "gone"] {
            identity.record_dispatch(id);
        }
        let mut pending = pending(&["ok", "bad", "gone"]);
        let snapshot = QueueHistory {
            done: vec![
                done("ok", Some("/downloads/music/Ok.m4a"), None),
                done("bad", None, Some("Video unavailable")),
            ],
            ..QueueHistory::default()
        };

        let report = apply_cycle(&mut pending, &snapshot, &mut identity);
        assert!(pending.is_empty());
        assert!(report.mutated);
        assert_eq!(report.resolved.len(), 3);
        assert_eq!(report.resolved[0].1, Outcome::Done(Some("Ok.m4a".to_string())));
        assert_eq!(report.resolved[1].1, Outcome::Error("Video unavailable".to_string()));
        assert_eq!(report.resolved[2].1, Outcome::Lost);

        assert_eq!(identity.id_map().len(), 2);
        assert_eq!(
            identity.resolution("ok"),
            Some(&Resolution::File("Ok.m4a".to_string()))
        );
        assert_eq!(
            identity.resolution("bad"),
            Some(&Resolution::Failed("Video unavailable".to_string()))
        );
        assert_eq!(identity.resolution("gone"), None);
        let history: Vec<&str> = identity.history().iter().map(|(k, _)| k).collect();
        assert_eq!(history, vec!["gone", "ok", "bad"]);
    }

    #[test]
    fn active_items_stay_pending() {
        let dir = tempfile::tempdir().unwrap();
        let mut identity = store(&dir);
        let mut pending = pending(&["q", "p"]);
        let snapshot = QueueHistory {
            queue: vec![active("q")],
            pending: vec![active("p")],
            ..QueueHistory::default()
        };
        let report = apply_cycle(&mut pending, &snapshot, &mut identity);
        assert!(report.resolved.is_empty());
        assert!(!report.mutated);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn retry_after_failure_moves_entry_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut identity = store(&dir);
        identity.resolve("a", Resolution::Failed("first try".to_string()));
        identity.resolve("b", Resolution::File("B.m4a".to_string()));
        let mut pending = pending(&["a"]);
        let snapshot = QueueHistory {
            done: vec![done("a", Some("A.m4a"), None)],
            ..QueueHistory::default()
        };
        apply_cycle(&mut pending, &snapshot, &mut identity);
        let order: Vec<&str> = identity.id_map().iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn active_download_wins_over_an_older_done_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut identity = store(&dir);
        identity.resolve("a", Resolution::File("Old.m4a".to_string()));
        identity.record_dispatch("a");
        let mut pending = pending(&["a"]);
        let snapshot = QueueHistory {
            done: vec![done("a", Some("Old.m4a"), None)],
            queue: vec![active("a")],
            ..QueueHistory::default()
        };

        let report = apply_cycle(&mut pending, &snapshot, &mut identity);
        assert!(report.resolved.is_empty());
        assert!(!report.mutated);
        assert!(pending.contains_key("a"));

        // the new attempt fails once it leaves the queue
        let snapshot = QueueHistory {
            done: vec![
                done("a", Some("Old.m4a"), None),
                done("a", None, Some("HTTP Error 403")),
            ],
            ..QueueHistory::default()
        };
        let report = apply_cycle(&mut pending, &snapshot, &mut identity);
        assert_eq!(report.resolved[0].1, Outcome::Error("HTTP Error 403".to_string()));
        assert_eq!(
            identity.resolution("a"),
            Some(&Resolution::Failed("HTTP Error 403".to_string()))
        );
    }

    #[test]
    fn done_without_filename_leaves_id_map_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut identity = store(&dir);
        identity.record_dispatch("x");
        identity.record_dispatch("n");
        let mut pending = pending(&["n"]);
        let snapshot = QueueHistory {
            done: vec![done("n", None, None)],
            ..QueueHistory::default()
        };

        let report = apply_cycle(&mut pending, &snapshot, &mut identity);
        assert!(pending.is_empty());
        assert_eq!(report.resolved[0].1, Outcome::Done(None));
        assert!(identity.id_map().is_empty());
        assert!(identity.is_dispatched("n"));
        let history: Vec<&str> = identity.history().iter().map(|(k, _)| k).collect();
        assert_eq!(history, vec!["x", "n"]);
    }

    struct ScriptedQueue {
        snapshots: Mutex<Vec<Result<QueueHistory, ()>>>,
        calls: AtomicUsize,
    }

    impl ScriptedQueue {
        fn new(snapshots: Vec<Result<QueueHistory, ()>>) -> Self {
            Self {
                snapshots: Mutex::new(snapshots),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl DownloadQueue for ScriptedQueue {
        async fn submit(&self, _item: &RemoteItem, _folder: &str) -> Result<(), QueueError> {
            Ok(())
        }

        async fn history(&self) -> Result<QueueHistory, QueueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut snapshots = self.snapshots.lock();
            let next = if snapshots.len() > 1 {
                snapshots.remove(0)
            } else {
                snapshots[0].clone()
            };
            next.map_err(|_| QueueError::Rejected("unreachable".to_string()))
        }
    }

    fn fast() -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(5),
            error_backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn loop_survives_fetch_errors_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut identity = store(&dir);
        let queue = ScriptedQueue::new(vec![
            Err(()),
            Ok(QueueHistory {
                queue: vec![active("a")],
                ..QueueHistory::default()
            }),
            Ok(QueueHistory {
                done: vec![done("a", Some("A.m4a"), None)],
                ..QueueHistory::default()
            }),
        ]);
        let summary = run_monitor(
            &queue,
            &mut identity,
            pending(&["a"]),
            fast(),
            &Progress::default(),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(summary.done, 1);
        assert_eq!(summary.abandoned, 0);
        assert!(!summary.cancelled);
        assert_eq!(queue.calls.load(Ordering::SeqCst), 3);
        assert!(!identity.is_dirty());

        let reloaded = store(&dir);
        assert_eq!(
            reloaded.resolution("a"),
            Some(&Resolution::File("A.m4a".to_string()))
        );
    }

    #[tokio::test]
    async fn cancellation_abandons_pending_items() {
        let dir = tempfile::tempdir().unwrap();
        let mut identity = store(&dir);
        let queue = ScriptedQueue::new(vec![Ok(QueueHistory {
            pending: vec![active("a"), active("b")],
            ..QueueHistory::default()
        })]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = run_monitor(
            &queue,
            &mut identity,
            pending(&["a", "b"]),
            fast(),
            &Progress::default(),
            &cancel,
        )
        .await;
        assert!(summary.cancelled);
        assert_eq!(summary.abandoned, 2);
        assert!(identity.id_map().is_empty());
    }
}
