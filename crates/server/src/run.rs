use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::activity_store::{ActivityStore, KIND_ERROR, KIND_RUN};
use crate::playlist::PlaylistSource;
use crate::progress::Progress;
use crate::queue::DownloadQueue;
use crate::sync::{report_summary, SyncEngine};

struct RunHandle {
    id: Uuid,
    cancel: CancellationToken,
}

/// Frees the controller slot when the run task ends, by completion or by
/// panic.
struct Release {
    active: Arc<Mutex<Option<RunHandle>>>,
    id: Uuid,
}

impl Drop for Release {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        if active.as_ref().map(|handle| handle.id) == Some(self.id) {
            *active = None;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RunError {
    AlreadyRunning(Uuid),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::AlreadyRunning(id) => write!(f, "sync {} is already running", id),
        }
    }
}

impl std::error::Error for RunError {}

/// A started run: its id and the stream of progress lines. The stream ends
/// when the run finishes.
pub struct RunStarted {
    pub id: Uuid,
    pub lines: UnboundedReceiver<String>,
}

/// Owns the single in-flight sync run, if any.
#[derive(Clone, Default)]
pub struct RunController {
    active: Arc<Mutex<Option<RunHandle>>>,
}

impl RunController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<S, Q>(
        &self,
        engine: Arc<SyncEngine<S, Q>>,
        activity: Option<ActivityStore>,
    ) -> Result<RunStarted, RunError>
    where
        S: PlaylistSource + 'static,
        Q: DownloadQueue + 'static,
    {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock();
            if let Some(handle) = active.as_ref() {
                return Err(RunError::AlreadyRunning(handle.id));
            }
            *active = Some(RunHandle {
                id,
                cancel: cancel.clone(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let release = Release {
            active: Arc::clone(&self.active),
            id,
        };
        tokio::spawn(async move {
            let progress = Progress::new(Some(tx), activity);
            // dropped before `progress`, so the slot is free once the lines end
            let _release = release;
            progress.event(KIND_RUN, "Sync started");
            match engine.run(&progress, &cancel).await {
                Ok(summary) => report_summary(&progress, &summary),
                Err(err) => progress.event(KIND_ERROR, format!("Sync aborted: {}", err)),
            }
        });

        Ok(RunStarted { id, lines: rx })
    }

    /// Requests cancellation of the active run. Returns false when idle.
    pub fn stop(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn current(&self) -> Option<Uuid> {
        self.active.lock().as_ref().map(|handle| handle.id)
    }
}
