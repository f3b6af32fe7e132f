use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::activity_store::ActivityStore;

/// Fan-out for progress lines of one run: the log, the operator stream and,
/// for notable events, the activity log.
#[derive(Clone, Default)]
pub struct Progress {
    lines: Option<UnboundedSender<String>>,
    activity: Option<ActivityStore>,
}

impl Progress {
    pub fn new(lines: Option<UnboundedSender<String>>, activity: Option<ActivityStore>) -> Self {
        Self { lines, activity }
    }

    pub fn line(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.send(message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.send(message);
    }

    /// A line that is also kept in the activity log under `kind`.
    pub fn event(&self, kind: &str, message: impl Into<String>) {
        let message = message.into();
        info!(kind, "{}", message);
        if let Some(activity) = &self.activity {
            if let Err(err) = activity.add_event(kind, message.clone()) {
                warn!("Failed to record activity: {}", err);
            }
        }
        self.send(message);
    }

    fn send(&self, message: String) {
        if let Some(lines) = &self.lines {
            // the receiver goes away when the operator closes the stream
            let _ = lines.send(message);
        }
    }
}
