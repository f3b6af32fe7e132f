use std::future::Future;
use std::time::Duration;

use common::RemoteItem;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// The remote download queue: accepts submissions and reports completions.
pub trait DownloadQueue: Send + Sync {
    fn submit(
        &self,
        item: &RemoteItem,
        folder: &str,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;

    fn history(&self) -> impl Future<Output = Result<QueueHistory, QueueError>> + Send;
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct QueueHistory {
    #[serde(default)]
    pub done: Vec<QueueEntry>,
    #[serde(default)]
    pub queue: Vec<QueueEntry>,
    #[serde(default)]
    pub pending: Vec<QueueEntry>,
}

impl QueueHistory {
    /// Latest done entry for `id`.
    pub fn find_done(&self, id: &str) -> Option<&QueueEntry> {
        self.done.iter().rev().find(|entry| entry.id == id)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.queue
            .iter()
            .chain(self.pending.iter())
            .any(|entry| entry.id == id)
    }

    /// `(id, filename)` of every successfully completed download.
    pub fn completed_files(&self) -> Vec<(&str, String)> {
        self.done
            .iter()
            .filter(|entry| !entry.is_error())
            .filter_map(|entry| entry.file_name().map(|name| (entry.id.as_str(), name)))
            .collect()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct QueueEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl QueueEntry {
    pub fn is_error(&self) -> bool {
        let status_error = self
            .status
            .as_deref()
            .map(|status| status.eq_ignore_ascii_case("error"))
            .unwrap_or(false);
        status_error || non_empty(self.error.as_deref()).is_some()
    }

    pub fn error_message(&self) -> String {
        non_empty(self.error.as_deref())
            .or_else(|| non_empty(self.msg.as_deref()))
            .unwrap_or("download failed")
            .to_string()
    }

    /// Basename of the reported file path.
    pub fn file_name(&self) -> Option<String> {
        let name = common::file_name_of(non_empty(self.filename.as_deref())?);
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Serialize)]
struct AddRequest<'a> {
    url: &'a str,
    quality: &'a str,
    format: &'a str,
    folder: &'a str,
}

#[derive(Deserialize)]
struct AddResponse {
    status: Option<String>,
    msg: Option<String>,
}

#[derive(Debug)]
pub enum QueueError {
    Http(reqwest::Error),
    Status(StatusCode),
    Rejected(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Http(err) => write!(f, "http error: {}", err),
            QueueError::Status(status) => write!(f, "http {}", status),
            QueueError::Rejected(message) => write!(f, "rejected: {}", message),
        }
    }
}

impl std::error::Error for QueueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueueError::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for QueueError {
    fn from(err: reqwest::Error) -> Self {
        QueueError::Http(err)
    }
}

/// Client for a MeTube-compatible download queue.
#[derive(Clone)]
pub struct MetubeClient {
    client: Client,
    base_url: String,
    quality: String,
    format: String,
    timeout: Duration,
}

impl MetubeClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        quality: impl Into<String>,
        format: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            quality: quality.into(),
            format: format.into(),
            timeout,
        }
    }
}

impl DownloadQueue for MetubeClient {
    async fn submit(&self, item: &RemoteItem, folder: &str) -> Result<(), QueueError> {
        let video_url = resolve_video_url(&item.url, &item.id);
        let request = AddRequest {
            url: &video_url,
            quality: &self.quality,
            format: &self.format,
            folder,
        };
        let response = self
            .client
            .post(format!("{}/add", self.base_url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(QueueError::Status(response.status()));
        }
        // older queue versions answer with an empty body
        let body = response.bytes().await?;
        if let Ok(ack) = serde_json::from_slice::<AddResponse>(&body) {
            if ack.status.as_deref() == Some("error") {
                return Err(QueueError::Rejected(
                    ack.msg.unwrap_or_else(|| "unknown error".to_string()),
                ));
            }
        }
        Ok(())
    }

    async fn history(&self) -> Result<QueueHistory, QueueError> {
        let response = self
            .client
            .get(format!("{}/history", self.base_url))
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(QueueError::Status(response.status()));
        }
        Ok(response.json::<QueueHistory>().await?)
    }
}

/// Absolute watch URL for an item. Flat playlist extraction often reports a
/// bare video id instead of a URL.
pub fn resolve_video_url(url: &str, id: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    let id = if url.is_empty() { id.trim() } else { url };
    format!("{}{}", WATCH_URL_PREFIX, id)
}
