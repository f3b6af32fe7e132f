use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use common::RemoteItem;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

/// Source of remote playlist entries.
pub trait PlaylistSource: Send + Sync {
    fn fetch(
        &self,
        playlist_url: &str,
    ) -> impl Future<Output = Result<Vec<RemoteItem>, MetadataError>> + Send;
}

#[derive(Debug)]
pub enum MetadataError {
    Spawn(std::io::Error),
    Timeout(Duration),
    Exit { code: Option<i32>, stderr: String },
    Json(serde_json::Error),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Spawn(err) => write!(f, "failed to start extractor: {}", err),
            MetadataError::Timeout(limit) => {
                write!(f, "extractor timed out after {}s", limit.as_secs())
            }
            MetadataError::Exit { code, stderr } => match code {
                Some(code) => write!(f, "extractor exited with {}: {}", code, stderr),
                None => write!(f, "extractor killed: {}", stderr),
            },
            MetadataError::Json(err) => write!(f, "invalid extractor output: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<serde_json::Error> for MetadataError {
    fn from(err: serde_json::Error) -> Self {
        MetadataError::Json(err)
    }
}

/// Flat playlist extraction through the `yt-dlp` executable.
#[derive(Clone, Debug)]
pub struct YtDlpSource {
    program: String,
    timeout: Duration,
}

impl YtDlpSource {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl PlaylistSource for YtDlpSource {
    async fn fetch(&self, playlist_url: &str) -> Result<Vec<RemoteItem>, MetadataError> {
        let mut command = Command::new(&self.program);
        command
            .args([
                "--flat-playlist",
                "--dump-single-json",
                "--ignore-errors",
                "--no-warnings",
                "--quiet",
            ])
            .arg(playlist_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(MetadataError::Spawn)?,
            Err(_) => return Err(MetadataError::Timeout(self.timeout)),
        };

        // with --ignore-errors a non-zero exit can still carry usable output
        if output.stdout.iter().all(|b| b.is_ascii_whitespace()) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MetadataError::Exit {
                code: output.status.code(),
                stderr: last_line(&stderr),
            });
        }
        if !output.status.success() {
            debug!(
                "Extractor exited with {:?} for {}; using partial output",
                output.status.code(),
                playlist_url
            );
        }
        parse_playlist(&output.stdout)
    }
}

/// Entries of a flat-playlist JSON document. Unavailable entries (null or
/// without an id) are skipped; a single-video document has no entries.
pub fn parse_playlist(bytes: &[u8]) -> Result<Vec<RemoteItem>, MetadataError> {
    let document: Value = serde_json::from_slice(bytes)?;
    let entries = match document.get("entries").and_then(Value::as_array) {
        Some(entries) => entries,
        None => return Ok(Vec::new()),
    };
    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        let id = match string_field(entry, "id") {
            Some(id) => id,
            None => continue,
        };
        let title = string_field(entry, "title").unwrap_or_else(|| id.clone());
        let url = string_field(entry, "url")
            .or_else(|| string_field(entry, "webpage_url"))
            .unwrap_or_else(|| id.clone());
        items.push(RemoteItem { id, title, url });
    }
    Ok(items)
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .to_string()
}
