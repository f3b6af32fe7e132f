use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::activity_store::ActivityStore;
use crate::config::ServerConfig;
use crate::playlist::YtDlpSource;
use crate::queue::MetubeClient;
use crate::run::RunController;
use crate::sync::SyncEngine;

pub type Engine = SyncEngine<YtDlpSource, MetubeClient>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<ServerConfig>>,
    pub config_path: PathBuf,
    pub engine: Arc<Engine>,
    pub runs: RunController,
    pub activity: ActivityStore,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct StopResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Serialize)]
pub struct SaveResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Serialize)]
pub struct SyncStateResponse {
    pub running: Option<String>,
    pub history: usize,
    pub resolved: usize,
    pub failed: usize,
    pub playlists: usize,
    pub queue_url: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;
