use axum::{extract::State, http::StatusCode, Json};
use tracing::{info, warn};

use crate::config::{save_config, ConfigUpdate, ServerConfig};
use crate::state::{AppState, JsonResult, SaveResponse};
use crate::sync::playlist_targets;
use crate::utils::json_error;

pub async fn get_config(State(state): State<AppState>) -> Json<ServerConfig> {
    Json(state.config.read().clone())
}

/// Saves the dashboard's settings. Playlist changes apply to the next run;
/// a new queue URL needs a restart.
pub async fn update_config(
    State(state): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> JsonResult<SaveResponse> {
    let mut config = state.config.read().clone();
    let previous_url = config.metube_url.clone();
    update
        .apply(&mut config)
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err))?;

    if let Err(err) = save_config(&state.config_path, &config) {
        warn!("Failed to save config to {:?}: {}", state.config_path, err);
        return Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("save failed: {}", err),
        ));
    }

    state
        .engine
        .set_playlists(playlist_targets(&state.config_path, &config.playlists));
    let url_changed = config.metube_url != previous_url;
    info!("Saved config with {} playlists", config.playlists.len());
    *state.config.write() = config;

    let mut message = "Saved.".to_string();
    if url_changed {
        message.push_str(" Restart the server to use the new queue URL.");
    }
    Ok(Json(SaveResponse {
        status: "success",
        message,
    }))
}
