use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use common::Resolution;
use indexmap::IndexMap;
use library::{IdentityStore, KeyValueStore};
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tracing::info;

use crate::state::{AppState, JsonResult, StopResponse, SyncStateResponse};
use crate::utils::{json_error, json_error_response};

/// Starts a sync run and streams its progress lines. The stream ends with a
/// `close` event once the run is over.
pub async fn start_run(State(state): State<AppState>) -> Response {
    let started = match state
        .runs
        .start(Arc::clone(&state.engine), Some(state.activity.clone()))
    {
        Ok(started) => started,
        Err(err) => return json_error_response(StatusCode::CONFLICT, err.to_string()),
    };
    info!("Started sync {}", started.id);

    let lines = UnboundedReceiverStream::new(started.lines)
        .map(|line| Ok::<_, Infallible>(Event::default().data(line)));
    let close = tokio_stream::once(Ok(Event::default().event("close").data("close")));
    Sse::new(lines.chain(close))
        .keep_alive(KeepAlive::default())
        .into_response()
}

pub async fn stop_run(State(state): State<AppState>) -> Json<StopResponse> {
    if state.runs.stop() {
        info!("Stop requested for the active sync");
        Json(StopResponse {
            status: "stopped",
            message: "Sync is stopping.".to_string(),
        })
    } else {
        Json(StopResponse {
            status: "no_process",
            message: "No sync is running.".to_string(),
        })
    }
}

pub async fn get_state(State(state): State<AppState>) -> JsonResult<SyncStateResponse> {
    let settings = state.engine.settings();
    let identity = IdentityStore::open(&settings.history_path, &settings.id_map_path).map_err(
        |err| json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("state error: {}", err)),
    )?;
    let queue_url = state.config.read().metube_url.clone();
    Ok(Json(SyncStateResponse {
        running: state.runs.current().map(|id| id.to_string()),
        history: identity.history().len(),
        resolved: identity.id_map().len(),
        failed: identity.failed_count(),
        playlists: settings.playlists.len(),
        queue_url,
    }))
}

/// The id map as `{id: filename}`, most recently resolved first. Failed
/// items carry their `ERROR: ` marker.
pub async fn get_history(State(state): State<AppState>) -> JsonResult<IndexMap<String, String>> {
    let settings = state.engine.settings();
    let identity = IdentityStore::open(&settings.history_path, &settings.id_map_path).map_err(
        |err| json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("state error: {}", err)),
    )?;
    Ok(Json(newest_first(identity.id_map())))
}

fn newest_first<S>(store: &S) -> IndexMap<String, String>
where
    S: KeyValueStore<Value = Resolution>,
{
    let entries: Vec<_> = store.iter().collect();
    entries
        .into_iter()
        .rev()
        .map(|(id, resolution)| (id.to_string(), resolution.to_stored()))
        .collect()
}

#[cfg(test)]
mod tests {
    use common::Resolution;
    use library::{IdMapLayout, JsonFileStore, KeyValueStore};

    use super::newest_first;

    #[test]
    fn history_lists_latest_resolution_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::<IdMapLayout>::open(&dir.path().join("id_map.json")).unwrap();
        store.put("a", Resolution::File("A.m4a".to_string()));
        store.put("b", Resolution::Failed("HTTP Error 403".to_string()));
        store.put("c", Resolution::File("C.m4a".to_string()));
        store.put_latest("a", Resolution::File("A (2).m4a".to_string()));

        let history = newest_first(&store);
        let ids: Vec<&str> = history.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert_eq!(history["a"], "A (2).m4a");
        assert_eq!(history["b"], "ERROR: HTTP Error 403");

        let json = serde_json::to_string(&history).unwrap();
        assert!(json.starts_with(r#"{"a":"A (2).m4a","c""#));
    }
}
