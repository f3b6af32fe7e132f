use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};

use crate::activity_store::ActivityEntry;
use crate::state::{ActivityQuery, AppState, HealthResponse, JsonResult, ListResponse};
use crate::utils::{json_error, page_limit};

pub async fn list_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> JsonResult<ListResponse<ActivityEntry>> {
    let limit = page_limit(query.limit, 50, 200);
    let offset = query.offset.unwrap_or(0);
    let (items, total) = state
        .activity
        .list_events(limit, offset)
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, err))?;
    Ok(Json(ListResponse { items, total }))
}

pub async fn clear_activity(State(state): State<AppState>) -> JsonResult<HealthResponse> {
    state
        .activity
        .clear_events()
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, err))?;
    Ok(Json(HealthResponse { status: "ok" }))
}
