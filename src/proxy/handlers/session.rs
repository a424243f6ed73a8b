// Session lifecycle endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

use crate::proxy::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct NewSessionRequest {
    /// Scripts injected into every HTML page of the session, in order
    #[serde(default)]
    pub scripts: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    pub session_id: String,
}

/// `GET /new-session`
pub async fn new_session(State(state): State<AppState>) -> Json<NewSessionResponse> {
    let session_id = state.sessions.create_session(Vec::new());
    Json(NewSessionResponse { session_id })
}

/// `POST /new-session` with `{"scripts": [...]}`
pub async fn new_session_with_scripts(
    State(state): State<AppState>,
    Json(request): Json<NewSessionRequest>,
) -> Json<NewSessionResponse> {
    tracing::debug!("new session with {} injected script(s)", request.scripts.len());
    let session_id = state.sessions.create_session(request.scripts);
    Json(NewSessionResponse { session_id })
}

/// `DELETE /session/{id}`; unknown ids are not an error.
pub async fn destroy_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    state.sessions.destroy(&session_id);
    StatusCode::NO_CONTENT.into_response()
}
