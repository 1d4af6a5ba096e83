use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::app::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub entities: Vec<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let entities = state
        .pipeline
        .registry()
        .entities()
        .into_iter()
        .map(str::to_string)
        .collect();

    Json(HealthResponse { status: "ok", entities })
}
