use axum::{extract::State, Json};

use crate::{error::AppResult, services::recommendations::RefreshReport, state::AppState};

/// Handler for the forced retrain endpoint
pub async fn refresh(State(state): State<AppState>) -> AppResult<Json<RefreshReport>> {
    let report = state.engine.refresh().await?;
    Ok(Json(report))
}
