use axum::{extract::State, Json};
use serde::Deserialize;

use crate::{
    error::{AppError, AppResult},
    models::{FilterCriteria, RecommendationQuery, RecommendationResponse, UserId},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: UserId,
    pub n: Option<usize>,
    #[serde(flatten)]
    pub criteria: FilterCriteria,
    pub peer_user_id: Option<UserId>,
}

impl RecommendationRequest {
    /// Validates the request and turns it into an engine query
    fn into_query(self, max_recommendations: usize) -> AppResult<RecommendationQuery> {
        if self.user_id <= 0 {
            return Err(AppError::InvalidInput("user_id must be positive".to_string()));
        }

        let n = match self.n {
            Some(0) => {
                return Err(AppError::InvalidInput("n must be at least 1".to_string()));
            }
            Some(n) => n.min(max_recommendations),
            None => max_recommendations,
        };

        let mut query = RecommendationQuery::new(self.user_id, n).with_criteria(self.criteria);

        if let Some(peer) = self.peer_user_id {
            if peer <= 0 {
                return Err(AppError::InvalidInput("peer_user_id must be positive".to_string()));
            }
            if peer == self.user_id {
                return Err(AppError::InvalidInput(
                    "peer_user_id must differ from user_id".to_string(),
                ));
            }
            query = query.with_peer(peer);
        }

        Ok(query)
    }
}

/// Handler for recommendations endpoint
pub async fn recommend(
    State(state): State<AppState>,
    Json(request): Json<RecommendationRequest>,
) -> AppResult<Json<RecommendationResponse>> {
    let query = request.into_query(state.max_recommendations)?;
    let recommendations = state.engine.recommend(&query).await;
    Ok(Json(RecommendationResponse { recommendations }))
}
