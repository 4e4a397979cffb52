use std::sync::Arc;

use crate::services::recommendations::RecommendationEngine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RecommendationEngine>,
    /// Upper bound (and default) for the requested list length
    pub max_recommendations: usize,
}

impl AppState {
    pub fn new(engine: Arc<RecommendationEngine>, max_recommendations: usize) -> Self {
        Self {
            engine,
            max_recommendations,
        }
    }
}
