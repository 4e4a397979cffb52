//! Data-source abstraction for the recommendation engine
//!
//! The engine never talks to Postgres or the platform API directly: catalog
//! metadata comes from a [`FeatureStore`], usage and per-user lists from an
//! [`InteractionStore`]. Implementations are expected to be cheap to share
//! behind an `Arc`.

use std::collections::HashSet;

use crate::{
    error::AppResult,
    models::{Interaction, ItemFeatures, ItemId, OwnedItem, UserId},
    services::filter::multiplayer_items,
};

/// Source of per-item token lists
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait FeatureStore: Send + Sync {
    /// Full catalog: item id → tokens (rating bucket, tags, genres, categories)
    async fn get_item_features(&self) -> AppResult<ItemFeatures>;

    /// Catalog subset playable together, used for paired recommendations
    ///
    /// Default implementation derives it from the full catalog. Stores with an
    /// indexed category table can override it with a narrower query.
    async fn get_multiplayer_items(&self) -> AppResult<ItemFeatures> {
        let all = self.get_item_features().await?;
        Ok(multiplayer_items(&all))
    }

    /// Drops any intermediate copy so the next read hits the source of truth
    async fn invalidate(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Source of usage observations and per-user item lists
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait InteractionStore: Send + Sync {
    /// Every (user, item, usage) observation with positive usage
    async fn get_all_interactions(&self) -> AppResult<Vec<Interaction>>;

    /// Items the user owns with their usage
    ///
    /// Users unknown to the store may be resolved through a live upstream query.
    async fn get_user_owned_items(&self, user_id: UserId) -> AppResult<Vec<OwnedItem>>;

    /// Items the user asked never to be recommended (wishlist ∪ hidden)
    async fn get_user_excluded_items(&self, user_id: UserId) -> AppResult<HashSet<ItemId>>;
}
