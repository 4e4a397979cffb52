use std::collections::{HashMap, HashSet};

use crate::{
    db::{FeatureStore, InteractionStore},
    error::AppResult,
    models::{Interaction, ItemFeatures, ItemId, OwnedItem, UserId},
};

/// Store backed by in-process collections
///
/// Serves both catalog and usage data, deriving each user's library from the
/// interaction list. Used for local runs without Postgres and in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    features: ItemFeatures,
    interactions: Vec<Interaction>,
    excluded: HashMap<UserId, HashSet<ItemId>>,
}

impl InMemoryStore {
    pub fn new(features: ItemFeatures, interactions: Vec<Interaction>) -> Self {
        Self {
            features,
            interactions,
            excluded: HashMap::new(),
        }
    }

    /// Marks items the user never wants recommended
    pub fn with_excluded<I, S>(mut self, user_id: UserId, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ItemId>,
    {
        self.excluded
            .entry(user_id)
            .or_default()
            .extend(items.into_iter().map(Into::into));
        self
    }
}

#[async_trait::async_trait]
impl FeatureStore for InMemoryStore {
    async fn get_item_features(&self) -> AppResult<ItemFeatures> {
        Ok(self.features.clone())
    }
}

#[async_trait::async_trait]
impl InteractionStore for InMemoryStore {
    async fn get_all_interactions(&self) -> AppResult<Vec<Interaction>> {
        Ok(self
            .interactions
            .iter()
            .filter(|interaction| interaction.usage > 0.0)
            .cloned()
            .collect())
    }

    async fn get_user_owned_items(&self, user_id: UserId) -> AppResult<Vec<OwnedItem>> {
        Ok(self
            .interactions
            .iter()
            .filter(|interaction| interaction.user_id == user_id)
            .map(|interaction| (interaction.item_id.clone(), interaction.usage))
            .collect())
    }

    async fn get_user_excluded_items(&self, user_id: UserId) -> AppResult<HashSet<ItemId>> {
        Ok(self.excluded.get(&user_id).cloned().unwrap_or_default())
    }
}
