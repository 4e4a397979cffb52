use crate::{
    cached,
    db::{Cache, CacheKey, FeatureStore},
    error::AppResult,
    models::ItemFeatures,
};

/// Feature store decorator keeping catalog snapshots in Redis
///
/// Catalog assembly joins four tables; the snapshot is shared by every
/// process instance until it expires or a refresh invalidates it.
pub struct CachedFeatureStore<S> {
    inner: S,
    cache: Cache,
    ttl: u64,
}

impl<S: FeatureStore> CachedFeatureStore<S> {
    pub fn new(inner: S, cache: Cache, ttl: u64) -> Self {
        Self { inner, cache, ttl }
    }
}

#[async_trait::async_trait]
impl<S: FeatureStore> FeatureStore for CachedFeatureStore<S> {
    async fn get_item_features(&self) -> AppResult<ItemFeatures> {
        cached!(
            self.cache,
            CacheKey::Catalog,
            self.ttl,
            self.inner.get_item_features()
        )
    }

    async fn get_multiplayer_items(&self) -> AppResult<ItemFeatures> {
        cached!(
            self.cache,
            CacheKey::MultiplayerCatalog,
            self.ttl,
            self.inner.get_multiplayer_items()
        )
    }

    async fn invalidate(&self) -> AppResult<()> {
        self.cache.invalidate(&CacheKey::Catalog).await?;
        self.cache.invalidate(&CacheKey::MultiplayerCatalog).await?;
        self.inner.invalidate().await
    }
}
