use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::{
    db::{Cache, CacheKey},
    error::AppResult,
};

/// Upper bound on live slots per model kind
const MAX_SLOTS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    Collaborative,
    Content,
}

impl Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelKind::Collaborative => write!(f, "collaborative"),
            ModelKind::Content => write!(f, "content"),
        }
    }
}

/// Trained artifact with its freshness marker
#[derive(Debug, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    /// Fingerprint of the eligible set the artifact was trained on
    pub fingerprint: u64,
    pub trained_at: DateTime<Utc>,
    pub artifact: T,
}

struct Persistence {
    cache: Cache,
    ttl: u64,
}

/// Versioned artifact slots for one model kind, keyed by eligible-set fingerprint
///
/// Readers clone an `Arc` out of the map and never observe a partially built
/// artifact: training happens outside the map and the result is inserted (or
/// the map replaced) in one write. Lazy training is serialised by `writer`,
/// so concurrent misses never train the same slot twice.
pub struct ModelCache<T> {
    kind: ModelKind,
    slots: RwLock<HashMap<u64, Arc<Versioned<T>>>>,
    writer: Mutex<()>,
    next_version: AtomicU64,
    persistence: Option<Persistence>,
}

impl<T> ModelCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(kind: ModelKind) -> Self {
        Self {
            kind,
            slots: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
            next_version: AtomicU64::new(1),
            persistence: None,
        }
    }

    /// Mirrors installed artifacts to Redis and consults it on misses
    pub fn with_persistence(mut self, cache: Cache, ttl: u64) -> Self {
        self.persistence = Some(Persistence { cache, ttl });
        self
    }

    pub async fn get(&self, fingerprint: u64) -> Option<Arc<Versioned<T>>> {
        self.slots.read().await.get(&fingerprint).cloned()
    }

    /// Number of live slots
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Cached artifact for `fingerprint`, training it on a miss.
    ///
    /// A failed training leaves the cache as it was.
    pub async fn get_or_train<F, Fut>(
        &self,
        fingerprint: u64,
        train: F,
    ) -> AppResult<Arc<Versioned<T>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        if let Some(hit) = self.get(fingerprint).await {
            return Ok(hit);
        }

        let _writer = self.writer.lock().await;
        if let Some(hit) = self.get(fingerprint).await {
            return Ok(hit);
        }

        if let Some(restored) = self.restore(fingerprint).await {
            let restored = Arc::new(restored);
            self.install(restored.clone()).await;
            return Ok(restored);
        }

        tracing::info!(kind = %self.kind, fingerprint, "No cached artifact, training");
        let versioned = Arc::new(self.stamp(fingerprint, train().await?));
        self.install(versioned.clone()).await;
        self.persist(&versioned);

        Ok(versioned)
    }

    /// Installs an already trained artifact as the only live slot.
    ///
    /// Artifacts for other eligible sets are dropped and retrained lazily.
    /// Training happens before this call, so a failed retrain never reaches
    /// the cache.
    pub async fn replace_all(&self, fingerprint: u64, artifact: T) -> Arc<Versioned<T>> {
        let _writer = self.writer.lock().await;

        let versioned = Arc::new(self.stamp(fingerprint, artifact));
        let previous = {
            let mut slots = self.slots.write().await;
            let previous = slots.len();
            *slots = HashMap::from([(fingerprint, versioned.clone())]);
            previous
        };
        self.persist(&versioned);

        tracing::info!(
            kind = %self.kind,
            version = versioned.version,
            fingerprint,
            dropped_slots = previous,
            "Installed refreshed artifact"
        );

        versioned
    }

    /// Inserts a slot, evicting the oldest version once the cache is full
    async fn install(&self, versioned: Arc<Versioned<T>>) {
        let mut slots = self.slots.write().await;
        if slots.len() >= MAX_SLOTS && !slots.contains_key(&versioned.fingerprint) {
            let oldest = slots
                .values()
                .min_by_key(|slot| slot.version)
                .map(|slot| slot.fingerprint);
            if let Some(oldest) = oldest {
                slots.remove(&oldest);
                tracing::debug!(kind = %self.kind, fingerprint = oldest, "Evicted model slot");
            }
        }
        slots.insert(versioned.fingerprint, versioned);
    }

    fn stamp(&self, fingerprint: u64, artifact: T) -> Versioned<T> {
        Versioned {
            version: self.next_version.fetch_add(1, Ordering::SeqCst),
            fingerprint,
            trained_at: Utc::now(),
            artifact,
        }
    }

    async fn restore(&self, fingerprint: u64) -> Option<Versioned<T>> {
        let persistence = self.persistence.as_ref()?;
        let key = CacheKey::Model(self.kind, fingerprint);

        match persistence.cache.get_from_cache::<Versioned<T>>(&key).await {
            Ok(Some(restored)) if restored.fingerprint == fingerprint => {
                self.next_version
                    .fetch_max(restored.version + 1, Ordering::SeqCst);
                tracing::info!(
                    kind = %self.kind,
                    version = restored.version,
                    trained_at = %restored.trained_at,
                    "Restored persisted artifact"
                );
                Some(restored)
            }
            Ok(Some(_)) => {
                tracing::warn!(key = %key, "Persisted artifact fingerprint mismatch, ignoring");
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Persisted artifact unusable, retraining");
                None
            }
        }
    }

    fn persist(&self, versioned: &Versioned<T>) {
        if let Some(persistence) = &self.persistence {
            let key = CacheKey::Model(self.kind, versioned.fingerprint);
            persistence
                .cache
                .set_in_background(&key, versioned, persistence.ttl);
        }
    }
}
