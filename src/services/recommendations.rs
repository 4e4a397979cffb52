use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::{
    db::{Cache, FeatureStore, InteractionStore},
    error::{AppError, AppResult},
    models::{
        Interaction, ItemId, NormalizedInteraction, OwnedItem, RecommendationQuery, ScoredItem,
        UserId,
    },
    services::{
        blender::{blend, BlendWeights},
        collaborative::{normalize_usage, CollaborativeModel, SvdParams},
        content::ContentModel,
        filter::{Catalog, EligibleSet, FilterEngine},
        model_cache::{ModelCache, ModelKind, Versioned},
        virtual_user,
    },
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub weights: BlendWeights,
    /// Deadline for each signal branch, independently
    pub branch_timeout: Duration,
    pub svd: SvdParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: BlendWeights::default(),
            branch_timeout: Duration::from_secs(10),
            svd: SvdParams::default(),
        }
    }
}

/// Outcome of a forced retrain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshReport {
    pub item_count: usize,
    pub interaction_count: usize,
    pub fingerprint: u64,
    pub collaborative_version: u64,
    pub content_version: u64,
    pub refreshed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Whose taste the collaborative branch scores for
enum Profile {
    User(UserId),
    /// Merged paired-mode history, never part of training
    Virtual(Vec<NormalizedInteraction>),
}

/// Everything a request needs besides the eligible set
struct Participants {
    profile: Profile,
    /// Items feeding the content profile
    owned: HashSet<ItemId>,
    /// Items never returned
    excluded: HashSet<ItemId>,
}

/// Hybrid recommender owning the catalog filter and both model caches
///
/// Every request reads shared, immutable artifacts; only [`refresh`] and
/// lazy training on a cache miss write, and both go through the caches'
/// single-writer discipline.
///
/// [`refresh`]: RecommendationEngine::refresh
pub struct RecommendationEngine {
    interactions: Arc<dyn InteractionStore>,
    filter: FilterEngine,
    collaborative: Arc<ModelCache<CollaborativeModel>>,
    content: Arc<ModelCache<ContentModel>>,
    config: EngineConfig,
    refresh_lock: Mutex<()>,
}

impl RecommendationEngine {
    pub fn new(
        features: Arc<dyn FeatureStore>,
        interactions: Arc<dyn InteractionStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            interactions,
            filter: FilterEngine::new(features),
            collaborative: Arc::new(ModelCache::new(ModelKind::Collaborative)),
            content: Arc::new(ModelCache::new(ModelKind::Content)),
            config,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Persists trained artifacts to Redis so restarts skip retraining
    pub fn with_model_persistence(mut self, cache: Cache, ttl: u64) -> Self {
        self.collaborative = Arc::new(
            ModelCache::new(ModelKind::Collaborative).with_persistence(cache.clone(), ttl),
        );
        self.content = Arc::new(ModelCache::new(ModelKind::Content).with_persistence(cache, ttl));
        self
    }

    /// Ranked recommendations with scores in [0, 1].
    ///
    /// Never fails: store, training and timeout errors degrade the affected
    /// signal to empty, and the result is empty when neither signal survives.
    pub async fn recommend(&self, query: &RecommendationQuery) -> Vec<ScoredItem> {
        if query.n == 0 {
            return Vec::new();
        }

        let catalog = match query.peer_user_id {
            Some(_) => Catalog::Multiplayer,
            None => Catalog::Full,
        };

        let eligible = match self.filter.eligible(catalog, &query.criteria).await {
            Ok(eligible) => eligible,
            Err(e) => {
                tracing::error!(error = %e, "Catalog unavailable, returning no recommendations");
                return Vec::new();
            }
        };

        if eligible.is_empty() {
            tracing::info!(
                user_id = query.user_id,
                criteria = %query.criteria.cache_key(),
                "No eligible items"
            );
            return Vec::new();
        }

        let participants = self.participants(query).await;
        // Branches over-fetch so exclusion cannot starve the final list.
        let depth = query.n + participants.excluded.len();

        let (collaborative, content) = tokio::join!(
            self.guarded(
                ModelKind::Collaborative,
                self.collaborative_signal(&eligible, &participants.profile, depth)
            ),
            self.guarded(
                ModelKind::Content,
                self.content_signal(&eligible, &participants.owned, depth)
            ),
        );

        let blended = blend(
            &collaborative,
            &content,
            self.config.weights,
            &participants.excluded,
            query.n,
        );

        tracing::info!(
            user_id = query.user_id,
            peer_user_id = query.peer_user_id,
            eligible = eligible.len(),
            collaborative = collaborative.len(),
            content = content.len(),
            returned = blended.len(),
            "Generated recommendations"
        );

        blended
    }

    /// Reloads the catalog and retrains both models from scratch.
    ///
    /// Concurrent calls run one after another. The new catalog and both
    /// artifacts go live only after every load and training step has
    /// succeeded; on failure requests keep being served from the previous
    /// catalog and artifacts, and the error is returned.
    pub async fn refresh(&self) -> AppResult<RefreshReport> {
        let _guard = self.refresh_lock.lock().await;
        let started = Instant::now();

        let (staged, interactions) = match tokio::try_join!(
            self.filter.load_staged(),
            self.interactions.get_all_interactions()
        ) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(error = %e, "Refresh load failed, keeping previous catalog and models");
                return Err(e);
            }
        };

        let eligible = staged.full().clone();
        let interaction_count = interactions.len();
        let fingerprint = eligible.fingerprint;

        let trained = tokio::try_join!(
            train_collaborative(interactions, eligible.clone(), self.config.svd.clone()),
            train_content(eligible.clone()),
        );
        let (collaborative, content) = match trained {
            Ok(trained) => trained,
            Err(e) => {
                tracing::error!(error = %e, "Refresh training failed, keeping previous catalog and models");
                return Err(e);
            }
        };

        let trained_users = collaborative.user_count();
        let trained_items = collaborative.item_count();
        let content_items = content.item_count();

        let collaborative = self.collaborative.replace_all(fingerprint, collaborative).await;
        let content = self.content.replace_all(fingerprint, content).await;
        self.filter.install(staged).await;

        let report = RefreshReport {
            item_count: eligible.len(),
            interaction_count,
            fingerprint,
            collaborative_version: collaborative.version,
            content_version: content.version,
            refreshed_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            items = report.item_count,
            interactions = report.interaction_count,
            trained_users,
            trained_items,
            content_items,
            collaborative_version = report.collaborative_version,
            content_version = report.content_version,
            duration_ms = report.duration_ms,
            "Refresh complete"
        );

        Ok(report)
    }

    async fn participants(&self, query: &RecommendationQuery) -> Participants {
        let peer_owned = async {
            match query.peer_user_id {
                Some(peer) => Some(self.owned_or_empty(peer).await),
                None => None,
            }
        };

        let (owned, peer_owned, mut excluded) = tokio::join!(
            self.owned_or_empty(query.user_id),
            peer_owned,
            self.excluded_or_empty(query.user_id),
        );

        let mut owned_ids: HashSet<ItemId> = owned.iter().map(|(id, _)| id.clone()).collect();

        let profile = match peer_owned {
            Some(peer_owned) => {
                owned_ids.extend(peer_owned.iter().map(|(id, _)| id.clone()));
                let merged = virtual_user::synthesize(&owned, &peer_owned);
                Profile::Virtual(normalize_usage(&merged))
            }
            None => Profile::User(query.user_id),
        };

        excluded.extend(owned_ids.iter().cloned());

        Participants {
            profile,
            owned: owned_ids,
            excluded,
        }
    }

    async fn owned_or_empty(&self, user_id: UserId) -> Vec<OwnedItem> {
        let fetch = self.interactions.get_user_owned_items(user_id);
        match self.deadline("owned items", fetch).await {
            Ok(owned) => owned,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Owned items unavailable, treating as empty");
                Vec::new()
            }
        }
    }

    async fn excluded_or_empty(&self, user_id: UserId) -> HashSet<ItemId> {
        let fetch = self.interactions.get_user_excluded_items(user_id);
        match self.deadline("excluded items", fetch).await {
            Ok(excluded) => excluded,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Excluded items unavailable, treating as empty");
                HashSet::new()
            }
        }
    }

    /// Bounds `work` by the branch deadline, reporting an elapse as [`AppError::Timeout`]
    async fn deadline<T, F>(&self, what: &str, work: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        tokio::time::timeout(self.config.branch_timeout, work)
            .await
            .unwrap_or_else(|_| {
                Err(AppError::Timeout(format!(
                    "{} after {}ms",
                    what,
                    self.config.branch_timeout.as_millis()
                )))
            })
    }

    /// Runs one branch under the branch deadline; any failure is an empty signal
    async fn guarded<F>(&self, kind: ModelKind, branch: F) -> Vec<ScoredItem>
    where
        F: Future<Output = AppResult<Vec<ScoredItem>>>,
    {
        match self.deadline(&format!("{} branch", kind), branch).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(branch = %kind, error = %e, "Branch failed, using empty signal");
                Vec::new()
            }
        }
    }

    async fn collaborative_signal(
        &self,
        eligible: &Arc<EligibleSet>,
        profile: &Profile,
        n: usize,
    ) -> AppResult<Vec<ScoredItem>> {
        let store = self.interactions.clone();
        let training_set = eligible.clone();
        let params = self.config.svd.clone();

        let model = load_model(&self.collaborative, eligible.fingerprint, move || async move {
            let interactions = store.get_all_interactions().await?;
            train_collaborative(interactions, training_set, params).await
        })
        .await?;

        Ok(match profile {
            Profile::User(user_id) => model.artifact.recommend_for_user(*user_id, eligible, n),
            Profile::Virtual(ratings) => model.artifact.recommend_for_profile(ratings, eligible, n),
        })
    }

    async fn content_signal(
        &self,
        eligible: &Arc<EligibleSet>,
        owned: &HashSet<ItemId>,
        n: usize,
    ) -> AppResult<Vec<ScoredItem>> {
        if owned.is_empty() {
            return Ok(Vec::new());
        }

        let training_set = eligible.clone();
        let model = load_model(&self.content, eligible.fingerprint, move || {
            train_content(training_set)
        })
        .await?;

        Ok(model.artifact.recommend(owned, n))
    }
}

/// Cached artifact, training it on a miss in a detached task.
///
/// Training outlives a branch timeout so the artifact still lands in the
/// cache for later requests; the timed-out caller just stops waiting.
async fn load_model<T, F, Fut>(
    cache: &Arc<ModelCache<T>>,
    fingerprint: u64,
    train: F,
) -> AppResult<Arc<Versioned<T>>>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<T>> + Send + 'static,
{
    if let Some(hit) = cache.get(fingerprint).await {
        return Ok(hit);
    }

    let cache = cache.clone();
    tokio::spawn(async move { cache.get_or_train(fingerprint, train).await })
        .await
        .map_err(|e| AppError::Internal(format!("model training task failed: {}", e)))?
}

async fn train_collaborative(
    interactions: Vec<Interaction>,
    eligible: Arc<EligibleSet>,
    params: SvdParams,
) -> AppResult<CollaborativeModel> {
    run_blocking(move || CollaborativeModel::train(&interactions, &eligible, &params)).await
}

async fn train_content(eligible: Arc<EligibleSet>) -> AppResult<ContentModel> {
    run_blocking(move || ContentModel::fit(&eligible)).await
}

async fn run_blocking<T, F>(job: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| AppError::Internal(format!("training panicked: {}", e)))?
}

/// Handle for stopping the periodic refresh loop
pub struct RefreshTaskHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl RefreshTaskHandle {
    /// Stops the loop, waiting for an in-flight refresh to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Refresh task ended abnormally");
        }
    }
}

/// Retrains every `interval`; after a failed refresh the next attempt comes
/// after `retry_after` instead.
pub fn spawn_refresh_task(
    engine: Arc<RecommendationEngine>,
    interval: Duration,
    retry_after: Duration,
) -> RefreshTaskHandle {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

    let task = tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            retry_secs = retry_after.as_secs(),
            "Refresh task started"
        );
        let mut delay = interval;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    delay = match engine.refresh().await {
                        Ok(_) => interval,
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                retry_secs = retry_after.as_secs(),
                                "Scheduled refresh failed"
                            );
                            retry_after
                        }
                    };
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Refresh task stopped");
                    break;
                }
            }
        }
    });

    RefreshTaskHandle { shutdown_tx, task }
}
