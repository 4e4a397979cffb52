use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::{
    db::FeatureStore,
    error::AppResult,
    models::{CriteriaKey, FilterCriteria, ItemFeatures},
};

/// Categories that mark an item as playable together
pub const MULTIPLAYER_CATEGORIES: [&str; 7] = [
    "Co-op",
    "LAN Co-op",
    "LAN PvP",
    "MMO",
    "Multi-player",
    "Online Co-op",
    "Online PvP",
];

/// Upper bound on cached filtered views per catalog snapshot
const MAX_FILTERED_VIEWS: usize = 256;

/// Eligible candidate set plus a content fingerprint
///
/// The fingerprint is a hash over the item ids and their tokens, so two sets
/// with the same contents share trained artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleSet {
    pub items: ItemFeatures,
    pub fingerprint: u64,
}

impl EligibleSet {
    pub fn new(items: ItemFeatures) -> Self {
        let fingerprint = fingerprint(&items);
        Self { items, fingerprint }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.items.contains_key(item_id)
    }
}

/// Leading 8 bytes of a SHA-256 over the length-prefixed ids and tokens.
/// Stable across builds, since it names persisted artifacts.
fn fingerprint(items: &ItemFeatures) -> u64 {
    let mut hasher = Sha256::new();
    for (item_id, tokens) in items {
        update_prefixed(&mut hasher, item_id);
        hasher.update((tokens.len() as u64).to_le_bytes());
        for token in tokens {
            update_prefixed(&mut hasher, token);
        }
    }

    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

fn update_prefixed(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

/// Base catalog the filters run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Catalog {
    Full,
    Multiplayer,
}

/// Narrows `all` to items matching the criteria
///
/// Dimensions present in the criteria are ANDed, values inside a dimension
/// are ORed, and matching ignores case. Empty criteria return `all` unchanged.
pub fn filter_items(all: &ItemFeatures, criteria: &FilterCriteria) -> ItemFeatures {
    if criteria.is_empty() {
        return all.clone();
    }

    let key = criteria.cache_key();
    all.iter()
        .filter(|(_, tokens)| matches_criteria(tokens, &key))
        .map(|(id, tokens)| (id.clone(), tokens.clone()))
        .collect()
}

fn matches_criteria(tokens: &[String], key: &CriteriaKey) -> bool {
    let lowered: HashSet<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
    key.present_dimensions()
        .all(|values| values.iter().any(|value| lowered.contains(value)))
}

/// Items carrying at least one multiplayer category token (exact match)
pub fn multiplayer_items(all: &ItemFeatures) -> ItemFeatures {
    all.iter()
        .filter(|(_, tokens)| {
            tokens
                .iter()
                .any(|token| MULTIPLAYER_CATEGORIES.contains(&token.as_str()))
        })
        .map(|(id, tokens)| (id.clone(), tokens.clone()))
        .collect()
}

/// One loaded catalog and every filtered view derived from it.
///
/// Filtered views live inside the snapshot so a refresh drops them together
/// with the catalog they were computed from.
struct Snapshot {
    full: Arc<EligibleSet>,
    multiplayer: Arc<EligibleSet>,
    filtered: RwLock<HashMap<(Catalog, CriteriaKey), Arc<EligibleSet>>>,
}

impl Snapshot {
    fn base(&self, catalog: Catalog) -> &Arc<EligibleSet> {
        match catalog {
            Catalog::Full => &self.full,
            Catalog::Multiplayer => &self.multiplayer,
        }
    }
}

/// Catalog loaded by [`FilterEngine::load_staged`] and not yet serving
pub struct StagedCatalog(Arc<Snapshot>);

impl StagedCatalog {
    pub fn full(&self) -> &Arc<EligibleSet> {
        &self.0.full
    }
}

/// Catalog filter with a cached base snapshot and per-criteria results
pub struct FilterEngine {
    store: Arc<dyn FeatureStore>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    load_lock: Mutex<()>,
}

impl FilterEngine {
    pub fn new(store: Arc<dyn FeatureStore>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    /// Eligible candidates for the given catalog and criteria
    pub async fn eligible(
        &self,
        catalog: Catalog,
        criteria: &FilterCriteria,
    ) -> AppResult<Arc<EligibleSet>> {
        let snapshot = self.current().await?;
        let base = snapshot.base(catalog);

        if criteria.is_empty() {
            return Ok(base.clone());
        }

        let key = (catalog, criteria.cache_key());
        if let Some(cached) = snapshot.filtered.read().await.get(&key) {
            tracing::debug!(criteria = %key.1, "Filter cache hit");
            return Ok(cached.clone());
        }

        let filtered = Arc::new(EligibleSet::new(filter_items(&base.items, criteria)));
        tracing::debug!(
            criteria = %key.1,
            base_count = base.len(),
            eligible_count = filtered.len(),
            "Filter cache miss"
        );

        if filtered.is_empty() {
            return Ok(filtered);
        }

        // A concurrent miss may have filled the slot first; either value is identical.
        let mut filtered_cache = snapshot.filtered.write().await;
        if let Some(existing) = filtered_cache.get(&key) {
            return Ok(existing.clone());
        }
        if filtered_cache.len() >= MAX_FILTERED_VIEWS {
            tracing::debug!(criteria = %key.1, "Filter cache full, serving uncached");
            return Ok(filtered);
        }
        filtered_cache.insert(key, filtered.clone());
        Ok(filtered)
    }

    /// Loads a fresh catalog without serving it yet.
    ///
    /// Requests keep reading the current snapshot until the staged one is
    /// passed to [`install`](FilterEngine::install).
    pub async fn load_staged(&self) -> AppResult<StagedCatalog> {
        if let Err(e) = self.store.invalidate().await {
            tracing::warn!(error = %e, "Failed to invalidate cached catalog, reloading anyway");
        }
        Ok(StagedCatalog(Arc::new(self.load().await?)))
    }

    /// Swaps in a staged catalog, dropping every filtered view of the old one
    pub async fn install(&self, staged: StagedCatalog) {
        let _guard = self.load_lock.lock().await;
        *self.snapshot.write().await = Some(staged.0);
    }

    async fn current(&self) -> AppResult<Arc<Snapshot>> {
        if let Some(snapshot) = self.snapshot.read().await.as_ref() {
            return Ok(snapshot.clone());
        }

        let _guard = self.load_lock.lock().await;
        if let Some(snapshot) = self.snapshot.read().await.as_ref() {
            return Ok(snapshot.clone());
        }

        let snapshot = Arc::new(self.load().await?);
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn load(&self) -> AppResult<Snapshot> {
        let (full, multiplayer) = tokio::try_join!(
            self.store.get_item_features(),
            self.store.get_multiplayer_items()
        )?;

        tracing::info!(
            item_count = full.len(),
            multiplayer_count = multiplayer.len(),
            "Loaded catalog snapshot"
        );

        Ok(Snapshot {
            full: Arc::new(EligibleSet::new(full)),
            multiplayer: Arc::new(EligibleSet::new(multiplayer)),
            filtered: RwLock::new(HashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockFeatureStore;
    use crate::error::AppError;

    fn catalog() -> ItemFeatures {
        let mut items = ItemFeatures::new();
        items.insert(
            "10".into(),
            vec!["rating:90".into(), "RPG".into(), "Fantasy".into(), "Single-player".into()],
        );
        items.insert(
            "20".into(),
            vec!["rating:75".into(), "Shooter".into(), "Action".into(), "Online PvP".into()],
        );
        items.insert(
            "30".into(),
            vec!["rating:80".into(), "rpg".into(), "Action".into(), "Online Co-op".into()],
        );
        items
    }

    #[test]
    fn test_empty_criteria_is_identity() {
        let all = catalog();
        assert_eq!(filter_items(&all, &FilterCriteria::default()), all);
    }

    #[test]
    fn test_tag_match_is_case_insensitive() {
        let filtered = filter_items(&catalog(), &FilterCriteria::tags(["RPG"]));
        let ids: Vec<&str> = filtered.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["10", "30"]);
    }

    #[test]
    fn test_values_or_dimensions_and() {
        let criteria = FilterCriteria {
            tags: Some(vec!["rpg".into(), "shooter".into()]),
            genres: Some(vec!["action".into()]),
            categories: None,
        };
        let filtered = filter_items(&catalog(), &criteria);
        let ids: Vec<&str> = filtered.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["20", "30"]);
    }

    #[test]
    fn test_no_match_returns_empty() {
        let filtered = filter_items(&catalog(), &FilterCriteria::tags(["Racing"]));
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_multiplayer_subset() {
        let multiplayer = multiplayer_items(&catalog());
        let ids: Vec<&str> = multiplayer.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["20", "30"]);
    }

    #[test]
    fn test_fingerprint_tracks_contents() {
        let a = EligibleSet::new(catalog());
        let b = EligibleSet::new(catalog());
        assert_eq!(a.fingerprint, b.fingerprint);

        let mut changed = catalog();
        changed.remove("20");
        assert_ne!(a.fingerprint, EligibleSet::new(changed).fingerprint);
    }

    #[test]
    fn test_fingerprint_is_pinned() {
        let items = ItemFeatures::from([
            ("10".to_string(), vec!["Action".to_string()]),
            ("20".to_string(), vec!["RPG".to_string()]),
        ]);
        assert_eq!(EligibleSet::new(items).fingerprint, 0x2d84_5b78_32f6_32ab);
    }

    #[test]
    fn test_fingerprint_separates_ids_from_tokens() {
        let joined = ItemFeatures::from([("1".to_string(), vec!["0A".to_string()])]);
        let split = ItemFeatures::from([("10".to_string(), vec!["A".to_string()])]);
        assert_ne!(
            EligibleSet::new(joined).fingerprint,
            EligibleSet::new(split).fingerprint
        );
    }

    fn single_load_store() -> MockFeatureStore {
        let mut store = MockFeatureStore::new();
        store
            .expect_get_item_features()
            .times(1)
            .returning(|| Ok(catalog()));
        store
            .expect_get_multiplayer_items()
            .times(1)
            .returning(|| Ok(multiplayer_items(&catalog())));
        store
    }

    #[tokio::test]
    async fn test_empty_results_are_not_cached() {
        let engine = FilterEngine::new(Arc::new(single_load_store()));

        let empty = engine
            .eligible(Catalog::Full, &FilterCriteria::tags(["Racing"]))
            .await
            .unwrap();

        assert!(empty.is_empty());
        let snapshot = engine.current().await.unwrap();
        assert!(snapshot.filtered.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_filter_cache_is_bounded() {
        let engine = FilterEngine::new(Arc::new(single_load_store()));

        for i in 0..MAX_FILTERED_VIEWS + 10 {
            let criteria = FilterCriteria::tags(["rpg".to_string(), format!("tag-{}", i)]);
            let eligible = engine.eligible(Catalog::Full, &criteria).await.unwrap();
            assert_eq!(eligible.len(), 2);
        }

        let snapshot = engine.current().await.unwrap();
        assert_eq!(snapshot.filtered.read().await.len(), MAX_FILTERED_VIEWS);
    }

    #[tokio::test]
    async fn test_snapshot_and_filters_are_cached() {
        let mut store = MockFeatureStore::new();
        store
            .expect_get_item_features()
            .times(1)
            .returning(|| Ok(catalog()));
        store
            .expect_get_multiplayer_items()
            .times(1)
            .returning(|| Ok(multiplayer_items(&catalog())));

        let engine = FilterEngine::new(Arc::new(store));
        let criteria = FilterCriteria::tags(["RPG"]);

        let first = engine.eligible(Catalog::Full, &criteria).await.unwrap();
        let second = engine
            .eligible(Catalog::Full, &FilterCriteria::tags(["rpg", "RPG"]))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 2);

        let full = engine
            .eligible(Catalog::Full, &FilterCriteria::default())
            .await
            .unwrap();
        assert_eq!(full.len(), 3);
    }

    #[tokio::test]
    async fn test_staged_catalog_serves_only_after_install() {
        let mut store = MockFeatureStore::new();
        let mut calls = 0;
        store.expect_get_item_features().returning(move || {
            calls += 1;
            let mut items = catalog();
            if calls > 1 {
                items.insert("40".into(), vec!["rating:50".into(), "Puzzle".into()]);
            }
            Ok(items)
        });
        store
            .expect_get_multiplayer_items()
            .returning(|| Ok(ItemFeatures::new()));
        store.expect_invalidate().times(1).returning(|| Ok(()));

        let engine = FilterEngine::new(Arc::new(store));
        let before = engine
            .eligible(Catalog::Full, &FilterCriteria::default())
            .await
            .unwrap();

        let staged = engine.load_staged().await.unwrap();
        assert_eq!(staged.full().len(), 4);

        let still_serving = engine
            .eligible(Catalog::Full, &FilterCriteria::default())
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&before, &still_serving));

        engine.install(staged).await;
        let after = engine
            .eligible(Catalog::Full, &FilterCriteria::default())
            .await
            .unwrap();
        assert_eq!(after.len(), 4);
        assert_ne!(after.fingerprint, before.fingerprint);
    }

    #[tokio::test]
    async fn test_failed_staging_keeps_snapshot() {
        let mut store = MockFeatureStore::new();
        let mut calls = 0;
        store.expect_get_item_features().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(catalog())
            } else {
                Err(AppError::UpstreamUnavailable("catalog offline".into()))
            }
        });
        store
            .expect_get_multiplayer_items()
            .returning(|| Ok(ItemFeatures::new()));
        store.expect_invalidate().times(1).returning(|| Ok(()));

        let engine = FilterEngine::new(Arc::new(store));
        let before = engine
            .eligible(Catalog::Full, &FilterCriteria::default())
            .await
            .unwrap();

        assert!(engine.load_staged().await.is_err());

        let after = engine
            .eligible(Catalog::Full, &FilterCriteria::default())
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }
}
