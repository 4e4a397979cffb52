use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

/// 64-bit platform account identifier
pub type UserId = i64;

/// Catalog item identifier (platform app id, kept as text)
pub type ItemId = String;

/// Reserved id for the synthetic paired-mode profile.
/// Platform account ids are always positive.
pub const VIRTUAL_USER_ID: UserId = -1;

/// Item id → ordered, deduplicated token list.
///
/// A `BTreeMap` so every iteration over the catalog happens in item-id order.
pub type ItemFeatures = BTreeMap<ItemId, Vec<String>>;

/// Item owned by a user together with its recorded usage
pub type OwnedItem = (ItemId, f64);

/// Aggregated usage of one item by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub usage: f64,
}

impl Interaction {
    pub fn new(user_id: UserId, item_id: impl Into<ItemId>, usage: f64) -> Self {
        Self {
            user_id,
            item_id: item_id.into(),
            usage,
        }
    }
}

/// Interaction whose usage has been min-max scaled per user into [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedInteraction {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub value: f64,
}

/// Optional tag/genre/category criteria narrowing the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub genres: Option<Vec<String>>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

impl FilterCriteria {
    pub fn tags<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: Some(values.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// True when no dimension carries a value, i.e. "no filtering"
    pub fn is_empty(&self) -> bool {
        [&self.tags, &self.genres, &self.categories]
            .iter()
            .all(|dimension| dimension.as_ref().map_or(true, Vec::is_empty))
    }

    /// Canonical key: each dimension lowercased, sorted and deduplicated
    pub fn cache_key(&self) -> CriteriaKey {
        CriteriaKey {
            tags: canonical_dimension(&self.tags),
            genres: canonical_dimension(&self.genres),
            categories: canonical_dimension(&self.categories),
        }
    }
}

fn canonical_dimension(values: &Option<Vec<String>>) -> Vec<String> {
    values
        .iter()
        .flatten()
        .map(|value| value.to_lowercase())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Cache key for a filtered catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CriteriaKey {
    pub tags: Vec<String>,
    pub genres: Vec<String>,
    pub categories: Vec<String>,
}

impl CriteriaKey {
    /// Dimensions that carry at least one value
    pub fn present_dimensions(&self) -> impl Iterator<Item = &[String]> {
        [&self.tags, &self.genres, &self.categories]
            .into_iter()
            .filter(|values| !values.is_empty())
            .map(Vec::as_slice)
    }
}

impl Display for CriteriaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tags=[{}] genres=[{}] categories=[{}]",
            self.tags.join(","),
            self.genres.join(","),
            self.categories.join(",")
        )
    }
}

/// An item with a score. Scores are signal-local until blended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: ItemId,
    pub score: f64,
}

impl ScoredItem {
    pub fn new(item_id: impl Into<ItemId>, score: f64) -> Self {
        Self {
            item_id: item_id.into(),
            score,
        }
    }

    /// Descending by score, equal scores by ascending item id
    pub fn ranking_order(a: &Self, b: &Self) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.item_id.cmp(&b.item_id))
    }
}

/// Sorts by [`ScoredItem::ranking_order`] and keeps the first `n`
pub fn top_n(mut items: Vec<ScoredItem>, n: usize) -> Vec<ScoredItem> {
    items.sort_by(ScoredItem::ranking_order);
    items.truncate(n);
    items
}

/// Engine-level recommendation query
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationQuery {
    pub user_id: UserId,
    pub n: usize,
    pub criteria: FilterCriteria,
    /// Second participant for paired recommendations
    pub peer_user_id: Option<UserId>,
}

impl RecommendationQuery {
    pub fn new(user_id: UserId, n: usize) -> Self {
        Self {
            user_id,
            n,
            criteria: FilterCriteria::default(),
            peer_user_id: None,
        }
    }

    pub fn with_criteria(mut self, criteria: FilterCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_peer(mut self, peer_user_id: UserId) -> Self {
        self.peer_user_id = Some(peer_user_id);
        self
    }
}

/// Response body for the recommendations endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub recommendations: Vec<ScoredItem>,
}
