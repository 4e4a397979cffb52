use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{top_n, ItemId, ScoredItem};

#[derive(Debug, Error, PartialEq)]
pub enum WeightError {
    #[error("weights must be finite and non-negative")]
    Negative,
    #[error("weights must sum to 1, got {0}")]
    BadSum(f64),
}

/// Per-signal blend weights, summing to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    collaborative: f64,
    content: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self {
            collaborative: 0.5,
            content: 0.5,
        }
    }
}

impl BlendWeights {
    pub fn new(collaborative: f64, content: f64) -> Result<Self, WeightError> {
        let valid = |w: f64| w.is_finite() && w >= 0.0;
        if !valid(collaborative) || !valid(content) {
            return Err(WeightError::Negative);
        }
        let sum = collaborative + content;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(WeightError::BadSum(sum));
        }
        Ok(Self {
            collaborative,
            content,
        })
    }

    pub fn collaborative(&self) -> f64 {
        self.collaborative
    }

    pub fn content(&self) -> f64 {
        self.content
    }
}

/// Min-max scales scores into [0, `upper`]. Equal scores all map to `upper`.
pub fn rescale(items: &[ScoredItem], upper: f64) -> Vec<ScoredItem> {
    let Some(min) = items.iter().map(|i| i.score).reduce(f64::min) else {
        return Vec::new();
    };
    let max = items.iter().map(|i| i.score).fold(min, f64::max);
    let range = max - min;

    items
        .iter()
        .map(|item| {
            let score = if range > 0.0 {
                (item.score - min) / range * upper
            } else {
                upper
            };
            ScoredItem::new(item.item_id.clone(), score)
        })
        .collect()
}

/// Merges the two signals into one ranked list with scores in [0, 1].
///
/// Each signal is rescaled into [0, its weight], excluded items are dropped,
/// contributions are summed per item, the top `n` are kept and rescaled to
/// [0, 1] for presentation.
pub fn blend(
    collaborative: &[ScoredItem],
    content: &[ScoredItem],
    weights: BlendWeights,
    excluded: &HashSet<ItemId>,
    n: usize,
) -> Vec<ScoredItem> {
    if collaborative.is_empty() && content.is_empty() {
        return Vec::new();
    }

    let mut totals: HashMap<ItemId, f64> = HashMap::new();
    let signals = [
        (collaborative, weights.collaborative),
        (content, weights.content),
    ];
    for (signal, weight) in signals {
        for item in rescale(signal, weight) {
            if excluded.contains(&item.item_id) {
                continue;
            }
            *totals.entry(item.item_id).or_insert(0.0) += item.score;
        }
    }

    let ranked = top_n(
        totals
            .into_iter()
            .map(|(item_id, score)| ScoredItem::new(item_id, score))
            .collect(),
        n,
    );

    rescale(&ranked, 1.0)
}
