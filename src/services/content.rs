/// Term-weighted content similarity over item token lists
///
/// Each item's token list is one document. Tokens are atomic: no splitting,
/// case folding or stemming. Weighting is raw term count times smoothed
/// inverse document frequency, `ln((1 + n) / (1 + df)) + 1`, with every
/// document vector scaled to unit length.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    error::{AppError, AppResult},
    models::{top_n, ItemId, ScoredItem},
    services::filter::EligibleSet,
};

/// Sparse vector as (term index, weight) pairs sorted by index
pub type SparseVector = Vec<(usize, f64)>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    pub fn fit<'a, I>(documents: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = &'a [String]>,
    {
        let mut document_frequency: BTreeMap<&'a str, usize> = BTreeMap::new();
        let mut document_count = 0usize;

        for document in documents {
            document_count += 1;
            let unique: HashSet<&str> = document.iter().map(String::as_str).collect();
            for term in unique {
                *document_frequency.entry(term).or_default() += 1;
            }
        }

        if document_frequency.is_empty() {
            return Err(AppError::TrainingDegenerate(
                "no tokens to build a vocabulary from".to_string(),
            ));
        }

        let n = document_count as f64;
        let mut vocabulary = HashMap::with_capacity(document_frequency.len());
        let mut idf = Vec::with_capacity(document_frequency.len());
        for (index, (term, df)) in document_frequency.into_iter().enumerate() {
            vocabulary.insert(term.to_string(), index);
            idf.push(((1.0 + n) / (1.0 + df as f64)).ln() + 1.0);
        }

        Ok(Self { vocabulary, idf })
    }

    pub fn vocabulary_len(&self) -> usize {
        self.idf.len()
    }

    /// Unit-length tf-idf vector; tokens outside the vocabulary are ignored
    pub fn transform(&self, tokens: &[String]) -> SparseVector {
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for token in tokens {
            if let Some(&index) = self.vocabulary.get(token) {
                *counts.entry(index).or_default() += 1.0;
            }
        }

        let mut vector: SparseVector = counts
            .into_iter()
            .map(|(index, count)| (index, count * self.idf[index]))
            .collect();

        let norm = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, weight) in &mut vector {
                *weight /= norm;
            }
        }
        vector
    }
}

/// Fitted vectorizer plus the vectors of every item it was fitted on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentModel {
    vectorizer: TfidfVectorizer,
    item_vectors: BTreeMap<ItemId, SparseVector>,
}

impl ContentModel {
    pub fn fit(eligible: &EligibleSet) -> AppResult<Self> {
        let vectorizer = TfidfVectorizer::fit(eligible.items.values().map(Vec::as_slice))?;
        let item_vectors = eligible
            .items
            .iter()
            .map(|(id, tokens)| (id.clone(), vectorizer.transform(tokens)))
            .collect();

        tracing::info!(
            items = eligible.len(),
            vocabulary = vectorizer.vocabulary_len(),
            "Fitted content vectorizer"
        );

        Ok(Self {
            vectorizer,
            item_vectors,
        })
    }

    pub fn item_count(&self) -> usize {
        self.item_vectors.len()
    }

    /// Top-`n` items by cosine similarity to the mean vector of `owned`.
    ///
    /// Owned items outside the fitted set are ignored for the profile; when
    /// none remain the signal is empty. Owned items are never returned.
    pub fn recommend(&self, owned: &HashSet<ItemId>, n: usize) -> Vec<ScoredItem> {
        let profile_items: Vec<&SparseVector> = self
            .item_vectors
            .iter()
            .filter(|(id, _)| owned.contains(*id))
            .map(|(_, vector)| vector)
            .collect();

        if profile_items.is_empty() {
            return Vec::new();
        }

        let mut profile = vec![0.0; self.vectorizer.vocabulary_len()];
        for vector in &profile_items {
            for &(index, weight) in *vector {
                profile[index] += weight;
            }
        }
        let count = profile_items.len() as f64;
        for weight in &mut profile {
            *weight /= count;
        }
        let profile_norm = profile.iter().map(|w| w * w).sum::<f64>().sqrt();

        let scored = self
            .item_vectors
            .iter()
            .filter(|(id, _)| !owned.contains(*id))
            .map(|(id, vector)| ScoredItem::new(id.clone(), cosine(&profile, profile_norm, vector)))
            .collect();

        top_n(scored, n)
    }
}

/// Cosine between a dense profile and a unit-length sparse vector
fn cosine(profile: &[f64], profile_norm: f64, unit: &SparseVector) -> f64 {
    if profile_norm == 0.0 || unit.is_empty() {
        return 0.0;
    }
    let dot: f64 = unit.iter().map(|&(index, w)| profile[index] * w).sum();
    dot / profile_norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemFeatures;

    fn tokens(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn catalog() -> EligibleSet {
        let mut items = ItemFeatures::new();
        items.insert("10".into(), tokens(&["Action"]));
        items.insert("20".into(), tokens(&["RPG"]));
        items.insert("30".into(), tokens(&["Action"]));
        EligibleSet::new(items)
    }

    fn owned(ids: &[&str]) -> HashSet<ItemId> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_idf_weights_rare_terms_higher() {
        let docs = [
            tokens(&["Action", "Indie"]),
            tokens(&["Action"]),
            tokens(&["Action", "RPG"]),
        ];
        let vectorizer = TfidfVectorizer::fit(docs.iter().map(Vec::as_slice)).unwrap();

        let vector = vectorizer.transform(&tokens(&["Action", "Indie"]));
        assert_eq!(vector.len(), 2);
        let action = vector[0].1;
        let indie = vector[1].1;
        assert!(indie > action);

        let norm: f64 = vector.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_tokens_are_atomic() {
        let docs = [tokens(&["Online Co-op", "rating:90"])];
        let vectorizer = TfidfVectorizer::fit(docs.iter().map(Vec::as_slice)).unwrap();

        assert_eq!(vectorizer.vocabulary_len(), 2);
        assert_eq!(vectorizer.transform(&tokens(&["Online"])).len(), 0);
        assert_eq!(vectorizer.transform(&tokens(&["online co-op"])).len(), 0);
    }

    #[test]
    fn test_fit_on_empty_catalog_is_degenerate() {
        let result = ContentModel::fit(&EligibleSet::new(ItemFeatures::new()));
        assert!(matches!(result, Err(AppError::TrainingDegenerate(_))));
    }

    #[test]
    fn test_shared_token_ranks_higher() {
        let model = ContentModel::fit(&catalog()).unwrap();
        let recs = model.recommend(&owned(&["10"]), 2);

        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].item_id, "30");
        assert!((recs[0].score - 1.0).abs() < 1e-12);
        assert_eq!(recs[1].item_id, "20");
        assert_eq!(recs[1].score, 0.0);
    }

    #[test]
    fn test_owned_items_never_returned() {
        let model = ContentModel::fit(&catalog()).unwrap();
        let recs = model.recommend(&owned(&["10", "20", "99"]), 10);

        let ids: Vec<&str> = recs.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["30"]);
    }

    #[test]
    fn test_no_owned_eligible_items_is_empty() {
        let model = ContentModel::fit(&catalog()).unwrap();
        assert!(model.recommend(&owned(&["99"]), 10).is_empty());
        assert!(model.recommend(&HashSet::new(), 10).is_empty());
    }

    #[test]
    fn test_profile_is_mean_of_owned_vectors() {
        let mut items = ItemFeatures::new();
        items.insert("a".into(), tokens(&["Action"]));
        items.insert("b".into(), tokens(&["RPG"]));
        items.insert("c".into(), tokens(&["Action", "RPG"]));
        items.insert("d".into(), tokens(&["Puzzle"]));
        let model = ContentModel::fit(&EligibleSet::new(items)).unwrap();

        let recs = model.recommend(&owned(&["a", "b"]), 10);
        assert_eq!(recs[0].item_id, "c");
        assert!((recs[0].score - 1.0).abs() < 1e-9);
        assert_eq!(recs[1].item_id, "d");
        assert_eq!(recs[1].score, 0.0);
    }
}
