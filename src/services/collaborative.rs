/// Latent-factor model over normalized usage
///
/// Biased matrix factorisation trained with stochastic gradient descent:
/// `r̂(u, i) = μ + b_u + b_i + q_i · p_u`, clipped into the [0, 1] usage scale.
/// Training iterates ratings in (user, item) order from a seeded RNG, so the
/// same input always yields the same artifact.
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::{
    error::{AppError, AppResult},
    models::{top_n, Interaction, ItemId, NormalizedInteraction, ScoredItem, UserId},
    services::filter::EligibleSet,
};

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvdParams {
    pub factors: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    /// Half-width of the uniform range latent factors start in
    pub init_scale: f64,
    pub seed: u64,
}

impl Default for SvdParams {
    fn default() -> Self {
        Self {
            factors: 100,
            epochs: 20,
            learning_rate: 0.005,
            regularization: 0.02,
            init_scale: 0.1,
            seed: 42,
        }
    }
}

/// Rescales each user's usage into [0, 1] with min-max.
/// A user whose usages are all equal gets 0.5 everywhere.
pub fn normalize_usage(interactions: &[Interaction]) -> Vec<NormalizedInteraction> {
    let mut ranges: HashMap<UserId, (f64, f64)> = HashMap::new();
    for interaction in interactions {
        let range = ranges
            .entry(interaction.user_id)
            .or_insert((interaction.usage, interaction.usage));
        range.0 = range.0.min(interaction.usage);
        range.1 = range.1.max(interaction.usage);
    }

    interactions
        .iter()
        .map(|interaction| {
            let (min, max) = ranges[&interaction.user_id];
            let value = if max > min {
                ((interaction.usage - min) / (max - min)).clamp(0.0, 1.0)
            } else {
                0.5
            };
            NormalizedInteraction {
                user_id: interaction.user_id,
                item_id: interaction.item_id.clone(),
                value,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborativeModel {
    global_mean: f64,
    users: HashMap<UserId, usize>,
    items: HashMap<ItemId, usize>,
    user_bias: Vec<f64>,
    item_bias: Vec<f64>,
    user_factors: Vec<Vec<f64>>,
    item_factors: Vec<Vec<f64>>,
    /// Items each user interacted with during training, by user index
    user_items: Vec<BTreeSet<ItemId>>,
    params: SvdParams,
}

impl CollaborativeModel {
    /// Trains on every interaction whose item is in the eligible set.
    ///
    /// Usage is normalized per user over the user's full history before the
    /// eligibility restriction is applied.
    pub fn train(
        interactions: &[Interaction],
        eligible: &EligibleSet,
        params: &SvdParams,
    ) -> AppResult<Self> {
        let mut ratings: Vec<NormalizedInteraction> = normalize_usage(interactions)
            .into_iter()
            .filter(|rating| eligible.contains(&rating.item_id))
            .collect();

        if ratings.is_empty() {
            return Err(AppError::TrainingDegenerate(
                "no interactions with eligible items".to_string(),
            ));
        }

        ratings.sort_by(|a, b| {
            a.user_id
                .cmp(&b.user_id)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });

        let user_ids: BTreeSet<UserId> = ratings.iter().map(|r| r.user_id).collect();
        let item_ids: BTreeSet<&ItemId> = ratings.iter().map(|r| &r.item_id).collect();
        let users: HashMap<UserId, usize> = user_ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| (id, index))
            .collect();
        let items: HashMap<ItemId, usize> = item_ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| (id.clone(), index))
            .collect();

        let triples: Vec<(usize, usize, f64)> = ratings
            .iter()
            .map(|r| (users[&r.user_id], items[&r.item_id], r.value))
            .collect();

        let mut user_items = vec![BTreeSet::new(); users.len()];
        for rating in &ratings {
            user_items[users[&rating.user_id]].insert(rating.item_id.clone());
        }

        let global_mean = triples.iter().map(|t| t.2).sum::<f64>() / triples.len() as f64;

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut user_factors: Vec<Vec<f64>> = (0..users.len())
            .map(|_| random_factors(&mut rng, params))
            .collect();
        let mut item_factors: Vec<Vec<f64>> = (0..items.len())
            .map(|_| random_factors(&mut rng, params))
            .collect();
        let mut user_bias = vec![0.0; users.len()];
        let mut item_bias = vec![0.0; items.len()];

        let lr = params.learning_rate;
        let reg = params.regularization;

        for _ in 0..params.epochs {
            for &(u, i, rating) in &triples {
                let pu = &mut user_factors[u];
                let qi = &mut item_factors[i];
                let err = rating - (global_mean + user_bias[u] + item_bias[i] + dot(pu, qi));

                user_bias[u] += lr * (err - reg * user_bias[u]);
                item_bias[i] += lr * (err - reg * item_bias[i]);

                for f in 0..params.factors {
                    let puf = pu[f];
                    let qif = qi[f];
                    pu[f] += lr * (err * qif - reg * puf);
                    qi[f] += lr * (err * puf - reg * qif);
                }
            }
        }

        tracing::info!(
            users = users.len(),
            items = items.len(),
            ratings = triples.len(),
            factors = params.factors,
            epochs = params.epochs,
            "Trained collaborative model"
        );

        Ok(Self {
            global_mean,
            users,
            items,
            user_bias,
            item_bias,
            user_factors,
            item_factors,
            user_items,
            params: params.clone(),
        })
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Top-`n` eligible items the user has not interacted with.
    ///
    /// Users absent from training get an empty list.
    pub fn recommend_for_user(
        &self,
        user_id: UserId,
        eligible: &EligibleSet,
        n: usize,
    ) -> Vec<ScoredItem> {
        let Some(&u) = self.users.get(&user_id) else {
            tracing::debug!(user_id, "User absent from collaborative model");
            return Vec::new();
        };

        let seen = &self.user_items[u];
        let scored = eligible
            .items
            .keys()
            .filter(|item_id| !seen.contains(*item_id))
            .map(|item_id| {
                let score = self.estimate(self.user_bias[u], &self.user_factors[u], item_id);
                ScoredItem::new(item_id.clone(), score)
            })
            .collect();

        top_n(scored, n)
    }

    /// Top-`n` eligible items for a profile that was not part of training.
    ///
    /// The profile's bias and factors are fitted against the frozen item
    /// factors with the training update rule, then scored like a real user.
    pub fn recommend_for_profile(
        &self,
        profile: &[NormalizedInteraction],
        eligible: &EligibleSet,
        n: usize,
    ) -> Vec<ScoredItem> {
        let known: Vec<(usize, f64)> = profile
            .iter()
            .filter_map(|r| self.items.get(&r.item_id).map(|&i| (i, r.value)))
            .collect();

        if known.is_empty() {
            tracing::debug!(
                profile_items = profile.len(),
                "Profile shares no items with collaborative model"
            );
            return Vec::new();
        }

        let (bias, factors) = self.fold_in(&known);
        let seen: BTreeSet<&str> = profile.iter().map(|r| r.item_id.as_str()).collect();

        let scored = eligible
            .items
            .keys()
            .filter(|item_id| !seen.contains(item_id.as_str()))
            .map(|item_id| ScoredItem::new(item_id.clone(), self.estimate(bias, &factors, item_id)))
            .collect();

        top_n(scored, n)
    }

    fn fold_in(&self, ratings: &[(usize, f64)]) -> (f64, Vec<f64>) {
        let params = &self.params;
        let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(1));
        let mut pu = random_factors(&mut rng, params);
        let mut bu = 0.0;

        for _ in 0..params.epochs {
            for &(i, rating) in ratings {
                let qi = &self.item_factors[i];
                let err = rating - (self.global_mean + bu + self.item_bias[i] + dot(&pu, qi));

                bu += params.learning_rate * (err - params.regularization * bu);
                for (puf, qif) in pu.iter_mut().zip(qi) {
                    *puf += params.learning_rate * (err * qif - params.regularization * *puf);
                }
            }
        }

        (bu, pu)
    }

    /// Items never seen in training contribute only the global mean and user bias.
    fn estimate(&self, user_bias: f64, user_factors: &[f64], item_id: &str) -> f64 {
        let mut estimate = self.global_mean + user_bias;
        if let Some(&i) = self.items.get(item_id) {
            estimate += self.item_bias[i] + dot(user_factors, &self.item_factors[i]);
        }
        estimate.clamp(0.0, 1.0)
    }
}

fn random_factors(rng: &mut StdRng, params: &SvdParams) -> Vec<f64> {
    (0..params.factors)
        .map(|_| {
            if params.init_scale > 0.0 {
                rng.gen_range(-params.init_scale..params.init_scale)
            } else {
                0.0
            }
        })
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
