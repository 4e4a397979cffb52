use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{
    db::{FeatureStore, InteractionStore},
    error::AppResult,
    models::{Interaction, ItemFeatures, ItemId, OwnedItem, UserId},
    services::providers::LibraryProvider,
};

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Catalog and library data from the `try_it` schema
///
/// Users without a local account have no `library` rows; their owned games
/// come from the live [`LibraryProvider`] instead.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    library_provider: Arc<dyn LibraryProvider>,
}

impl PgStore {
    pub fn new(pool: PgPool, library_provider: Arc<dyn LibraryProvider>) -> Self {
        Self {
            pool,
            library_provider,
        }
    }

    async fn is_registered(&self, user_id: UserId) -> AppResult<bool> {
        let registered: Option<i32> =
            sqlx::query_scalar(r#"SELECT 1 FROM try_it."user" WHERE "SteamID64" = $1"#)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(registered.is_some())
    }

    /// `(game id, name)` pairs for one of the tag/genre/feature link tables
    async fn labels(&self, query: &str) -> AppResult<HashMap<ItemId, Vec<String>>> {
        let rows: Vec<(String, String)> = sqlx::query_as(query).fetch_all(&self.pool).await?;

        let mut labels: HashMap<ItemId, Vec<String>> = HashMap::new();
        for (item_id, label) in rows {
            labels.entry(item_id).or_default().push(label);
        }
        Ok(labels)
    }
}

const RATINGS_QUERY: &str = r#"
    SELECT "GameID"::text, COALESCE("rating", 0)::int4
    FROM try_it."game"
"#;

const TAGS_QUERY: &str = r#"
    SELECT g."gameID"::text, t."tag"
    FROM try_it."tags" g
    JOIN try_it."tag" t ON g."tagID" = t."tagID"
    ORDER BY g."gameID", t."tag"
"#;

const GENRES_QUERY: &str = r#"
    SELECT g."gameID"::text, gen."genre"
    FROM try_it."genres" g
    JOIN try_it."genre" gen ON g."genreID" = gen."genreID"
    ORDER BY g."gameID", gen."genre"
"#;

const FEATURES_QUERY: &str = r#"
    SELECT g."gameID"::text, f."feature"
    FROM try_it."features" g
    JOIN try_it."feature" f ON g."featureID" = f."featureID"
    ORDER BY g."gameID", f."feature"
"#;

/// Rating bucket token followed by tags, genres and categories, without repeats
fn assemble_tokens(
    rating: i32,
    tags: Option<Vec<String>>,
    genres: Option<Vec<String>>,
    categories: Option<Vec<String>>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    std::iter::once(format!("rating:{}", rating))
        .chain(tags.into_iter().flatten())
        .chain(genres.into_iter().flatten())
        .chain(categories.into_iter().flatten())
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

#[async_trait::async_trait]
impl FeatureStore for PgStore {
    async fn get_item_features(&self) -> AppResult<ItemFeatures> {
        let ratings: Vec<(String, i32)> = sqlx::query_as(RATINGS_QUERY)
            .fetch_all(&self.pool)
            .await?;

        let (mut tags, mut genres, mut categories) = tokio::try_join!(
            self.labels(TAGS_QUERY),
            self.labels(GENRES_QUERY),
            self.labels(FEATURES_QUERY)
        )?;

        let features: ItemFeatures = ratings
            .into_iter()
            .map(|(item_id, rating)| {
                let tokens = assemble_tokens(
                    rating,
                    tags.remove(&item_id),
                    genres.remove(&item_id),
                    categories.remove(&item_id),
                );
                (item_id, tokens)
            })
            .collect();

        tracing::info!(items = features.len(), "Loaded item features from database");
        Ok(features)
    }
}

#[async_trait::async_trait]
impl InteractionStore for PgStore {
    async fn get_all_interactions(&self) -> AppResult<Vec<Interaction>> {
        let rows: Vec<(i64, String, f64)> = sqlx::query_as(
            r#"
            SELECT "SteamID64"::int8, "GameID"::text, "time_in_game"::float8
            FROM try_it."library"
            WHERE "time_in_game" > 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, item_id, usage)| Interaction::new(user_id, item_id, usage))
            .collect())
    }

    async fn get_user_owned_items(&self, user_id: UserId) -> AppResult<Vec<OwnedItem>> {
        if !self.is_registered(user_id).await? {
            tracing::debug!(
                user_id,
                provider = self.library_provider.name(),
                "User not registered, fetching live library"
            );
            return self.library_provider.owned_games(user_id).await;
        }

        let rows: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT "GameID"::text, "time_in_game"::float8
            FROM try_it."library"
            WHERE "SteamID64" = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn get_user_excluded_items(&self, user_id: UserId) -> AppResult<HashSet<ItemId>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT w."GameID"::text
            FROM try_it."wishlist" w
            JOIN try_it."user" u ON u."login" = w."login"
            WHERE u."SteamID64" = $1
            UNION
            SELECT h."GameID"::text
            FROM try_it."hidden" h
            JOIN try_it."user" u ON u."login" = h."login"
            WHERE u."SteamID64" = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::MockLibraryProvider;

    #[test]
    fn test_assemble_tokens_order_and_dedup() {
        let tokens = assemble_tokens(
            87,
            Some(vec!["Action".into(), "Co-op".into()]),
            Some(vec!["Action".into(), "Indie".into()]),
            Some(vec!["Co-op".into(), "Online Co-op".into()]),
        );

        assert_eq!(
            tokens,
            vec!["rating:87", "Action", "Co-op", "Indie", "Online Co-op"]
        );
    }

    #[test]
    fn test_assemble_tokens_rating_only() {
        assert_eq!(assemble_tokens(0, None, None, None), vec!["rating:0"]);
    }

    #[tokio::test]
    #[ignore = "requires a running Postgres at DATABASE_URL with the try_it schema"]
    async fn test_unregistered_user_falls_back_to_provider() {
        let database_url = std::env::var("DATABASE_URL").unwrap();
        let pool = create_pool(&database_url).await.unwrap();

        let mut provider = MockLibraryProvider::new();
        provider
            .expect_owned_games()
            .times(1)
            .returning(|_| Ok(vec![("570".to_string(), 42.0)]));
        provider.expect_name().return_const("mock");

        let store = PgStore::new(pool, Arc::new(provider));
        let owned = store.get_user_owned_items(1).await.unwrap();

        assert_eq!(owned, vec![("570".to_string(), 42.0)]);
    }

    #[tokio::test]
    #[ignore = "requires a running Postgres at DATABASE_URL with the try_it schema"]
    async fn test_interactions_have_positive_usage() {
        let database_url = std::env::var("DATABASE_URL").unwrap();
        let pool = create_pool(&database_url).await.unwrap();

        let mut provider = MockLibraryProvider::new();
        provider.expect_name().return_const("mock");
        let store = PgStore::new(pool, Arc::new(provider));

        let interactions = store.get_all_interactions().await.unwrap();
        assert!(interactions.iter().all(|i| i.usage > 0.0));
    }
}
