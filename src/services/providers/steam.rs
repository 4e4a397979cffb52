/// Steam Web API library provider
///
/// Calls `IPlayerService/GetOwnedGames/v0001` and maps each `appid` /
/// `playtime_forever` pair into an owned item. Transient failures go through
/// the configured [`RetryPolicy`]; a rejected account id does not.
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;

use crate::{
    error::{AppError, AppResult},
    models::{OwnedItem, UserId},
    services::{
        providers::LibraryProvider,
        retry::{upstream_error, RetryPolicy},
    },
};

#[derive(Debug, Deserialize)]
struct OwnedGamesEnvelope {
    response: OwnedGamesResponse,
}

/// Private profiles answer with an empty `response` object.
#[derive(Debug, Deserialize)]
struct OwnedGamesResponse {
    #[serde(default)]
    games: Vec<OwnedGame>,
}

#[derive(Debug, Deserialize)]
struct OwnedGame {
    appid: u64,
    #[serde(default)]
    playtime_forever: u64,
}

#[derive(Clone)]
pub struct SteamClient {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    retry: RetryPolicy,
}

impl SteamClient {
    pub fn new(api_key: String, api_url: String, retry: RetryPolicy) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url,
            retry,
        }
    }

    async fn fetch_owned_games(&self, user_id: UserId) -> AppResult<Vec<OwnedItem>> {
        let url = format!("{}/IPlayerService/GetOwnedGames/v0001/", self.api_url);
        let steam_id = user_id.to_string();

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("steamid", steam_id.as_str()),
                ("include_played_free_games", "1"),
                ("format", "json"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(user_id, status, &body));
        }

        let body = response.text().await?;
        let games = parse_owned_games(&body)?;

        tracing::info!(user_id, games = games.len(), "Fetched owned games from Steam");
        Ok(games)
    }
}

#[async_trait::async_trait]
impl LibraryProvider for SteamClient {
    async fn owned_games(&self, user_id: UserId) -> AppResult<Vec<OwnedItem>> {
        if user_id <= 0 {
            return Err(AppError::InvalidInput(format!(
                "{} is not a Steam account id",
                user_id
            )));
        }

        self.retry
            .run("steam_owned_games", || self.fetch_owned_games(user_id))
            .await
    }

    fn name(&self) -> &'static str {
        "steam"
    }
}

/// Maps a non-success reply to a retryable or terminal error
fn classify_status(user_id: UserId, status: StatusCode, body: &str) -> AppError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
            AppError::InvalidInput(format!("Steam rejected account id {}", user_id))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AppError::Internal(format!("Steam rejected the API key ({})", status))
        }
        _ => upstream_error(format!("Steam API returned status {}: {}", status, body)),
    }
}

fn parse_owned_games(body: &str) -> AppResult<Vec<OwnedItem>> {
    let envelope: OwnedGamesEnvelope = serde_json::from_str(body)
        .map_err(|e| AppError::Internal(format!("Invalid Steam owned-games response: {}", e)))?;

    Ok(envelope
        .response
        .games
        .into_iter()
        .map(|game| (game.appid.to_string(), game.playtime_forever as f64))
        .collect())
}
