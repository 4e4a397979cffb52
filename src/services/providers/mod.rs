/// Live game-library providers
///
/// Used when a user's library is not stored locally. Providers answer with
/// the same `(item_id, usage)` shape the interaction store returns.
use crate::{
    error::AppResult,
    models::{OwnedItem, UserId},
};

pub mod steam;

pub use steam::SteamClient;

/// Source of a user's owned games straight from the platform
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LibraryProvider: Send + Sync {
    /// Owned games with lifetime playtime in minutes
    async fn owned_games(&self, user_id: UserId) -> AppResult<Vec<OwnedItem>>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}
