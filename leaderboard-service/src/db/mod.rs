/// Database access layer
pub mod store;

pub use store::{LeaderboardStore, PgLeaderboardStore};
