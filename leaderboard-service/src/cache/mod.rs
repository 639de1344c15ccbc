/// Read-path caching for leaderboard views
pub mod leaderboard_cache;

pub use leaderboard_cache::{LeaderboardCache, RedisLeaderboardCache};
