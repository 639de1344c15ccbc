/// HTTP handlers for leaderboard-service
pub mod leaderboard;

pub use leaderboard::{get_mode_stats, get_player_rank, get_top_players, submit_score, update_ranks};
