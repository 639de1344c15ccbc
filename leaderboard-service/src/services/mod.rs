/// Business logic layer
pub mod rank_engine;
pub mod submission;

pub use rank_engine::RankEngine;
pub use submission::SubmissionService;
