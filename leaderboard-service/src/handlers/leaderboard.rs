/// Leaderboard handlers - HTTP endpoints for score submission and rank reads
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::middleware::{AdminToken, PlayerId};
use crate::services::SubmissionService;

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitScoreRequest {
    #[validate(range(min = 0))]
    pub score: i64,

    #[validate(length(min = 1, max = 50))]
    pub game_mode: String,
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    10
}

/// Record a play session for the calling player
pub async fn submit_score(
    service: web::Data<Arc<SubmissionService>>,
    player: PlayerId,
    payload: web::Json<SubmitScoreRequest>,
) -> Result<HttpResponse> {
    payload.validate().map_err(AppError::from)?;

    let submitted = service
        .submit_score(player.0, payload.score, &payload.game_mode)
        .await?;

    Ok(HttpResponse::Created().json(submitted))
}

/// Current top of the leaderboard
pub async fn get_top_players(
    service: web::Data<Arc<SubmissionService>>,
    query: web::Query<TopQuery>,
) -> Result<HttpResponse> {
    let page = service.top_players(query.limit, query.offset).await?;
    Ok(HttpResponse::Ok().json(page))
}

/// Live rank for one player
pub async fn get_player_rank(
    service: web::Data<Arc<SubmissionService>>,
    player_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let rank = service.player_rank(*player_id).await?;
    Ok(HttpResponse::Ok().json(rank))
}

/// Queue a full rank rebuild. Admin only.
pub async fn update_ranks(
    service: web::Data<Arc<SubmissionService>>,
    _admin: AdminToken,
) -> Result<HttpResponse> {
    let task_id = service.request_rebuild().await?;
    Ok(HttpResponse::Accepted().json(json!({ "task_id": task_id })))
}

/// Per-mode statistics. Answers 202 while a recompute is pending.
pub async fn get_mode_stats(service: web::Data<Arc<SubmissionService>>) -> Result<HttpResponse> {
    match service.game_mode_stats().await? {
        Some(stats) => Ok(HttpResponse::Ok().json(stats)),
        None => Ok(HttpResponse::Accepted().json(json!({
            "message": "Statistics are being calculated, try again shortly"
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_request_validation() {
        let valid = SubmitScoreRequest {
            score: 100,
            game_mode: "classic".to_string(),
        };
        assert!(valid.validate().is_ok());

        let negative = SubmitScoreRequest {
            score: -1,
            game_mode: "classic".to_string(),
        };
        assert!(negative.validate().is_err());

        let empty_mode = SubmitScoreRequest {
            score: 100,
            game_mode: String::new(),
        };
        assert!(empty_mode.validate().is_err());

        let long_mode = SubmitScoreRequest {
            score: 100,
            game_mode: "x".repeat(51),
        };
        assert!(long_mode.validate().is_err());
    }

    #[test]
    fn test_top_query_defaults() {
        let query: TopQuery = serde_json::from_value(json!({})).unwrap();
        assert_eq!(query.limit, 10);
        assert_eq!(query.offset, 0);

        let query: TopQuery = serde_json::from_value(json!({"limit": 25, "offset": 5})).unwrap();
        assert_eq!(query.limit, 25);
        assert_eq!(query.offset, 5);
    }
}
