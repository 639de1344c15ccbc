/// HTTP request extractors for leaderboard-service
///
/// Player identity arrives as an `X-Player-Id` header injected by the API
/// gateway after authentication; this service trusts it and never sees
/// credentials. Privileged endpoints additionally require the shared
/// `X-Admin-Token`.
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use std::future::{ready, Ready};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;

const PLAYER_ID_HEADER: &str = "X-Player-Id";
const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Authenticated player identifier taken from the gateway header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerId(pub Uuid);

impl FromRequest for PlayerId {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let header = req
            .headers()
            .get(PLAYER_ID_HEADER)
            .and_then(|h| h.to_str().ok());

        ready(match header {
            Some(value) => Uuid::parse_str(value).map(PlayerId).map_err(|_| {
                AppError::Validation(format!("{} must be a valid UUID", PLAYER_ID_HEADER))
            }),
            None => Err(AppError::Validation(format!(
                "Missing {} header",
                PLAYER_ID_HEADER
            ))),
        })
    }
}

/// Marker extractor that admits a request only when `X-Admin-Token` matches
/// the configured admin token. Mismatch and absence both get the same 403.
#[derive(Debug, Clone, Copy)]
pub struct AdminToken;

impl FromRequest for AdminToken {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let expected = req
            .app_data::<web::Data<Config>>()
            .map(|config| config.admin.token.clone());

        let provided = req
            .headers()
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|h| h.to_str().ok());

        ready(match (expected, provided) {
            (Some(expected), Some(token)) if !expected.is_empty() && token == expected => {
                Ok(AdminToken)
            }
            _ => Err(AppError::Forbidden("Invalid admin token".to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;
    use serial_test::serial;

    #[actix_web::test]
    async fn test_player_id_parses_gateway_header() {
        let expected = Uuid::new_v4();
        let req = TestRequest::default()
            .insert_header((PLAYER_ID_HEADER, expected.to_string()))
            .to_http_request();

        let player = PlayerId::from_request(&req, &mut Payload::None)
            .await
            .unwrap();
        assert_eq!(player.0, expected);
    }

    #[actix_web::test]
    async fn test_player_id_rejects_missing_and_malformed_headers() {
        let req = TestRequest::default().to_http_request();
        assert!(PlayerId::from_request(&req, &mut Payload::None)
            .await
            .is_err());

        let req = TestRequest::default()
            .insert_header((PLAYER_ID_HEADER, "not-a-uuid"))
            .to_http_request();
        assert!(PlayerId::from_request(&req, &mut Payload::None)
            .await
            .is_err());
    }

    #[actix_web::test]
    #[serial]
    async fn test_admin_token_must_match_configured_value() {
        let config = web::Data::new(Config::from_env().unwrap());

        let req = TestRequest::default()
            .app_data(config.clone())
            .insert_header((ADMIN_TOKEN_HEADER, "dev-admin-token"))
            .to_http_request();
        assert!(AdminToken::from_request(&req, &mut Payload::None)
            .await
            .is_ok());

        let req = TestRequest::default()
            .app_data(config.clone())
            .insert_header((ADMIN_TOKEN_HEADER, "wrong-token"))
            .to_http_request();
        assert!(AdminToken::from_request(&req, &mut Payload::None)
            .await
            .is_err());

        let req = TestRequest::default().app_data(config).to_http_request();
        assert!(AdminToken::from_request(&req, &mut Payload::None)
            .await
            .is_err());
    }
}
