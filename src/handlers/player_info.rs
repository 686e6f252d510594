// src/handlers/player_info.rs
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error, warn};
use serde::Deserialize;
use crate::aggregator::{AggregateError, Aggregator};
use crate::utils::{check_rate_limit, ApiRateLimiter, RequestError};

#[derive(Deserialize)]
pub struct PlayerInfoQuery {
    name: Option<String>,
}

pub async fn get_player_info(
    req: HttpRequest,
    query: web::Query<PlayerInfoQuery>,
    aggregator: web::Data<Aggregator>,
    rate_limiter: web::Data<ApiRateLimiter>,
) -> Result<HttpResponse, RequestError> {
    check_rate_limit(&req, &rate_limiter)?;

    let name = query.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let result = match name {
        Some(name) => aggregator
            .player_info(name)
            .await
            .map(|info| HttpResponse::Ok().json(info)),
        None => aggregator.all_player_info().await.map(|batch| {
            debug!(
                "Resolved {} players, {} missing",
                batch.players.len(),
                batch.missing.len()
            );
            HttpResponse::Ok().json(batch)
        }),
    };

    result.map_err(|e| {
        match &e {
            AggregateError::PlayerNotFound(_) | AggregateError::InvalidName(_) => {
                warn!("Player lookup rejected: {}", e)
            }
            _ => error!("Player info request failed: {}", e),
        }
        RequestError::from(e)
    })
}
