// src/handlers/status.rs
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error};
use crate::aggregator::Aggregator;
use crate::utils::{check_rate_limit, ApiRateLimiter, RequestError};

pub async fn get_server_status(
    req: HttpRequest,
    aggregator: web::Data<Aggregator>,
    rate_limiter: web::Data<ApiRateLimiter>,
) -> Result<HttpResponse, RequestError> {
    check_rate_limit(&req, &rate_limiter)?;

    match aggregator.server_status().await {
        Ok(status) => {
            debug!("Status: {}/{} players online", status.online, status.max_players);
            Ok(HttpResponse::Ok().json(status))
        }
        Err(e) => {
            error!("Server status query failed: {}", e);
            Err(e.into())
        }
    }
}
