// src/utils.rs
use crate::aggregator::AggregateError;
use crate::protocol::rcon::RconError;
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::RateLimiter;
use log::warn;
use serde_json::json;
use std::fmt;
use std::net::IpAddr;

#[derive(Debug)]
pub enum RequestError {
    MissingPeerIP,
    MissingParameter(&'static str),
    InvalidParameter(&'static str),
    RateLimitExceeded,
    Upstream(AggregateError),
}

impl RequestError {
    /// Stable, machine-readable error kind for API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingPeerIP => "BadRequest",
            Self::MissingParameter(_) | Self::InvalidParameter(_) => "InvalidParameter",
            Self::RateLimitExceeded => "RateLimitExceeded",
            Self::Upstream(e) => match e {
                AggregateError::QueryUnreachable(_) => "QueryUnreachable",
                AggregateError::ProtocolDecode(_) => "ProtocolDecodeError",
                AggregateError::RconUnavailable(RconError::Auth) => "AuthError",
                AggregateError::RconUnavailable(_) => "RconUnavailable",
                AggregateError::Timeout => "Timeout",
                AggregateError::PlayerNotFound(_) => "PlayerNotFound",
                AggregateError::InvalidName(_) => "InvalidName",
                AggregateError::BadReply(_) => "BadReply",
            },
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPeerIP => write!(f, "Failed to extract client IP"),
            Self::MissingParameter(name) => write!(f, "Missing query parameter: {}", name),
            Self::InvalidParameter(name) => write!(f, "Invalid query parameter: {}", name),
            Self::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            Self::Upstream(e) => write!(f, "{}", e),
        }
    }
}

impl From<AggregateError> for RequestError {
    fn from(e: AggregateError) -> Self {
        Self::Upstream(e)
    }
}

impl ResponseError for RequestError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingPeerIP | Self::MissingParameter(_) | Self::InvalidParameter(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(e) => match e {
                AggregateError::QueryUnreachable(_) | AggregateError::RconUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                AggregateError::ProtocolDecode(_) | AggregateError::BadReply(_) => StatusCode::BAD_GATEWAY,
                AggregateError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                AggregateError::PlayerNotFound(_) => StatusCode::NOT_FOUND,
                AggregateError::InvalidName(_) => StatusCode::BAD_REQUEST,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }))
    }
}

pub type ApiRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

pub fn peer_ip(req: &HttpRequest) -> Result<IpAddr, RequestError> {
    req.peer_addr()
        .map(|addr| addr.ip())
        .ok_or(RequestError::MissingPeerIP)
}

pub fn check_rate_limit(req: &HttpRequest, limiter: &ApiRateLimiter) -> Result<(), RequestError> {
    let ip = peer_ip(req)?;
    if limiter.check_key(&ip).is_err() {
        warn!("Rate limit exceeded for {} on {}", ip, req.path());
        return Err(RequestError::RateLimitExceeded);
    }
    Ok(())
}

/// Minecraft ticks to a wall clock `HH:MM`; tick 0 is 06:00.
pub fn format_minecraft_time(ticks: i64) -> String {
    let ticks = ticks.rem_euclid(24_000);
    let hours = (ticks / 1000 + 6) % 24;
    let minutes = (ticks % 1000) * 60 / 1000;
    format!("{:02}:{:02}", hours, minutes)
}

pub fn format_uptime(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
