// src/main.rs
mod aggregator;
mod config;
mod dimensions;
mod handlers;
mod models;
mod mojang;
mod protocol;
mod resolver;
mod storage;
mod utils;

#[cfg(test)]
mod testing;

use actix_web::{web, App, HttpServer};
use aggregator::{Aggregator, AggregatorOptions};
use config::Config;
use env_logger::Env;
use governor::RateLimiter;
use log::{error, info};
use mojang::MojangResolver;
use protocol::RetryPolicy;
use protocol::rcon::RconClient;
use std::sync::Arc;
use std::time::Duration;
use utils::ApiRateLimiter;

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::index::index))
        .route("/api/server/status", web::get().to(handlers::status::get_server_status))
        .route("/api/server/player_info", web::get().to(handlers::player_info::get_player_info))
        .route("/api/player/avatar", web::get().to(handlers::avatar::get_avatar));
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };
    info!("Loaded configuration: {:?}", config);

    dimensions::initialize_dimension_names(&config.dimension_map_path).await;
    if config.dimension_map_reload_secs > 0 {
        dimensions::spawn_dimension_reload(
            config.dimension_map_path.clone(),
            Duration::from_secs(config.dimension_map_reload_secs),
        );
    }

    let aggregator = web::Data::new(Aggregator::new(
        config.query_address.clone(),
        RconClient::new(config.rcon_address.clone(), config.rcon_password.clone()),
        Arc::new(MojangResolver::new(config.uuid_cache_ttl_secs)),
        AggregatorOptions {
            query_timeout: config.query_timeout(),
            rcon_timeout: config.rcon_timeout(),
            retry: RetryPolicy {
                attempts: config.query_retries.max(1),
                base_backoff: config.query_backoff(),
            },
            lookup_concurrency: config.player_lookup_concurrency.max(1),
        },
    ));

    let rate_limiter: web::Data<ApiRateLimiter> = web::Data::new(RateLimiter::keyed(config.api_quota()));

    let bind = format!("{}:{}", config.bind_address, config.port);
    info!("Starting server on {}", bind);
    HttpServer::new(move || {
        App::new()
            .app_data(aggregator.clone())
            .app_data(rate_limiter.clone())
            .configure(routes)
    })
        .bind(&bind)?
        .run().await
}
