// src/mojang.rs
use crate::storage::uuid_cache::UuidCache;
use futures::future::BoxFuture;
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

const PROFILE_URL: &str = "https://api.mojang.com/users/profiles/minecraft";
const AVATAR_URL: &str = "https://crafatar.com/avatars";

/// Name → UUID lookup. Best effort: `None` on any failure.
pub trait UuidResolver: Send + Sync {
    fn resolve<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<Uuid>>;
}

pub fn avatar_url(uuid: &Uuid) -> String {
    format!("{}/{}", AVATAR_URL, uuid.simple())
}

#[derive(Deserialize)]
struct Profile {
    id: String,
}

pub struct MojangResolver {
    http: reqwest::Client,
    cache: UuidCache,
}

impl MojangResolver {
    pub fn new(cache_ttl_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self {
            http,
            cache: UuidCache::new(cache_ttl_secs),
        }
    }

    async fn fetch(&self, name: &str) -> Result<Option<Uuid>, Box<dyn std::error::Error + Send + Sync>> {
        let response = self
            .http
            .get(format!("{}/{}", PROFILE_URL, name))
            .send()
            .await?;

        // 204/404 mean the name is not a premium account.
        if !response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT {
            debug!("No Mojang profile for {} ({})", name, response.status());
            return Ok(None);
        }

        let profile = response.json::<Profile>().await?;
        Ok(Some(Uuid::parse_str(&profile.id)?))
    }
}

impl UuidResolver for MojangResolver {
    fn resolve<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<Uuid>> {
        Box::pin(async move {
            if let Some(uuid) = self.cache.get(name) {
                return Some(uuid);
            }
            self.cache.cleanup_stale();

            match self.fetch(name).await {
                Ok(Some(uuid)) => {
                    self.cache.insert(name, uuid);
                    Some(uuid)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("UUID lookup for {} failed: {}", name, e);
                    None
                }
            }
        })
    }
}
