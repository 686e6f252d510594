// src/aggregator.rs
use crate::dimensions;
use crate::models::player::{PlayerInfo, PlayerInfoBatch, PlayerInfoResponse};
use crate::models::server::{PlayerEntry, PlayerRef, ServerStat, ServerStatus};
use crate::mojang::{avatar_url, UuidResolver};
use crate::protocol::codec::ProtocolDecodeError;
use crate::protocol::query::{QueryClient, QueryError};
use crate::protocol::RetryPolicy;
use crate::protocol::rcon::{RconClient, RconError, RconSession};
use crate::protocol::resolve_address;
use crate::resolver::{self, ResolveError};
use crate::utils::{format_minecraft_time, format_uptime};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub enum AggregateError {
    QueryUnreachable(String),
    ProtocolDecode(ProtocolDecodeError),
    RconUnavailable(RconError),
    Timeout,
    PlayerNotFound(String),
    InvalidName(String),
    BadReply(String),
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueryUnreachable(reason) => write!(f, "server query failed: {}", reason),
            Self::ProtocolDecode(e) => write!(f, "{}", e),
            Self::RconUnavailable(e) => write!(f, "RCON unavailable: {}", e),
            Self::Timeout => write!(f, "server did not answer in time"),
            Self::PlayerNotFound(name) => write!(f, "player {} is not online", name),
            Self::InvalidName(name) => write!(f, "invalid player name: {:?}", name),
            Self::BadReply(name) => write!(f, "unexpected server reply while looking up {}", name),
        }
    }
}

impl std::error::Error for AggregateError {}

impl From<QueryError> for AggregateError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Decode(e) => Self::ProtocolDecode(e),
            other => Self::QueryUnreachable(other.to_string()),
        }
    }
}

impl From<ResolveError> for AggregateError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::PlayerNotFound(name) => Self::PlayerNotFound(name),
            ResolveError::InvalidName(name) => Self::InvalidName(name),
            ResolveError::UnexpectedReply(name) => Self::BadReply(name),
            ResolveError::Rcon(RconError::Timeout) => Self::Timeout,
            ResolveError::Rcon(e) => Self::RconUnavailable(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    pub query_timeout: Duration,
    pub rcon_timeout: Duration,
    pub retry: RetryPolicy,
    pub lookup_concurrency: usize,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(3),
            rcon_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            lookup_concurrency: 4,
        }
    }
}

/// Combines Query, RCON and UUID lookups into the two API snapshots.
/// Every call opens its own RCON session and closes it before returning.
pub struct Aggregator {
    query: QueryClient,
    query_address: String,
    rcon: RconClient,
    uuids: Arc<dyn UuidResolver>,
    options: AggregatorOptions,
    started_at: Instant,
}

impl Aggregator {
    pub fn new(
        query_address: impl Into<String>,
        rcon: RconClient,
        uuids: Arc<dyn UuidResolver>,
        options: AggregatorOptions,
    ) -> Self {
        Self {
            query: QueryClient::new(options.retry),
            query_address: query_address.into(),
            rcon: rcon.with_retry(options.retry),
            uuids,
            options,
            started_at: Instant::now(),
        }
    }

    async fn query_stat(&self) -> Result<ServerStat, QueryError> {
        let address = resolve_address(&self.query_address)
            .await
            .map_err(QueryError::Io)?;
        self.query
            .get_server_stat(address, self.options.query_timeout)
            .await
    }

    async fn open_rcon(&self) -> Result<RconSession, AggregateError> {
        self.rcon
            .connect(self.options.rcon_timeout)
            .await
            .map_err(AggregateError::RconUnavailable)
    }

    /// `(daytime, gametime)`, both absent when RCON cannot be reached.
    async fn world_times(&self) -> (Option<i64>, Option<i64>) {
        let session = match self.open_rcon().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Serving status without world time: {}", e);
                return (None, None);
            }
        };

        let timeout = self.options.rcon_timeout;
        let day_time = match session.execute("time query daytime", timeout).await {
            Ok(reply) => resolver::parse_time_reply(&reply),
            Err(e) => {
                warn!("time query daytime failed: {}", e);
                None
            }
        };
        let game_time = match session.execute("time query gametime", timeout).await {
            Ok(reply) => resolver::parse_time_reply(&reply),
            Err(e) => {
                warn!("time query gametime failed: {}", e);
                None
            }
        };
        session.close().await;
        (day_time, game_time)
    }

    async fn identify(&self, players: &[PlayerRef]) -> Vec<PlayerRef> {
        stream::iter(players.iter().cloned())
            .map(|mut player| async move {
                player.resolved_uuid = self.uuids.resolve(&player.display_name).await;
                player
            })
            .buffered(self.options.lookup_concurrency.max(1))
            .collect()
            .await
    }

    pub async fn server_status(&self) -> Result<ServerStatus, AggregateError> {
        let (stat, (world_time, game_time)) = tokio::join!(self.query_stat(), self.world_times());
        let stat = stat?;

        if stat.num_players as usize != stat.players.len() {
            debug!(
                "Query reported {} players but listed {}",
                stat.num_players,
                stat.players.len()
            );
        }

        let players = self
            .identify(&stat.players)
            .await
            .into_iter()
            .map(|player| PlayerEntry {
                avatar_url: player.resolved_uuid.as_ref().map(avatar_url),
                uuid: player.resolved_uuid,
                name: player.display_name,
            })
            .collect();

        let uptime_seconds = self.started_at.elapsed().as_secs();
        Ok(ServerStatus {
            players,
            online: stat.num_players,
            max_players: stat.max_players,
            latency_ms: stat.latency_ms,
            uptime_seconds,
            uptime_formatted: format_uptime(uptime_seconds),
            world_time,
            world_time_formatted: world_time.map(format_minecraft_time),
            game_time,
            game_time_formatted: game_time.map(format_minecraft_time),
            version: stat.software_version,
            motd: stat.motd,
        })
    }

    pub async fn player_info(&self, name: &str) -> Result<PlayerInfoResponse, AggregateError> {
        if !resolver::is_valid_player_name(name) {
            return Err(AggregateError::InvalidName(name.to_string()));
        }

        let session = self.open_rcon().await?;
        let result = resolver::get_player_info(&session, name, self.options.rcon_timeout).await;
        session.close().await;

        Ok(to_response(result?))
    }

    /// Vitals for everyone online. Players who vanish between the roster and
    /// their lookup are reported in `missing`; an RCON failure fails the batch.
    pub async fn all_player_info(&self) -> Result<PlayerInfoBatch, AggregateError> {
        let (stat, session) = tokio::join!(self.query_stat(), self.open_rcon());
        let session = session?;
        let timeout = self.options.rcon_timeout;

        let names = match stat {
            Ok(stat) => stat.players.into_iter().map(|p| p.display_name).collect(),
            Err(e) => {
                info!("Query unavailable ({}), using RCON list for the roster", e);
                match session.execute("list", timeout).await {
                    Ok(reply) => resolver::parse_player_list(&reply),
                    Err(e) => {
                        session.close().await;
                        return Err(AggregateError::RconUnavailable(e));
                    }
                }
            }
        };

        let outcome = self.lookup_all(&session, names).await;
        session.close().await;
        outcome
    }

    async fn lookup_all(
        &self,
        session: &RconSession,
        names: Vec<String>,
    ) -> Result<PlayerInfoBatch, AggregateError> {
        let timeout = self.options.rcon_timeout;
        let mut lookups = stream::iter(names)
            .map(|name| async move {
                let result = resolver::get_player_info(session, &name, timeout).await;
                (name, result)
            })
            .buffered(self.options.lookup_concurrency.max(1));

        let mut batch = PlayerInfoBatch {
            players: Vec::new(),
            missing: Vec::new(),
        };
        while let Some((name, result)) = lookups.next().await {
            match result {
                Ok(info) => batch.players.push(to_response(info)),
                Err(ResolveError::PlayerNotFound(_)) => {
                    debug!("{} left before their lookup finished", name);
                    batch.missing.push(name);
                }
                Err(e @ ResolveError::InvalidName(_)) | Err(e @ ResolveError::UnexpectedReply(_)) => {
                    warn!("Skipping {}: {}", name, e);
                    batch.missing.push(name);
                }
                // Dropping `lookups` abandons the lookups still queued.
                Err(e) => return Err(e.into()),
            }
        }
        Ok(batch)
    }
}

fn to_response(info: PlayerInfo) -> PlayerInfoResponse {
    let raw_dimension = info.dimension.id().map(str::to_string);
    PlayerInfoResponse {
        world: raw_dimension.as_deref().map(dimensions::display_name),
        raw_dimension,
        position: info.position.map(|p| p.rounded()),
        dimension: info.dimension,
        health: info.health,
        hunger: info.hunger,
        level: info.xp_level,
        name: info.name,
    }
}
