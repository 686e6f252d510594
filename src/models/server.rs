// src/models/server.rs
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;
use crate::protocol::codec::FullStat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub display_name: String,
    pub resolved_uuid: Option<Uuid>,
}

impl PlayerRef {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            resolved_uuid: None,
        }
    }
}

/// Snapshot of one full-stat exchange. Player count and list may disagree
/// when someone joins or leaves while the server builds the reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStat {
    pub motd: String,
    pub game_type: String,
    pub game_id: String,
    pub map: String,
    pub num_players: u32,
    pub max_players: u32,
    pub host_port: u16,
    pub host_ip: String,
    pub players: Vec<PlayerRef>,
    pub latency_ms: u64,
    pub software_version: String,
    pub plugins: String,
}

impl ServerStat {
    pub fn from_full_stat(stat: FullStat, latency: Duration) -> Self {
        let text = |key: &str| stat.get(key).unwrap_or_default().to_string();
        let number = |key: &str| stat.get(key).and_then(|v| v.trim().parse().ok());

        Self {
            motd: text("hostname"),
            game_type: text("gametype"),
            game_id: text("game_id"),
            map: text("map"),
            num_players: number("numplayers").unwrap_or(stat.players.len() as u32),
            max_players: number("maxplayers").unwrap_or(0),
            host_port: stat
                .get("hostport")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            host_ip: text("hostip"),
            software_version: text("version"),
            plugins: text("plugins"),
            latency_ms: latency.as_millis() as u64,
            players: stat.players.iter().map(PlayerRef::new).collect(),
        }
    }

    /// Rebuilds the wire view, keys in the order vanilla servers send them.
    #[cfg(test)]
    pub fn to_full_stat(&self) -> FullStat {
        FullStat {
            kv: vec![
                ("hostname".to_string(), self.motd.clone()),
                ("gametype".to_string(), self.game_type.clone()),
                ("game_id".to_string(), self.game_id.clone()),
                ("version".to_string(), self.software_version.clone()),
                ("plugins".to_string(), self.plugins.clone()),
                ("map".to_string(), self.map.clone()),
                ("numplayers".to_string(), self.num_players.to_string()),
                ("maxplayers".to_string(), self.max_players.to_string()),
                ("hostport".to_string(), self.host_port.to_string()),
                ("hostip".to_string(), self.host_ip.clone()),
            ],
            players: self.players.iter().map(|p| p.display_name.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntry {
    pub name: String,
    pub uuid: Option<Uuid>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub players: Vec<PlayerEntry>,
    pub online: u32,
    pub max_players: u32,
    pub latency_ms: u64,
    pub uptime_seconds: u64,
    pub uptime_formatted: String,
    pub world_time: Option<i64>,
    pub world_time_formatted: Option<String>,
    pub game_time: Option<i64>,
    pub game_time_formatted: Option<String>,
    pub version: String,
    pub motd: String,
}
