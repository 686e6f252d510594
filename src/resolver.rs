// src/resolver.rs
use crate::models::player::{Dimension, PlayerInfo, Position};
use crate::protocol::rcon::{RconError, RconSession};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use std::fmt;
use std::time::Duration;

lazy_static! {
    static ref PLAYER_NAME: Regex = Regex::new(r"^[A-Za-z0-9_]{3,16}$").unwrap();
    static ref POS_PATTERN: Regex = Regex::new(r"\bPos:\s*\[([^\]]*)\]").unwrap();
    static ref DIMENSION_PATTERN: Regex = Regex::new(r#"\bDimension:\s*"([^"]+)""#).unwrap();
    static ref HEALTH_PATTERN: Regex = Regex::new(r"\bHealth:\s*(-?[0-9]+(?:\.[0-9]+)?(?:[eE][-+]?[0-9]+)?)[fFdDsb]?").unwrap();
    static ref FOOD_PATTERN: Regex = Regex::new(r"\bfoodLevel:\s*(-?\d+)").unwrap();
    static ref LEVEL_PATTERN: Regex = Regex::new(r"\bXpLevel:\s*(-?\d+)").unwrap();
    static ref LIST_PATTERN: Regex = Regex::new(r"(?s)players online:(.*)$").unwrap();
    static ref TIME_PATTERN: Regex = Regex::new(r"The time is (-?\d+)").unwrap();
}

#[derive(Debug)]
pub enum ResolveError {
    PlayerNotFound(String),
    InvalidName(String),
    UnexpectedReply(String),
    Rcon(RconError),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlayerNotFound(name) => write!(f, "player {} is not online", name),
            Self::InvalidName(name) => write!(f, "invalid player name: {:?}", name),
            Self::UnexpectedReply(name) => write!(f, "unrecognised entity data reply for {}", name),
            Self::Rcon(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<RconError> for ResolveError {
    fn from(e: RconError) -> Self {
        Self::Rcon(e)
    }
}

pub fn is_valid_player_name(name: &str) -> bool {
    PLAYER_NAME.is_match(name)
}

/// Fetches live vitals for one player through an authenticated session.
pub async fn get_player_info(
    session: &RconSession,
    name: &str,
    timeout: Duration,
) -> Result<PlayerInfo, ResolveError> {
    if !is_valid_player_name(name) {
        return Err(ResolveError::InvalidName(name.to_string()));
    }

    let reply = session
        .execute(&format!("data get entity {}", name), timeout)
        .await?;
    debug!("Entity data for {}: {} bytes", name, reply.len());

    if !reply.contains("has the following entity data") {
        if reply.is_empty() || reply.starts_with("No entity was found") || reply.starts_with("No player was found") {
            return Err(ResolveError::PlayerNotFound(name.to_string()));
        }
        return Err(ResolveError::UnexpectedReply(name.to_string()));
    }

    Ok(parse_entity_data(name, &reply))
}

/// Pulls the known fields out of an entity dump. Absent or garbled fields
/// stay `None` rather than failing the whole record.
pub fn parse_entity_data(name: &str, reply: &str) -> PlayerInfo {
    let position = POS_PATTERN
        .captures(reply)
        .and_then(|caps| parse_position(&caps[1]));
    if position.is_none() {
        warn!("No usable position in entity data for {}", name);
    }

    let dimension = DIMENSION_PATTERN
        .captures(reply)
        .map(|caps| Dimension::from_id(&caps[1]))
        .unwrap_or(Dimension::Unknown);

    PlayerInfo {
        name: name.to_string(),
        position,
        dimension,
        health: capture(&HEALTH_PATTERN, reply),
        hunger: capture(&FOOD_PATTERN, reply),
        xp_level: capture(&LEVEL_PATTERN, reply),
    }
}

fn capture<T: std::str::FromStr>(pattern: &Regex, reply: &str) -> Option<T> {
    pattern.captures(reply).and_then(|caps| caps[1].parse().ok())
}

fn parse_position(raw: &str) -> Option<Position> {
    let coords: Vec<f64> = raw
        .split(',')
        .map(|part| part.trim().trim_end_matches(['d', 'D']).parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match coords.as_slice() {
        [x, y, z] => Some(Position { x: *x, y: *y, z: *z }),
        _ => None,
    }
}

/// Parses the reply of `list`: `There are 2 of a max of 20 players online: Steve, Alex`.
pub fn parse_player_list(reply: &str) -> Vec<String> {
    let Some(caps) = LIST_PATTERN.captures(reply) else {
        return Vec::new();
    };
    caps[1]
        .split(',')
        .map(str::trim)
        .filter(|name| is_valid_player_name(name))
        .map(str::to_string)
        .collect()
}

/// Parses the reply of `time query <daytime|gametime|day>`.
pub fn parse_time_reply(reply: &str) -> Option<i64> {
    capture(&TIME_PATTERN, reply)
}
