// src/models/player.rs
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn rounded(self) -> Self {
        let round = |v: f64| (v * 100.0).round() / 100.0;
        Self {
            x: round(self.x),
            y: round(self.y),
            z: round(self.z),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dimension {
    Overworld,
    Nether,
    End,
    Other(String),
    Unknown,
}

impl Dimension {
    pub fn from_id(raw: &str) -> Self {
        match raw {
            "minecraft:overworld" => Self::Overworld,
            "minecraft:the_nether" => Self::Nether,
            "minecraft:the_end" => Self::End,
            "" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Overworld => Some("minecraft:overworld"),
            Self::Nether => Some("minecraft:the_nether"),
            Self::End => Some("minecraft:the_end"),
            Self::Other(raw) => Some(raw),
            Self::Unknown => None,
        }
    }
}

impl Serialize for Dimension {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Overworld => serializer.serialize_str("overworld"),
            Self::Nether => serializer.serialize_str("nether"),
            Self::End => serializer.serialize_str("end"),
            Self::Other(_) => serializer.serialize_str("other"),
            Self::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

/// Live vitals of one player. `None` means the field was absent from the
/// entity dump, not that the value is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInfo {
    pub name: String,
    pub position: Option<Position>,
    pub dimension: Dimension,
    pub health: Option<f32>,
    pub hunger: Option<i32>,
    pub xp_level: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfoResponse {
    pub name: String,
    pub position: Option<Position>,
    pub dimension: Dimension,
    pub raw_dimension: Option<String>,
    pub world: Option<String>,
    pub health: Option<f32>,
    pub hunger: Option<i32>,
    pub level: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerInfoBatch {
    pub players: Vec<PlayerInfoResponse>,
    pub missing: Vec<String>,
}
