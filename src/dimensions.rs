// src/dimensions.rs
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::OnceCell;

static DIMENSION_NAMES: OnceCell<DimensionNames> = OnceCell::const_new();

/// Friendly names for raw dimension ids, e.g. `"minecraft:the_nether": "Nether"`.
#[derive(Debug, Default)]
pub struct DimensionNames {
    names: RwLock<HashMap<String, String>>,
}

impl DimensionNames {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self {
            names: RwLock::new(names),
        }
    }

    pub fn display_name(&self, raw: &str) -> String {
        if let Some(name) = self.names.read().get(raw) {
            return name.clone();
        }
        fallback_name(raw)
    }

    /// Re-reads `path`. On failure the current names stay in place.
    pub async fn refresh(&self, path: &Path) -> bool {
        match load_names(path).await {
            Ok(names) => {
                debug!("Loaded {} dimension names from {}", names.len(), path.display());
                *self.names.write() = names;
                true
            }
            Err(e) => {
                warn!("Failed to load dimension map {}: {}", path.display(), e);
                false
            }
        }
    }
}

fn fallback_name(raw: &str) -> String {
    raw.rsplit(':').next().unwrap_or(raw).to_string()
}

async fn load_names(path: &Path) -> Result<HashMap<String, String>, Box<dyn std::error::Error + Send + Sync>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&text)?)
}

/// Loads the optional mapping file. A missing or broken file leaves the map empty.
pub async fn initialize_dimension_names(path: &Path) {
    let names = DIMENSION_NAMES
        .get_or_init(|| async { DimensionNames::default() })
        .await;
    if path.exists() && names.refresh(path).await {
        info!("Dimension names loaded from {}", path.display());
    }
}

/// Picks up edits to the mapping file without a restart.
pub fn spawn_dimension_reload(path: std::path::PathBuf, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Some(names) = DIMENSION_NAMES.get() {
                if path.exists() {
                    names.refresh(&path).await;
                }
            }
        }
    });
}

pub fn display_name(raw: &str) -> String {
    DIMENSION_NAMES
        .get()
        .map(|names| names.display_name(raw))
        .unwrap_or_else(|| fallback_name(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_names_win_over_fallback() {
        let mut map = HashMap::new();
        map.insert("minecraft:the_nether".to_string(), "下界".to_string());
        let names = DimensionNames::new(map);
        assert_eq!(names.display_name("minecraft:the_nether"), "下界");
        assert_eq!(names.display_name("minecraft:the_end"), "the_end");
        assert_eq!(names.display_name("plain"), "plain");
    }

    #[tokio::test]
    async fn refresh_swaps_names_and_keeps_them_on_failure() {
        let path = std::env::temp_dir().join(format!("dimension_map_{}.json", std::process::id()));
        let names = DimensionNames::default();

        tokio::fs::write(&path, r#"{"minecraft:the_end": "End"}"#).await.unwrap();
        assert!(names.refresh(&path).await);
        assert_eq!(names.display_name("minecraft:the_end"), "End");

        tokio::fs::write(&path, r#"{"minecraft:the_end": "The End"}"#).await.unwrap();
        assert!(names.refresh(&path).await);
        assert_eq!(names.display_name("minecraft:the_end"), "The End");

        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(!names.refresh(&path).await);
        assert_eq!(names.display_name("minecraft:the_end"), "The End");

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
