use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;
pub const DEFAULT_CHECKPOINT_DELAY_MS: u64 = 500;
pub const DEFAULT_MIN_MEDIA_WIDTH: u32 = 50;
pub const DEFAULT_RESIZE_MARGIN: u32 = 32;
pub const DEFAULT_CONTAINER_WIDTH: f32 = 800.0;
pub const DEFAULT_MAX_VIDEO_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_UPLOAD_ENDPOINT: &str = "/api/images/upload";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    Read {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {config_path}: {source}")]
    Parse {
        config_path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to parse config: {0}")]
    Inline(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub history_capacity: usize,
    pub checkpoint_delay_ms: u64,
    pub min_media_width: u32,
    pub resize_margin: u32,
    /// Used for resize bounds until the host reports a layout.
    pub default_container_width: f32,
    pub max_video_bytes: u64,
    pub crop_aspect: f32,
    pub placeholder: String,
    pub image_caption_placeholder: String,
    pub video_caption_placeholder: String,
    pub upload_endpoint: String,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            checkpoint_delay_ms: DEFAULT_CHECKPOINT_DELAY_MS,
            min_media_width: DEFAULT_MIN_MEDIA_WIDTH,
            resize_margin: DEFAULT_RESIZE_MARGIN,
            default_container_width: DEFAULT_CONTAINER_WIDTH,
            max_video_bytes: DEFAULT_MAX_VIDEO_BYTES,
            crop_aspect: 1.0,
            placeholder: "Inhalt".to_string(),
            image_caption_placeholder: "Bildunterschrift hinzufügen (optional)".to_string(),
            video_caption_placeholder: "Videounterschrift hinzufügen (optional)".to_string(),
            upload_endpoint: DEFAULT_UPLOAD_ENDPOINT.to_string(),
        }
    }
}

impl EditorConfig {
    /// Replaces zero or non-finite values with the built-in defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.history_capacity == 0 {
            self.history_capacity = DEFAULT_HISTORY_CAPACITY;
        }
        if self.checkpoint_delay_ms == 0 {
            self.checkpoint_delay_ms = DEFAULT_CHECKPOINT_DELAY_MS;
        }
        if self.min_media_width == 0 {
            self.min_media_width = DEFAULT_MIN_MEDIA_WIDTH;
        }
        if !self.default_container_width.is_finite() || self.default_container_width <= 0.0 {
            self.default_container_width = DEFAULT_CONTAINER_WIDTH;
        }
        if self.max_video_bytes == 0 {
            self.max_video_bytes = DEFAULT_MAX_VIDEO_BYTES;
        }
        if !self.crop_aspect.is_finite() || self.crop_aspect <= 0.0 {
            self.crop_aspect = 1.0;
        }
        if self.upload_endpoint.trim().is_empty() {
            self.upload_endpoint = DEFAULT_UPLOAD_ENDPOINT.to_string();
        }
        self
    }

    pub fn checkpoint_delay(&self) -> Duration {
        Duration::from_millis(self.checkpoint_delay_ms)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EditorConfig = toml::from_str(content)?;
        Ok(config.with_defaults())
    }

    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content =
            std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
                config_path: config_path.to_path_buf(),
                source,
            })?;

        let config: EditorConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            config_path: config_path.to_path_buf(),
            source,
        })?;

        Ok(Some(config.with_defaults()))
    }
}
