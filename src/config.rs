use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

/// Tunables for the whole pipeline. Loaded with the precedence
/// CLI arguments > environment variables > INI file > defaults.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Scene-change detection sensitivity (0.0-1.0).
    pub threshold: f64,
    /// Minimum scene length in seconds.
    pub min_scene_len: f64,
    /// Frames per second sampled for scene detection.
    pub sample_rate: f64,
    /// Fuzzy-search similarity cutoff (0-100).
    pub cutoff: u32,
    /// Thumbnail box for collage tiles (width, height).
    pub thumbnail_size: (u32, u32),
    /// Vision model used for captioning.
    pub caption_model: String,
    /// Hosted multimodal model used for the video search path.
    pub gemini_model: String,
    /// Fixed interval between upload-state polls, in seconds.
    pub poll_interval_secs: u64,
    /// Deadline for the upload-state poll loop, in seconds.
    pub poll_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            min_scene_len: 1.5,
            sample_rate: 2.0,
            cutoff: 60,
            thumbnail_size: (200, 200),
            caption_model: "gpt-4o".to_string(),
            gemini_model: "gemini-1.5-flash".to_string(),
            poll_interval_secs: 10,
            poll_timeout_secs: 600,
        }
    }
}

/// Values passed on the command line; they win over every other source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub threshold: Option<f64>,
    pub min_scene_len: Option<f64>,
    pub sample_rate: Option<f64>,
    pub cutoff: Option<u32>,
}

/// Layered configuration loading: an explicit file path, otherwise the
/// default locations, with environment variables and CLI arguments on top.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(config_file: Option<&Path>, overrides: &ConfigOverrides) -> Result<SearchConfig> {
        let file_config = match config_file {
            Some(path) => Self::load_from_file(path).ok(),
            None => Self::load_from_default_locations(),
        };
        let base = file_config.unwrap_or_default();

        Ok(SearchConfig {
            threshold: overrides
                .threshold
                .or_else(|| env_parse("SCENEFIND_THRESHOLD"))
                .unwrap_or(base.threshold),
            min_scene_len: overrides
                .min_scene_len
                .or_else(|| env_parse("SCENEFIND_MIN_SCENE_LEN"))
                .unwrap_or(base.min_scene_len),
            sample_rate: overrides
                .sample_rate
                .or_else(|| env_parse("SCENEFIND_SAMPLE_RATE"))
                .unwrap_or(base.sample_rate),
            cutoff: overrides
                .cutoff
                .or_else(|| env_parse("SCENEFIND_CUTOFF"))
                .unwrap_or(base.cutoff),
            ..base
        })
    }

    /// Reads a `[scenefind]` section (falling back to `[DEFAULT]`) from an
    /// INI file. Missing keys keep their defaults.
    pub fn load_from_file(config_path: &Path) -> Result<SearchConfig> {
        if !config_path.exists() {
            anyhow::bail!("config file not found: {}", config_path.display());
        }

        let mut ini = configparser::ini::Ini::new();
        ini.load(config_path).map_err(|e| {
            anyhow::anyhow!("failed to read config file {}: {}", config_path.display(), e)
        })?;

        let get = |key: &str| {
            ini.get("scenefind", key)
                .or_else(|| ini.get("DEFAULT", key))
                .filter(|v| !v.is_empty())
        };

        let defaults = SearchConfig::default();
        Ok(SearchConfig {
            threshold: get("threshold")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.threshold),
            min_scene_len: get("min_scene_len")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_scene_len),
            sample_rate: get("sample_rate")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sample_rate),
            cutoff: get("cutoff")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cutoff),
            thumbnail_size: (
                get("thumbnail_width")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.thumbnail_size.0),
                get("thumbnail_height")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.thumbnail_size.1),
            ),
            caption_model: get("caption_model").unwrap_or(defaults.caption_model),
            gemini_model: get("gemini_model").unwrap_or(defaults.gemini_model),
            poll_interval_secs: get("poll_interval_secs")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.poll_interval_secs),
            poll_timeout_secs: get("poll_timeout_secs")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.poll_timeout_secs),
        })
    }

    fn load_from_default_locations() -> Option<SearchConfig> {
        let mut candidates = vec![
            PathBuf::from("scenefind.ini"),
            PathBuf::from(".scenefind.ini"),
        ];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".scenefind.ini"));
        }

        candidates
            .into_iter()
            .find(|p| p.exists())
            .and_then(|p| Self::load_from_file(&p).ok())
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    env::var(var).ok().and_then(|v| v.parse().ok())
}
