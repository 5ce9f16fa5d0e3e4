use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub stations: StationsConfig,
    #[serde(default)]
    pub targets: TargetsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Now-playing JSON written after every cycle for the web layer.
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_stream_timeout_secs")]
    pub stream_timeout_secs: u64,
    /// Check the settings store for edits every N cycles.
    #[serde(default = "default_reload_every_cycles")]
    pub reload_every_cycles: u64,
    /// Below this many merged stations, playlist B is polled with its full set.
    #[serde(default = "default_min_merged_stations")]
    pub min_merged_stations: usize,
    /// Per-station requests in flight at once within a stage.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_aggregator_url")]
    pub aggregator_url: String,
    /// `{slug}` is replaced with the station's slug.
    #[serde(default = "default_playlist_a_url_template")]
    pub playlist_a_url_template: String,
    #[serde(default = "default_playlist_b_url_template")]
    pub playlist_b_url_template: String,
    /// Aggregator section headings that are page chrome, not stations.
    #[serde(default = "default_aggregator_skip_headings")]
    pub aggregator_skip_headings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// StreamTitle values containing any of these are ads, not tracks.
    #[serde(default = "default_ad_markers")]
    pub ad_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default)]
    pub audible_alert: bool,
    #[serde(default)]
    pub title_case: bool,
    /// Lower-case needle → canonical artist name.
    #[serde(default = "default_artist_aliases")]
    pub artist_aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationsConfig {
    /// Station file used to seed an empty `stations` table.
    #[serde(default = "default_stations_toml")]
    pub stations_toml: PathBuf,
}

/// Fallback targets when the settings store has none.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetsConfig {
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub songs: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            snapshot_file: default_snapshot_file(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            stream_timeout_secs: default_stream_timeout_secs(),
            reload_every_cycles: default_reload_every_cycles(),
            min_merged_stations: default_min_merged_stations(),
            concurrency: default_concurrency(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs.max(1))
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            aggregator_url: default_aggregator_url(),
            playlist_a_url_template: default_playlist_a_url_template(),
            playlist_b_url_template: default_playlist_b_url_template(),
            aggregator_skip_headings: default_aggregator_skip_headings(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_chunks: default_max_chunks(),
            chunk_size: default_chunk_size(),
            ad_markers: default_ad_markers(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            audible_alert: false,
            title_case: false,
            artist_aliases: default_artist_aliases(),
        }
    }
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            stations_toml: default_stations_toml(),
        }
    }
}

fn default_db_path() -> PathBuf {
    platform::data_dir().join("radio_songs.db")
}

fn default_snapshot_file() -> PathBuf {
    platform::data_dir().join("now_playing.json")
}

fn default_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_stream_timeout_secs() -> u64 {
    10
}

fn default_reload_every_cycles() -> u64 {
    5
}

fn default_min_merged_stations() -> usize {
    5
}

fn default_concurrency() -> usize {
    4
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_aggregator_url() -> String {
    "https://www.relisten.nl/".to_string()
}

fn default_playlist_a_url_template() -> String {
    "https://www.radio-playlists.nl/{slug}/".to_string()
}

fn default_playlist_b_url_template() -> String {
    "https://onlineradiobox.com/nl/{slug}/playlist/".to_string()
}

fn default_aggregator_skip_headings() -> Vec<String> {
    vec!["Muziekspeler".to_string()]
}

fn default_max_chunks() -> usize {
    64
}

fn default_chunk_size() -> usize {
    8192
}

fn default_ad_markers() -> Vec<String> {
    vec!["Adw_ad".to_string()]
}

fn default_artist_aliases() -> BTreeMap<String, String> {
    let mut aliases = BTreeMap::new();
    aliases.insert(
        "bailey".to_string(),
        "Phil Collins & Philip Bailey".to_string(),
    );
    aliases
}

fn default_stations_toml() -> PathBuf {
    platform::config_dir().join("stations.toml")
}

impl Config {
    /// Missing files are created with defaults. A malformed file is not
    /// fatal: it is reported and defaults are used.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("[config] {} is malformed, using defaults: {}", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

/// Expand a `{slug}` URL template.
pub fn expand_template(template: &str, slug: &str) -> String {
    template.replace("{slug}", slug)
}
