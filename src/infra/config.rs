//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::{bail, Context};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default factor applied to the trigger radius for the "approaching" band
pub const DEFAULT_APPROACH_MULTIPLIER: f64 = 2.5;

/// Default factor applied to the trigger radius before a playing POI yields the slot
pub const DEFAULT_HYSTERESIS_FACTOR: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Spawn an external player process per narration
    Command,
    /// Validate the locator and wait a fixed clip length
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSourceKind {
    /// OwnTracks-style fixes over MQTT
    Mqtt,
    /// JSONL fixes replayed from a file
    Replay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuideConfig {
    #[serde(default = "default_approach_multiplier")]
    pub approach_multiplier: f64,
    #[serde(default = "default_hysteresis_factor")]
    pub hysteresis_factor: f64,
}

fn default_approach_multiplier() -> f64 {
    DEFAULT_APPROACH_MULTIPLIER
}

fn default_hysteresis_factor() -> f64 {
    DEFAULT_HYSTERESIS_FACTOR
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            approach_multiplier: default_approach_multiplier(),
            hysteresis_factor: default_hysteresis_factor(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_playback_mode")]
    pub mode: PlaybackMode,
    /// Player executable for command mode
    #[serde(default = "default_player_command")]
    pub command: String,
    /// Arguments placed before the locator
    #[serde(default = "default_player_args")]
    pub args: Vec<String>,
    /// Clip length in simulated mode
    #[serde(default = "default_simulated_clip_secs")]
    pub simulated_clip_secs: u64,
}

fn default_playback_mode() -> PlaybackMode {
    PlaybackMode::Command
}

fn default_player_command() -> String {
    "mpv".to_string()
}

fn default_player_args() -> Vec<String> {
    vec!["--no-video".to_string(), "--really-quiet".to_string()]
}

fn default_simulated_clip_secs() -> u64 {
    30
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            mode: default_playback_mode(),
            command: default_player_command(),
            args: default_player_args(),
            simulated_clip_secs: default_simulated_clip_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    #[serde(default = "default_location_source")]
    pub source: LocationSourceKind,
    #[serde(default = "default_replay_file")]
    pub replay_file: String,
    #[serde(default = "default_replay_interval_ms")]
    pub replay_interval_ms: u64,
    /// Tracking stops when no fix arrives within this window
    #[serde(default = "default_fix_timeout_secs")]
    pub fix_timeout_secs: u64,
}

fn default_location_source() -> LocationSourceKind {
    LocationSourceKind::Replay
}

fn default_replay_file() -> String {
    "walks/tremembe.jsonl".to_string()
}

fn default_replay_interval_ms() -> u64 {
    1000
}

fn default_fix_timeout_secs() -> u64 {
    20
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            source: default_location_source(),
            replay_file: default_replay_file(),
            replay_interval_ms: default_replay_interval_ms(),
            fix_timeout_secs: default_fix_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "owntracks/+/+".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// HTTP port for /metrics and /status (0 to disable)
    #[serde(default)]
    pub http_port: u16,
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), http_port: 0 }
    }
}

/// One `[[pois]]` table, validated later by the registry
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PoiConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub audio_src: String,
    pub latitude: f64,
    pub longitude: f64,
    pub trigger_radius_m: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub guide: GuideConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub pois: Vec<PoiConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    approach_multiplier: f64,
    hysteresis_factor: f64,
    playback_mode: PlaybackMode,
    player_command: String,
    player_args: Vec<String>,
    simulated_clip_secs: u64,
    location_source: LocationSourceKind,
    replay_file: PathBuf,
    replay_interval_ms: u64,
    fix_timeout_secs: u64,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    metrics_interval_secs: u64,
    http_port: u16,
    pois: Vec<PoiConfig>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            approach_multiplier: DEFAULT_APPROACH_MULTIPLIER,
            hysteresis_factor: DEFAULT_HYSTERESIS_FACTOR,
            playback_mode: default_playback_mode(),
            player_command: default_player_command(),
            player_args: default_player_args(),
            simulated_clip_secs: default_simulated_clip_secs(),
            location_source: default_location_source(),
            replay_file: PathBuf::from(default_replay_file()),
            replay_interval_ms: default_replay_interval_ms(),
            fix_timeout_secs: default_fix_timeout_secs(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_topic: default_mqtt_topic(),
            mqtt_username: None,
            mqtt_password: None,
            metrics_interval_secs: default_metrics_interval(),
            http_port: 0,
            pois: Self::default_pois(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Built-in tour: four stops around central Tremembé, 70 m trigger radius each
    fn default_pois() -> Vec<PoiConfig> {
        const BASE: &str = "https://res.cloudinary.com/dpfvffi9k/video/upload";
        let poi = |id: &str, name: &str, description: &str, audio: &str, lat: f64, lon: f64| {
            PoiConfig {
                id: id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                audio_src: format!("{BASE}/{audio}"),
                latitude: lat,
                longitude: lon,
                trigger_radius_m: 70.0,
            }
        };

        vec![
            poi(
                "poi_rua_tremembe",
                "A Rua Tremembé",
                "Ponto de interesse localizado na Rua Tremembé.",
                "v1748486915/A_Rua_Trememb%C3%A9_hapmv8.wav",
                -22.97169125014227,
                -45.5445299255431,
            ),
            poi(
                "poi_rotatoria_horto",
                "A Rotatória do Hôrto Municipal",
                "Ponto de interesse localizado na Rotatória do Hôrto Municipal.",
                "v1748486914/A_Rotat%C3%B3ria_do_H%C3%B4rto_Municipal_p02ph1.wav",
                -22.96938896827124,
                -45.548962328443636,
            ),
            poi(
                "poi_antiga_estacao_tremembe",
                "A Antiga Estação Ferroviária de Tremembé",
                "Ponto de interesse na antiga estação ferroviária de Tremembé.",
                "v1748486914/A_Antiga_Esta%C3%A7%C3%A3o_Ferrovi%C3%A1ria_de_Trememb%C3%A9_u3jj2u.wav",
                -22.964115622280687,
                -45.548857741029316,
            ),
            poi(
                "poi_prefeitura_tremembe",
                "A Prefeitura de Tremembé",
                "Ponto de interesse na Prefeitura de Tremembé.",
                "v1748486914/A_Prefeitura_de_Trememb%C3%A9_l5dp7q.wav",
                -22.961766293765745,
                -45.54525080657641,
            ),
        ]
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config.validate().with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            approach_multiplier: toml_config.guide.approach_multiplier,
            hysteresis_factor: toml_config.guide.hysteresis_factor,
            playback_mode: toml_config.playback.mode,
            player_command: toml_config.playback.command,
            player_args: toml_config.playback.args,
            simulated_clip_secs: toml_config.playback.simulated_clip_secs,
            location_source: toml_config.location.source,
            replay_file: PathBuf::from(toml_config.location.replay_file),
            replay_interval_ms: toml_config.location.replay_interval_ms,
            fix_timeout_secs: toml_config.location.fix_timeout_secs,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            http_port: toml_config.metrics.http_port,
            pois: toml_config.pois,
            config_file,
        }
    }

    /// Semantic checks that TOML typing cannot express
    ///
    /// POI geometry and locators are checked by the registry.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.approach_multiplier.is_finite() || self.approach_multiplier < 1.0 {
            bail!("guide.approach_multiplier must be >= 1.0, got {}", self.approach_multiplier);
        }
        if !self.hysteresis_factor.is_finite() || self.hysteresis_factor < 1.0 {
            bail!("guide.hysteresis_factor must be >= 1.0, got {}", self.hysteresis_factor);
        }
        if self.pois.is_empty() {
            bail!("no [[pois]] configured");
        }
        if self.fix_timeout_secs == 0 {
            bail!("location.fix_timeout_secs must be > 0");
        }
        Ok(())
    }

    /// Load configuration - a missing file falls back to defaults, an invalid one is an error
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(config_file = %path.display(), "config_file_missing_using_defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    // Getters for all config fields
    pub fn approach_multiplier(&self) -> f64 {
        self.approach_multiplier
    }

    pub fn hysteresis_factor(&self) -> f64 {
        self.hysteresis_factor
    }

    pub fn playback_mode(&self) -> PlaybackMode {
        self.playback_mode
    }

    pub fn player_command(&self) -> &str {
        &self.player_command
    }

    pub fn player_args(&self) -> &[String] {
        &self.player_args
    }

    pub fn simulated_clip_secs(&self) -> u64 {
        self.simulated_clip_secs
    }

    pub fn location_source(&self) -> LocationSourceKind {
        self.location_source
    }

    pub fn replay_file(&self) -> &Path {
        &self.replay_file
    }

    pub fn replay_interval_ms(&self) -> u64 {
        self.replay_interval_ms
    }

    pub fn fix_timeout_secs(&self) -> u64 {
        self.fix_timeout_secs
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn pois(&self) -> &[PoiConfig] {
        &self.pois
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Command-line override: replay fixes from `path`
    pub fn with_replay_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.location_source = LocationSourceKind::Replay;
        self.replay_file = path.into();
        self
    }

    /// Command-line override: simulate playback instead of spawning a player
    pub fn with_simulated_playback(mut self) -> Self {
        self.playback_mode = PlaybackMode::Simulated;
        self
    }

    /// Builder method for tests to set the hysteresis factor
    #[cfg(test)]
    pub fn with_hysteresis_factor(mut self, factor: f64) -> Self {
        self.hysteresis_factor = factor;
        self
    }

    /// Builder method for tests to set the approach multiplier
    #[cfg(test)]
    pub fn with_approach_multiplier(mut self, multiplier: f64) -> Self {
        self.approach_multiplier = multiplier;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.approach_multiplier(), 2.5);
        assert_eq!(config.hysteresis_factor(), 1.1);
        assert_eq!(config.playback_mode(), PlaybackMode::Command);
        assert_eq!(config.player_command(), "mpv");
        assert_eq!(config.location_source(), LocationSourceKind::Replay);
        assert_eq!(config.fix_timeout_secs(), 20);
        assert_eq!(config.mqtt_topic(), "owntracks/+/+");
        assert_eq!(config.http_port(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_pois() {
        let config = Config::default();
        assert_eq!(config.pois().len(), 4);
        assert!(config.pois().iter().all(|p| p.trigger_radius_m == 70.0));
        assert_eq!(config.pois()[0].id, "poi_rua_tremembe");
        assert!(config.pois()[0].audio_src.starts_with("https://res.cloudinary.com/"));
    }

    #[test]
    fn test_validate_rejects_small_multipliers() {
        let config = Config::default().with_approach_multiplier(0.5);
        assert!(config.validate().is_err());

        let config = Config::default().with_hysteresis_factor(0.9);
        assert!(config.validate().is_err());

        let config = Config::default().with_hysteresis_factor(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_sections_default() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[[pois]]
id = "a"
name = "A"
audio_src = "https://host/a.wav"
latitude = 1.0
longitude = 2.0
trigger_radius_m = 50.0
"#,
        )
        .unwrap();

        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.approach_multiplier(), DEFAULT_APPROACH_MULTIPLIER);
        assert_eq!(config.player_args(), &["--no-video", "--really-quiet"]);
        assert_eq!(config.replay_interval_ms(), 1000);
        assert_eq!(config.pois().len(), 1);
        assert_eq!(config.pois()[0].description, "");
    }

    #[test]
    fn test_command_line_overrides() {
        let config = Config::default().with_replay_file("walks/other.jsonl").with_simulated_playback();
        assert_eq!(config.location_source(), LocationSourceKind::Replay);
        assert_eq!(config.replay_file(), Path::new("walks/other.jsonl"));
        assert_eq!(config.playback_mode(), PlaybackMode::Simulated);
    }
}
