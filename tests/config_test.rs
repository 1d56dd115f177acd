//! Integration tests for configuration loading

use audio_tour::domain::types::PoiId;
use audio_tour::infra::{Config, LocationSourceKind, PlaybackMode};
use audio_tour::io::ReplaySource;
use audio_tour::services::{PoiRegistry, RegistryError};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[guide]
approach_multiplier = 3.0
hysteresis_factor = 1.2

[playback]
mode = "simulated"
simulated_clip_secs = 12

[location]
source = "mqtt"
fix_timeout_secs = 45

[mqtt]
host = "test-host"
port = 1884
topic = "owntracks/guide/phone"
username = "guide"

[metrics]
interval_secs = 15
http_port = 9091

[[pois]]
id = "fountain"
name = "Fountain"
audio_src = "audio/fountain.mp3"
latitude = -22.97
longitude = -45.54
trigger_radius_m = 40.0
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.approach_multiplier(), 3.0);
    assert_eq!(config.hysteresis_factor(), 1.2);
    assert_eq!(config.playback_mode(), PlaybackMode::Simulated);
    assert_eq!(config.simulated_clip_secs(), 12);
    assert_eq!(config.location_source(), LocationSourceKind::Mqtt);
    assert_eq!(config.fix_timeout_secs(), 45);
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_username(), Some("guide"));
    assert_eq!(config.mqtt_password(), None);
    assert_eq!(config.http_port(), 9091);
    assert_eq!(config.pois().len(), 1);
    assert_eq!(config.pois()[0].trigger_radius_m, 40.0);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml").unwrap();
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.playback_mode(), PlaybackMode::Command);
    assert_eq!(config.pois().len(), 4);
}

#[test]
fn test_invalid_multiplier_rejected() {
    let temp_file = write_config(
        r#"
[guide]
hysteresis_factor = 0.8

[[pois]]
id = "fountain"
name = "Fountain"
audio_src = "audio/fountain.mp3"
latitude = -22.97
longitude = -45.54
trigger_radius_m = 40.0
"#,
    );

    let err = Config::load_from_path(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("hysteresis_factor"));
}

#[test]
fn test_empty_poi_list_rejected() {
    let temp_file = write_config("[guide]\napproach_multiplier = 2.0\n");
    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_duplicate_poi_ids_rejected_by_registry() {
    let temp_file = write_config(
        r#"
[[pois]]
id = "fountain"
name = "Fountain"
audio_src = "audio/fountain.mp3"
latitude = -22.97
longitude = -45.54
trigger_radius_m = 40.0

[[pois]]
id = "fountain"
name = "Fountain again"
audio_src = "audio/fountain2.mp3"
latitude = -22.96
longitude = -45.54
trigger_radius_m = 40.0
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();
    let err = PoiRegistry::from_config(config.pois()).unwrap_err();
    assert_eq!(err, RegistryError::DuplicateId(PoiId::from("fountain")));
}

#[test]
fn test_bundled_dev_config_and_walk() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let config = Config::from_file(root.join("config/dev.toml")).unwrap();

    assert_eq!(config.playback_mode(), PlaybackMode::Simulated);
    assert_eq!(config.location_source(), LocationSourceKind::Replay);

    let registry = PoiRegistry::from_config(config.pois()).unwrap();
    assert_eq!(registry.len(), 4);
    assert!(registry.get(&PoiId::from("poi_prefeitura_tremembe")).is_some());

    let replay = ReplaySource::from_file(
        root.join(config.replay_file()),
        Duration::from_millis(config.replay_interval_ms()),
    )
    .unwrap();
    assert!(replay.remaining() > 100);
}
