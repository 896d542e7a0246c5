//! E2E tests for playback configuration
//!
//! Tests config file round-trip, defaults, fallback on bad input, and that
//! config values reach the negotiated session and the round plan.

use playtester::audio::device::DeviceSession;
use playtester::audio::sim::SimulatedDevice;
use playtester::config::{ConfigError, PlaybackConfig};
use playtester::{ElapsedClock, PlaybackDriver, SquareWave};
use std::time::Duration;

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("playtester.json");

    let config = PlaybackConfig {
        device: "hw:1,0".to_string(),
        sample_rate: 48000,
        period_frames: 512,
        repetitions: 5,
        pause_ms: 250,
        max_retries: Some(4),
        ..Default::default()
    };
    config.save(&path).unwrap();

    let loaded = PlaybackConfig::load(&path);
    assert_eq!(loaded, config);
    assert_eq!(loaded.pause(), Duration::from_millis(250));
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = PlaybackConfig::load(&dir.path().join("missing.json"));
    assert_eq!(config, PlaybackConfig::default());
}

#[test]
fn test_load_malformed_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ \"device\": ").unwrap();

    assert!(matches!(
        PlaybackConfig::try_load(&path),
        Err(ConfigError::Parse { .. })
    ));
    assert_eq!(PlaybackConfig::load(&path), PlaybackConfig::default());
}

#[test]
fn test_config_drives_negotiation_and_rounds() {
    let config: PlaybackConfig =
        serde_json::from_str(r#"{"period_frames": 256, "repetitions": 2, "pause_ms": 0}"#)
            .unwrap();

    let mut session = DeviceSession::from_device(&config.device, SimulatedDevice::new());
    session.negotiate(config.request()).unwrap();
    assert_eq!(session.device_name(), "default");

    let mut driver = PlaybackDriver::new(session, SquareWave::default(), ElapsedClock::start())
        .unwrap()
        .with_plan(config.plan())
        .with_pause(config.pause());
    assert_eq!(driver.buffer().frames(), 256);

    let report = driver.run_round().unwrap();
    assert_eq!(report.full_writes, 2);
    assert_eq!(driver.session().device().frames_written(), 2 * 256);
}
