// Command and configuration value parsing

use edge_audio_node::audio::CaptureSchedule;
use edge_audio_node::error::NodeError;
use edge_audio_node::node::{parse_bool, Command, ConfigUpdate};

const SCHEDULE: CaptureSchedule = CaptureSchedule {
    duration_ms: 500,
    interval_ms: 5000,
};

fn rejection(key: &str, value: &str) -> String {
    match ConfigUpdate::parse(key, value, SCHEDULE) {
        Err(NodeError::Validation(message)) => message,
        other => panic!("expected validation error for {}={:?}, got {:?}", key, value, other),
    }
}

#[test]
fn test_commands_are_case_insensitive() {
    assert_eq!(Command::parse("ping"), Command::Ping);
    assert_eq!(Command::parse("  PING\n"), Command::Ping);
    assert_eq!(Command::parse("Start_Audio_Data"), Command::StartAudioData);
    assert_eq!(Command::parse("stop_audio"), Command::StopAudio);
    assert_eq!(Command::parse("audio_status"), Command::AudioStatus);
    assert_eq!(Command::parse("RESTART"), Command::Restart);
    assert_eq!(Command::parse(" reboot "), Command::Unknown("reboot".to_string()));
}

#[test]
fn test_parse_bool_forms() {
    for value in ["true", "TRUE", "1", "on"] {
        assert_eq!(parse_bool(value), Some(true));
    }
    for value in ["false", "0", "Off"] {
        assert_eq!(parse_bool(value), Some(false));
    }
    assert_eq!(parse_bool("yes please"), None);
}

#[test]
fn test_volume_threshold_range() {
    assert_eq!(
        ConfigUpdate::parse("volume_threshold", "0.25", SCHEDULE),
        Ok(ConfigUpdate::VolumeThreshold(0.25))
    );
    assert!(rejection("volume_threshold", "0").starts_with("invalid volume_threshold:"));
    assert!(rejection("volume_threshold", "1.0").starts_with("invalid volume_threshold:"));
    assert!(rejection("volume_threshold", "loud").starts_with("invalid volume_threshold:"));
    assert!(rejection("volume_threshold", "NaN").starts_with("invalid volume_threshold:"));
}

#[test]
fn test_play_tone_values() {
    assert_eq!(
        ConfigUpdate::parse("play_tone", "440, 200", SCHEDULE),
        Ok(ConfigUpdate::PlayTone {
            frequency_hz: 440,
            duration_ms: 200
        })
    );
    assert!(rejection("play_tone", "19,200").contains("frequency"));
    assert!(rejection("play_tone", "20001,200").contains("frequency"));
    assert!(rejection("play_tone", "440,0").contains("duration"));
    assert!(rejection("play_tone", "440,10001").contains("duration"));
    assert!(rejection("play_tone", "440").starts_with("invalid play_tone:"));
}

#[test]
fn test_capture_ranges() {
    assert_eq!(
        ConfigUpdate::parse("capture_duration_ms", "100", SCHEDULE),
        Ok(ConfigUpdate::CaptureDurationMs(100))
    );
    assert!(rejection("capture_duration_ms", "99").starts_with("invalid capture_duration_ms:"));
    assert!(rejection("capture_duration_ms", "10001").starts_with("invalid capture_duration_ms:"));

    // The interval may not be shorter than the current capture window
    assert_eq!(
        ConfigUpdate::parse("capture_interval_ms", "500", SCHEDULE),
        Ok(ConfigUpdate::CaptureIntervalMs(500))
    );
    assert!(rejection("capture_interval_ms", "499").starts_with("invalid capture_interval_ms:"));
    assert!(rejection("capture_interval_ms", "3600001").starts_with("invalid capture_interval_ms:"));
}

#[test]
fn test_debug_and_unknown_keys() {
    assert_eq!(
        ConfigUpdate::parse("debug", "on", SCHEDULE),
        Ok(ConfigUpdate::Debug(true))
    );
    assert!(rejection("debug", "maybe").starts_with("invalid debug:"));
    assert_eq!(rejection("gain", "3"), "unknown config key: gain");
}
