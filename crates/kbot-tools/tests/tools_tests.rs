//! 配置文件与 tick 记录的文件级测试

use kbot_tools::{FirmwareConfig, TickLogger, TickRecord, TickStatistics, read_tick_log};
use std::io::Write;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

#[test]
fn test_load_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[loop]
frequency_hz = 100.0
max_ticks = 20

[bus]
interfaces = ["can0", "can1"]

[safety]
overrun_degrade_threshold = 3
overrun_safe_stop_threshold = 10
"#
    )
    .unwrap();

    let config = FirmwareConfig::load(file.path()).unwrap();
    assert_eq!(config.control_loop.period(), Duration::from_millis(10));
    assert_eq!(config.control_loop.max_ticks, Some(20));
    assert_eq!(config.bus.interfaces, vec!["can0", "can1"]);
    assert_eq!(config.safety.overrun_safe_stop_threshold, Some(10));
    // 未写出的段保持默认
    assert_eq!(config.homing.ramp_steps, 30);
    assert_eq!(config.robot().actuators.len(), 22);
}

#[test]
fn test_missing_file_is_error() {
    let dir = TempDir::new().unwrap();
    let err = FirmwareConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(format!("{:#}", err).contains("absent.toml"));
}

#[test]
fn test_invalid_file_names_path() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[safe_stop]\nramp_steps = 1").unwrap();
    let err = FirmwareConfig::load(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("ramp_steps"));
}

#[test]
fn test_tick_log_with_statistics() {
    let dir = TempDir::new().unwrap();
    let logger = TickLogger::create(dir.path(), 64).unwrap();
    let mut stats = TickStatistics::new();
    for step in 0..10u64 {
        stats.record(Duration::from_millis(20));
        logger.log(TickRecord {
            step_id: step,
            safety_state: "Running".into(),
            ..Default::default()
        });
    }
    let path = logger.path().to_path_buf();
    assert_eq!(logger.finish().unwrap(), 10);

    let ids: Vec<u64> = read_tick_log(path).unwrap().iter().map(|r| r.step_id).collect();
    assert_eq!(ids, (0..10).collect::<Vec<_>>());
    assert_eq!(stats.snapshot().count, 10);
}
