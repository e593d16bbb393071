//! # 固件配置
//!
//! TOML 文件，所有段与字段都有默认值：文件缺失或为空时即为内置配置。
//!
//! ```toml
//! [loop]
//! frequency_hz = 50.0
//!
//! [bus]
//! interfaces = ["can0", "can1", "can2", "can3"]
//!
//! [safety]
//! overrun_degrade_threshold = 5
//! ```

use anyhow::{Context, Result, bail};
use kbot_protocol::RobotConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 固件配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirmwareConfig {
    #[serde(rename = "loop")]
    pub control_loop: LoopConfig,
    pub bus: BusConfig,
    pub safety: SafetyConfig,
    pub safe_stop: SafeStopConfig,
    pub homing: HomingConfig,
    pub udp: UdpConfig,
    pub sine: SineConfig,
    /// 替换内置执行器表
    pub robot: Option<RobotConfig>,
    pub log: LogConfig,
}

impl FirmwareConfig {
    /// 从文件加载并校验
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// 文件存在则加载，否则使用内置配置
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("TOML parse error")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("TOML serialize error")
    }

    /// 生效的执行器表
    pub fn robot(&self) -> RobotConfig {
        self.robot.clone().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        let l = &self.control_loop;
        if !(l.frequency_hz.is_finite() && l.frequency_hz > 0.0) {
            bail!("loop.frequency_hz must be positive, got {}", l.frequency_hz);
        }

        let b = &self.bus;
        if b.interfaces.is_empty() {
            bail!("bus.interfaces must not be empty");
        }
        if b.scan_first > b.scan_last {
            bail!(
                "bus.scan_first ({}) must not exceed bus.scan_last ({})",
                b.scan_first,
                b.scan_last
            );
        }
        if b.io_timeout_ms == 0 || b.ping_timeout_ms == 0 {
            bail!("bus timeouts must be at least 1 ms");
        }

        let s = &self.safety;
        if s.overrun_degrade_threshold == 0 {
            bail!("safety.overrun_degrade_threshold must be at least 1");
        }
        if let Some(stop) = s.overrun_safe_stop_threshold
            && stop < s.overrun_degrade_threshold
        {
            bail!(
                "safety.overrun_safe_stop_threshold ({}) must not be below overrun_degrade_threshold ({})",
                stop,
                s.overrun_degrade_threshold
            );
        }
        if s.fault_log_capacity == 0 {
            bail!("safety.fault_log_capacity must be at least 1");
        }
        if s.max_startup_angle.is_nan() || s.max_startup_angle <= 0.0 {
            bail!("safety.max_startup_angle must be positive");
        }

        if self.safe_stop.ramp_steps < 2 {
            bail!("safe_stop.ramp_steps must be at least 2");
        }
        if self.homing.ramp_steps < 2 {
            bail!("homing.ramp_steps must be at least 2");
        }
        check_scaling("homing.max_scaling", self.homing.max_scaling)?;
        check_scaling("sine.max_scaling", self.sine.max_scaling)?;
        check_scaling("sine.torque_fraction", self.sine.torque_fraction)?;
        if self.sine.period_ms == 0 {
            bail!("sine.period_ms must be at least 1");
        }

        if self.log.channel_capacity == 0 {
            bail!("log.channel_capacity must be at least 1");
        }

        if let Some(robot) = &self.robot {
            robot.validate().context("invalid [robot] table")?;
            if robot.actuators.is_empty() {
                bail!("[robot] table has no actuators");
            }
        }
        Ok(())
    }
}

fn check_scaling(field: &str, value: f32) -> Result<()> {
    if !(value > 0.0 && value <= 1.0) {
        bail!("{} must be in (0, 1], got {}", field, value);
    }
    Ok(())
}

/// `[loop]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    pub frequency_hz: f64,
    /// 诊断/测试用的 tick 上限
    pub max_ticks: Option<u64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 50.0,
            max_ticks: None,
        }
    }
}

impl LoopConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frequency_hz)
    }
}

/// `[bus]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    pub interfaces: Vec<String>,
    pub scan_first: u8,
    pub scan_last: u8,
    pub ping_timeout_ms: u64,
    /// 单个执行器的应答预算
    pub io_timeout_ms: u64,
    pub missing_response_ttl_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interfaces: (0..7).map(|i| format!("can{}", i)).collect(),
            scan_first: 10,
            scan_last: 49,
            ping_timeout_ms: 5,
            io_timeout_ms: 2,
            missing_response_ttl_ms: 1000,
        }
    }
}

impl BusConfig {
    pub fn scan_range(&self) -> RangeInclusive<u8> {
        self.scan_first..=self.scan_last
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn missing_response_ttl(&self) -> Duration {
        Duration::from_millis(self.missing_response_ttl_ms)
    }
}

/// `[safety]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SafetyConfig {
    /// 连续超时 tick 数达到该值进入 Degraded
    pub overrun_degrade_threshold: u32,
    /// 连续超时 tick 数达到该值进入 SafeStop（缺省关闭）
    pub overrun_safe_stop_threshold: Option<u32>,
    /// 遥测超过该 tick 数未更新视为陈旧
    pub staleness_ticks: u64,
    pub fault_log_capacity: usize,
    /// 启动时允许的最大关节角（rad）
    pub max_startup_angle: f32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            overrun_degrade_threshold: 5,
            overrun_safe_stop_threshold: None,
            staleness_ticks: 10,
            fault_log_capacity: 256,
            max_startup_angle: 2.0,
        }
    }
}

/// `[safe_stop]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SafeStopConfig {
    pub ramp_steps: usize,
    pub step_ms: u64,
}

impl Default for SafeStopConfig {
    fn default() -> Self {
        Self {
            ramp_steps: 50,
            step_ms: 100,
        }
    }
}

impl SafeStopConfig {
    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }
}

/// `[homing]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HomingConfig {
    pub ramp_steps: usize,
    pub step_ms: u64,
    pub max_scaling: f32,
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self {
            ramp_steps: 30,
            step_ms: 100,
            max_scaling: 1.0,
        }
    }
}

impl HomingConfig {
    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }
}

/// `[udp]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UdpConfig {
    pub bind: String,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:10000".to_string(),
        }
    }
}

/// `[sine]` 正弦诊断
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SineConfig {
    /// rad
    pub amplitude: f32,
    pub frequency_hz: f32,
    pub max_scaling: f32,
    /// 力矩上限相对配置值的比例
    pub torque_fraction: f32,
    pub period_ms: u64,
}

impl Default for SineConfig {
    fn default() -> Self {
        Self {
            amplitude: 0.3,
            frequency_hz: 0.5,
            max_scaling: 0.1,
            torque_fraction: 0.1,
            period_ms: 20,
        }
    }
}

impl SineConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// `[log]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// 缺省为 `~/kinfer-logs/<policy>_<timestamp>`
    pub dir: Option<PathBuf>,
    pub channel_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            channel_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = FirmwareConfig::from_toml_str("").unwrap();
        assert_eq!(config, FirmwareConfig::default());
        assert_eq!(config.control_loop.period(), Duration::from_millis(20));
        assert_eq!(config.bus.interfaces.len(), 7);
        assert_eq!(config.bus.scan_range(), 10..=49);
        assert_eq!(config.safety.overrun_degrade_threshold, 5);
        assert_eq!(config.safety.overrun_safe_stop_threshold, None);
        assert_eq!(config.udp.bind, "0.0.0.0:10000");
    }

    #[test]
    fn test_partial_override() {
        let config = FirmwareConfig::from_toml_str(
            r#"
            [loop]
            frequency_hz = 100.0
            max_ticks = 10

            [bus]
            interfaces = ["can0", "can1"]

            [safety]
            overrun_safe_stop_threshold = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.control_loop.period(), Duration::from_millis(10));
        assert_eq!(config.control_loop.max_ticks, Some(10));
        assert_eq!(config.bus.interfaces, vec!["can0", "can1"]);
        assert_eq!(config.bus.io_timeout_ms, 2);
        assert_eq!(config.safety.overrun_safe_stop_threshold, Some(50));
        assert_eq!(config.safety.staleness_ticks, 10);
    }

    #[test]
    fn test_validation_errors() {
        assert!(FirmwareConfig::from_toml_str("[loop]\nfrequency_hz = 0.0").is_err());
        assert!(FirmwareConfig::from_toml_str("[homing]\nmax_scaling = 1.5").is_err());
        assert!(FirmwareConfig::from_toml_str("[safe_stop]\nramp_steps = 1").is_err());
        assert!(FirmwareConfig::from_toml_str("[bus]\ninterfaces = []").is_err());
        assert!(
            FirmwareConfig::from_toml_str(
                "[safety]\noverrun_degrade_threshold = 5\noverrun_safe_stop_threshold = 2"
            )
            .is_err()
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(FirmwareConfig::from_toml_str("[loop]\nfrequncy_hz = 50.0").is_err());
    }

    #[test]
    fn test_robot_table_override() {
        let config = FirmwareConfig::from_toml_str(
            r#"
            [robot]
            version = 2

            [[robot.actuators]]
            id = 11
            full_name = "dof_left_shoulder_pitch_03"
            actuator_type = "Robstride03"
            kp = 50.0
            kd = 5.0
            max_torque = 30.0
            "#,
        )
        .unwrap();
        let robot = config.robot();
        assert_eq!(robot.version, 2);
        assert_eq!(robot.actuators.len(), 1);
        assert_eq!(robot.actuators[0].joint_bias, 0.0);
        assert_eq!(robot.actuators[0].torque_limit(), 30.0);
    }

    #[test]
    fn test_robot_table_validated() {
        let result = FirmwareConfig::from_toml_str(
            r#"
            [robot]
            version = 2

            [[robot.actuators]]
            id = 11
            full_name = "dof_left_shoulder_pitch_03"
            actuator_type = "Robstride03"
            kp = 50.0
            kd = 5.0
            max_torque = 500.0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = FirmwareConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(FirmwareConfig::from_toml_str(&text).unwrap(), config);
    }
}
