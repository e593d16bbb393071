//! # Kbot Tools - 配置与运行记录
//!
//! **依赖原则**: 只依赖 `kbot-protocol`，不依赖驱动与控制层
//!
//! ## 包含模块
//!
//! - `config` - 固件 TOML 配置（全部字段有默认值）
//! - `statistics` - tick 间隔统计（流式）
//! - `tick_log` - 每 tick NDJSON 记录（后台线程写盘）

pub mod config;
pub mod statistics;
pub mod tick_log;

pub use config::{
    BusConfig, FirmwareConfig, HomingConfig, LogConfig, LoopConfig, SafeStopConfig, SafetyConfig,
    SineConfig, UdpConfig,
};
pub use statistics::{IntervalStatistics, TickStatistics};
pub use tick_log::{
    StageTimings, TICK_LOG_FILE, TickLogger, TickRecord, default_log_dir, read_tick_log,
};
