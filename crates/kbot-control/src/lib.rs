//! # Kbot Control
//!
//! 固定周期控制循环及其协作者：
//!
//! - `sensor` - IMU + 关节状态采集，失败时沿用最近有效值
//! - `command` - 键盘 / UDP 命令源、手势、直接关节覆盖
//! - `policy` - 注入式策略前向函数与执行器
//! - `safety` - `Running → Degraded → SafeStop` 状态机与故障日志
//! - `scheduler` - 50 Hz 控制循环
//! - `sequence` - 启动检查、归零爬升、安全停机爬降
//! - `sine` - 正弦诊断
//!
//! 控制线程只在 tick 开始时读取一次命令快照，命令源线程之间没有锁。

pub mod command;
mod error;
pub mod fault;
pub mod imu;
mod layout;
pub mod policy;
pub mod safety;
pub mod scheduler;
pub mod sensor;
pub mod sequence;
pub mod sine;
mod state;

pub use command::{
    CommandArbiter, CommandField, CommandSourceKind, CommandState, CommandVector, KeyboardSource,
    SharedCommand, UdpCommandListener, apply_packet, spawn_keyboard_reader,
};
pub use error::{ControlError, ImuError, PolicyError};
pub use fault::{Fault, FaultKind, FaultLog, FaultSource, Severity};
pub use imu::{DummyImu, ImuReading, ImuSource};
pub use layout::JointLayout;
pub use policy::{HoldPosePolicy, Policy, PolicyExecutor, PolicyInput, PolicyMetadata};
pub use safety::{SafetyMonitor, SafetyState};
pub use scheduler::{ControlLoop, LoopReport, StopReason};
pub use sensor::SensorAggregator;
pub use sequence::{enable_and_home, log_ramp, safe_stop_ramp, startup_checks};
pub use sine::{SineReport, SineWave, run_sine_wave};
pub use state::{JointReading, RobotState};
