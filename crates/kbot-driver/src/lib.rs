//! # Kbot Driver
//!
//! 执行器总线驱动：在多条 CAN 总线上收发 Robstride 协议帧。
//!
//! - 接口发现（`can0..can6`），单个接口失败不影响其余接口
//! - 执行器 → 接口亲和缓存，未命中时按发现顺序回退
//! - 力矩上限设置、遥测轮询、每 tick 批量 PD 指令
//! - 故障标志收集（由上层每 tick 取走）
//! - 迟到应答回收
//!
//! 所有操作都是同步且有界的：每次等待都有截止时间，
//! 单个执行器不应答不会阻塞其余执行器。

mod actuator;
mod builder;
pub mod bus;
pub mod discovery;
mod driver;
mod error;
pub mod metrics;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use actuator::Actuator;
pub use builder::{DEFAULT_SCAN_RANGE, DriverBuilder};
pub use bus::{BusHandle, BusHealth, BusSet, PendingResponse};
#[cfg(target_os = "linux")]
pub use discovery::discover_buses;
pub use discovery::{DEFAULT_INTERFACES, bring_up, default_interfaces};
pub use driver::{ActuatorBusDriver, BusFault, DriverConfig, ScanReport, TorqueLimitAck};
pub use error::DriverError;
pub use metrics::{DriverMetrics, MetricsSnapshot};

#[cfg(any(test, feature = "mock"))]
pub use mock::{Behavior, SimulatedActuator, SimulatedBus};
