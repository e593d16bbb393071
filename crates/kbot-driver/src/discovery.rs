//! 接口发现
//!
//! 逐个打开配置的接口：打开失败只记录日志并保留为 `Unreachable`，
//! 只有全部失败时才返回 `NoBusAvailable`。

use crate::bus::{BusHandle, BusSet};
use crate::error::DriverError;
use kbot_can::{CanAdapter, CanDeviceErrorKind, CanError};
use tracing::{info, warn};

/// 默认扫描的接口
pub const DEFAULT_INTERFACES: [&str; 7] = ["can0", "can1", "can2", "can3", "can4", "can5", "can6"];

pub fn default_interfaces() -> Vec<String> {
    DEFAULT_INTERFACES.iter().map(|s| s.to_string()).collect()
}

/// 用给定的打开函数启动接口列表
pub fn bring_up<A, F>(interfaces: &[String], mut open: F) -> Result<BusSet<A>, DriverError>
where
    A: CanAdapter,
    F: FnMut(&str) -> Result<A, CanError>,
{
    let mut set = BusSet::new();
    for name in interfaces {
        match open(name) {
            Ok(adapter) => {
                info!("CAN interface {} up", name);
                set.push(BusHandle::reachable(name.clone(), adapter));
            },
            Err(CanError::Device(e)) if e.kind == CanDeviceErrorKind::NotFound => {
                info!("CAN interface {} not present", name);
                set.push(BusHandle::unreachable(name.clone()));
            },
            Err(e) => {
                warn!("CAN interface {} unavailable: {}", name, e);
                set.push(BusHandle::unreachable(name.clone()));
            },
        }
    }
    if set.reachable_count() == 0 {
        return Err(DriverError::NoBusAvailable {
            attempted: interfaces.len(),
        });
    }
    Ok(set)
}

/// 打开 SocketCAN 接口
#[cfg(target_os = "linux")]
pub fn discover_buses(
    interfaces: &[String],
) -> Result<BusSet<kbot_can::SocketCanAdapter>, DriverError> {
    bring_up(interfaces, |name| kbot_can::SocketCanAdapter::new(name))
}
