//! Builder 模式实现
//!
//! 链式构造 `ActuatorBusDriver`：接口发现 → 驱动创建 → Ping 扫描。

use crate::bus::BusSet;
use crate::discovery::{bring_up, default_interfaces};
use crate::driver::{ActuatorBusDriver, DriverConfig, ScanReport};
use crate::error::DriverError;
use kbot_can::{CanAdapter, CanError};
use kbot_protocol::RobotConfig;
use std::ops::RangeInclusive;
use std::time::Duration;

/// 默认扫描的执行器 ID 范围
pub const DEFAULT_SCAN_RANGE: RangeInclusive<u8> = 10..=49;

/// 驱动 Builder
///
/// ```no_run
/// use kbot_driver::DriverBuilder;
/// use kbot_protocol::RobotConfig;
///
/// let (driver, report) = DriverBuilder::new(RobotConfig::default())
///     .interfaces(["can0", "can1"])
///     .connect()
///     .unwrap();
/// println!("found {} actuators", report.found.len());
/// ```
#[derive(Debug, Clone)]
pub struct DriverBuilder {
    robot: RobotConfig,
    config: DriverConfig,
    interfaces: Vec<String>,
    scan_range: RangeInclusive<u8>,
}

impl DriverBuilder {
    pub fn new(robot: RobotConfig) -> Self {
        Self {
            robot,
            config: DriverConfig::default(),
            interfaces: default_interfaces(),
            scan_range: DEFAULT_SCAN_RANGE,
        }
    }

    pub fn interfaces<I, S>(mut self, interfaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interfaces = interfaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    pub fn missing_response_ttl(mut self, ttl: Duration) -> Self {
        self.config.missing_response_ttl = ttl;
        self
    }

    pub fn scan_range(mut self, range: RangeInclusive<u8>) -> Self {
        self.scan_range = range;
        self
    }

    /// 用已打开的总线集合创建驱动（不扫描）
    pub fn build<A: CanAdapter>(self, buses: BusSet<A>) -> Result<ActuatorBusDriver<A>, DriverError> {
        self.robot.validate()?;
        if buses.reachable_count() == 0 {
            return Err(DriverError::NoBusAvailable {
                attempted: buses.len(),
            });
        }
        Ok(ActuatorBusDriver::new(buses, &self.robot, self.config))
    }

    /// 创建驱动并扫描
    pub fn build_and_scan<A: CanAdapter>(
        self,
        buses: BusSet<A>,
    ) -> Result<(ActuatorBusDriver<A>, ScanReport), DriverError> {
        let range = self.scan_range.clone();
        let mut driver = self.build(buses)?;
        let report = driver.scan(range);
        Ok((driver, report))
    }

    /// 用自定义打开函数发现接口、创建驱动并扫描
    pub fn connect_with<A, F>(self, open: F) -> Result<(ActuatorBusDriver<A>, ScanReport), DriverError>
    where
        A: CanAdapter,
        F: FnMut(&str) -> Result<A, CanError>,
    {
        let buses = bring_up(&self.interfaces, open)?;
        self.build_and_scan(buses)
    }

    /// SocketCAN 接口
    #[cfg(target_os = "linux")]
    pub fn connect(
        self,
    ) -> Result<(ActuatorBusDriver<kbot_can::SocketCanAdapter>, ScanReport), DriverError> {
        let buses = crate::discovery::discover_buses(&self.interfaces)?;
        self.build_and_scan(buses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusHandle;
    use kbot_can::MockCanAdapter;

    #[test]
    fn test_build_rejects_empty_bus_set() {
        let mut buses: BusSet<MockCanAdapter> = BusSet::new();
        buses.push(BusHandle::unreachable("can0"));
        let result = DriverBuilder::new(RobotConfig::default()).build(buses);
        assert!(matches!(result, Err(DriverError::NoBusAvailable { attempted: 1 })));
    }

    #[test]
    fn test_build_rejects_invalid_robot() {
        let mut robot = RobotConfig::default();
        let dup = robot.actuators[0].clone();
        robot.actuators.push(dup);
        let mut buses = BusSet::new();
        buses.push(BusHandle::from_adapter(MockCanAdapter::new("can0")));
        assert!(matches!(
            DriverBuilder::new(robot).build(buses),
            Err(DriverError::Protocol(_))
        ));
    }

    #[test]
    fn test_builder_settings() {
        let builder = DriverBuilder::new(RobotConfig::default())
            .interfaces(["can2"])
            .io_timeout(Duration::from_millis(3))
            .scan_range(11..=12);
        assert_eq!(builder.interfaces, vec!["can2".to_string()]);
        assert_eq!(builder.config.io_timeout, Duration::from_millis(3));
        assert_eq!(builder.scan_range, 11..=12);
    }
}
