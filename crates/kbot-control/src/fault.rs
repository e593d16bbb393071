//! 故障事件与有界故障日志

use kbot_driver::{BusFault, DriverError};
use kbot_protocol::{ActuatorFaultReport, ActuatorId, FaultCode};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// 故障来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultSource {
    Actuator(ActuatorId),
    Bus(String),
    Imu,
    /// 调度器（超时）
    Scheduler,
    Policy,
    Operator,
}

impl fmt::Display for FaultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultSource::Actuator(id) => write!(f, "actuator {}", id),
            FaultSource::Bus(name) => write!(f, "bus {}", name),
            FaultSource::Imu => write!(f, "imu"),
            FaultSource::Scheduler => write!(f, "scheduler"),
            FaultSource::Policy => write!(f, "policy"),
            FaultSource::Operator => write!(f, "operator"),
        }
    }
}

/// 故障类型
#[derive(Debug, Clone, PartialEq)]
pub enum FaultKind {
    NoResponse,
    Decode,
    /// 遥测超过阈值 tick 未更新
    Stale { age_ticks: u64 },
    /// 总线链路失效
    BusLost,
    /// 没有可达接口可用于发送
    Unrouted,
    /// 指令无法编码（超出执行器量程等）
    Encode,
    /// 执行器不在配置表中
    Unconfigured,
    ImuFailure,
    Overrun { elapsed: Duration },
    /// 执行器上报的故障码
    Actuator(FaultCode),
    InferenceFailure,
    StopRequested,
}

/// 故障分级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// 仅计数，由超时计数器升级
    Timing,
    /// 进入 Degraded
    Degrade,
    /// 进入 SafeStop
    Critical,
}

/// 一条故障事件
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub source: FaultSource,
    pub kind: FaultKind,
    pub tick: u64,
    pub detail: String,
}

impl Fault {
    pub fn new(source: FaultSource, kind: FaultKind, tick: u64, detail: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            tick,
            detail: detail.into(),
        }
    }

    /// 驱动层单执行器错误
    pub fn from_driver(actuator: ActuatorId, error: &DriverError, tick: u64) -> Self {
        let kind = match error {
            DriverError::NoResponse { .. } => FaultKind::NoResponse,
            DriverError::Decode { .. } => FaultKind::Decode,
            DriverError::Can(_) => FaultKind::BusLost,
            DriverError::Unrouted { .. } | DriverError::NoBusAvailable { .. } => FaultKind::Unrouted,
            DriverError::Protocol(_) => FaultKind::Encode,
            DriverError::UnknownActuator { .. } => FaultKind::Unconfigured,
        };
        Self::new(FaultSource::Actuator(actuator), kind, tick, error.to_string())
    }

    pub fn from_report(report: &ActuatorFaultReport, tick: u64) -> Self {
        Self::new(
            FaultSource::Actuator(report.actuator),
            FaultKind::Actuator(report.code),
            tick,
            report.code.description,
        )
    }

    pub fn from_bus(fault: &BusFault, tick: u64) -> Self {
        Self::new(
            FaultSource::Bus(fault.bus.clone()),
            FaultKind::BusLost,
            tick,
            fault.detail.clone(),
        )
    }

    pub fn severity(&self) -> Severity {
        match &self.kind {
            FaultKind::Overrun { .. } => Severity::Timing,
            FaultKind::NoResponse
            | FaultKind::Decode
            | FaultKind::Stale { .. }
            | FaultKind::BusLost
            | FaultKind::Unrouted
            | FaultKind::Encode
            | FaultKind::ImuFailure => Severity::Degrade,
            FaultKind::Actuator(code) if code.critical => Severity::Critical,
            FaultKind::Actuator(_) => Severity::Degrade,
            FaultKind::Unconfigured | FaultKind::InferenceFailure | FaultKind::StopRequested => {
                Severity::Critical
            },
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity() == Severity::Critical
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[tick {}] {}: {:?} ({})", self.tick, self.source, self.kind, self.detail)
    }
}

/// 有界故障日志，满时淘汰最旧条目并计数
#[derive(Debug, Clone)]
pub struct FaultLog {
    entries: VecDeque<Fault>,
    capacity: usize,
    evicted: u64,
    total: u64,
}

impl FaultLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
            total: 0,
        }
    }

    pub fn push(&mut self, fault: Fault) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(fault);
        self.total += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fault> {
        self.entries.iter()
    }

    /// 被淘汰的条目数
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// 累计记录数
    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbot_protocol::{CAN_ID_FAULT_CODES, FaultOrigin, ProtocolError};

    #[test]
    fn test_severity() {
        let id = ActuatorId::new(11);
        let stale = Fault::new(FaultSource::Actuator(id), FaultKind::Stale { age_ticks: 12 }, 3, "");
        assert_eq!(stale.severity(), Severity::Degrade);

        let over_temp = CAN_ID_FAULT_CODES.iter().find(|c| c.code == 0x04).unwrap();
        let report = ActuatorFaultReport {
            actuator: id,
            code: *over_temp,
            origin: FaultOrigin::CanId,
        };
        assert!(Fault::from_report(&report, 1).is_critical());

        let uncalibrated = CAN_ID_FAULT_CODES.iter().find(|c| c.code == 0x20).unwrap();
        let report = ActuatorFaultReport {
            actuator: id,
            code: *uncalibrated,
            origin: FaultOrigin::CanId,
        };
        assert_eq!(Fault::from_report(&report, 1).severity(), Severity::Degrade);

        let overrun = Fault::new(
            FaultSource::Scheduler,
            FaultKind::Overrun {
                elapsed: Duration::from_millis(25),
            },
            4,
            "",
        );
        assert_eq!(overrun.severity(), Severity::Timing);
    }

    #[test]
    fn test_driver_error_mapping() {
        let id = ActuatorId::new(33);
        let fault = Fault::from_driver(id, &DriverError::NoResponse { actuator: id }, 9);
        assert_eq!(fault.kind, FaultKind::NoResponse);
        assert_eq!(fault.source, FaultSource::Actuator(id));
        assert!(fault.detail.contains("33"));

        let unrouted = Fault::from_driver(id, &DriverError::Unrouted { actuator: id }, 9);
        assert_eq!(unrouted.kind, FaultKind::Unrouted);
        assert_eq!(unrouted.severity(), Severity::Degrade);

        let encode = DriverError::Protocol(ProtocolError::InvalidValue {
            field: "angle".to_string(),
            value: "NaN".to_string(),
        });
        assert_eq!(Fault::from_driver(id, &encode, 9).kind, FaultKind::Encode);

        // 配置表之外的执行器无法控制
        let unknown = Fault::from_driver(id, &DriverError::UnknownActuator { actuator: id }, 9);
        assert_eq!(unknown.kind, FaultKind::Unconfigured);
        assert!(unknown.is_critical());
    }

    #[test]
    fn test_log_eviction() {
        let mut log = FaultLog::new(2);
        for tick in 0..5 {
            log.push(Fault::new(FaultSource::Imu, FaultKind::ImuFailure, tick, "x"));
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.evicted(), 3);
        assert_eq!(log.total(), 5);
        assert_eq!(log.iter().next().unwrap().tick, 3);
    }
}
