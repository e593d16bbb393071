//! # 安全监视器
//!
//! 状态机：`Running → Degraded → SafeStop`
//!
//! - 通信类故障（无应答、解码失败、陈旧、总线、IMU）和非关键故障标志 → `Degraded`
//! - 连续超时达到 `overrun_degrade_threshold` → `Degraded`
//! - 关键执行器故障、推理失败、停止请求 → `SafeStop`（终态）
//!
//! `Degraded` 在本次运行内不会恢复。每个故障都会写入有界故障日志。

use crate::fault::{Fault, FaultKind, FaultLog, FaultSource, Severity};
use kbot_tools::SafetyConfig;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

/// 安全状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SafetyState {
    Running,
    Degraded,
    SafeStop,
}

impl SafetyState {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyState::Running => "running",
            SafetyState::Degraded => "degraded",
            SafetyState::SafeStop => "safe_stop",
        }
    }
}

impl fmt::Display for SafetyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 安全监视器
#[derive(Debug)]
pub struct SafetyMonitor {
    state: SafetyState,
    degrade_threshold: u32,
    safe_stop_threshold: Option<u32>,
    consecutive_overruns: u32,
    log: FaultLog,
    stop_cause: Option<Fault>,
}

impl SafetyMonitor {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            state: SafetyState::Running,
            degrade_threshold: config.overrun_degrade_threshold,
            safe_stop_threshold: config.overrun_safe_stop_threshold,
            consecutive_overruns: 0,
            log: FaultLog::new(config.fault_log_capacity),
            stop_cause: None,
        }
    }

    pub fn state(&self) -> SafetyState {
        self.state
    }

    /// SafeStop 后不再下发策略动作
    pub fn allows_actions(&self) -> bool {
        self.state != SafetyState::SafeStop
    }

    /// 触发 SafeStop 的故障
    pub fn stop_cause(&self) -> Option<&Fault> {
        self.stop_cause.as_ref()
    }

    pub fn fault_log(&self) -> &FaultLog {
        &self.log
    }

    pub fn consecutive_overruns(&self) -> u32 {
        self.consecutive_overruns
    }

    /// 记录一个故障并推进状态
    pub fn observe(&mut self, fault: Fault) -> SafetyState {
        match fault.severity() {
            Severity::Timing => {
                warn!("{}", fault);
            },
            Severity::Degrade => {
                warn!("{}", fault);
                self.degrade(&fault);
            },
            Severity::Critical => {
                if fault.kind == FaultKind::StopRequested {
                    info!("Stop requested at tick {}", fault.tick);
                } else {
                    error!("CRITICAL {}: {} at tick {}", fault.source, fault.detail, fault.tick);
                }
                self.enter_safe_stop(&fault);
            },
        }
        self.log.push(fault);
        self.state
    }

    pub fn observe_all(&mut self, faults: impl IntoIterator<Item = Fault>) -> SafetyState {
        for fault in faults {
            self.observe(fault);
        }
        self.state
    }

    /// 操作员停止
    pub fn request_stop(&mut self, tick: u64) -> SafetyState {
        self.observe(Fault::new(
            FaultSource::Operator,
            FaultKind::StopRequested,
            tick,
            "stop signal",
        ))
    }

    /// 记录一次超时
    ///
    /// 应在本 tick 其它故障之后调用；已处于 SafeStop 时只计数。
    pub fn record_overrun(&mut self, tick: u64, elapsed: Duration) -> SafetyState {
        self.consecutive_overruns = self.consecutive_overruns.saturating_add(1);
        let fault = Fault::new(
            FaultSource::Scheduler,
            FaultKind::Overrun { elapsed },
            tick,
            format!("{} consecutive", self.consecutive_overruns),
        );
        if self.state != SafetyState::SafeStop {
            if let Some(limit) = self.safe_stop_threshold
                && self.consecutive_overruns >= limit
            {
                error!(
                    "{} consecutive overruns (limit {}), stopping",
                    self.consecutive_overruns, limit
                );
                self.enter_safe_stop(&fault);
            } else if self.consecutive_overruns >= self.degrade_threshold
                && self.state == SafetyState::Running
            {
                warn!(
                    "{} consecutive overruns, entering degraded mode",
                    self.consecutive_overruns
                );
                self.state = SafetyState::Degraded;
            }
        }
        self.observe(fault)
    }

    pub fn record_on_time(&mut self) {
        self.consecutive_overruns = 0;
    }

    fn degrade(&mut self, fault: &Fault) {
        if self.state == SafetyState::Running {
            warn!("Entering degraded mode: {}", fault.source);
            self.state = SafetyState::Degraded;
        }
    }

    fn enter_safe_stop(&mut self, fault: &Fault) {
        if self.state != SafetyState::SafeStop {
            self.state = SafetyState::SafeStop;
            self.stop_cause = Some(fault.clone());
        }
    }
}
