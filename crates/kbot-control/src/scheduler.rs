//! # 固定周期控制循环
//!
//! 每个 tick：
//! 1. 记录起始时间
//! 2. 采集状态（IMU + 全部关节）
//! 3. 命令快照
//! 4. 策略推理（含直接覆盖）
//! 5. 写入动作（SafeStop 时不写）
//! 6. 睡眠到 `起始 + 周期`；超时则记录并立即进入下一 tick，不追赶
//!
//! 停止信号、SafeStop 或 `max_ticks` 都以安全停机爬降结束。

use crate::command::CommandArbiter;
use crate::fault::{Fault, FaultKind, FaultSource};
use crate::imu::ImuSource;
use crate::policy::PolicyExecutor;
use crate::safety::{SafetyMonitor, SafetyState};
use crate::sensor::SensorAggregator;
use crate::sequence::safe_stop_ramp;
use kbot_can::CanAdapter;
use kbot_driver::ActuatorBusDriver;
use kbot_protocol::ActuatorId;
use kbot_tools::{
    FirmwareConfig, IntervalStatistics, SafeStopConfig, StageTimings, TickLogger, TickRecord,
    TickStatistics,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// 循环结束原因
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// 操作员停止信号
    StopRequested,
    SafeStop { cause: Fault },
    MaxTicks,
}

/// 运行报告
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub ticks: u64,
    pub overruns: u64,
    pub intervals: IntervalStatistics,
    pub final_state: SafetyState,
    pub stop_reason: StopReason,
    /// 累计故障数
    pub faults: u64,
    /// 故障日志淘汰数
    pub evicted_faults: u64,
    pub dropped_log_records: u64,
}

/// 控制循环
pub struct ControlLoop<A: CanAdapter> {
    driver: ActuatorBusDriver<A>,
    sensors: SensorAggregator,
    arbiter: CommandArbiter,
    executor: PolicyExecutor,
    safety: SafetyMonitor,
    tick_log: Option<TickLogger>,
    stop: Arc<AtomicBool>,
    period: Duration,
    max_ticks: Option<u64>,
    action_scaling: f32,
    safe_stop: SafeStopConfig,
}

impl<A: CanAdapter> ControlLoop<A> {
    pub fn new(
        driver: ActuatorBusDriver<A>,
        imu: Box<dyn ImuSource>,
        arbiter: CommandArbiter,
        executor: PolicyExecutor,
        config: &FirmwareConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let sensors = SensorAggregator::new(
            executor.layout().clone(),
            imu,
            config.safety.staleness_ticks,
        );
        Self {
            driver,
            sensors,
            arbiter,
            executor,
            safety: SafetyMonitor::new(&config.safety),
            tick_log: None,
            stop,
            period: config.control_loop.period(),
            max_ticks: config.control_loop.max_ticks,
            action_scaling: config.homing.max_scaling,
            safe_stop: config.safe_stop.clone(),
        }
    }

    /// 记录每 tick 的 NDJSON
    pub fn with_tick_log(mut self, logger: TickLogger) -> Self {
        self.tick_log = Some(logger);
        self
    }

    pub fn driver(&self) -> &ActuatorBusDriver<A> {
        &self.driver
    }

    pub fn safety(&self) -> &SafetyMonitor {
        &self.safety
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn into_driver(self) -> ActuatorBusDriver<A> {
        self.driver
    }

    /// 运行到终止条件，然后执行安全停机
    pub fn run(&mut self) -> LoopReport {
        #[cfg(feature = "realtime")]
        {
            use thread_priority::*;

            match set_current_thread_priority(ThreadPriority::Max) {
                Ok(_) => {
                    info!("Control thread priority set to MAX (realtime)");
                },
                Err(e) => {
                    warn!(
                        "Failed to set control thread priority: {}. \
                        On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                        e
                    );
                },
            }
        }

        info!(
            "Control loop: {} joints, period {:?}, imu '{}'",
            self.executor.layout().len(),
            self.period,
            self.sensors.imu_name()
        );

        let mut stats = TickStatistics::new();
        let mut last_start: Option<Instant> = None;
        let mut overruns = 0u64;
        let mut tick = 0u64;

        let stop_reason = loop {
            if self.stop.load(Ordering::Acquire) {
                self.safety.request_stop(tick);
                break StopReason::StopRequested;
            }
            if self.max_ticks.is_some_and(|max| tick >= max) {
                info!("Reached {} ticks", tick);
                break StopReason::MaxTicks;
            }

            let tick_start = Instant::now();
            if let Some(prev) = last_start {
                stats.record(tick_start - prev);
            }
            last_start = Some(tick_start);

            let overrun = self.tick(tick, tick_start, &mut overruns);
            tick += 1;

            if let Some(cause) = self.safety.stop_cause() {
                break StopReason::SafeStop {
                    cause: cause.clone(),
                };
            }
            if !overrun {
                let deadline = tick_start + self.period;
                let now = Instant::now();
                if deadline > now {
                    spin_sleep::sleep(deadline - now);
                }
            }
        };

        self.shutdown();

        let dropped_log_records = match self.tick_log.take() {
            Some(logger) => {
                let dropped = logger.dropped();
                if let Err(e) = logger.finish() {
                    warn!("Tick log: {:#}", e);
                }
                dropped
            },
            None => 0,
        };

        let report = LoopReport {
            ticks: tick,
            overruns,
            intervals: stats.snapshot(),
            final_state: self.safety.state(),
            stop_reason,
            faults: self.safety.fault_log().total(),
            evicted_faults: self.safety.fault_log().evicted(),
            dropped_log_records,
        };
        info!(
            "Control loop finished after {} ticks ({:?}): {} overruns, mean interval {:.1} us, jitter {:.1} us, state {}",
            report.ticks,
            report.stop_reason,
            report.overruns,
            report.intervals.mean_us,
            report.intervals.jitter_us(),
            report.final_state
        );
        report
    }

    /// 执行一个 tick，返回是否超时
    fn tick(&mut self, tick: u64, tick_start: Instant, overruns: &mut u64) -> bool {
        let (state, mut faults) = self.sensors.collect(&mut self.driver, tick);
        self.take_driver_faults(tick, &mut faults);
        self.safety.observe_all(faults);
        let sensor_timings = self.sensors.timings();

        let t_command = Instant::now();
        let command = self.arbiter.sample();
        let t_step = Instant::now();

        let action = if self.safety.allows_actions() {
            match self.executor.infer(&state, &command) {
                Ok(action) => Some(action),
                Err(e) => {
                    self.safety.observe(Fault::new(
                        FaultSource::Policy,
                        FaultKind::InferenceFailure,
                        tick,
                        e.to_string(),
                    ));
                    None
                },
            }
        } else {
            None
        };
        let t_action = Instant::now();

        let mut applied = Vec::new();
        if let Some(action) = action
            && self.safety.allows_actions()
        {
            let targets = self.executor.layout().zip(&action);
            let mut faults: Vec<Fault> = self
                .driver
                .write_actions(&targets, self.action_scaling)
                .iter()
                .filter_map(|(id, r)| r.as_ref().err().map(|e| Fault::from_driver(*id, e, tick)))
                .collect();
            self.take_driver_faults(tick, &mut faults);
            self.safety.observe_all(faults);
            applied = action;
        }
        self.driver.drain_missing_responses();
        let t_end = Instant::now();

        let elapsed = t_end - tick_start;
        let overrun = elapsed >= self.period;
        if overrun {
            *overruns += 1;
            self.safety.record_overrun(tick, elapsed);
        } else {
            self.safety.record_on_time();
        }

        if let Some(logger) = &self.tick_log {
            logger.log(TickRecord {
                step_id: tick,
                timestamp: unix_time(),
                dt: StageTimings {
                    joints_ms: ms(sensor_timings.joints),
                    imu_ms: ms(sensor_timings.imu),
                    command_ms: ms(t_step - t_command),
                    step_ms: ms(t_action - t_step),
                    action_ms: ms(t_end - t_action),
                    total_ms: ms(elapsed),
                },
                joint_angles: state.positions(),
                joint_velocities: state.velocities(),
                joint_torques: state.torques(),
                joint_temperatures: state.temperatures(),
                projected_gravity: state.projected_gravity(),
                gyroscope: state.gyroscope(),
                command: command.select(self.executor.command_fields()),
                action: applied,
                safety_state: self.safety.state().to_string(),
                overrun,
            });
        }
        debug!("tick {} done in {:?}", tick, elapsed);
        overrun
    }

    fn take_driver_faults(&mut self, tick: u64, faults: &mut Vec<Fault>) {
        faults.extend(
            self.driver
                .take_fault_reports()
                .iter()
                .map(|r| Fault::from_report(r, tick)),
        );
        faults.extend(
            self.driver
                .take_bus_faults()
                .iter()
                .map(|b| Fault::from_bus(b, tick)),
        );
    }

    /// 在最近一次有效位置上爬降增益
    fn shutdown(&mut self) {
        let hold: Vec<(ActuatorId, f32)> = self
            .executor
            .layout()
            .ids()
            .iter()
            .filter_map(|&id| {
                self.driver
                    .actuator(id)
                    .filter(|a| a.has_telemetry())
                    .map(|a| (id, a.telemetry().position))
            })
            .collect();
        safe_stop_ramp(&mut self.driver, &hold, &self.safe_stop, self.action_scaling);
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
