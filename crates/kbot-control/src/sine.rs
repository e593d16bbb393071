//! 正弦诊断：绕过策略与命令层，所有关节跟随 `A·sin(2πft) + bias`

use crate::sequence::safe_stop_ramp;
use kbot_can::CanAdapter;
use kbot_driver::ActuatorBusDriver;
use kbot_protocol::{ActuatorFaultReport, ActuatorId};
use kbot_tools::{IntervalStatistics, SafeStopConfig, SineConfig, TickStatistics};
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 正弦目标生成
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SineWave {
    pub amplitude: f32,
    pub frequency_hz: f32,
}

impl SineWave {
    pub fn from_config(config: &SineConfig) -> Self {
        Self {
            amplitude: config.amplitude,
            frequency_hz: config.frequency_hz,
        }
    }

    /// 相对零位的偏移（rad）
    pub fn offset(&self, t: f32) -> f32 {
        self.amplitude * (2.0 * PI * self.frequency_hz * t).sin()
    }

    pub fn targets(&self, t: f32, biases: &[(ActuatorId, f32)]) -> Vec<(ActuatorId, f32)> {
        let offset = self.offset(t);
        biases.iter().map(|&(id, bias)| (id, bias + offset)).collect()
    }
}

/// 诊断运行结果
#[derive(Debug, Clone)]
pub struct SineReport {
    pub ticks: u64,
    pub overruns: u64,
    pub intervals: IntervalStatistics,
    /// 触发提前停机的严重故障
    pub fault: Option<ActuatorFaultReport>,
}

/// 运行正弦诊断，直到 `stop` 置位或达到 `duration`
///
/// 进入前降低力矩上限并使能；退出时执行安全停机爬降。
/// 每 tick 取走驱动的故障队列，出现严重故障立即停止下发正弦目标。
pub fn run_sine_wave<A: CanAdapter>(
    driver: &mut ActuatorBusDriver<A>,
    ids: &[ActuatorId],
    config: &SineConfig,
    safe_stop: &SafeStopConfig,
    duration: Option<Duration>,
    stop: &AtomicBool,
) -> SineReport {
    for (id, result) in driver.configure_torque_limits(config.torque_fraction) {
        if ids.contains(&id)
            && let Err(e) = result
        {
            warn!("Torque limit for {} not acknowledged: {}", id, e);
        }
    }
    for (id, result) in driver.enable_all() {
        if ids.contains(&id)
            && let Err(e) = result
        {
            warn!("Enable for {} not acknowledged: {}", id, e);
        }
    }

    let biases: Vec<(ActuatorId, f32)> = ids
        .iter()
        .filter_map(|&id| driver.actuator(id).map(|a| (id, a.config().joint_bias)))
        .collect();
    let wave = SineWave::from_config(config);
    let period = config.period();
    info!(
        "Sine wave on {} actuators: {} rad @ {} Hz, scaling {}, period {:?}",
        biases.len(),
        wave.amplitude,
        wave.frequency_hz,
        config.max_scaling,
        period
    );

    let mut stats = TickStatistics::new();
    let mut ticks = 0u64;
    let mut overruns = 0u64;
    let start = Instant::now();
    let mut last_start: Option<Instant> = None;
    let mut fault = None;

    while !stop.load(Ordering::Acquire) {
        let tick_start = Instant::now();
        if duration.is_some_and(|d| tick_start - start >= d) {
            break;
        }
        if let Some(prev) = last_start {
            stats.record(tick_start - prev);
        }
        last_start = Some(tick_start);

        driver.set_tick(ticks);
        let feedback_ok = driver.poll_all().iter().filter(|(_, r)| r.is_ok()).count();
        let t_feedback = tick_start.elapsed();

        for bus_fault in driver.take_bus_faults() {
            warn!("Sine tick {}: bus {} failed: {}", ticks, bus_fault.bus, bus_fault.detail);
        }
        for report in driver.take_fault_reports() {
            if report.is_critical() {
                error!(
                    "Sine tick {}: actuator {} reports {}, stopping",
                    ticks, report.actuator, report.code.description
                );
                fault.get_or_insert(report);
            } else {
                warn!(
                    "Sine tick {}: actuator {} reports {}",
                    ticks, report.actuator, report.code.description
                );
            }
        }
        if fault.is_some() {
            break;
        }

        let t = (tick_start - start).as_secs_f32();
        let targets = wave.targets(t, &biases);
        driver.write_actions(&targets, config.max_scaling);
        let t_targets = tick_start.elapsed() - t_feedback;
        driver.drain_missing_responses();

        debug!(
            "sine tick {}: feedback {} us ({} ok), targets {} us",
            ticks,
            t_feedback.as_micros(),
            feedback_ok,
            t_targets.as_micros()
        );
        ticks += 1;

        let elapsed = tick_start.elapsed();
        if elapsed < period {
            spin_sleep::sleep(period - elapsed);
        } else {
            overruns += 1;
            warn!("Sine tick {} overran: {:?}", ticks - 1, elapsed);
        }
    }

    let hold: Vec<(ActuatorId, f32)> = biases
        .iter()
        .filter_map(|&(id, _)| {
            driver
                .actuator(id)
                .filter(|a| a.has_telemetry())
                .map(|a| (id, a.telemetry().position))
        })
        .collect();
    safe_stop_ramp(driver, &hold, safe_stop, config.max_scaling);
    let pending = driver.take_fault_reports().len();
    if pending > 0 {
        debug!("Discarding {} fault reports raised during safe stop", pending);
    }

    let report = SineReport {
        ticks,
        overruns,
        intervals: stats.snapshot(),
        fault,
    };
    info!(
        "Sine wave finished: {} ticks, {} overruns, mean {:.1} us",
        report.ticks, report.overruns, report.intervals.mean_us
    );
    report
}
