//! # 启动与停机序列
//!
//! - [`startup_checks`]：扫描结果和初始角度检查
//! - [`enable_and_home`]：设置力矩上限、使能、对数增益爬升到零位
//! - [`safe_stop_ramp`]：反向增益爬降，保持给定位置，最后零增益
//!
//! 这些步骤在控制循环之外运行，按 `step_ms` 节拍阻塞。

use crate::error::ControlError;
use kbot_can::CanAdapter;
use kbot_driver::{ActuatorBusDriver, ScanReport};
use kbot_protocol::ActuatorId;
use kbot_tools::{HomingConfig, SafeStopConfig};
use tracing::{debug, info, warn};

/// 爬升起点
const RAMP_START: f32 = 0.001;

/// 从 0.001 到 1.0 的对数等间隔增益序列
pub fn log_ramp(steps: usize) -> Vec<f32> {
    if steps < 2 {
        return vec![1.0; steps];
    }
    let (lo, hi) = (RAMP_START.ln(), 1.0f32.ln());
    (0..steps)
        .map(|i| (lo + (hi - lo) * i as f32 / (steps - 1) as f32).exp())
        .collect()
}

/// 启动检查
///
/// 没有发现执行器、或任一关节角超过 `max_startup_angle` 时中止；
/// 带故障标志的执行器只告警。
pub fn startup_checks<A: CanAdapter>(
    driver: &mut ActuatorBusDriver<A>,
    report: &ScanReport,
    max_startup_angle: f32,
) -> Result<(), ControlError> {
    if report.is_empty() {
        return Err(ControlError::Startup("no actuators found".into()));
    }
    for id in &report.missing {
        warn!("Actuator {} did not answer the scan", id);
    }
    for id in &report.unexpected {
        warn!("Actuator {} answered but is not in the robot table", id);
    }

    let polled = driver.poll_all();
    let found: Vec<ActuatorId> = report.found.iter().map(|(id, _)| *id).collect();
    for (id, result) in polled {
        if !found.contains(&id) {
            continue;
        }
        let telemetry = match result {
            Ok(t) => t,
            Err(e) => {
                warn!("Actuator {} feedback failed during startup: {}", id, e);
                continue;
            },
        };
        let name = driver
            .actuator(id)
            .map(|a| a.config().full_name.clone())
            .unwrap_or_default();
        if telemetry.position.abs() > max_startup_angle {
            return Err(ControlError::Startup(format!(
                "{} ({}) at {:.3} rad exceeds startup limit {:.3} rad",
                name, id, telemetry.position, max_startup_angle
            )));
        }
        if telemetry.fault_flags != 0 {
            warn!("{} ({}) reports fault flags 0x{:02X}", name, id, telemetry.fault_flags);
        }
    }
    for report in driver.take_fault_reports() {
        warn!(
            "Actuator {} fault at startup: {}",
            report.actuator, report.code.description
        );
    }
    info!("Startup checks passed for {} actuators", found.len());
    Ok(())
}

/// 设置力矩上限、使能并爬升到零位（关节偏置）
pub fn enable_and_home<A: CanAdapter>(
    driver: &mut ActuatorBusDriver<A>,
    ids: &[ActuatorId],
    homing: &HomingConfig,
    torque_fraction: f32,
) -> Result<(), ControlError> {
    if ids.is_empty() {
        return Err(ControlError::Startup("nothing to home".into()));
    }
    for (id, result) in driver.configure_torque_limits(torque_fraction) {
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

    let targets: Vec<(ActuatorId, f32)> = ids
        .iter()
        .filter_map(|&id| driver.actuator(id).map(|a| (id, a.config().joint_bias)))
        .collect();
    let scales: Vec<f32> = log_ramp(homing.ramp_steps)
        .into_iter()
        .take_while(|&s| s <= homing.max_scaling)
        .collect();
    info!(
        "Homing {} actuators over {} steps (max scaling {})",
        targets.len(),
        scales.len(),
        homing.max_scaling
    );
    for scale in scales {
        let failed = driver
            .write_actions(&targets, scale)
            .into_iter()
            .filter(|(_, r)| r.is_err())
            .count();
        debug!("Homing scale {:.4}: {} without response", scale, failed);
        spin_sleep::sleep(homing.step());
    }
    driver.drain_missing_responses();
    Ok(())
}

/// 安全停机：增益按对数序列反向降到 0，保持 `hold` 位置
///
/// 返回发送的步数（含最后的零增益一步）。
pub fn safe_stop_ramp<A: CanAdapter>(
    driver: &mut ActuatorBusDriver<A>,
    hold: &[(ActuatorId, f32)],
    config: &SafeStopConfig,
    max_scaling: f32,
) -> usize {
    if hold.is_empty() {
        warn!("Safe stop: no actuators to hold");
        return 0;
    }
    let scales: Vec<f32> = log_ramp(config.ramp_steps)
        .into_iter()
        .rev()
        .filter(|&s| s <= max_scaling)
        .chain(std::iter::once(0.0))
        .collect();
    info!(
        "Safe stop: ramping down {} actuators in {} steps",
        hold.len(),
        scales.len()
    );
    let steps = scales.len();
    for (i, scale) in scales.into_iter().enumerate() {
        let failed = driver
            .write_actions(hold, scale)
            .into_iter()
            .filter(|(_, r)| r.is_err())
            .count();
        if failed > 0 {
            debug!("Safe stop scale {:.4}: {} without response", scale, failed);
        }
        if i + 1 < steps {
            spin_sleep::sleep(config.step());
        }
    }
    driver.drain_missing_responses();
    info!("Safe stop complete");
    steps
}
