//! 执行器运行期记录
//!
//! 启动时由配置表创建，运行期间只由驱动更新最近一次有效遥测。

use kbot_protocol::{ActuatorConfig, ActuatorId, Telemetry};
use std::time::Instant;

/// 单个执行器：静态配置 + 最近有效遥测
#[derive(Debug, Clone)]
pub struct Actuator {
    config: ActuatorConfig,
    telemetry: Telemetry,
    /// 最近一次有效应答所在 tick
    last_tick: Option<u64>,
    last_update: Option<Instant>,
}

impl Actuator {
    pub fn new(config: ActuatorConfig) -> Self {
        Self {
            config,
            telemetry: Telemetry::default(),
            last_tick: None,
            last_update: None,
        }
    }

    pub fn id(&self) -> ActuatorId {
        self.config.id
    }

    pub fn config(&self) -> &ActuatorConfig {
        &self.config
    }

    pub fn name(&self) -> String {
        self.config.name()
    }

    pub fn max_torque(&self) -> f32 {
        self.config.torque_limit()
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn last_tick(&self) -> Option<u64> {
        self.last_tick
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    pub fn has_telemetry(&self) -> bool {
        self.last_update.is_some()
    }

    /// 距最近有效应答的 tick 数；从未应答时返回 `None`
    pub fn staleness(&self, current_tick: u64) -> Option<u64> {
        self.last_tick.map(|t| current_tick.saturating_sub(t))
    }

    pub(crate) fn record(&mut self, telemetry: Telemetry, tick: u64) {
        self.telemetry = telemetry;
        self.last_tick = Some(tick);
        self.last_update = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbot_protocol::RobotConfig;

    #[test]
    fn test_staleness() {
        let config = RobotConfig::default();
        let mut actuator = Actuator::new(config.actuators[0].clone());
        assert_eq!(actuator.staleness(5), None);
        assert!(!actuator.has_telemetry());

        let telemetry = Telemetry {
            position: 0.25,
            ..Default::default()
        };
        actuator.record(telemetry, 7);
        assert_eq!(actuator.staleness(7), Some(0));
        assert_eq!(actuator.staleness(19), Some(12));
        assert_eq!(actuator.telemetry().position, 0.25);
    }
}
