//! 仿真执行器总线
//!
//! 在 `MockCanAdapter` 的应答钩子上模拟一组 Robstride 执行器：
//! 响应 Ping、反馈请求、PD 控制、使能、参数写入；
//! 可按执行器注入静默、畸形载荷与故障标志。
//!
//! ```
//! use kbot_driver::{BusHandle, BusSet, DriverBuilder, SimulatedBus};
//! use kbot_protocol::RobotConfig;
//!
//! let robot = RobotConfig::default();
//! let sim = SimulatedBus::new("can0", robot.actuators.iter().cloned());
//! let mut buses = BusSet::new();
//! buses.push(BusHandle::from_adapter(sim.adapter()));
//! let (driver, report) = DriverBuilder::new(robot).build_and_scan(buses).unwrap();
//! assert_eq!(report.found.len(), 22);
//! # drop(driver);
//! ```

use kbot_can::{KbotFrame, MockCanAdapter, MockCanHandle};
use kbot_protocol::{
    ActuatorConfig, ActuatorId, FaultReportFrame, FeedbackFrame, HOST_ID, MotorMode, Mux,
    PARAM_LIMIT_TORQUE, ParamWriteCommand, RawPdCommand, RequestId, ResponseId,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// 单个执行器的异常行为
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    #[default]
    Normal,
    /// 不应答任何帧
    Silent,
    /// 应答截短为 4 字节的反馈帧
    Malformed,
}

/// 仿真执行器状态
#[derive(Debug, Clone)]
pub struct SimulatedActuator {
    pub config: ActuatorConfig,
    /// rad
    pub position: f32,
    /// °C
    pub temperature: f32,
    pub fault_flags: u8,
    pub enabled: bool,
    pub torque_limit: Option<f32>,
    pub behavior: Behavior,
    /// 最近一次 PD 指令
    pub last_command: Option<RawPdCommand>,
    /// 收到的 PD 指令数
    pub commands_received: usize,
}

impl SimulatedActuator {
    fn new(config: ActuatorConfig) -> Self {
        Self {
            position: config.joint_bias,
            config,
            temperature: 30.0,
            fault_flags: 0,
            enabled: false,
            torque_limit: None,
            behavior: Behavior::Normal,
            last_command: None,
            commands_received: 0,
        }
    }

    fn feedback_frame(&self) -> KbotFrame {
        let ranges = self.config.ranges();
        let frame = FeedbackFrame {
            actuator: self.config.id,
            fault_flags: self.fault_flags,
            mode: if self.enabled {
                MotorMode::Run
            } else {
                MotorMode::Reset
            },
            angle: ranges.angle.to_raw(self.position),
            velocity: ranges.velocity.to_raw(0.0),
            torque: ranges.torque.to_raw(0.0),
            temperature: (self.temperature * 10.0).round().max(0.0) as u16,
        }
        .to_frame();
        match self.behavior {
            Behavior::Malformed => KbotFrame::new_extended(frame.id, &frame.data[..4]),
            _ => frame,
        }
    }

    fn pong_frame(&self) -> KbotFrame {
        let id = ResponseId {
            host_id: HOST_ID,
            actuator: self.config.id,
            fault_flags: self.fault_flags,
            mode: MotorMode::Reset,
            mux: Mux::Ping,
        };
        KbotFrame::new_extended(id.encode(), &[0u8; 8])
    }

    fn handle(&mut self, mux: Mux, frame: &KbotFrame) -> Option<KbotFrame> {
        if self.behavior == Behavior::Silent {
            return None;
        }
        match mux {
            Mux::Ping => Some(self.pong_frame()),
            Mux::Feedback => Some(self.feedback_frame()),
            Mux::Enable => {
                self.enabled = true;
                Some(self.feedback_frame())
            },
            Mux::Stop => {
                self.enabled = false;
                Some(self.feedback_frame())
            },
            Mux::Control => {
                let cmd = RawPdCommand::try_from(*frame).ok()?;
                self.commands_received += 1;
                self.last_command = Some(cmd);
                // 有刚度时瞬间到达目标
                if cmd.kp > 0 {
                    self.position = self.config.ranges().angle.to_physical(cmd.angle);
                }
                Some(self.feedback_frame())
            },
            Mux::ParamWrite => {
                let param = ParamWriteCommand::try_from(*frame).ok()?;
                if param.index == PARAM_LIMIT_TORQUE {
                    self.torque_limit = Some(param.value);
                }
                Some(self.feedback_frame())
            },
            Mux::FaultReport => None,
        }
    }
}

type Actuators = Arc<Mutex<BTreeMap<ActuatorId, SimulatedActuator>>>;

/// 一条仿真总线
#[derive(Clone)]
pub struct SimulatedBus {
    name: String,
    actuators: Actuators,
    handle: Arc<Mutex<Option<MockCanHandle>>>,
}

impl SimulatedBus {
    pub fn new(name: impl Into<String>, actuators: impl IntoIterator<Item = ActuatorConfig>) -> Self {
        let actuators = actuators
            .into_iter()
            .map(|c| (c.id, SimulatedActuator::new(c)))
            .collect();
        Self {
            name: name.into(),
            actuators: Arc::new(Mutex::new(actuators)),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 创建挂在本总线上的适配器
    pub fn adapter(&self) -> MockCanAdapter {
        let actuators = self.actuators.clone();
        let adapter = MockCanAdapter::new(self.name.clone()).with_responder(move |frame| {
            let Ok(request) = RequestId::decode(frame.id) else {
                return Vec::new();
            };
            let mut actuators = actuators.lock();
            actuators
                .get_mut(&request.actuator)
                .and_then(|a| a.handle(request.mux, frame))
                .into_iter()
                .collect()
        });
        *self.handle.lock() = Some(adapter.handle());
        adapter
    }

    fn with<R>(&self, id: u8, f: impl FnOnce(&mut SimulatedActuator) -> R) -> Option<R> {
        self.actuators.lock().get_mut(&ActuatorId::new(id)).map(f)
    }

    pub fn set_behavior(&self, id: u8, behavior: Behavior) {
        self.with(id, |a| a.behavior = behavior);
    }

    pub fn set_fault_flags(&self, id: u8, flags: u8) {
        self.with(id, |a| a.fault_flags = flags);
    }

    pub fn set_position(&self, id: u8, position: f32) {
        self.with(id, |a| a.position = position);
    }

    pub fn set_temperature(&self, id: u8, celsius: f32) {
        self.with(id, |a| a.temperature = celsius);
    }

    pub fn actuator(&self, id: u8) -> Option<SimulatedActuator> {
        self.actuators.lock().get(&ActuatorId::new(id)).cloned()
    }

    pub fn position(&self, id: u8) -> Option<f32> {
        self.with(id, |a| a.position)
    }

    /// 主动上报一帧 Mux 0x15 故障（下次读取时收到）
    pub fn inject_fault_report(&self, id: u8, fault: u32, warning: u32) {
        let frame = FaultReportFrame {
            actuator: ActuatorId::new(id),
            fault,
            warning,
        }
        .to_frame();
        if let Some(handle) = self.handle.lock().as_ref() {
            handle.inject(frame);
        }
    }

    /// 注入任意帧
    pub fn inject(&self, frame: KbotFrame) {
        if let Some(handle) = self.handle.lock().as_ref() {
            handle.inject(frame);
        }
    }

    /// 已发送到本总线的帧
    pub fn sent_frames(&self) -> Vec<KbotFrame> {
        self.handle
            .lock()
            .as_ref()
            .map(|h| h.sent_frames())
            .unwrap_or_default()
    }

    pub fn clear_sent(&self) {
        if let Some(handle) = self.handle.lock().as_ref() {
            handle.clear_sent();
        }
    }

    pub fn set_link_down(&self, down: bool) {
        if let Some(handle) = self.handle.lock().as_ref() {
            handle.set_link_down(down);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbot_can::CanAdapter;
    use kbot_protocol::{PdCommand, RobotConfig, SimpleCommand, TorqueLimitCommand};

    fn bus() -> (SimulatedBus, MockCanAdapter) {
        let robot = RobotConfig::default();
        let sim = SimulatedBus::new("can1", robot.actuators.into_iter().filter(|a| a.id.limb() == 1));
        let adapter = sim.adapter();
        (sim, adapter)
    }

    #[test]
    fn test_ping_only_known_actuators() {
        let (_sim, mut adapter) = bus();
        adapter.send(SimpleCommand::ping(ActuatorId::new(11)).to_frame()).unwrap();
        assert!(adapter.try_receive().unwrap().is_some());
        adapter.send(SimpleCommand::ping(ActuatorId::new(21)).to_frame()).unwrap();
        assert!(adapter.try_receive().unwrap().is_none());
    }

    #[test]
    fn test_control_moves_position() {
        let (sim, mut adapter) = bus();
        let robot = RobotConfig::default();
        let config = robot.get(ActuatorId::new(14)).unwrap();
        let frame = PdCommand::position(config.id, 0.5, 1.0).to_frame(config).unwrap();
        adapter.send(frame).unwrap();
        assert!(adapter.try_receive().unwrap().is_some());
        assert!((sim.position(14).unwrap() - 0.5).abs() < 1e-3);
        assert_eq!(sim.actuator(14).unwrap().commands_received, 1);
    }

    #[test]
    fn test_zero_gain_command_holds_position() {
        let (sim, mut adapter) = bus();
        sim.set_position(13, 0.2);
        let robot = RobotConfig::default();
        let config = robot.get(ActuatorId::new(13)).unwrap();
        let frame = PdCommand::position(config.id, -1.0, 0.0).to_frame(config).unwrap();
        adapter.send(frame).unwrap();
        assert!((sim.position(13).unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_torque_limit_recorded() {
        let (sim, mut adapter) = bus();
        adapter
            .send(TorqueLimitCommand::new(ActuatorId::new(12), 42.0).to_frame())
            .unwrap();
        assert_eq!(sim.actuator(12).unwrap().torque_limit, Some(42.0));
    }

    #[test]
    fn test_silent_and_malformed() {
        let (sim, mut adapter) = bus();
        sim.set_behavior(15, Behavior::Silent);
        adapter
            .send(SimpleCommand::feedback_request(ActuatorId::new(15)).to_frame())
            .unwrap();
        assert!(adapter.try_receive().unwrap().is_none());

        sim.set_behavior(16, Behavior::Malformed);
        adapter
            .send(SimpleCommand::feedback_request(ActuatorId::new(16)).to_frame())
            .unwrap();
        assert_eq!(adapter.try_receive().unwrap().unwrap().len, 4);
    }
}
