//! 下行指令帧
//!
//! 所有指令均为 8 字节载荷的 29-bit 扩展帧。

use crate::{
    ActuatorConfig, ActuatorId, KbotFrame, Mux, ProtocolError, RequestId, bytes_to_u16_be,
    u16_to_bytes_be,
};

/// 参数索引：力矩上限（`limit_torque`）
pub const PARAM_LIMIT_TORQUE: u16 = 0x700B;

/// 无载荷指令（Ping / 使能 / 停止 / 反馈请求）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleCommand {
    pub mux: Mux,
    pub actuator: ActuatorId,
}

impl SimpleCommand {
    pub fn ping(actuator: ActuatorId) -> Self {
        Self {
            mux: Mux::Ping,
            actuator,
        }
    }

    pub fn enable(actuator: ActuatorId) -> Self {
        Self {
            mux: Mux::Enable,
            actuator,
        }
    }

    pub fn stop(actuator: ActuatorId) -> Self {
        Self {
            mux: Mux::Stop,
            actuator,
        }
    }

    /// 状态请求，执行器以 Mux 0x02 反馈帧应答
    pub fn feedback_request(actuator: ActuatorId) -> Self {
        Self {
            mux: Mux::Feedback,
            actuator,
        }
    }

    pub fn to_frame(self) -> KbotFrame {
        KbotFrame::new_extended(RequestId::new(self.mux, self.actuator).encode(), &[0u8; 8])
    }
}

// ============================================================================
// 参数写入
// ============================================================================

/// 单参数写入指令 (Mux 0x12)
///
/// 载荷布局（小端）：
///
/// ```text
/// Byte 0-1: 参数索引
/// Byte 2-3: 保留
/// Byte 4-7: f32 参数值
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamWriteCommand {
    pub actuator: ActuatorId,
    pub index: u16,
    pub value: f32,
}

impl ParamWriteCommand {
    pub fn to_frame(self) -> KbotFrame {
        let mut data = [0u8; 8];
        data[..2].copy_from_slice(&self.index.to_le_bytes());
        data[4..].copy_from_slice(&self.value.to_le_bytes());
        KbotFrame::new_extended(
            RequestId::new(Mux::ParamWrite, self.actuator).encode(),
            &data,
        )
    }
}

impl TryFrom<KbotFrame> for ParamWriteCommand {
    type Error = ProtocolError;

    fn try_from(frame: KbotFrame) -> Result<Self, Self::Error> {
        let id = RequestId::decode(frame.id)?;
        if id.mux != Mux::ParamWrite {
            return Err(ProtocolError::UnexpectedMux {
                expected: Mux::ParamWrite.into(),
                actual: id.mux.into(),
            });
        }
        frame.require_len(8)?;
        let d = frame.data;
        Ok(Self {
            actuator: id.actuator,
            index: u16::from_le_bytes([d[0], d[1]]),
            value: f32::from_le_bytes([d[4], d[5], d[6], d[7]]),
        })
    }
}

/// 力矩上限设定指令
///
/// 仲裁 ID 为 `0x1200_FD00 | actuator_id`，载荷为 `[0x0B, 0x70, 0x00, 0x00]` 加小端 f32。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorqueLimitCommand {
    pub actuator: ActuatorId,
    /// N·m
    pub limit: f32,
}

impl TorqueLimitCommand {
    pub fn new(actuator: ActuatorId, limit: f32) -> Self {
        Self { actuator, limit }
    }

    pub fn to_frame(self) -> KbotFrame {
        ParamWriteCommand {
            actuator: self.actuator,
            index: PARAM_LIMIT_TORQUE,
            value: self.limit,
        }
        .to_frame()
    }
}

impl TryFrom<KbotFrame> for TorqueLimitCommand {
    type Error = ProtocolError;

    fn try_from(frame: KbotFrame) -> Result<Self, Self::Error> {
        let param = ParamWriteCommand::try_from(frame)?;
        if param.index != PARAM_LIMIT_TORQUE {
            return Err(ProtocolError::InvalidValue {
                field: "param_index".to_string(),
                value: format!("0x{:04X}", param.index),
            });
        }
        Ok(Self {
            actuator: param.actuator,
            limit: param.value,
        })
    }
}

// ============================================================================
// PD 控制
// ============================================================================

/// PD 位置控制指令 (Mux 0x01)
///
/// 仲裁 ID 数据区携带原始前馈力矩，载荷为大端 u16：角度、速度、kp、kd。
/// kp/kd 原始值为配置增益乘以 `scaling`（0.0 ~ 1.0）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdCommand {
    pub actuator: ActuatorId,
    /// 目标角度（rad）
    pub angle: f32,
    /// 目标速度（rad/s）
    pub velocity: f32,
    /// 前馈力矩（N·m）
    pub torque: f32,
    /// 增益缩放
    pub scaling: f32,
}

impl PdCommand {
    /// 纯位置目标（速度、前馈力矩为 0）
    pub fn position(actuator: ActuatorId, angle: f32, scaling: f32) -> Self {
        Self {
            actuator,
            angle,
            velocity: 0.0,
            torque: 0.0,
            scaling,
        }
    }

    pub fn to_frame(self, config: &ActuatorConfig) -> Result<KbotFrame, ProtocolError> {
        if !(0.0..=1.0).contains(&self.scaling) {
            return Err(ProtocolError::InvalidValue {
                field: "scaling".to_string(),
                value: self.scaling.to_string(),
            });
        }
        if config.id != self.actuator {
            return Err(ProtocolError::UnknownActuator {
                id: self.actuator.get(),
            });
        }
        let ranges = config.ranges();
        let raw_torque = ranges.torque.to_raw(self.torque);
        let raw_angle = ranges.angle.to_raw(self.angle);
        let raw_velocity = ranges.velocity.to_raw(self.velocity);
        let raw_kp = (config.raw_kp() * self.scaling) as u16;
        let raw_kd = (config.raw_kd() * self.scaling) as u16;

        let mut data = [0u8; 8];
        data[0..2].copy_from_slice(&u16_to_bytes_be(raw_angle));
        data[2..4].copy_from_slice(&u16_to_bytes_be(raw_velocity));
        data[4..6].copy_from_slice(&u16_to_bytes_be(raw_kp));
        data[6..8].copy_from_slice(&u16_to_bytes_be(raw_kd));

        let id = RequestId::with_data(Mux::Control, raw_torque, self.actuator);
        Ok(KbotFrame::new_extended(id.encode(), &data))
    }
}

/// PD 控制帧原始字段（模拟执行器与测试使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPdCommand {
    pub actuator: ActuatorId,
    pub torque: u16,
    pub angle: u16,
    pub velocity: u16,
    pub kp: u16,
    pub kd: u16,
}

impl TryFrom<KbotFrame> for RawPdCommand {
    type Error = ProtocolError;

    fn try_from(frame: KbotFrame) -> Result<Self, Self::Error> {
        let id = RequestId::decode(frame.id)?;
        if id.mux != Mux::Control {
            return Err(ProtocolError::UnexpectedMux {
                expected: Mux::Control.into(),
                actual: id.mux.into(),
            });
        }
        frame.require_len(8)?;
        let d = frame.data;
        Ok(Self {
            actuator: id.actuator,
            torque: id.data,
            angle: bytes_to_u16_be([d[0], d[1]]),
            velocity: bytes_to_u16_be([d[2], d[3]]),
            kp: bytes_to_u16_be([d[4], d[5]]),
            kd: bytes_to_u16_be([d[6], d[7]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RobotConfig;
    use proptest::prelude::*;

    #[test]
    fn test_torque_limit_reference_bytes() {
        let frame = TorqueLimitCommand::new(ActuatorId::new(11), 42.0).to_frame();
        assert_eq!(frame.id, 0x1200_FD0B);
        assert!(frame.is_extended);
        assert_eq!(
            frame.data_slice(),
            &[0x0B, 0x70, 0x00, 0x00, 0x00, 0x00, 0x28, 0x42]
        );
    }

    #[test]
    fn test_torque_limit_roundtrip() {
        let frame = TorqueLimitCommand::new(ActuatorId::new(45), 42.0).to_frame();
        let decoded = TorqueLimitCommand::try_from(frame).unwrap();
        assert_eq!(decoded.actuator, ActuatorId::new(45));
        assert_eq!(decoded.limit, 42.0);
    }

    #[test]
    fn test_torque_limit_rejects_other_param() {
        let frame = ParamWriteCommand {
            actuator: ActuatorId::new(45),
            index: 0x7005,
            value: 1.0,
        }
        .to_frame();
        assert!(TorqueLimitCommand::try_from(frame).is_err());
    }

    #[test]
    fn test_simple_commands() {
        let id = ActuatorId::new(23);
        assert_eq!(SimpleCommand::ping(id).to_frame().id, 0x0000_FD17);
        assert_eq!(SimpleCommand::enable(id).to_frame().id, 0x0300_FD17);
        assert_eq!(SimpleCommand::feedback_request(id).to_frame().id, 0x0200_FD17);
        assert_eq!(SimpleCommand::stop(id).to_frame().len, 8);
    }

    #[test]
    fn test_pd_command_layout() {
        let config = RobotConfig::default();
        let actuator = config.get(ActuatorId::new(15)).unwrap();
        let frame = PdCommand::position(actuator.id, 0.0, 1.0)
            .to_frame(actuator)
            .unwrap();
        let raw = RawPdCommand::try_from(frame).unwrap();
        assert_eq!(raw.actuator, ActuatorId::new(15));
        // 零角度、零速度、零力矩位于量程中点
        assert_eq!(raw.angle, 32767);
        assert_eq!(raw.velocity, 32767);
        assert_eq!(raw.torque, 32767);
        assert_eq!(raw.kp, actuator.raw_kp() as u16);
        assert_eq!(raw.kd, actuator.raw_kd() as u16);
    }

    #[test]
    fn test_pd_command_zero_scaling_zero_gains() {
        let config = RobotConfig::default();
        let actuator = config.get(ActuatorId::new(34)).unwrap();
        let frame = PdCommand::position(actuator.id, 0.5, 0.0)
            .to_frame(actuator)
            .unwrap();
        let raw = RawPdCommand::try_from(frame).unwrap();
        assert_eq!(raw.kp, 0);
        assert_eq!(raw.kd, 0);
    }

    #[test]
    fn test_pd_command_rejects_bad_scaling() {
        let config = RobotConfig::default();
        let actuator = config.get(ActuatorId::new(34)).unwrap();
        assert!(
            PdCommand::position(actuator.id, 0.0, 1.5)
                .to_frame(actuator)
                .is_err()
        );
        assert!(
            PdCommand::position(actuator.id, 0.0, f32::NAN)
                .to_frame(actuator)
                .is_err()
        );
    }

    #[test]
    fn test_pd_command_rejects_mismatched_config() {
        let config = RobotConfig::default();
        let actuator = config.get(ActuatorId::new(34)).unwrap();
        assert!(matches!(
            PdCommand::position(ActuatorId::new(35), 0.0, 1.0).to_frame(actuator),
            Err(ProtocolError::UnknownActuator { id: 35 })
        ));
    }

    proptest! {
        #[test]
        fn prop_torque_limit_roundtrip(id in 10u8..50, limit in 0.0f32..120.0) {
            let frame = TorqueLimitCommand::new(ActuatorId::new(id), limit).to_frame();
            let decoded = TorqueLimitCommand::try_from(frame).unwrap();
            prop_assert_eq!(decoded.actuator.get(), id);
            prop_assert_eq!(decoded.limit.to_bits(), limit.to_bits());
        }
    }
}
