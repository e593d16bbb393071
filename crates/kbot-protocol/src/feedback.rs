//! 上行反馈帧解析
//!
//! 反馈帧 (Mux 0x02) 载荷为大端 u16 ×4：角度、速度、力矩、温度（0.1 °C）。
//! PD 控制、使能、参数写入的应答都是反馈帧。

use crate::{
    ActuatorConfig, ActuatorId, FaultReportFrame, HOST_ID, KbotFrame, MotorMode, Mux,
    ProtocolError, ResponseId, bytes_to_u16_be, raw_to_celsius, u16_to_bytes_be,
};

/// 反馈帧原始值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackFrame {
    pub actuator: ActuatorId,
    pub fault_flags: u8,
    pub mode: MotorMode,
    pub angle: u16,
    pub velocity: u16,
    pub torque: u16,
    pub temperature: u16,
}

impl FeedbackFrame {
    /// 按执行器型号量程转换为物理量
    pub fn to_telemetry(&self, config: &ActuatorConfig) -> Telemetry {
        let ranges = config.ranges();
        Telemetry {
            position: ranges.angle.to_physical(self.angle),
            velocity: ranges.velocity.to_physical(self.velocity),
            torque: ranges.torque.to_physical(self.torque),
            temperature: raw_to_celsius(self.temperature),
            fault_flags: self.fault_flags,
            mode: self.mode,
        }
    }

    /// 构建反馈帧（模拟执行器与测试使用）
    pub fn to_frame(self) -> KbotFrame {
        let id = ResponseId {
            host_id: HOST_ID,
            actuator: self.actuator,
            fault_flags: self.fault_flags,
            mode: self.mode,
            mux: Mux::Feedback,
        };
        let mut data = [0u8; 8];
        data[0..2].copy_from_slice(&u16_to_bytes_be(self.angle));
        data[2..4].copy_from_slice(&u16_to_bytes_be(self.velocity));
        data[4..6].copy_from_slice(&u16_to_bytes_be(self.torque));
        data[6..8].copy_from_slice(&u16_to_bytes_be(self.temperature));
        KbotFrame::new_extended(id.encode(), &data)
    }
}

impl TryFrom<KbotFrame> for FeedbackFrame {
    type Error = ProtocolError;

    fn try_from(frame: KbotFrame) -> Result<Self, Self::Error> {
        let id = ResponseId::parse(frame.id)?;
        if id.mux != Mux::Feedback {
            return Err(ProtocolError::UnexpectedMux {
                expected: Mux::Feedback.into(),
                actual: id.mux.into(),
            });
        }
        frame.require_len(8)?;
        let d = frame.data;
        Ok(Self {
            actuator: id.actuator,
            fault_flags: id.fault_flags,
            mode: id.mode,
            angle: bytes_to_u16_be([d[0], d[1]]),
            velocity: bytes_to_u16_be([d[2], d[3]]),
            torque: bytes_to_u16_be([d[4], d[5]]),
            temperature: bytes_to_u16_be([d[6], d[7]]),
        })
    }
}

/// 物理量遥测
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Telemetry {
    /// rad
    pub position: f32,
    /// rad/s
    pub velocity: f32,
    /// N·m
    pub torque: f32,
    /// °C
    pub temperature: f32,
    pub fault_flags: u8,
    pub mode: MotorMode,
}

/// 任意上行帧的分类结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Response {
    /// Ping 应答
    Pong(ResponseId),
    Feedback(FeedbackFrame),
    FaultReport(FaultReportFrame),
    /// 其他已知 Mux 的应答（不携带本模块关心的载荷）
    Other(ResponseId),
}

impl Response {
    pub fn parse(frame: KbotFrame) -> Result<Self, ProtocolError> {
        let id = ResponseId::parse(frame.id)?;
        match id.mux {
            Mux::Ping => Ok(Response::Pong(id)),
            Mux::Feedback => FeedbackFrame::try_from(frame).map(Response::Feedback),
            Mux::FaultReport => FaultReportFrame::try_from(frame).map(Response::FaultReport),
            _ => Ok(Response::Other(id)),
        }
    }

    pub fn actuator(&self) -> ActuatorId {
        match self {
            Response::Pong(id) | Response::Other(id) => id.actuator,
            Response::Feedback(fb) => fb.actuator,
            Response::FaultReport(fr) => fr.actuator,
        }
    }

    pub fn mux(&self) -> Mux {
        match self {
            Response::Pong(_) => Mux::Ping,
            Response::Feedback(_) => Mux::Feedback,
            Response::FaultReport(_) => Mux::FaultReport,
            Response::Other(id) => id.mux,
        }
    }
}
