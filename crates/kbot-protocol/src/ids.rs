//! 仲裁 ID 定义
//!
//! 下行帧（主机 → 执行器）29-bit 扩展 ID 布局：
//!
//! ```text
//! bit 24-28  bit 8-23                     bit 0-7
//! mux        数据区（主机 ID / 原始前馈力矩） 执行器 ID
//! ```
//!
//! 上行帧（执行器 → 主机）布局：
//!
//! ```text
//! bit 24-28  bit 22-23  bit 16-21  bit 8-15   bit 0-7
//! mux        模式状态    故障标志    执行器 ID   主机 ID
//! ```

use crate::ProtocolError;
use bilge::prelude::*;
use std::fmt;

/// 主机 ID（所有下行帧的数据区低 8 位）
pub const HOST_ID: u8 = 0xFD;

/// 29-bit 扩展 ID 掩码
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// 功能码（仲裁 ID 的 bit 24-28）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::TryFromPrimitive, num_enum::IntoPrimitive,
)]
#[repr(u8)]
pub enum Mux {
    /// 存在性探测
    Ping = 0x00,
    /// PD 位置控制
    Control = 0x01,
    /// 状态反馈（请求与应答共用）
    Feedback = 0x02,
    /// 电机使能
    Enable = 0x03,
    /// 电机停止
    Stop = 0x04,
    /// 单参数写入
    ParamWrite = 0x12,
    /// 故障上报
    FaultReport = 0x15,
}

impl Mux {
    /// 下行帧的基础码：`mux << 24 | HOST_ID << 8`，与执行器 ID 按位或即得仲裁 ID
    pub const fn base_code(self) -> u32 {
        ((self as u32 & 0x1F) << 24) | ((HOST_ID as u32) << 8)
    }
}

/// 执行器 ID
///
/// 两位十进制：十位为肢体分组（1 左臂、2 右臂、3 左腿、4 右腿），个位为肢体内关节序号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ActuatorId(u8);

impl ActuatorId {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// 肢体分组（十位）
    pub const fn limb(self) -> u8 {
        self.0 / 10
    }

    /// 肢体内关节序号（个位）
    pub const fn joint_index(self) -> u8 {
        self.0 % 10
    }
}

impl From<u8> for ActuatorId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// 下行帧 ID
// ============================================================================

/// 下行帧仲裁 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId {
    pub mux: Mux,
    /// bit 8-23：普通指令为主机 ID，PD 控制帧为原始前馈力矩
    pub data: u16,
    pub actuator: ActuatorId,
}

impl RequestId {
    /// 普通指令（数据区为主机 ID）
    pub fn new(mux: Mux, actuator: ActuatorId) -> Self {
        Self {
            mux,
            data: HOST_ID as u16,
            actuator,
        }
    }

    pub fn with_data(mux: Mux, data: u16, actuator: ActuatorId) -> Self {
        Self {
            mux,
            data,
            actuator,
        }
    }

    pub fn encode(self) -> u32 {
        ((u8::from(self.mux) as u32 & 0x1F) << 24)
            | ((self.data as u32) << 8)
            | self.actuator.get() as u32
    }

    pub fn decode(raw: u32) -> Result<Self, ProtocolError> {
        if raw & !EXTENDED_ID_MASK != 0 {
            return Err(ProtocolError::InvalidCanId { id: raw });
        }
        let mux_raw = ((raw >> 24) & 0x1F) as u8;
        let mux = Mux::try_from(mux_raw).map_err(|_| ProtocolError::InvalidCanId { id: raw })?;
        Ok(Self {
            mux,
            data: ((raw >> 8) & 0xFFFF) as u16,
            actuator: ActuatorId::new((raw & 0xFF) as u8),
        })
    }
}

/// `base_code(mux) | actuator_id`
pub fn encode_arbitration_id(mux: Mux, actuator: ActuatorId) -> u32 {
    RequestId::new(mux, actuator).encode()
}

/// 从下行仲裁 ID 还原执行器 ID
pub fn decode_arbitration_id(raw: u32) -> Result<ActuatorId, ProtocolError> {
    RequestId::decode(raw).map(|id| id.actuator)
}

// ============================================================================
// 上行帧 ID
// ============================================================================

/// 上行仲裁 ID 位域（bilge 默认 LSB first）
#[bitsize(32)]
#[derive(FromBits, DebugBits, Clone, Copy)]
struct ResponseIdBits {
    host_id: u8,
    actuator_id: u8,
    fault_flags: u6,
    mode_status: u2,
    mux: u5,
    reserved: u3,
}

/// 电机模式状态（bit 22-23）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, num_enum::FromPrimitive)]
#[repr(u8)]
pub enum MotorMode {
    /// 复位模式
    #[default]
    Reset = 0,
    /// 标定模式
    Calibration = 1,
    /// 运行模式
    Run = 2,
    /// 未定义
    Unknown = 3,
}

/// 上行帧仲裁 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseId {
    pub host_id: u8,
    pub actuator: ActuatorId,
    pub fault_flags: u8,
    pub mode: MotorMode,
    pub mux: Mux,
}

impl ResponseId {
    pub fn parse(raw: u32) -> Result<Self, ProtocolError> {
        let bits = ResponseIdBits::from(raw);
        let mux_raw = bits.mux().value();
        let mux = Mux::try_from(mux_raw).map_err(|_| ProtocolError::InvalidCanId { id: raw })?;
        Ok(Self {
            host_id: bits.host_id(),
            actuator: ActuatorId::new(bits.actuator_id()),
            fault_flags: bits.fault_flags().value(),
            mode: MotorMode::from(bits.mode_status().value()),
            mux,
        })
    }

    /// 编码（模拟执行器与测试使用）
    pub fn encode(self) -> u32 {
        ((u8::from(self.mux) as u32 & 0x1F) << 24)
            | ((self.mode as u32 & 0x03) << 22)
            | ((self.fault_flags as u32 & 0x3F) << 16)
            | ((self.actuator.get() as u32) << 8)
            | self.host_id as u32
    }
}
