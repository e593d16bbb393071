//! # Kbot Protocol
//!
//! Robstride 关节执行器 CAN 总线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: 仲裁 ID 编解码、Mux 功能码、执行器 ID
//! - `actuator`: 执行器型号与物理量缩放
//! - `command`: 下行指令帧构建（Ping / 使能 / PD 控制 / 参数写入）
//! - `feedback`: 上行反馈帧解析
//! - `fault`: 故障码表与故障分级
//! - `config`: 整机执行器配置表
//!
//! ## 字节序
//!
//! 反馈与 PD 控制载荷使用大端字节序（厂商定义）；
//! 参数写入与故障上报载荷使用小端字节序。

pub mod actuator;
pub mod command;
pub mod config;
pub mod fault;
pub mod feedback;
pub mod ids;

// 重新导出常用类型
pub use actuator::*;
pub use command::*;
pub use config::*;
pub use fault::*;
pub use feedback::*;
pub use ids::*;

/// CAN 2.0 帧的统一抽象
///
/// 协议层与硬件层之间的中间类型：协议层通过 `TryFrom<KbotFrame>` 解析、
/// 通过 `to_frame()` 构建，CAN 层负责与 SocketCAN 帧互转。
///
/// 执行器总线只使用 29-bit 扩展帧，`new_standard` 保留给测试与诊断工具。
///
/// ```rust
/// use kbot_protocol::KbotFrame;
///
/// let frame = KbotFrame::new_extended(0x0200_FD0B, &[1, 2, 3, 4]);
/// assert_eq!(frame.id(), 0x0200_FD0B);
/// assert_eq!(frame.data_slice(), &[1, 2, 3, 4]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KbotFrame {
    /// CAN ID（不含 EFF 标志位）
    pub id: u32,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,

    /// 是否为扩展帧（29-bit ID）
    pub is_extended: bool,

    /// 时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl KbotFrame {
    /// 创建标准帧
    pub fn new_standard(id: u16, data: &[u8]) -> Self {
        Self::new(id as u32, data, false)
    }

    /// 创建扩展帧
    pub fn new_extended(id: u32, data: &[u8]) -> Self {
        Self::new(id, data, true)
    }

    fn new(id: u32, data: &[u8], is_extended: bool) -> Self {
        let mut fixed_data = [0u8; 8];
        let len = data.len().min(8);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            data: fixed_data,
            len: len as u8,
            is_extended,
            timestamp_us: 0,
        }
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// 获取 CAN ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 获取完整数据（8字节固定数组）
    pub fn data(&self) -> &[u8; 8] {
        &self.data
    }

    /// 要求载荷至少 `expected` 字节
    pub fn require_len(&self, expected: usize) -> Result<(), ProtocolError> {
        if (self.len as usize) < expected {
            return Err(ProtocolError::InvalidLength {
                expected,
                actual: self.len as usize,
            });
        }
        Ok(())
    }
}

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid CAN ID: 0x{id:X}")]
    InvalidCanId { id: u32 },

    #[error("Unexpected mux 0x{actual:02X} (expected 0x{expected:02X})")]
    UnexpectedMux { expected: u8, actual: u8 },

    #[error("Unknown actuator: {id}")]
    UnknownActuator { id: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// 大端字节序转 u16
pub fn bytes_to_u16_be(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

/// u16 转大端字节序
pub fn u16_to_bytes_be(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// 小端字节序转 u32
pub fn bytes_to_u32_le(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_truncates_long_payload() {
        let frame = KbotFrame::new_extended(0x1, &[0xAA; 12]);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.data_slice(), &[0xAA; 8]);
        assert!(frame.is_extended);
    }

    #[test]
    fn test_frame_require_len() {
        let frame = KbotFrame::new_extended(0x1, &[1, 2, 3]);
        assert!(frame.require_len(3).is_ok());
        assert_eq!(
            frame.require_len(8),
            Err(ProtocolError::InvalidLength {
                expected: 8,
                actual: 3
            })
        );
    }

    #[test]
    fn test_byte_helpers() {
        assert_eq!(bytes_to_u16_be([0x12, 0x34]), 0x1234);
        assert_eq!(u16_to_bytes_be(0xBEEF), [0xBE, 0xEF]);
        assert_eq!(bytes_to_u32_le([0x01, 0x00, 0x00, 0x40]), 0x4000_0001);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnexpectedMux {
            expected: 0x02,
            actual: 0x15,
        };
        assert_eq!(err.to_string(), "Unexpected mux 0x15 (expected 0x02)");
    }
}
