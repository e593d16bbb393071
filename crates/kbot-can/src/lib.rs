//! # Kbot CAN Adapter Layer
//!
//! CAN 硬件抽象层：执行器总线驱动只通过 `CanAdapter` trait 收发帧，
//! Linux 上由 SocketCAN 实现，测试与仿真使用 `MockCanAdapter`。

use std::time::Duration;
use thiserror::Error;

// 重新导出 kbot-protocol 中的 KbotFrame
pub use kbot_protocol::KbotFrame;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::SocketCanAdapter;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockCanAdapter, MockCanHandle};

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] CanDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Buffer overflow")]
    BufferOverflow,
    #[error("Bus off")]
    BusOff,
    #[error("Device not started")]
    NotStarted,
}

impl CanError {
    /// 接口级故障（总线不可用），区别于单次超时
    pub fn is_link_failure(&self) -> bool {
        match self {
            CanError::BusOff | CanError::NotStarted => true,
            CanError::Device(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanDeviceErrorKind {
    Unknown,
    NotFound,
    NotUp,
    AccessDenied,
    InvalidFrame,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CanDeviceError {
    pub kind: CanDeviceErrorKind,
    pub message: String,
}

impl CanDeviceError {
    pub fn new(kind: CanDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            CanDeviceErrorKind::NotFound
                | CanDeviceErrorKind::NotUp
                | CanDeviceErrorKind::AccessDenied
        )
    }
}

impl From<String> for CanDeviceError {
    fn from(message: String) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for CanDeviceError {
    fn from(message: &str) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

/// 单条 CAN 总线的收发能力
///
/// 所有接收方法都必须有界：超时返回 `CanError::Timeout`，调用方据此判定无应答。
pub trait CanAdapter {
    /// 接口名（如 `can0`）
    fn name(&self) -> &str;

    fn send(&mut self, frame: KbotFrame) -> Result<(), CanError>;

    fn receive(&mut self) -> Result<KbotFrame, CanError>;

    fn set_receive_timeout(&mut self, _timeout: Duration) {}

    fn receive_timeout(&mut self, timeout: Duration) -> Result<KbotFrame, CanError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }

    fn try_receive(&mut self) -> Result<Option<KbotFrame>, CanError> {
        match self.receive_timeout(Duration::ZERO) {
            Ok(frame) => Ok(Some(frame)),
            Err(CanError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<T: CanAdapter + ?Sized> CanAdapter for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn send(&mut self, frame: KbotFrame) -> Result<(), CanError> {
        (**self).send(frame)
    }

    fn receive(&mut self) -> Result<KbotFrame, CanError> {
        (**self).receive()
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        (**self).set_receive_timeout(timeout)
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<KbotFrame, CanError> {
        (**self).receive_timeout(timeout)
    }

    fn try_receive(&mut self) -> Result<Option<KbotFrame>, CanError> {
        (**self).try_receive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_failure_classification() {
        assert!(CanError::BusOff.is_link_failure());
        assert!(!CanError::Timeout.is_link_failure());
        assert!(
            CanError::Device(CanDeviceError::new(CanDeviceErrorKind::NotUp, "can3 down"))
                .is_link_failure()
        );
        assert!(!CanError::Device("transient".into()).is_link_failure());
    }

    #[test]
    fn test_device_error_display() {
        let err = CanDeviceError::new(CanDeviceErrorKind::NotFound, "can9 missing");
        assert_eq!(err.to_string(), "NotFound: can9 missing");
    }
}
