//! 驱动层错误类型定义

use kbot_can::CanError;
use kbot_protocol::{ActuatorId, ProtocolError};
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// CAN 适配层错误
    #[error("CAN driver error: {0}")]
    Can(#[from] CanError),

    /// 指令编码失败
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 所有接口都无法启动
    #[error("No CAN bus available ({attempted} interfaces tried)")]
    NoBusAvailable { attempted: usize },

    /// 所有可达接口都未应答
    #[error("No response from actuator {actuator}")]
    NoResponse { actuator: ActuatorId },

    /// 收到应答但载荷无法解析
    #[error("Malformed response from actuator {actuator}: {source}")]
    Decode {
        actuator: ActuatorId,
        #[source]
        source: ProtocolError,
    },

    /// 没有可达接口可用于发送
    #[error("No reachable bus for actuator {actuator}")]
    Unrouted { actuator: ActuatorId },

    /// 执行器不在配置表中
    #[error("Actuator {actuator} is not in the robot configuration")]
    UnknownActuator { actuator: ActuatorId },
}

impl DriverError {
    /// 通信类故障：可用上次有效值继续运行
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            DriverError::NoResponse { .. }
                | DriverError::Decode { .. }
                | DriverError::Unrouted { .. }
                | DriverError::Can(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::NoResponse {
            actuator: ActuatorId::new(34),
        };
        assert_eq!(err.to_string(), "No response from actuator 34");

        let err = DriverError::Decode {
            actuator: ActuatorId::new(12),
            source: ProtocolError::InvalidLength {
                expected: 8,
                actual: 4,
            },
        };
        assert!(err.to_string().contains("Invalid frame length"));
    }

    #[test]
    fn test_communication_classification() {
        assert!(
            DriverError::NoResponse {
                actuator: ActuatorId::new(11)
            }
            .is_communication()
        );
        assert!(DriverError::Can(CanError::Timeout).is_communication());
        assert!(
            !DriverError::UnknownActuator {
                actuator: ActuatorId::new(99)
            }
            .is_communication()
        );
        assert!(!DriverError::NoBusAvailable { attempted: 7 }.is_communication());
    }
}
