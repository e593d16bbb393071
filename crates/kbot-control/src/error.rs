//! 控制层错误类型

use kbot_driver::DriverError;
use thiserror::Error;

/// 策略错误
#[derive(Error, Debug)]
pub enum PolicyError {
    /// 前向推理失败
    #[error("Policy inference failed: {0}")]
    Inference(String),

    /// 输出长度与关节布局不符
    #[error("Policy output has {actual} values, expected {expected}")]
    OutputShape { expected: usize, actual: usize },

    /// 元数据无效或与执行器表不符
    #[error("Invalid policy metadata: {0}")]
    Metadata(String),
}

/// IMU 读取错误
#[derive(Error, Debug)]
pub enum ImuError {
    #[error("IMU unavailable: {0}")]
    Unavailable(String),

    /// 读数含 NaN 或四元数退化
    #[error("Invalid IMU sample: {0}")]
    InvalidSample(String),
}

/// 控制层错误
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// 关节布局与执行器表不一致
    #[error("Joint layout error: {0}")]
    Layout(String),

    /// 启动检查未通过
    #[error("Startup check failed: {0}")]
    Startup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
