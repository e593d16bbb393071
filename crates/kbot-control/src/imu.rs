//! IMU 读数与投影重力
//!
//! 投影重力 = 世界系重力 (0, 0, -9.81) 经姿态四元数的逆旋转到机体系。

use crate::error::ImuError;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// 标准重力（m/s²）
pub const STANDARD_GRAVITY: f32 = 9.81;

/// 单次 IMU 采样
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuReading {
    /// 机体相对世界系的姿态
    pub orientation: UnitQuaternion<f32>,
    /// 角速度（rad/s，机体系）
    pub angular_velocity: Vector3<f32>,
    /// 线加速度（m/s²，机体系）
    pub linear_acceleration: Vector3<f32>,
}

impl Default for ImuReading {
    /// 水平静止
    fn default() -> Self {
        Self {
            orientation: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
            linear_acceleration: Vector3::new(0.0, 0.0, STANDARD_GRAVITY),
        }
    }
}

impl ImuReading {
    /// 由 `(w, x, y, z)` 四元数构造，会归一化
    pub fn from_wxyz(
        w: f32,
        x: f32,
        y: f32,
        z: f32,
        angular_velocity: [f32; 3],
    ) -> Result<Self, ImuError> {
        let q = Quaternion::new(w, x, y, z);
        let norm = q.norm();
        if !norm.is_finite() || norm < 1e-6 {
            return Err(ImuError::InvalidSample(format!(
                "degenerate quaternion ({}, {}, {}, {})",
                w, x, y, z
            )));
        }
        if angular_velocity.iter().any(|v| !v.is_finite()) {
            return Err(ImuError::InvalidSample("non-finite angular velocity".into()));
        }
        Ok(Self {
            orientation: UnitQuaternion::from_quaternion(q),
            angular_velocity: Vector3::from(angular_velocity),
            ..Self::default()
        })
    }

    /// 机体系下的重力向量
    pub fn projected_gravity(&self) -> [f32; 3] {
        let g = Vector3::new(0.0, 0.0, -STANDARD_GRAVITY);
        let v = self.orientation.inverse_transform_vector(&g);
        [v.x, v.y, v.z]
    }

    pub fn gyroscope(&self) -> [f32; 3] {
        [
            self.angular_velocity.x,
            self.angular_velocity.y,
            self.angular_velocity.z,
        ]
    }
}

/// IMU 数据源
pub trait ImuSource: Send {
    fn name(&self) -> &str;

    /// 读取最新采样，不得阻塞超过一个控制周期
    fn read(&mut self) -> Result<ImuReading, ImuError>;
}

/// 无 IMU 时的替代源：恒为水平静止
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyImu;

impl ImuSource for DummyImu {
    fn name(&self) -> &str {
        "dummy"
    }

    fn read(&mut self) -> Result<ImuReading, ImuError> {
        Ok(ImuReading::default())
    }
}
