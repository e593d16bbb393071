//! 执行器型号与物理量缩放
//!
//! 反馈与控制帧中的角度、速度、力矩、kp、kd 都是 16-bit 无符号原始值，
//! 线性映射到型号相关的物理量程：`physical = min + raw / 65535 * (max - min)`。

use std::f32::consts::PI;

/// 16-bit 原始值满量程
pub const RAW_FULL_SCALE: f32 = 65535.0;

/// Robstride 执行器型号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActuatorType {
    Robstride00,
    Robstride01,
    Robstride02,
    Robstride03,
    Robstride04,
}

/// 闭区间量程
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f32,
    pub max: f32,
}

impl Range {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub const fn symmetric(limit: f32) -> Self {
        Self {
            min: -limit,
            max: limit,
        }
    }

    /// 原始值 → 物理量
    pub fn to_physical(&self, raw: u16) -> f32 {
        self.min + (raw as f32 / RAW_FULL_SCALE) * (self.max - self.min)
    }

    /// 物理量 → 原始值（超出量程时饱和）
    pub fn to_raw(&self, physical: f32) -> u16 {
        let proportion = (physical - self.min) / (self.max - self.min);
        let raw = proportion * RAW_FULL_SCALE;
        if raw.is_nan() {
            return 0;
        }
        raw.clamp(0.0, RAW_FULL_SCALE) as u16
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// 型号量程表
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorRanges {
    pub angle: Range,
    pub velocity: Range,
    pub torque: Range,
    pub kp: Range,
    pub kd: Range,
}

impl ActuatorType {
    pub fn ranges(self) -> ActuatorRanges {
        let angle = Range::symmetric(4.0 * PI);
        match self {
            ActuatorType::Robstride00 => ActuatorRanges {
                angle,
                velocity: Range::symmetric(33.0),
                torque: Range::symmetric(14.0),
                kp: Range::new(0.0, 500.0),
                kd: Range::new(0.0, 5.0),
            },
            ActuatorType::Robstride01 | ActuatorType::Robstride02 => ActuatorRanges {
                angle,
                velocity: Range::symmetric(44.0),
                torque: Range::symmetric(17.0),
                kp: Range::new(0.0, 500.0),
                kd: Range::new(0.0, 5.0),
            },
            ActuatorType::Robstride03 => ActuatorRanges {
                angle,
                velocity: Range::symmetric(20.0),
                torque: Range::symmetric(60.0),
                kp: Range::new(0.0, 5000.0),
                kd: Range::new(0.0, 100.0),
            },
            ActuatorType::Robstride04 => ActuatorRanges {
                angle,
                velocity: Range::symmetric(15.0),
                torque: Range::symmetric(120.0),
                kp: Range::new(0.0, 5000.0),
                kd: Range::new(0.0, 100.0),
            },
        }
    }

    /// 型号额定峰值力矩（N·m）
    pub fn peak_torque(self) -> f32 {
        self.ranges().torque.max
    }
}

/// 温度原始值（0.1 °C）→ 摄氏度
pub fn raw_to_celsius(raw: u16) -> f32 {
    raw as f32 / 10.0
}
