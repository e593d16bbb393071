//! 每 tick 的机器人状态快照

use crate::imu::ImuReading;

/// 单个关节读数
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JointReading {
    /// rad
    pub position: f32,
    /// rad/s
    pub velocity: f32,
    /// N·m
    pub torque: f32,
    /// °C
    pub temperature: f32,
    /// 本 tick 是否取得了新读数
    pub fresh: bool,
}

/// 状态快照，构造后不可变，顺序与 [`JointLayout`](crate::JointLayout) 一致
#[derive(Debug, Clone, PartialEq)]
pub struct RobotState {
    tick: u64,
    imu: ImuReading,
    joints: Vec<JointReading>,
}

impl RobotState {
    pub fn new(tick: u64, imu: ImuReading, joints: Vec<JointReading>) -> Self {
        Self { tick, imu, joints }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn imu(&self) -> &ImuReading {
        &self.imu
    }

    pub fn projected_gravity(&self) -> [f32; 3] {
        self.imu.projected_gravity()
    }

    pub fn gyroscope(&self) -> [f32; 3] {
        self.imu.gyroscope()
    }

    pub fn joints(&self) -> &[JointReading] {
        &self.joints
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn positions(&self) -> Vec<f32> {
        self.joints.iter().map(|j| j.position).collect()
    }

    pub fn velocities(&self) -> Vec<f32> {
        self.joints.iter().map(|j| j.velocity).collect()
    }

    pub fn torques(&self) -> Vec<f32> {
        self.joints.iter().map(|j| j.torque).collect()
    }

    pub fn temperatures(&self) -> Vec<f32> {
        self.joints.iter().map(|j| j.temperature).collect()
    }
}
