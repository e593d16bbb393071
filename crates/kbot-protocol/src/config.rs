//! 整机执行器配置表
//!
//! 启动时加载一次，运行期间只读。`version` 用于区分不同的机型/装配版本，
//! 配置文件中的表会整体替换内置表。

use crate::{ActuatorId, ActuatorRanges, ActuatorType, ProtocolError};
use std::collections::HashSet;

/// 内置配置表版本
pub const ROBOT_CONFIG_VERSION: u32 = 1;

/// 单个执行器的静态配置
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActuatorConfig {
    pub id: ActuatorId,
    /// 关节全名，如 `dof_left_knee_04`
    pub full_name: String,
    pub actuator_type: ActuatorType,
    /// 比例增益（物理量）
    pub kp: f32,
    /// 微分增益（物理量）
    pub kd: f32,
    /// 零位偏置（rad），归位目标
    #[cfg_attr(feature = "serde", serde(default))]
    pub joint_bias: f32,
    /// 力矩上限（N·m），缺省为型号峰值力矩
    #[cfg_attr(feature = "serde", serde(default))]
    pub max_torque: Option<f32>,
}

impl ActuatorConfig {
    pub fn new(
        id: u8,
        full_name: &str,
        actuator_type: ActuatorType,
        kp: f32,
        kd: f32,
        bias_deg: f32,
    ) -> Self {
        Self {
            id: ActuatorId::new(id),
            full_name: full_name.to_string(),
            actuator_type,
            kp,
            kd,
            joint_bias: bias_deg.to_radians(),
            max_torque: None,
        }
    }

    pub fn ranges(&self) -> ActuatorRanges {
        self.actuator_type.ranges()
    }

    /// 短名：去掉 `dof_` 前缀与末尾型号后缀，`dof_left_knee_04` → `left_knee`
    pub fn name(&self) -> String {
        let trimmed = self.full_name.trim_start_matches("dof_");
        match trimmed.rsplit_once('_') {
            Some((head, _)) => head.to_string(),
            None => trimmed.to_string(),
        }
    }

    /// 生效的力矩上限
    pub fn torque_limit(&self) -> f32 {
        self.max_torque
            .unwrap_or_else(|| self.actuator_type.peak_torque())
    }

    /// kp 原始值（满增益）
    pub fn raw_kp(&self) -> f32 {
        let r = self.ranges().kp;
        (self.kp - r.min) / (r.max - r.min) * crate::RAW_FULL_SCALE
    }

    /// kd 原始值（满增益）
    pub fn raw_kd(&self) -> f32 {
        let r = self.ranges().kd;
        (self.kd - r.min) / (r.max - r.min) * crate::RAW_FULL_SCALE
    }
}

/// 整机配置
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RobotConfig {
    pub version: u32,
    pub actuators: Vec<ActuatorConfig>,
}

impl Default for RobotConfig {
    fn default() -> Self {
        use ActuatorType::*;
        let actuators = vec![
            // 左臂
            ActuatorConfig::new(11, "dof_left_shoulder_pitch_03", Robstride03, 100.0, 8.284, 0.0),
            ActuatorConfig::new(12, "dof_left_shoulder_roll_03", Robstride03, 100.0, 8.257, 10.0),
            ActuatorConfig::new(13, "dof_left_shoulder_yaw_02", Robstride02, 100.0, 2.945, 0.0),
            ActuatorConfig::new(14, "dof_left_elbow_02", Robstride02, 80.0, 2.266, -90.0),
            ActuatorConfig::new(15, "dof_left_wrist_00", Robstride00, 20.0, 0.295, 0.0),
            ActuatorConfig::new(16, "dof_left_wrist_gripper_05", Robstride00, 4.0, 0.06, 0.0),
            // 右臂
            ActuatorConfig::new(21, "dof_right_shoulder_pitch_03", Robstride03, 100.0, 8.284, 0.0),
            ActuatorConfig::new(22, "dof_right_shoulder_roll_03", Robstride03, 100.0, 8.257, -10.0),
            ActuatorConfig::new(23, "dof_right_shoulder_yaw_02", Robstride02, 100.0, 2.945, 0.0),
            ActuatorConfig::new(24, "dof_right_elbow_02", Robstride02, 100.0, 2.266, 90.0),
            ActuatorConfig::new(25, "dof_right_wrist_00", Robstride00, 20.0, 0.295, 0.0),
            ActuatorConfig::new(26, "dof_right_wrist_gripper_05", Robstride00, 4.0, 0.06, 0.0),
            // 左腿
            ActuatorConfig::new(31, "dof_left_hip_pitch_04", Robstride04, 150.0, 24.722, 20.0),
            ActuatorConfig::new(32, "dof_left_hip_roll_03", Robstride03, 200.0, 26.387, 0.0),
            ActuatorConfig::new(33, "dof_left_hip_yaw_03", Robstride03, 100.0, 3.419, 0.0),
            ActuatorConfig::new(34, "dof_left_knee_04", Robstride04, 150.0, 8.654, 50.0),
            ActuatorConfig::new(35, "dof_left_ankle_02", Robstride02, 40.0, 0.99, -30.0),
            // 右腿
            ActuatorConfig::new(41, "dof_right_hip_pitch_04", Robstride04, 150.0, 24.722, -20.0),
            ActuatorConfig::new(42, "dof_right_hip_roll_03", Robstride03, 200.0, 26.387, 0.0),
            ActuatorConfig::new(43, "dof_right_hip_yaw_03", Robstride03, 100.0, 3.419, 0.0),
            ActuatorConfig::new(44, "dof_right_knee_04", Robstride04, 150.0, 8.654, -50.0),
            ActuatorConfig::new(45, "dof_right_ankle_02", Robstride02, 40.0, 0.99, 30.0),
        ];
        Self {
            version: ROBOT_CONFIG_VERSION,
            actuators,
        }
    }
}

impl RobotConfig {
    pub fn get(&self, id: ActuatorId) -> Option<&ActuatorConfig> {
        self.actuators.iter().find(|a| a.id == id)
    }

    pub fn by_full_name(&self, full_name: &str) -> Option<&ActuatorConfig> {
        self.actuators.iter().find(|a| a.full_name == full_name)
    }

    /// 关节全名 → 执行器 ID
    pub fn id_of(&self, full_name: &str) -> Result<ActuatorId, ProtocolError> {
        self.by_full_name(full_name)
            .map(|a| a.id)
            .ok_or_else(|| ProtocolError::InvalidValue {
                field: "joint_name".to_string(),
                value: full_name.to_string(),
            })
    }

    pub fn ids(&self) -> impl Iterator<Item = ActuatorId> + '_ {
        self.actuators.iter().map(|a| a.id)
    }

    /// 校验 ID 与全名唯一、增益在型号量程内
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for a in &self.actuators {
            if !ids.insert(a.id) {
                return Err(ProtocolError::InvalidValue {
                    field: "id".to_string(),
                    value: format!("duplicate actuator id {}", a.id),
                });
            }
            if !names.insert(a.full_name.as_str()) {
                return Err(ProtocolError::InvalidValue {
                    field: "full_name".to_string(),
                    value: format!("duplicate joint name {}", a.full_name),
                });
            }
            let ranges = a.ranges();
            if !ranges.kp.contains(a.kp) || !ranges.kd.contains(a.kd) {
                return Err(ProtocolError::InvalidValue {
                    field: format!("{}.gains", a.full_name),
                    value: format!("kp={} kd={}", a.kp, a.kd),
                });
            }
            if let Some(limit) = a.max_torque
                && !(limit > 0.0 && limit <= a.actuator_type.peak_torque())
            {
                return Err(ProtocolError::InvalidValue {
                    field: format!("{}.max_torque", a.full_name),
                    value: limit.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_valid() {
        let config = RobotConfig::default();
        assert_eq!(config.actuators.len(), 22);
        assert_eq!(config.version, ROBOT_CONFIG_VERSION);
        config.validate().unwrap();
    }

    #[test]
    fn test_lookup() {
        let config = RobotConfig::default();
        let id = config.id_of("dof_left_wrist_gripper_05").unwrap();
        assert_eq!(id, ActuatorId::new(16));
        assert_eq!(config.get(id).unwrap().name(), "left_wrist_gripper");
        assert!(config.id_of("dof_tail_00").is_err());
    }

    #[test]
    fn test_joint_bias_in_radians() {
        let config = RobotConfig::default();
        let knee = config.get(ActuatorId::new(34)).unwrap();
        assert!((knee.joint_bias - 50f32.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn test_torque_limit_defaults_to_peak() {
        let config = RobotConfig::default();
        let hip = config.get(ActuatorId::new(31)).unwrap();
        assert_eq!(hip.torque_limit(), 120.0);

        let mut custom = hip.clone();
        custom.max_torque = Some(40.0);
        assert_eq!(custom.torque_limit(), 40.0);
    }

    #[test]
    fn test_raw_gains() {
        let config = RobotConfig::default();
        let wrist = config.get(ActuatorId::new(15)).unwrap();
        // kp 20 / 500 满量程
        assert!((wrist.raw_kp() - 0.04 * 65535.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = RobotConfig::default();
        let dup = config.actuators[0].clone();
        config.actuators.push(dup);
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_actuator_table_from_toml() {
        let content = r#"
version = 1

[[actuators]]
id = 34
full_name = "dof_left_knee_04"
actuator_type = "Robstride04"
kp = 150.0
kd = 8.654

[[actuators]]
id = 35
full_name = "dof_left_ankle_02"
actuator_type = "Robstride02"
kp = 40.0
kd = 0.99
max_torque = 10.0
"#;
        let config: RobotConfig = toml::from_str(content).unwrap();
        config.validate().unwrap();
        assert_eq!(config.actuators[0].joint_bias, 0.0);
        assert_eq!(config.get(ActuatorId::new(34)).unwrap().torque_limit(), 120.0);
        assert_eq!(config.get(ActuatorId::new(35)).unwrap().torque_limit(), 10.0);

        let json = serde_json::to_string(&config).unwrap();
        let back: RobotConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validate_rejects_torque_above_peak() {
        let mut config = RobotConfig::default();
        config.actuators[4].max_torque = Some(50.0);
        assert!(config.validate().is_err());
    }
}
