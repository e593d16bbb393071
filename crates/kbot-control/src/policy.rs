//! # 策略执行
//!
//! 策略网络只作为前向函数注入（[`Policy`] trait）。执行器负责：
//! 1. 按关节布局和命令名顺序组装 [`PolicyInput`]
//! 2. 调用策略
//! 3. 校验输出长度
//! 4. 用直接覆盖值替换对应关节的输出
//!
//! 失败不重试，由调用方进入 SafeStop。

use crate::command::{CommandField, CommandVector};
use crate::error::{ControlError, PolicyError};
use crate::layout::JointLayout;
use crate::state::RobotState;
use kbot_protocol::RobotConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 策略元数据（JSON）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyMetadata {
    /// 输入/输出关节顺序（关节全名）
    pub joint_names: Vec<String>,
    /// 命令输入顺序
    #[serde(default)]
    pub command_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PolicyMetadata {
    pub fn from_json_str(content: &str) -> Result<Self, PolicyError> {
        serde_json::from_str(content).map_err(|e| PolicyError::Metadata(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PolicyError::Metadata(format!("{}: {}", path.display(), e)))?;
        let mut metadata = Self::from_json_str(&content)?;
        if metadata.name.is_none() {
            metadata.name = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        }
        Ok(metadata)
    }

    /// 全部关节、全部运动命令
    pub fn for_robot(robot: &RobotConfig) -> Self {
        Self {
            joint_names: robot.actuators.iter().map(|a| a.full_name.clone()).collect(),
            command_names: CommandField::LOCOMOTION.iter().map(|f| f.name().to_string()).collect(),
            name: None,
        }
    }

    /// 对照执行器表校验，得到关节布局与命令字段顺序
    pub fn resolve(&self, robot: &RobotConfig) -> Result<(JointLayout, Vec<CommandField>), PolicyError> {
        let layout = JointLayout::from_names(robot, &self.joint_names)
            .map_err(|e| PolicyError::Metadata(e.to_string()))?;
        let commands = self
            .command_names
            .iter()
            .map(|name| {
                CommandField::from_name(name)
                    .ok_or_else(|| PolicyError::Metadata(format!("unknown command name '{}'", name)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((layout, commands))
    }
}

/// 策略输入
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyInput {
    pub joint_angles: Vec<f32>,
    pub joint_angular_velocities: Vec<f32>,
    pub projected_gravity: [f32; 3],
    pub gyroscope: [f32; 3],
    /// 按 `command_names` 排列
    pub command: Vec<f32>,
}

/// 前向推理
pub trait Policy: Send {
    fn metadata(&self) -> &PolicyMetadata;

    /// 一步推理，返回按关节布局排列的目标角度（rad）
    fn step(&mut self, input: &PolicyInput) -> Result<Vec<f32>, PolicyError>;
}

/// 保持零位姿态：始终输出各关节偏置
#[derive(Debug, Clone)]
pub struct HoldPosePolicy {
    metadata: PolicyMetadata,
    pose: Vec<f32>,
}

impl HoldPosePolicy {
    pub fn new(metadata: PolicyMetadata, robot: &RobotConfig) -> Result<Self, PolicyError> {
        let (layout, _) = metadata.resolve(robot)?;
        let pose = layout
            .ids()
            .iter()
            .map(|&id| robot.get(id).map(|a| a.joint_bias).unwrap_or(0.0))
            .collect();
        Ok(Self { metadata, pose })
    }
}

impl Policy for HoldPosePolicy {
    fn metadata(&self) -> &PolicyMetadata {
        &self.metadata
    }

    fn step(&mut self, _input: &PolicyInput) -> Result<Vec<f32>, PolicyError> {
        Ok(self.pose.clone())
    }
}

/// 策略执行器
pub struct PolicyExecutor {
    policy: Box<dyn Policy>,
    layout: JointLayout,
    commands: Vec<CommandField>,
}

impl PolicyExecutor {
    /// 加载时校验元数据
    pub fn new(policy: Box<dyn Policy>, robot: &RobotConfig) -> Result<Self, ControlError> {
        let (layout, commands) = policy.metadata().resolve(robot)?;
        Ok(Self {
            policy,
            layout,
            commands,
        })
    }

    pub fn layout(&self) -> &JointLayout {
        &self.layout
    }

    pub fn command_fields(&self) -> &[CommandField] {
        &self.commands
    }

    pub fn metadata(&self) -> &PolicyMetadata {
        self.policy.metadata()
    }

    pub fn build_input(&self, state: &RobotState, command: &CommandVector) -> PolicyInput {
        PolicyInput {
            joint_angles: state.positions(),
            joint_angular_velocities: state.velocities(),
            projected_gravity: state.projected_gravity(),
            gyroscope: state.gyroscope(),
            command: command.select(&self.commands),
        }
    }

    /// 推理并应用直接覆盖
    pub fn infer(&mut self, state: &RobotState, command: &CommandVector) -> Result<Vec<f32>, PolicyError> {
        let input = self.build_input(state, command);
        let mut action = self.policy.step(&input)?;
        if action.len() != self.layout.len() {
            return Err(PolicyError::OutputShape {
                expected: self.layout.len(),
                actual: action.len(),
            });
        }
        if let Some(bad) = action.iter().position(|v| !v.is_finite()) {
            return Err(PolicyError::Inference(format!(
                "non-finite output for {}",
                self.layout.names()[bad]
            )));
        }
        for (&id, &value) in command.overrides() {
            if let Some(i) = self.layout.index_of(id) {
                action[i] = value;
            }
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandState;
    use crate::imu::ImuReading;
    use crate::state::JointReading;
    use kbot_protocol::ActuatorId;
    use std::time::Instant;

    struct Constant {
        metadata: PolicyMetadata,
        value: f32,
        len: usize,
        last_input: Option<PolicyInput>,
    }

    impl Policy for Constant {
        fn metadata(&self) -> &PolicyMetadata {
            &self.metadata
        }

        fn step(&mut self, input: &PolicyInput) -> Result<Vec<f32>, PolicyError> {
            self.last_input = Some(input.clone());
            Ok(vec![self.value; self.len])
        }
    }

    fn metadata() -> PolicyMetadata {
        PolicyMetadata::from_json_str(
            r#"{"joint_names":["dof_left_wrist_gripper_05","dof_left_knee_04"],
                "command_names":["yawrate","xvel","lwristgripper"]}"#,
        )
        .unwrap()
    }

    fn state() -> RobotState {
        let joints = vec![
            JointReading {
                position: 0.1,
                velocity: 1.0,
                ..Default::default()
            },
            JointReading {
                position: 0.2,
                velocity: 2.0,
                ..Default::default()
            },
        ];
        RobotState::new(0, ImuReading::default(), joints)
    }

    #[test]
    fn test_input_layout() {
        let robot = RobotConfig::default();
        let policy = Constant {
            metadata: metadata(),
            value: 0.0,
            len: 2,
            last_input: None,
        };
        let executor = PolicyExecutor::new(Box::new(policy), &robot).unwrap();
        let mut cmd = CommandState::default();
        cmd.set(CommandField::XVel, 0.5);
        cmd.set(CommandField::YawRate, -0.2);
        let input = executor.build_input(&state(), &cmd.to_vector(Instant::now()));
        assert_eq!(input.joint_angles, vec![0.1, 0.2]);
        assert_eq!(input.joint_angular_velocities, vec![1.0, 2.0]);
        assert_eq!(input.command, vec![-0.2, 0.5, 0.0]);
        assert!((input.projected_gravity[2] + 9.81).abs() < 1e-5);
    }

    #[test]
    fn test_override_replaces_output() {
        let robot = RobotConfig::default();
        let policy = Constant {
            metadata: metadata(),
            value: 1.0,
            len: 2,
            last_input: None,
        };
        let mut executor = PolicyExecutor::new(Box::new(policy), &robot).unwrap();
        let mut cmd = CommandState::default();
        cmd.set(CommandField::LWristGripper, 0.3);
        cmd.overrides.insert(ActuatorId::new(16), 0.57);
        // 不在布局中的覆盖被忽略
        cmd.overrides.insert(ActuatorId::new(44), -1.0);
        let action = executor.infer(&state(), &cmd.to_vector(Instant::now())).unwrap();
        assert_eq!(action, vec![0.57, 1.0]);
    }

    #[test]
    fn test_output_shape_checked() {
        let robot = RobotConfig::default();
        let policy = Constant {
            metadata: metadata(),
            value: 1.0,
            len: 3,
            last_input: None,
        };
        let mut executor = PolicyExecutor::new(Box::new(policy), &robot).unwrap();
        let err = executor
            .infer(&state(), &CommandVector::default())
            .unwrap_err();
        assert!(matches!(err, PolicyError::OutputShape { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_metadata_validation() {
        let robot = RobotConfig::default();
        let bad_joint = PolicyMetadata::from_json_str(r#"{"joint_names":["dof_tail_01"]}"#).unwrap();
        assert!(matches!(bad_joint.resolve(&robot), Err(PolicyError::Metadata(_))));
        let bad_cmd = PolicyMetadata::from_json_str(
            r#"{"joint_names":["dof_left_knee_04"],"command_names":["jump"]}"#,
        )
        .unwrap();
        assert!(matches!(bad_cmd.resolve(&robot), Err(PolicyError::Metadata(_))));
        assert!(PolicyMetadata::from_json_str("{}").is_err());
    }

    #[test]
    fn test_hold_pose_outputs_biases() {
        let robot = RobotConfig::default();
        let mut policy = HoldPosePolicy::new(PolicyMetadata::for_robot(&robot), &robot).unwrap();
        let input = PolicyInput {
            joint_angles: vec![],
            joint_angular_velocities: vec![],
            projected_gravity: [0.0; 3],
            gyroscope: [0.0; 3],
            command: vec![],
        };
        let pose = policy.step(&input).unwrap();
        assert_eq!(pose.len(), 22);
        let knee = robot.get(ActuatorId::new(34)).unwrap().joint_bias;
        assert_eq!(pose[15], knee);
    }
}
