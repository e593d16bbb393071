//! 关节布局
//!
//! 策略输入/输出与状态快照共用的固定关节顺序，运行期间不变。

use crate::error::ControlError;
use kbot_protocol::{ActuatorId, RobotConfig};
use std::collections::HashMap;

/// 固定顺序的关节表
#[derive(Debug, Clone, PartialEq)]
pub struct JointLayout {
    ids: Vec<ActuatorId>,
    names: Vec<String>,
    index: HashMap<ActuatorId, usize>,
}

impl JointLayout {
    /// 按关节全名排列，名称必须全部存在于执行器表中且不重复
    pub fn from_names<S: AsRef<str>>(robot: &RobotConfig, names: &[S]) -> Result<Self, ControlError> {
        if names.is_empty() {
            return Err(ControlError::Layout("joint list is empty".into()));
        }
        let mut ids = Vec::with_capacity(names.len());
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let name = name.as_ref();
            let id = robot
                .id_of(name)
                .map_err(|_| ControlError::Layout(format!("unknown joint '{}'", name)))?;
            if index.insert(id, i).is_some() {
                return Err(ControlError::Layout(format!("joint '{}' listed twice", name)));
            }
            ids.push(id);
        }
        Ok(Self {
            ids,
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            index,
        })
    }

    /// 执行器表顺序
    pub fn from_robot(robot: &RobotConfig) -> Self {
        let ids: Vec<_> = robot.ids().collect();
        let index = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        Self {
            names: robot.actuators.iter().map(|a| a.full_name.clone()).collect(),
            ids,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[ActuatorId] {
        &self.ids
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, id: ActuatorId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// 与动作向量配对
    pub fn zip(&self, values: &[f32]) -> Vec<(ActuatorId, f32)> {
        self.ids.iter().copied().zip(values.iter().copied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_names_keeps_order() {
        let robot = RobotConfig::default();
        let layout =
            JointLayout::from_names(&robot, &["dof_left_knee_04", "dof_right_elbow_02"]).unwrap();
        assert_eq!(layout.ids(), &[ActuatorId::new(34), ActuatorId::new(24)]);
        assert_eq!(layout.index_of(ActuatorId::new(24)), Some(1));
        assert_eq!(layout.index_of(ActuatorId::new(11)), None);
    }

    #[test]
    fn test_from_names_rejects_unknown_and_duplicates() {
        let robot = RobotConfig::default();
        assert!(matches!(
            JointLayout::from_names(&robot, &["dof_tail_01"]),
            Err(ControlError::Layout(_))
        ));
        assert!(matches!(
            JointLayout::from_names(&robot, &["dof_left_knee_04", "dof_left_knee_04"]),
            Err(ControlError::Layout(_))
        ));
        let empty: [&str; 0] = [];
        assert!(JointLayout::from_names(&robot, &empty).is_err());
    }

    #[test]
    fn test_from_robot() {
        let robot = RobotConfig::default();
        let layout = JointLayout::from_robot(&robot);
        assert_eq!(layout.len(), 22);
        assert_eq!(layout.names()[0], "dof_left_shoulder_pitch_03");
        let pairs = layout.zip(&[1.0, 2.0]);
        assert_eq!(pairs, vec![(ActuatorId::new(11), 1.0), (ActuatorId::new(12), 2.0)]);
    }
}
