//! # 命令仲裁
//!
//! 命令源（键盘或 UDP）各自持有最新状态，通过 `ArcSwap<CommandState>`
//! 发布不可变快照；控制线程在每个 tick 开始时取一次快照，转成 [`CommandVector`]。
//!
//! 向量由三部分组成：
//! - 6 个运动字段（`xvel` … `basepitch`）
//! - 12 个手臂混合目标（`rshoulderpitch` … `lwristgripper`）
//! - 按关节的直接覆盖值，覆盖的关节跳过策略输出

pub mod arbiter;
pub mod gesture;
pub mod keyboard;
pub mod udp;

pub use arbiter::{CommandArbiter, CommandSourceKind};
pub use gesture::{ActiveGesture, Gesture, Keyframe};
pub use keyboard::{KeyboardSource, spawn_keyboard_reader};
pub use udp::{PacketError, PacketOutcome, UdpCommandListener, UdpStats, apply_packet};

use arc_swap::ArcSwap;
use kbot_protocol::ActuatorId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// 命令字段数
pub const COMMAND_FIELD_COUNT: usize = 18;

/// 命令字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandField {
    XVel,
    YVel,
    YawRate,
    BaseHeight,
    BaseRoll,
    BasePitch,
    RShoulderPitch,
    RShoulderRoll,
    RElebowPitch,
    RElebowRoll,
    RWristRoll,
    RWristGripper,
    LShoulderPitch,
    LShoulderRoll,
    LElebowPitch,
    LElebowRoll,
    LWristRoll,
    LWristGripper,
}

impl CommandField {
    pub const ALL: [CommandField; COMMAND_FIELD_COUNT] = [
        CommandField::XVel,
        CommandField::YVel,
        CommandField::YawRate,
        CommandField::BaseHeight,
        CommandField::BaseRoll,
        CommandField::BasePitch,
        CommandField::RShoulderPitch,
        CommandField::RShoulderRoll,
        CommandField::RElebowPitch,
        CommandField::RElebowRoll,
        CommandField::RWristRoll,
        CommandField::RWristGripper,
        CommandField::LShoulderPitch,
        CommandField::LShoulderRoll,
        CommandField::LElebowPitch,
        CommandField::LElebowRoll,
        CommandField::LWristRoll,
        CommandField::LWristGripper,
    ];

    pub const LOCOMOTION: [CommandField; 6] = [
        CommandField::XVel,
        CommandField::YVel,
        CommandField::YawRate,
        CommandField::BaseHeight,
        CommandField::BaseRoll,
        CommandField::BasePitch,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandField::XVel => "xvel",
            CommandField::YVel => "yvel",
            CommandField::YawRate => "yawrate",
            CommandField::BaseHeight => "baseheight",
            CommandField::BaseRoll => "baseroll",
            CommandField::BasePitch => "basepitch",
            CommandField::RShoulderPitch => "rshoulderpitch",
            CommandField::RShoulderRoll => "rshoulderroll",
            CommandField::RElebowPitch => "relebowpitch",
            CommandField::RElebowRoll => "relebowroll",
            CommandField::RWristRoll => "rwristroll",
            CommandField::RWristGripper => "rwristgripper",
            CommandField::LShoulderPitch => "lshoulderpitch",
            CommandField::LShoulderRoll => "lshoulderroll",
            CommandField::LElebowPitch => "lelebowpitch",
            CommandField::LElebowRoll => "lelebowroll",
            CommandField::LWristRoll => "lwristroll",
            CommandField::LWristGripper => "lwristgripper",
        }
    }

    /// 名称匹配不区分大小写（`XVel` 与 `xvel` 等价）
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    pub fn is_locomotion(self) -> bool {
        self.index() < 6
    }

    /// 手臂混合字段对应的执行器
    pub fn joint(self) -> Option<ActuatorId> {
        let id = match self {
            CommandField::RShoulderPitch => 21,
            CommandField::RShoulderRoll => 22,
            CommandField::RElebowPitch => 24,
            CommandField::RElebowRoll => 23,
            CommandField::RWristRoll => 25,
            CommandField::RWristGripper => 26,
            CommandField::LShoulderPitch => 11,
            CommandField::LShoulderRoll => 12,
            CommandField::LElebowPitch => 14,
            CommandField::LElebowRoll => 13,
            CommandField::LWristRoll => 15,
            CommandField::LWristGripper => 16,
            _ => return None,
        };
        Some(ActuatorId::new(id))
    }

    /// 手臂目标的限位（rad），夹爪不限
    pub fn arm_limits(self) -> Option<(f32, f32)> {
        let deg = f32::to_radians;
        match self {
            CommandField::RShoulderPitch => Some((-3.490658, 1.047198)),
            CommandField::RShoulderRoll => Some((-1.658063 - deg(10.0), 0.436332 + deg(10.0))),
            CommandField::RElebowRoll | CommandField::LElebowRoll => Some((-1.671886, 1.671886)),
            CommandField::RElebowPitch => Some((-deg(90.0), 2.478368 + deg(90.0))),
            CommandField::RWristRoll | CommandField::LWristRoll => Some((-1.37881, 1.37881)),
            CommandField::LShoulderPitch => Some((-1.047198, 3.490658)),
            CommandField::LShoulderRoll => Some((-0.436332 - deg(10.0), 1.658063 + deg(10.0))),
            CommandField::LElebowPitch => Some((-2.478368 - deg(90.0), deg(90.0))),
            _ => None,
        }
    }

    /// 按限位夹紧
    pub fn clamp(self, value: f32) -> f32 {
        match self.arm_limits() {
            Some((lo, hi)) => value.clamp(lo, hi),
            None => value,
        }
    }
}

impl fmt::Display for CommandField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 单个 tick 的命令快照
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandVector {
    values: [f32; COMMAND_FIELD_COUNT],
    overrides: BTreeMap<ActuatorId, f32>,
}

impl CommandVector {
    pub fn get(&self, field: CommandField) -> f32 {
        self.values[field.index()]
    }

    pub fn values(&self) -> &[f32; COMMAND_FIELD_COUNT] {
        &self.values
    }

    pub fn locomotion(&self) -> &[f32] {
        &self.values[..6]
    }

    pub fn overrides(&self) -> &BTreeMap<ActuatorId, f32> {
        &self.overrides
    }

    pub fn override_for(&self, id: ActuatorId) -> Option<f32> {
        self.overrides.get(&id).copied()
    }

    /// 按策略声明顺序取值
    pub fn select(&self, fields: &[CommandField]) -> Vec<f32> {
        fields.iter().map(|&f| self.get(f)).collect()
    }
}

/// 命令源发布的状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandState {
    pub values: [f32; COMMAND_FIELD_COUNT],
    pub overrides: BTreeMap<ActuatorId, f32>,
    /// 正在播放的预设动作
    pub gesture: Option<ActiveGesture>,
}

impl CommandState {
    pub fn get(&self, field: CommandField) -> f32 {
        self.values[field.index()]
    }

    pub fn set(&mut self, field: CommandField, value: f32) {
        self.values[field.index()] = value;
    }

    /// 在 `now` 时刻构建命令向量
    ///
    /// 预设动作播放期间运动字段为 0，动作目标作为直接覆盖；
    /// 被覆盖关节的混合目标在此丢弃。
    pub fn to_vector(&self, now: Instant) -> CommandVector {
        if let Some(active) = &self.gesture
            && let Some(targets) = active.sample(now)
        {
            let overrides = targets
                .into_iter()
                .filter_map(|(field, value)| field.joint().map(|id| (id, field.clamp(value))))
                .collect();
            return CommandVector {
                values: [0.0; COMMAND_FIELD_COUNT],
                overrides,
            };
        }
        if self.gesture.is_some() {
            // 动作已结束：回到默认
            return CommandVector::default();
        }

        let mut values = self.values;
        for field in CommandField::ALL {
            if let Some(id) = field.joint()
                && self.overrides.contains_key(&id)
            {
                values[field.index()] = 0.0;
            }
        }
        CommandVector {
            values,
            overrides: self.overrides.clone(),
        }
    }
}

/// 命令源与控制线程之间共享的最新状态
pub type SharedCommand = Arc<ArcSwap<CommandState>>;

pub fn shared_command() -> SharedCommand {
    Arc::new(ArcSwap::from_pointee(CommandState::default()))
}
