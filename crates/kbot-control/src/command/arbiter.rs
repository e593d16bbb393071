//! 单一命令源仲裁

use super::{CommandState, CommandVector, SharedCommand, shared_command};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// 本次运行使用的命令源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSourceKind {
    Keyboard,
    Udp,
}

impl FromStr for CommandSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keyboard" => Ok(Self::Keyboard),
            "udp" => Ok(Self::Udp),
            other => Err(format!("unknown command source '{}'", other)),
        }
    }
}

impl fmt::Display for CommandSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyboard => f.write_str("keyboard"),
            Self::Udp => f.write_str("udp"),
        }
    }
}

/// 命令仲裁器：每个 tick 开始时对唯一的命令源取一次快照
#[derive(Clone)]
pub struct CommandArbiter {
    kind: CommandSourceKind,
    shared: SharedCommand,
}

impl CommandArbiter {
    pub fn new(kind: CommandSourceKind) -> Self {
        Self {
            kind,
            shared: shared_command(),
        }
    }

    pub fn kind(&self) -> CommandSourceKind {
        self.kind
    }

    /// 交给命令源线程的共享句柄
    pub fn shared(&self) -> SharedCommand {
        self.shared.clone()
    }

    pub fn sample(&self) -> CommandVector {
        self.sample_at(Instant::now())
    }

    pub fn sample_at(&self, now: Instant) -> CommandVector {
        self.shared.load().to_vector(now)
    }

    pub fn reset(&self) {
        self.shared.store(Arc::new(CommandState::default()));
    }
}
