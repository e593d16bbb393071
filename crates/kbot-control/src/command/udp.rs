//! UDP JSON 命令源
//!
//! ```text
//! {"type": "normal", "commands": {"xvel": 0.5, "dof_left_wrist_gripper_05": 0.57}}
//! {"type": "reset"}
//! ```
//!
//! 字段级错误只丢弃该字段；JSON 无效、`type` 缺失或未知、`commands` 缺失或
//! 不是对象时丢弃整个包。任何拒绝都保留之前的状态。
//! 关节覆盖值夹紧到手臂限位，无限位的关节夹紧到执行器角度量程。

use super::{CommandField, CommandState, SharedCommand};
use kbot_protocol::{ActuatorConfig, RobotConfig};
use serde_json::Value;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// 最大数据报长度
pub const MAX_DATAGRAM: usize = 1024;
/// 读超时，决定停止标志的响应时间
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// 整包被丢弃的原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PacketError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("packet is not a JSON object")]
    NotAnObject,
    #[error("missing \"type\"")]
    MissingType,
    #[error("unknown packet type '{0}'")]
    UnknownType(String),
    #[error("missing or non-object \"commands\"")]
    InvalidCommands,
}

/// 应用结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PacketOutcome {
    pub reset: bool,
    /// 已应用的字段名
    pub applied: Vec<String>,
    /// 被拒绝的字段名与原因
    pub rejected: Vec<(String, String)>,
    /// 被夹紧的关节覆盖：名称、请求值、实际值
    pub clamped: Vec<(String, f32, f32)>,
}

/// 关节覆盖的允许范围
fn override_limits(actuator: &ActuatorConfig) -> (f32, f32) {
    CommandField::ALL
        .iter()
        .find(|f| f.joint() == Some(actuator.id))
        .and_then(|f| f.arm_limits())
        .unwrap_or_else(|| {
            let angle = actuator.ranges().angle;
            (angle.min, angle.max)
        })
}

/// 把一个数据报应用到 `current` 上，返回新状态
pub fn apply_packet(
    current: &CommandState,
    packet: &[u8],
    robot: &RobotConfig,
) -> Result<(CommandState, PacketOutcome), PacketError> {
    let value: Value =
        serde_json::from_slice(packet).map_err(|e| PacketError::InvalidJson(e.to_string()))?;
    let object = value.as_object().ok_or(PacketError::NotAnObject)?;
    let kind = object
        .get("type")
        .ok_or(PacketError::MissingType)?
        .as_str()
        .ok_or(PacketError::MissingType)?;

    match kind {
        "reset" => Ok((
            CommandState::default(),
            PacketOutcome {
                reset: true,
                ..PacketOutcome::default()
            },
        )),
        "normal" => {
            let commands = object
                .get("commands")
                .and_then(Value::as_object)
                .ok_or(PacketError::InvalidCommands)?;
            let mut next = current.clone();
            // 新的外部命令结束正在播放的手势
            next.gesture = None;
            let mut outcome = PacketOutcome::default();
            for (name, raw) in commands {
                let Some(number) = raw.as_f64().filter(|v| v.is_finite()) else {
                    outcome.rejected.push((name.clone(), format!("non-numeric value {}", raw)));
                    continue;
                };
                let number = number as f32;
                if let Some(field) = CommandField::from_name(name) {
                    next.set(field, number);
                } else if let Some(actuator) = robot.by_full_name(name) {
                    let (lo, hi) = override_limits(actuator);
                    let target = number.clamp(lo, hi);
                    if target != number {
                        outcome.clamped.push((name.clone(), number, target));
                    }
                    next.overrides.insert(actuator.id, target);
                } else {
                    outcome.rejected.push((name.clone(), "unknown name".into()));
                    continue;
                }
                outcome.applied.push(name.clone());
            }
            Ok((next, outcome))
        },
        other => Err(PacketError::UnknownType(other.to_string())),
    }
}

/// 接收统计
#[derive(Debug, Default)]
pub struct UdpStats {
    pub packets_applied: AtomicU64,
    pub packets_dropped: AtomicU64,
    pub fields_rejected: AtomicU64,
}

/// UDP 命令监听
pub struct UdpCommandListener {
    socket: UdpSocket,
    shared: SharedCommand,
    robot: Arc<RobotConfig>,
    stats: Arc<UdpStats>,
}

impl UdpCommandListener {
    pub fn bind(
        addr: impl ToSocketAddrs,
        shared: SharedCommand,
        robot: Arc<RobotConfig>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        info!("UDP command listener on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            shared,
            robot,
            stats: Arc::new(UdpStats::default()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> Arc<UdpStats> {
        self.stats.clone()
    }

    /// 处理一个数据报
    pub fn handle_datagram(&self, packet: &[u8], from: SocketAddr) {
        let current = self.shared.load();
        match apply_packet(&current, packet, &self.robot) {
            Ok((next, outcome)) => {
                for (name, reason) in &outcome.rejected {
                    warn!("UDP command from {}: rejected field '{}': {}", from, name, reason);
                }
                for (name, requested, target) in &outcome.clamped {
                    warn!(
                        "UDP command from {}: '{}' = {} outside joint limits, clamped to {}",
                        from, name, requested, target
                    );
                }
                if outcome.reset {
                    info!("UDP command reset from {}", from);
                } else {
                    debug!("UDP command from {}: {:?}", from, outcome.applied);
                }
                self.shared.store(Arc::new(next));
                // 计数在发布之后更新
                self.stats
                    .fields_rejected
                    .fetch_add(outcome.rejected.len() as u64, Ordering::Relaxed);
                self.stats.packets_applied.fetch_add(1, Ordering::Release);
            },
            Err(e) => {
                self.stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("UDP packet from {} dropped: {}", from, e);
            },
        }
    }

    /// 启动接收线程，`stop` 置位后在一个读超时内退出
    pub fn spawn(self, stop: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("kbot-udp-command".into())
            .spawn(move || {
                let mut buf = [0u8; MAX_DATAGRAM];
                while !stop.load(Ordering::Acquire) {
                    match self.socket.recv_from(&mut buf) {
                        Ok((n, from)) => self.handle_datagram(&buf[..n], from),
                        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {},
                        Err(e) => {
                            // 监听不因单次错误退出
                            warn!("UDP receive error: {}", e);
                            std::thread::sleep(READ_TIMEOUT);
                        },
                    }
                }
                debug!("UDP command listener exited");
            })
    }
}
