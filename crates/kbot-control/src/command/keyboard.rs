//! 键盘遥控源
//!
//! 每次按键对一个运动字段做离散增量，结果夹紧；`0` 清零；
//! `z x c v b n` 播放预设手势，播放期间运动字段读作 0。

use super::gesture::{ActiveGesture, Gesture};
use super::{CommandField, CommandState, SharedCommand};
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 速度类字段限幅
pub const VELOCITY_LIMIT: f32 = 0.8;
/// 姿态类字段限幅
pub const POSE_LIMIT: f32 = 0.3;

/// 按键对应的字段增量
pub fn key_delta(key: char) -> Option<(CommandField, f32)> {
    use CommandField::*;
    let delta = match key {
        'w' => (XVel, 0.1),
        's' => (XVel, -0.1),
        'a' => (YVel, 0.1),
        'd' => (YVel, -0.1),
        'q' => (YawRate, 0.1),
        'e' => (YawRate, -0.1),
        '=' => (BaseHeight, 0.05),
        '-' => (BaseHeight, -0.05),
        'r' => (BaseRoll, 0.1),
        'f' => (BaseRoll, -0.1),
        't' => (BasePitch, 0.1),
        'g' => (BasePitch, -0.1),
        _ => return None,
    };
    Some(delta)
}

fn limit(field: CommandField) -> f32 {
    match field {
        CommandField::XVel | CommandField::YVel | CommandField::YawRate => VELOCITY_LIMIT,
        _ => POSE_LIMIT,
    }
}

/// 键盘命令源
#[derive(Clone)]
pub struct KeyboardSource {
    shared: SharedCommand,
}

impl KeyboardSource {
    pub fn new(shared: SharedCommand) -> Self {
        Self { shared }
    }

    pub fn state(&self) -> Arc<CommandState> {
        self.shared.load_full()
    }

    /// 处理一个按键，返回是否改变了状态
    pub fn handle_key(&self, key: char, now: Instant) -> bool {
        let key = key.to_ascii_lowercase();
        let current = self.shared.load();
        let mut next = CommandState::clone(&current);

        // 已结束的手势回到默认
        if next.gesture.is_some_and(|g| g.is_finished(now)) {
            next = CommandState::default();
        }

        if key == '0' {
            next = CommandState::default();
        } else if let Some((field, delta)) = key_delta(key) {
            let l = limit(field);
            let value = (next.get(field) + delta).clamp(-l, l);
            next.set(field, value);
        } else if let Some(gesture) = Gesture::from_key(key) {
            info!("Playing gesture {}", gesture.name());
            next = CommandState {
                gesture: Some(ActiveGesture::start(gesture, now)),
                ..CommandState::default()
            };
        } else {
            return false;
        }

        let changed = next != **current;
        if changed {
            debug!("Keyboard '{}' → {:?}", key, &next.values[..6]);
        }
        self.shared.store(Arc::new(next));
        changed
    }
}

/// 在独立线程中读取按键
///
/// `reader` 应在无输入时以 `TimedOut`/`WouldBlock` 返回，
/// 以便线程能观察到 `stop`；读到 EOF 时线程退出。
pub fn spawn_keyboard_reader<R>(
    mut reader: R,
    source: KeyboardSource,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name("kbot-keyboard".into())
        .spawn(move || {
            let mut buf = [0u8; 16];
            while !stop.load(Ordering::Acquire) {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let now = Instant::now();
                        for &b in &buf[..n] {
                            source.handle_key(b as char, now);
                        }
                    },
                    Err(e)
                        if matches!(
                            e.kind(),
                            ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                        ) => {},
                    Err(e) => {
                        warn!("Keyboard reader stopped: {}", e);
                        break;
                    },
                }
            }
            debug!("Keyboard reader exited");
        })
}
