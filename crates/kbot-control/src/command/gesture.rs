//! 预设手势库
//!
//! 每个手势是一串关键帧（时间 + 手臂字段目标），关键帧之间线性插值。
//! 播放按墙钟时间推进，与控制周期无关。

use super::CommandField;
use std::time::{Duration, Instant};

use CommandField::*;

/// 关键帧
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keyframe {
    /// 距手势开始的时间（秒）
    pub at: f32,
    pub targets: &'static [(CommandField, f32)],
}

/// 预设手势
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    Wave,
    Salute,
    RaiseArms,
    Guard,
    PunchLeft,
    PunchRight,
}

const WAVE: &[Keyframe] = &[
    Keyframe { at: 0.0, targets: &[(RShoulderPitch, 0.0), (RShoulderRoll, -0.17), (RElebowPitch, 0.0)] },
    Keyframe { at: 0.6, targets: &[(RShoulderPitch, -2.6), (RShoulderRoll, -0.4), (RElebowPitch, 1.2)] },
    Keyframe { at: 1.0, targets: &[(RShoulderPitch, -2.6), (RShoulderRoll, -0.8), (RElebowPitch, 1.2)] },
    Keyframe { at: 1.4, targets: &[(RShoulderPitch, -2.6), (RShoulderRoll, -0.2), (RElebowPitch, 1.2)] },
    Keyframe { at: 1.8, targets: &[(RShoulderPitch, -2.6), (RShoulderRoll, -0.8), (RElebowPitch, 1.2)] },
    Keyframe { at: 2.2, targets: &[(RShoulderPitch, -2.6), (RShoulderRoll, -0.2), (RElebowPitch, 1.2)] },
    Keyframe { at: 3.0, targets: &[(RShoulderPitch, 0.0), (RShoulderRoll, -0.17), (RElebowPitch, 0.0)] },
];

const SALUTE: &[Keyframe] = &[
    Keyframe { at: 0.0, targets: &[(RShoulderPitch, 0.0), (RShoulderRoll, -0.17), (RElebowPitch, 0.0), (RWristRoll, 0.0)] },
    Keyframe { at: 0.8, targets: &[(RShoulderPitch, -1.6), (RShoulderRoll, -1.2), (RElebowPitch, 2.0), (RWristRoll, 0.6)] },
    Keyframe { at: 2.0, targets: &[(RShoulderPitch, -1.6), (RShoulderRoll, -1.2), (RElebowPitch, 2.0), (RWristRoll, 0.6)] },
    Keyframe { at: 2.8, targets: &[(RShoulderPitch, 0.0), (RShoulderRoll, -0.17), (RElebowPitch, 0.0), (RWristRoll, 0.0)] },
];

const RAISE_ARMS: &[Keyframe] = &[
    Keyframe { at: 0.0, targets: &[(RShoulderPitch, 0.0), (LShoulderPitch, 0.0)] },
    Keyframe { at: 1.0, targets: &[(RShoulderPitch, -3.0), (LShoulderPitch, 3.0)] },
    Keyframe { at: 2.0, targets: &[(RShoulderPitch, -3.0), (LShoulderPitch, 3.0)] },
    Keyframe { at: 3.0, targets: &[(RShoulderPitch, 0.0), (LShoulderPitch, 0.0)] },
];

const GUARD: &[Keyframe] = &[
    Keyframe { at: 0.0, targets: &[(RShoulderPitch, 0.0), (RElebowPitch, 0.0), (LShoulderPitch, 0.0), (LElebowPitch, 0.0)] },
    Keyframe { at: 0.5, targets: &[(RShoulderPitch, -0.9), (RElebowPitch, 2.2), (LShoulderPitch, 0.9), (LElebowPitch, -2.2)] },
    Keyframe { at: 2.5, targets: &[(RShoulderPitch, -0.9), (RElebowPitch, 2.2), (LShoulderPitch, 0.9), (LElebowPitch, -2.2)] },
    Keyframe { at: 3.0, targets: &[(RShoulderPitch, 0.0), (RElebowPitch, 0.0), (LShoulderPitch, 0.0), (LElebowPitch, 0.0)] },
];

const PUNCH_LEFT: &[Keyframe] = &[
    Keyframe { at: 0.0, targets: &[(LShoulderPitch, 0.9), (LElebowPitch, -2.2)] },
    Keyframe { at: 0.25, targets: &[(LShoulderPitch, 1.5), (LElebowPitch, -0.2)] },
    Keyframe { at: 0.6, targets: &[(LShoulderPitch, 0.9), (LElebowPitch, -2.2)] },
    Keyframe { at: 1.0, targets: &[(LShoulderPitch, 0.0), (LElebowPitch, 0.0)] },
];

const PUNCH_RIGHT: &[Keyframe] = &[
    Keyframe { at: 0.0, targets: &[(RShoulderPitch, -0.9), (RElebowPitch, 2.2)] },
    Keyframe { at: 0.25, targets: &[(RShoulderPitch, -1.5), (RElebowPitch, 0.2)] },
    Keyframe { at: 0.6, targets: &[(RShoulderPitch, -0.9), (RElebowPitch, 2.2)] },
    Keyframe { at: 1.0, targets: &[(RShoulderPitch, 0.0), (RElebowPitch, 0.0)] },
];

impl Gesture {
    pub const ALL: [Gesture; 6] = [
        Gesture::Wave,
        Gesture::Salute,
        Gesture::RaiseArms,
        Gesture::Guard,
        Gesture::PunchLeft,
        Gesture::PunchRight,
    ];

    /// 键盘映射：z x c v b n
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            'z' => Some(Gesture::Wave),
            'x' => Some(Gesture::Salute),
            'c' => Some(Gesture::RaiseArms),
            'v' => Some(Gesture::Guard),
            'b' => Some(Gesture::PunchLeft),
            'n' => Some(Gesture::PunchRight),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Gesture::Wave => "wave",
            Gesture::Salute => "salute",
            Gesture::RaiseArms => "raise_arms",
            Gesture::Guard => "guard",
            Gesture::PunchLeft => "punch_left",
            Gesture::PunchRight => "punch_right",
        }
    }

    pub fn keyframes(self) -> &'static [Keyframe] {
        match self {
            Gesture::Wave => WAVE,
            Gesture::Salute => SALUTE,
            Gesture::RaiseArms => RAISE_ARMS,
            Gesture::Guard => GUARD,
            Gesture::PunchLeft => PUNCH_LEFT,
            Gesture::PunchRight => PUNCH_RIGHT,
        }
    }

    pub fn duration(self) -> Duration {
        let last = self.keyframes().last().map(|k| k.at).unwrap_or(0.0);
        Duration::from_secs_f32(last)
    }

    /// `t` 秒处的目标，超出时长返回 `None`
    pub fn targets_at(self, t: f32) -> Option<Vec<(CommandField, f32)>> {
        let frames = self.keyframes();
        let last = frames.last()?;
        if !(0.0..=last.at).contains(&t) {
            return None;
        }
        let next = frames.iter().position(|k| k.at >= t)?;
        if next == 0 {
            return Some(frames[0].targets.to_vec());
        }
        let (a, b) = (&frames[next - 1], &frames[next]);
        let span = b.at - a.at;
        let alpha = if span > 0.0 { (t - a.at) / span } else { 1.0 };
        Some(
            a.targets
                .iter()
                .map(|&(field, from)| {
                    let to = b
                        .targets
                        .iter()
                        .find(|(f, _)| *f == field)
                        .map(|&(_, v)| v)
                        .unwrap_or(from);
                    (field, from + (to - from) * alpha)
                })
                .collect(),
        )
    }
}

/// 正在播放的手势
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveGesture {
    pub gesture: Gesture,
    pub started_at: Instant,
}

impl ActiveGesture {
    pub fn start(gesture: Gesture, now: Instant) -> Self {
        Self {
            gesture,
            started_at: now,
        }
    }

    pub fn sample(&self, now: Instant) -> Option<Vec<(CommandField, f32)>> {
        let t = now.saturating_duration_since(self.started_at).as_secs_f32();
        self.gesture.targets_at(t)
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) > self.gesture.duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframes_well_formed() {
        for gesture in Gesture::ALL {
            let frames = gesture.keyframes();
            assert_eq!(frames[0].at, 0.0, "{}", gesture.name());
            assert!(frames.windows(2).all(|w| w[0].at < w[1].at), "{}", gesture.name());
            // 所有目标字段都是手臂字段
            assert!(
                frames
                    .iter()
                    .flat_map(|k| k.targets.iter())
                    .all(|(f, _)| f.joint().is_some())
            );
        }
    }

    #[test]
    fn test_interpolation() {
        let mid = Gesture::RaiseArms.targets_at(0.5).unwrap();
        let (_, pitch) = mid.iter().find(|(f, _)| *f == RShoulderPitch).unwrap();
        assert!((pitch + 1.5).abs() < 1e-5);
        assert!(Gesture::RaiseArms.targets_at(3.5).is_none());
    }

    #[test]
    fn test_active_gesture_finishes() {
        let start = Instant::now();
        let active = ActiveGesture::start(Gesture::PunchLeft, start);
        assert!(active.sample(start + Duration::from_millis(100)).is_some());
        assert!(!active.is_finished(start + Duration::from_millis(900)));
        assert!(active.is_finished(start + Duration::from_millis(1100)));
        assert!(active.sample(start + Duration::from_millis(1100)).is_none());
    }

    #[test]
    fn test_key_mapping() {
        let keys: Vec<_> = "zxcvbn".chars().filter_map(Gesture::from_key).collect();
        assert_eq!(keys, Gesture::ALL.to_vec());
        assert_eq!(Gesture::from_key('w'), None);
    }
}
