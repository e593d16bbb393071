//! 驱动运行计数
//!
//! 全部为 `Relaxed` 原子计数，控制线程写、诊断线程读。

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DriverMetrics {
    pub frames_sent: AtomicU64,
    pub frames_received: AtomicU64,
    /// 在截止时间内未收到应答的请求
    pub timeouts: AtomicU64,
    pub decode_errors: AtomicU64,
    /// 无法归属的帧（非法 ID、未知执行器）
    pub stray_frames: AtomicU64,
    /// 截止时间之后才到达、被回收的应答
    pub late_responses: AtomicU64,
    pub fault_reports: AtomicU64,
    pub send_errors: AtomicU64,
}

/// 计数快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub timeouts: u64,
    pub decode_errors: u64,
    pub stray_frames: u64,
    pub late_responses: u64,
    pub fault_reports: u64,
    pub send_errors: u64,
}

impl DriverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            stray_frames: self.stray_frames.load(Ordering::Relaxed),
            late_responses: self.late_responses.load(Ordering::Relaxed),
            fault_reports: self.fault_reports.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}
