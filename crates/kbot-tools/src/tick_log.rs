//! 每 tick 运行记录（NDJSON）
//!
//! 控制线程只做 `try_send`：队列满时丢弃记录并计数，绝不阻塞 tick。
//! 后台线程负责序列化与写盘，`finish()` 或 Drop 时冲刷并回收线程。
//!
//! ```no_run
//! use kbot_tools::{TickLogger, TickRecord, default_log_dir};
//!
//! let logger = TickLogger::create(default_log_dir("walk"), 1024).unwrap();
//! logger.log(TickRecord::default());
//! let written = logger.finish().unwrap();
//! println!("{} records", written);
//! ```

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// 记录文件名
pub const TICK_LOG_FILE: &str = "ticks.ndjson";

/// 各阶段耗时（毫秒）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub joints_ms: f64,
    pub imu_ms: f64,
    pub command_ms: f64,
    pub step_ms: f64,
    pub action_ms: f64,
    pub total_ms: f64,
}

/// 单个 tick 的记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub step_id: u64,
    /// Unix 时间（秒）
    pub timestamp: f64,
    pub dt: StageTimings,
    pub joint_angles: Vec<f32>,
    pub joint_velocities: Vec<f32>,
    pub joint_torques: Vec<f32>,
    pub joint_temperatures: Vec<f32>,
    pub projected_gravity: [f32; 3],
    pub gyroscope: [f32; 3],
    /// 按策略声明顺序排列的命令值
    pub command: Vec<f32>,
    /// SafeStop 后为空
    pub action: Vec<f32>,
    pub safety_state: String,
    #[serde(default)]
    pub overrun: bool,
}

/// 后台 NDJSON 写入器
pub struct TickLogger {
    tx: Option<Sender<TickRecord>>,
    worker: Option<JoinHandle<Result<u64>>>,
    dropped: Arc<AtomicU64>,
    path: PathBuf,
}

impl TickLogger {
    /// 在 `dir` 下创建 `ticks.ndjson` 并启动写入线程
    pub fn create(dir: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        let path = dir.join(TICK_LOG_FILE);
        let file = File::create(&path)
            .with_context(|| format!("failed to create tick log {}", path.display()))?;

        let (tx, rx) = bounded::<TickRecord>(capacity.max(1));
        let worker = std::thread::Builder::new()
            .name("kbot-tick-log".into())
            .spawn(move || -> Result<u64> {
                let mut out = BufWriter::new(file);
                let mut written = 0u64;
                while let Ok(record) = rx.recv() {
                    serde_json::to_writer(&mut out, &record).context("tick record serialize")?;
                    out.write_all(b"\n")?;
                    written += 1;
                }
                out.flush()?;
                Ok(written)
            })
            .context("failed to spawn tick log thread")?;

        info!("Tick log: {}", path.display());
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            dropped: Arc::new(AtomicU64::new(0)),
            path,
        })
    }

    /// 非阻塞提交一条记录
    pub fn log(&self, record: TickRecord) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(record) {
            Ok(()) => {},
            Err(TrySendError::Full(record)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Tick log full, dropped step {} ({} total)", record.step_id, n);
            },
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            },
        }
    }

    /// 丢弃的记录数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 关闭队列、等待写入线程，返回写入的记录数
    pub fn finish(mut self) -> Result<u64> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<u64> {
        drop(self.tx.take());
        let Some(worker) = self.worker.take() else {
            return Ok(0);
        };
        let written = worker
            .join()
            .map_err(|_| anyhow!("tick log thread panicked"))??;
        let dropped = self.dropped();
        if dropped > 0 {
            warn!("Tick log dropped {} records", dropped);
        }
        info!("Tick log closed: {} records in {}", written, self.path.display());
        Ok(written)
    }
}

impl Drop for TickLogger {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Tick log shutdown failed: {:#}", e);
        }
    }
}

/// `~/kinfer-logs/<policy>_<YYYYmmdd_HHMMSS>`
pub fn default_log_dir(policy: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("kinfer-logs").join(format!("{}_{}", policy, stamp))
}

/// 读取 NDJSON 记录文件
pub fn read_tick_log(path: impl AsRef<Path>) -> Result<Vec<TickRecord>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read tick log {}", path.display()))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("line {}", i + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(step_id: u64) -> TickRecord {
        TickRecord {
            step_id,
            joint_angles: vec![0.1, 0.2],
            action: vec![0.3, 0.4],
            safety_state: "Running".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_writes_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let logger = TickLogger::create(dir.path(), 16).unwrap();
        for i in 0..5 {
            logger.log(record(i));
        }
        let path = logger.path().to_path_buf();
        assert_eq!(logger.finish().unwrap(), 5);

        let records = read_tick_log(&path).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[3].step_id, 3);
        assert_eq!(records[0].action, vec![0.3, 0.4]);
    }

    #[test]
    fn test_drop_flushes() {
        let dir = TempDir::new().unwrap();
        let path = {
            let logger = TickLogger::create(dir.path().join("nested"), 4).unwrap();
            logger.log(record(7));
            logger.path().to_path_buf()
        };
        let records = read_tick_log(path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].step_id, 7);
    }

    #[test]
    fn test_default_log_dir_layout() {
        let dir = default_log_dir("walk");
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("walk_"));
        assert_eq!(name.len(), "walk_".len() + "YYYYmmdd_HHMMSS".len());
        assert!(dir.parent().unwrap().ends_with("kinfer-logs"));
    }
}
