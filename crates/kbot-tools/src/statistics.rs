//! # 统计工具
//!
//! 控制循环 tick 间隔的流式统计（Welford 算法，O(1) 内存）。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// tick 间隔统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalStatistics {
    /// 样本数量
    pub count: u64,

    /// 平均间隔（微秒）
    pub mean_us: f64,

    /// 最小间隔（微秒）
    pub min_us: u64,

    /// 最大间隔（微秒）
    pub max_us: u64,

    /// 标准差（微秒）
    pub std_dev_us: f64,
}

impl IntervalStatistics {
    /// 抖动（用标准差表示）
    pub fn jitter_us(&self) -> f64 {
        self.std_dev_us
    }

    /// 平均频率（Hz）
    pub fn mean_frequency_hz(&self) -> f64 {
        if self.mean_us <= 0.0 {
            return 0.0;
        }
        1_000_000.0 / self.mean_us
    }
}

/// 流式 tick 统计
#[derive(Debug, Clone, Default)]
pub struct TickStatistics {
    count: u64,
    mean: f64,
    m2: f64,
    min_us: u64,
    max_us: u64,
}

impl TickStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个间隔
    pub fn record(&mut self, interval: Duration) {
        let us = interval.as_micros().min(u64::MAX as u128) as u64;
        let x = us as f64;
        self.count += 1;
        if self.count == 1 {
            self.min_us = us;
            self.max_us = us;
        } else {
            self.min_us = self.min_us.min(us);
            self.max_us = self.max_us.max(us);
        }
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Duration {
        Duration::from_nanos((self.mean.max(0.0) * 1000.0).round() as u64)
    }

    pub fn min(&self) -> Duration {
        Duration::from_micros(self.min_us)
    }

    pub fn max(&self) -> Duration {
        Duration::from_micros(self.max_us)
    }

    /// 总体标准差（微秒）
    pub fn std_dev_us(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / self.count as f64).sqrt()
    }

    pub fn snapshot(&self) -> IntervalStatistics {
        IntervalStatistics {
            count: self.count,
            mean_us: self.mean,
            min_us: self.min_us,
            max_us: self.max_us,
            std_dev_us: self.std_dev_us(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        let stats = TickStatistics::new();
        let snap = stats.snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.mean_us, 0.0);
        assert_eq!(snap.mean_frequency_hz(), 0.0);
    }

    #[test]
    fn test_interval_statistics() {
        let mut stats = TickStatistics::new();
        for us in [100u64, 150, 200, 120, 180] {
            stats.record(Duration::from_micros(us));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.count, 5);
        assert_eq!(snap.min_us, 100);
        assert_eq!(snap.max_us, 200);

        let expected_avg = (100 + 150 + 200 + 120 + 180) as f64 / 5.0;
        assert!((snap.mean_us - expected_avg).abs() < 0.01);

        // 与两遍算法一致
        let variance = [100.0f64, 150.0, 200.0, 120.0, 180.0]
            .iter()
            .map(|x| (x - expected_avg).powi(2))
            .sum::<f64>()
            / 5.0;
        assert!((snap.std_dev_us - variance.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_constant_period() {
        let mut stats = TickStatistics::new();
        for _ in 0..50 {
            stats.record(Duration::from_millis(20));
        }
        assert_eq!(stats.mean(), Duration::from_millis(20));
        assert_eq!(stats.std_dev_us(), 0.0);
        assert!((stats.snapshot().mean_frequency_hz() - 50.0).abs() < 1e-9);
    }
}
