//! 积分工作线程性能指标
//!
//! 零开销原子计数器，可在任意线程读取，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 积分工作线程实时指标
///
/// # 使用示例
///
/// ```rust
/// use tread_driver::IntegratorMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = IntegratorMetrics::default();
/// metrics.samples_total.fetch_add(1, Ordering::Relaxed);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.samples_total, 1);
/// ```
#[derive(Debug, Default)]
pub struct IntegratorMetrics {
    /// 成功采样次数（包括首次采样）
    pub samples_total: AtomicU64,

    /// 采样失败次数（出错或返回 NaN/Inf）
    ///
    /// 采样失败是致命的，所以该值只会是 0 或 1。
    pub sample_failures: AtomicU64,

    /// 已应用的积分清零请求次数
    pub resets_applied: AtomicU64,

    /// 单次迭代耗时超过两倍采样周期的次数
    ///
    /// 如果这个值快速增长，说明采样函数过慢或系统负载过高。
    pub overruns: AtomicU64,
}

impl IntegratorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照（Relaxed 读取，各计数器之间可能有微小时间差）
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_total: self.samples_total.load(Ordering::Relaxed),
            sample_failures: self.sample_failures.load(Ordering::Relaxed),
            resets_applied: self.resets_applied.load(Ordering::Acquire),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub samples_total: u64,
    pub sample_failures: u64,
    pub resets_applied: u64,
    pub overruns: u64,
}

impl MetricsSnapshot {
    /// 按给定时长估算平均采样频率（Hz）
    pub fn sample_rate_hz(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.samples_total as f64 / secs
        } else {
            0.0
        }
    }

    /// 超限迭代占比
    pub fn overrun_ratio(&self) -> f64 {
        if self.samples_total == 0 {
            0.0
        } else {
            self.overruns as f64 / self.samples_total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = IntegratorMetrics::new();
        metrics.samples_total.fetch_add(100, Ordering::Relaxed);
        metrics.overruns.fetch_add(5, Ordering::Relaxed);
        metrics.resets_applied.fetch_add(1, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.samples_total, 100);
        assert_eq!(snapshot.overruns, 5);
        assert_eq!(snapshot.resets_applied, 1);
        assert_eq!(snapshot.sample_failures, 0);
    }

    #[test]
    fn test_derived_rates() {
        let snapshot = MetricsSnapshot {
            samples_total: 200,
            overruns: 10,
            ..Default::default()
        };
        assert_eq!(snapshot.sample_rate_hz(Duration::from_secs(2)), 100.0);
        assert_eq!(snapshot.sample_rate_hz(Duration::ZERO), 0.0);
        assert_eq!(snapshot.overrun_ratio(), 0.05);
        assert_eq!(MetricsSnapshot::default().overrun_ratio(), 0.0);
    }
}
