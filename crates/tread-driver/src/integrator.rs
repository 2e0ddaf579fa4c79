//! 后台采样积分器
//!
//! 每个 [`SampledIntegrator`] 拥有一个工作线程：按固定周期调用速率采样函数，
//! 用梯形法则累积积分，并通过 `ArcSwap` 原子发布整份快照。
//!
//! # 单写者
//!
//! 积分值只由工作线程写入。清零请求（[`SampledIntegrator::request_reset`]）
//! 只是设置一个标志，由工作线程在下一次迭代中应用。
//!
//! # 失败语义
//!
//! 采样函数返回错误或 NaN/Inf 时，工作线程发布 `Failed` 快照（保留最后一个有效积分值）
//! 并退出。之后的读取返回该值，同时 `stale = true`。

use crate::error::DriverError;
use crate::join::join_worker;
use crate::metrics::{IntegratorMetrics, MetricsSnapshot};
use crate::status::IntegratorStatus;
use arc_swap::{ArcSwap, ArcSwapOption};
use spin_sleep::SpinSleeper;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};
use tread_hal::{HalError, RateSource};

/// 单次采样
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: Instant,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: Instant, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// 梯形积分核心（纯计算，无线程）
///
/// 每次 [`push`](Self::push) 累加 `(current + previous) * (t_cur - t_prev) / 2`。
/// 首个样本只作为起点，积分从 0 开始，因此常量输入的积分精确等于
/// `c * (t_last - t_first)`。
#[derive(Debug, Clone)]
pub struct TrapezoidAccumulator {
    first_sample_at: Instant,
    last: Sample,
    integral: f64,
    samples: u64,
}

impl TrapezoidAccumulator {
    pub fn new(first: Sample) -> Self {
        Self {
            first_sample_at: first.timestamp,
            last: first,
            integral: 0.0,
            samples: 1,
        }
    }

    /// 累加一个新样本，返回本次增加的面积
    ///
    /// 时间戳早于上一个样本时按 dt = 0 处理。
    pub fn push(&mut self, sample: Sample) -> f64 {
        let dt = sample
            .timestamp
            .saturating_duration_since(self.last.timestamp)
            .as_secs_f64();
        let area = (sample.value + self.last.value) * dt / 2.0;
        self.integral += area;
        self.last = sample;
        self.samples += 1;
        area
    }

    /// 积分清零，以最后一个样本作为新的起点
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.first_sample_at = self.last.timestamp;
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn last(&self) -> Sample {
        self.last
    }

    pub fn first_sample_at(&self) -> Instant {
        self.first_sample_at
    }

    pub fn snapshot(&self, status: IntegratorStatus) -> IntegratorSnapshot {
        IntegratorSnapshot {
            last_sample: self.last,
            first_sample_at: self.first_sample_at,
            integral: self.integral,
            samples: self.samples,
            status,
        }
    }
}

/// 积分器快照（整体原子发布，积分值与最后样本不会被撕裂读取）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegratorSnapshot {
    /// 最近一次有效样本（`Starting` 状态下为创建时刻的零值占位）
    pub last_sample: Sample,
    /// 积分起点（首次采样或最近一次清零的时刻）
    pub first_sample_at: Instant,
    pub integral: f64,
    /// 自启动以来的有效样本数
    pub samples: u64,
    pub status: IntegratorStatus,
}

impl IntegratorSnapshot {
    fn starting(at: Instant) -> Self {
        Self {
            last_sample: Sample::new(at, 0.0),
            first_sample_at: at,
            integral: 0.0,
            samples: 0,
            status: IntegratorStatus::Starting,
        }
    }

    pub fn reading(&self) -> IntegralReading {
        IntegralReading {
            value: self.integral,
            stale: self.status.is_stale(),
        }
    }

    /// 积分覆盖的时间跨度（最后样本时间 - 起点）
    pub fn span(&self) -> Duration {
        self.last_sample
            .timestamp
            .saturating_duration_since(self.first_sample_at)
    }
}

/// 读取结果：当前积分值及是否已过期
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegralReading {
    pub value: f64,
    pub stale: bool,
}

impl IntegralReading {
    /// 未过期时返回值
    pub fn fresh(self) -> Option<f64> {
        (!self.stale).then_some(self.value)
    }
}

/// 积分器配置
#[derive(Debug, Clone)]
pub struct IntegratorConfig {
    /// 工作线程名后缀及日志标识
    pub name: String,
    /// 采样周期（微秒），0 表示不休眠，每次迭代只 `yield_now`
    pub sample_period_us: u64,
    /// 停止时等待工作线程退出的超时（毫秒）
    pub join_timeout_ms: u64,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            name: "integrator".to_string(),
            sample_period_us: 1_000,
            join_timeout_ms: 2_000,
        }
    }
}

impl IntegratorConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_sample_period_us(mut self, sample_period_us: u64) -> Self {
        self.sample_period_us = sample_period_us;
        self
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.name.trim().is_empty() {
            return Err(DriverError::InvalidConfig(
                "integrator name must not be empty".to_string(),
            ));
        }
        if self.sample_period_us > 1_000_000 {
            return Err(DriverError::InvalidConfig(format!(
                "integrator '{}': sample period {}us exceeds 1s",
                self.name, self.sample_period_us
            )));
        }
        if self.join_timeout_ms == 0 {
            return Err(DriverError::InvalidConfig(format!(
                "integrator '{}': join timeout must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// 工作线程与读取方共享的状态
struct IntegratorShared {
    name: String,
    snapshot: ArcSwap<IntegratorSnapshot>,
    failure: ArcSwapOption<HalError>,
    reset_requested: AtomicBool,
    metrics: IntegratorMetrics,
}

impl IntegratorShared {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            snapshot: ArcSwap::from_pointee(IntegratorSnapshot::starting(Instant::now())),
            failure: ArcSwapOption::empty(),
            reset_requested: AtomicBool::new(false),
            metrics: IntegratorMetrics::new(),
        }
    }

    fn publish(&self, snapshot: IntegratorSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    fn current(&self) -> IntegratorSnapshot {
        **self.snapshot.load()
    }
}

/// 积分值只读句柄
///
/// 克隆开销很小（一次 `Arc` 引用计数），可以交给任意线程。
/// 只暴露"读取当前值"这一原子操作，不能修改积分。
#[derive(Clone)]
pub struct IntegralReader {
    shared: Arc<IntegratorShared>,
}

impl IntegralReader {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 无锁读取当前积分值及过期标记
    pub fn read(&self) -> IntegralReading {
        self.shared.snapshot.load().reading()
    }

    pub fn value(&self) -> f64 {
        self.shared.snapshot.load().integral
    }

    pub fn snapshot(&self) -> IntegratorSnapshot {
        self.shared.current()
    }

    pub fn status(&self) -> IntegratorStatus {
        self.shared.snapshot.load().status
    }

    /// 导致 `Failed` 的采样错误
    pub fn failure(&self) -> Option<HalError> {
        self.shared.failure.load_full().map(|e| (*e).clone())
    }

    /// 读取未过期的积分值，过期时返回 [`DriverError::Stale`]
    pub fn fresh_value(&self) -> Result<f64, DriverError> {
        let snapshot = self.snapshot();
        if snapshot.status.is_stale() {
            return Err(DriverError::Stale {
                name: self.shared.name.clone(),
                status: snapshot.status,
                cause: self.failure(),
            });
        }
        Ok(snapshot.integral)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// 等待工作线程完成首次采样
    ///
    /// 返回 `true` 表示已进入 `Running`；失败、停止或超时返回 `false`。
    pub fn wait_until_running(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.status() {
                IntegratorStatus::Running => return true,
                IntegratorStatus::Failed | IntegratorStatus::Stopped => return false,
                IntegratorStatus::Starting => {},
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1).min(deadline - now));
        }
    }
}

impl fmt::Debug for IntegralReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("IntegralReader")
            .field("name", &self.shared.name)
            .field("integral", &snapshot.integral)
            .field("status", &snapshot.status)
            .finish()
    }
}

/// 后台采样积分器
///
/// # 示例
///
/// ```rust,no_run
/// use tread_driver::{IntegratorConfig, SampledIntegrator};
/// use tread_hal::HalError;
///
/// let integrator = SampledIntegrator::spawn(
///     || Ok::<f64, HalError>(2.0),
///     IntegratorConfig::named("demo"),
/// )?;
/// let reader = integrator.reader();
/// std::thread::sleep(std::time::Duration::from_millis(100));
/// println!("integral = {}", reader.value());
/// # Ok::<(), tread_driver::DriverError>(())
/// ```
pub struct SampledIntegrator {
    reader: IntegralReader,
    is_running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl SampledIntegrator {
    /// 创建积分器并启动工作线程
    pub fn spawn<S>(source: S, config: IntegratorConfig) -> Result<Self, DriverError>
    where
        S: RateSource + 'static,
    {
        config.validate()?;

        let shared = Arc::new(IntegratorShared::new(&config.name));
        let is_running = Arc::new(AtomicBool::new(true));
        let join_timeout = Duration::from_millis(config.join_timeout_ms);

        let shared_worker = shared.clone();
        let is_running_worker = is_running.clone();
        let thread_name = format!("tread-{}", config.name);
        let sample_period_us = config.sample_period_us;
        let worker = std::thread::Builder::new().name(thread_name).spawn(move || {
            integrate_loop(source, shared_worker, config, is_running_worker);
        })?;

        info!(
            "Integrator '{}' started (sample period {}us)",
            shared.name, sample_period_us
        );

        Ok(Self {
            reader: IntegralReader { shared },
            is_running,
            worker: Some(worker),
            join_timeout,
        })
    }

    pub fn name(&self) -> &str {
        self.reader.name()
    }

    pub fn read(&self) -> IntegralReading {
        self.reader.read()
    }

    pub fn value(&self) -> f64 {
        self.reader.value()
    }

    pub fn snapshot(&self) -> IntegratorSnapshot {
        self.reader.snapshot()
    }

    pub fn status(&self) -> IntegratorStatus {
        self.reader.status()
    }

    /// 获取只读句柄
    pub fn reader(&self) -> IntegralReader {
        self.reader.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.reader.metrics()
    }

    /// 请求在下一次迭代时清零积分
    ///
    /// 积分器已失败或停止时请求不会被应用。
    pub fn request_reset(&self) {
        // Release: 工作线程 swap(Acquire) 后可见
        self.reader
            .shared
            .reset_requested
            .store(true, Ordering::Release);
        debug!("Integrator '{}': reset requested", self.name());
    }

    /// 工作线程是否仍在积分
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire) && !self.status().is_stale()
    }

    /// 停止工作线程并等待其退出
    ///
    /// 重复调用是安全的。
    pub fn stop(&mut self) -> Result<(), DriverError> {
        // Release: 所有之前的写入对看到 false 的线程可见
        self.is_running.store(false, Ordering::Release);

        if let Some(handle) = self.worker.take() {
            join_worker(handle, self.reader.name(), self.join_timeout)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SampledIntegrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampledIntegrator")
            .field("reader", &self.reader)
            .field("is_running", &self.is_running.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for SampledIntegrator {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Integrator '{}' failed to shut down: {}", self.name(), e);
        }
    }
}

/// 读取时间戳后采样，非有限值视为失败
fn take_sample<S: RateSource>(source: &mut S) -> Result<Sample, HalError> {
    let timestamp = Instant::now();
    let value = source.sample()?;
    let value = HalError::check_finite("rate source", value)?;
    Ok(Sample::new(timestamp, value))
}

fn pace(sleeper: &SpinSleeper, period: Duration) {
    if period.is_zero() {
        std::thread::yield_now();
    } else {
        sleeper.sleep(period);
    }
}

fn publish_failure(shared: &IntegratorShared, mut snapshot: IntegratorSnapshot, err: HalError) {
    error!(
        "Integrator '{}': sampling failed, integration halted at {}: {}",
        shared.name, snapshot.integral, err
    );
    shared.metrics.sample_failures.fetch_add(1, Ordering::Relaxed);
    shared.failure.store(Some(Arc::new(err)));
    snapshot.status = IntegratorStatus::Failed;
    shared.publish(snapshot);
}

/// 积分工作线程主循环
///
/// # 参数
/// - `source`: 速率采样函数
/// - `shared`: 共享快照/指标
/// - `config`: 积分器配置
/// - `is_running`: 运行标志（用于生命周期联动）
fn integrate_loop<S: RateSource>(
    mut source: S,
    shared: Arc<IntegratorShared>,
    config: IntegratorConfig,
    is_running: Arc<AtomicBool>,
) {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("Integrator '{}' thread priority set to MAX (realtime)", config.name);
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to set integrator thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    let period = Duration::from_micros(config.sample_period_us);
    let overrun_threshold = period * 2;
    let sleeper = SpinSleeper::default();

    // 首次采样：积分从 0 开始
    let first = match take_sample(&mut source) {
        Ok(sample) => sample,
        Err(e) => {
            publish_failure(&shared, shared.current(), e);
            return;
        },
    };
    let mut acc = TrapezoidAccumulator::new(first);
    shared.metrics.samples_total.fetch_add(1, Ordering::Relaxed);
    shared.publish(acc.snapshot(IntegratorStatus::Running));
    debug!("Integrator '{}': primed with {}", shared.name, first.value);

    loop {
        pace(&sleeper, period);

        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !is_running.load(Ordering::Acquire) {
            trace!("Integrator '{}': is_running flag is false, exiting", shared.name);
            break;
        }

        let reset = shared.reset_requested.swap(false, Ordering::AcqRel);
        if reset {
            acc.reset();
            debug!("Integrator '{}': integral reset", shared.name);
        }

        let sample = match take_sample(&mut source) {
            Ok(sample) => sample,
            Err(e) => {
                publish_failure(&shared, acc.snapshot(IntegratorStatus::Running), e);
                return;
            },
        };

        let gap = sample.timestamp.saturating_duration_since(acc.last().timestamp);
        if !period.is_zero() && gap > overrun_threshold {
            shared.metrics.overruns.fetch_add(1, Ordering::Relaxed);
            trace!(
                "Integrator '{}': sample gap {:?} exceeds {:?}",
                shared.name, gap, overrun_threshold
            );
        }

        acc.push(sample);
        shared.metrics.samples_total.fetch_add(1, Ordering::Relaxed);
        shared.publish(acc.snapshot(IntegratorStatus::Running));
        // 清零后的快照发布之后才计数，读到计数即可读到清零结果
        if reset {
            shared.metrics.resets_applied.fetch_add(1, Ordering::Release);
        }
    }

    shared.publish(acc.snapshot(IntegratorStatus::Stopped));
    info!(
        "Integrator '{}' stopped: integral={} samples={}",
        shared.name,
        acc.integral(),
        shared.metrics.samples_total.load(Ordering::Relaxed)
    );
}
