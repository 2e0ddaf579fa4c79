//! 后台定周期反馈回路
//!
//! [`FeedbackLoop`] 拥有一个工作线程，按固定周期读取过程变量、调用 [`PidController`]，
//! 并把输出写入 [`OutputSink`]。调用方只通过 `set_setpoint` / `enable` / `disable`
//! 与之交互。
//!
//! # 写入闸门
//!
//! 每次 `enable()` / `disable()` 都会递增代数（generation）。工作线程在计算前记录代数，
//! 写入时在 sink 锁内重新检查代数和使能标志。`disable()` 同样在 sink 锁内完成
//! "清除使能 + 写零"，因此 `disable()` 返回后不会再有旧 tick 的输出到达电机，
//! 并且终止零输出只写一次。

use crate::controller::Controller;
use crate::error::ControlError;
use crate::pid::{PidConfig, PidController};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use tread_driver::{IntegralReader, join_worker};

/// 过程变量来源
pub trait ProcessVariable: Send {
    fn read(&mut self) -> Result<f64, ControlError>;
}

/// 积分估计作为过程变量：过期时返回 [`ControlError::SensorStale`]
impl ProcessVariable for IntegralReader {
    fn read(&mut self) -> Result<f64, ControlError> {
        self.fresh_value()
            .map_err(|e| ControlError::from_estimate(self.name(), e))
    }
}

/// 控制输出去向
///
/// 闭包 `FnMut(f64) -> Result<(), ControlError>` 自动实现此 trait。
pub trait OutputSink: Send {
    fn write(&mut self, output: f64) -> Result<(), ControlError>;
}

impl<F> OutputSink for F
where
    F: FnMut(f64) -> Result<(), ControlError> + Send,
{
    fn write(&mut self, output: f64) -> Result<(), ControlError> {
        self(output)
    }
}

/// 反馈回路配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// 控制周期（毫秒）
    pub period_ms: u64,

    /// dt 钳位倍数
    ///
    /// 当实际 dt 超过标称周期的此倍数时，触发 `on_time_jump()` 并钳位 dt。
    pub dt_clamp_multiplier: f64,

    /// 关闭时等待工作线程退出的超时（毫秒）
    pub join_timeout_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            period_ms: 20,
            dt_clamp_multiplier: 2.0,
            join_timeout_ms: 2_000,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.period_ms == 0 {
            return Err(ControlError::invalid_config(
                "feedback.period_ms must be > 0",
            ));
        }
        if self.period_ms > 1_000 {
            warn!(
                "Very slow feedback period: {}ms. Heading control will be sluggish.",
                self.period_ms
            );
        }
        if !self.dt_clamp_multiplier.is_finite() || self.dt_clamp_multiplier < 1.0 {
            return Err(ControlError::invalid_config(format!(
                "feedback.dt_clamp_multiplier must be >= 1.0, got {}",
                self.dt_clamp_multiplier
            )));
        }
        if self.join_timeout_ms == 0 {
            return Err(ControlError::invalid_config(
                "feedback.join_timeout_ms must be > 0",
            ));
        }
        Ok(())
    }

    fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

struct LoopShared {
    name: String,
    pid_config: PidConfig,
    controller: Mutex<PidController>,
    /// 写入闸门：持锁期间检查代数并写 sink
    sink: Mutex<Box<dyn OutputSink>>,
    enabled: AtomicBool,
    generation: AtomicU64,
    setpoint_bits: AtomicU64,
    last_output_bits: AtomicU64,
    last_fault: Mutex<Option<Arc<ControlError>>>,
    ticks: AtomicU64,
}

impl LoopShared {
    fn setpoint(&self) -> f64 {
        f64::from_bits(self.setpoint_bits.load(Ordering::Acquire))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.enabled.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == generation
    }

    /// 仅当代数未变且仍使能时写入
    fn write_if_current(&self, generation: u64, output: f64) -> Result<bool, ControlError> {
        let mut sink = self.sink.lock();
        if !self.is_current(generation) {
            return Ok(false);
        }
        sink.write(output)?;
        self.last_output_bits.store(output.to_bits(), Ordering::Release);
        Ok(true)
    }

    /// 工作线程检测到故障：关闭回路并写零（仅限当前代数）
    fn fault(&self, generation: u64, err: ControlError) {
        let mut sink = self.sink.lock();
        if !self.is_current(generation) {
            return;
        }
        self.enabled.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);

        error!("Feedback loop '{}' disabled after fault: {}", self.name, err);
        if let Err(write_err) = sink.write(0.0) {
            error!(
                "Feedback loop '{}': failed to write terminal zero: {}",
                self.name, write_err
            );
        }
        self.last_output_bits.store(0.0f64.to_bits(), Ordering::Release);
        *self.last_fault.lock() = Some(Arc::new(err));
    }
}

/// 后台定周期 PID 反馈回路
pub struct FeedbackLoop {
    shared: Arc<LoopShared>,
    shutdown_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl FeedbackLoop {
    /// 创建反馈回路并启动工作线程（初始为禁用状态）
    pub fn spawn<P, S>(
        name: impl Into<String>,
        controller: PidController,
        process_variable: P,
        sink: S,
        config: LoopConfig,
    ) -> Result<Self, ControlError>
    where
        P: ProcessVariable + 'static,
        S: OutputSink + 'static,
    {
        config.validate()?;
        let name = name.into();

        let shared = Arc::new(LoopShared {
            name: name.clone(),
            pid_config: *controller.config(),
            setpoint_bits: AtomicU64::new(controller.setpoint().to_bits()),
            controller: Mutex::new(controller),
            sink: Mutex::new(Box::new(sink)),
            enabled: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            last_output_bits: AtomicU64::new(0.0f64.to_bits()),
            last_fault: Mutex::new(None),
            ticks: AtomicU64::new(0),
        });

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let shared_worker = shared.clone();
        let join_timeout = Duration::from_millis(config.join_timeout_ms);
        let period_ms = config.period_ms;
        let worker = std::thread::Builder::new()
            .name(format!("tread-{name}-loop"))
            .spawn(move || {
                feedback_loop(process_variable, shared_worker, config, shutdown_rx);
            })
            .map_err(tread_driver::DriverError::from)?;

        info!("Feedback loop '{}' started ({}ms period)", name, period_ms);

        Ok(Self {
            shared,
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
            join_timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 设置目标值（任意线程）
    ///
    /// 非连续输入时，超出输入区间的目标值返回 [`ControlError::InvalidArgument`]（不钳位）。
    pub fn set_setpoint(&self, setpoint: f64) -> Result<(), ControlError> {
        if !setpoint.is_finite() {
            return Err(ControlError::InvalidArgument(format!(
                "setpoint must be finite, got {setpoint}"
            )));
        }
        let config = &self.shared.pid_config;
        if !config.continuous && !(config.input_min..=config.input_max).contains(&setpoint) {
            return Err(ControlError::InvalidArgument(format!(
                "setpoint {setpoint} outside input range [{}, {}]",
                config.input_min, config.input_max
            )));
        }
        self.shared
            .setpoint_bits
            .store(setpoint.to_bits(), Ordering::Release);
        trace!("Feedback loop '{}': setpoint = {}", self.shared.name, setpoint);
        Ok(())
    }

    pub fn setpoint(&self) -> f64 {
        self.shared.setpoint()
    }

    /// 开始输出：清空控制器记忆（积分、微分）并使能
    pub fn enable(&self) {
        let _sink = self.shared.sink.lock();
        if let Err(e) = self.shared.controller.lock().reset() {
            warn!("Feedback loop '{}': controller reset failed: {}", self.shared.name, e);
        }
        *self.shared.last_fault.lock() = None;
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.enabled.store(true, Ordering::Release);
        debug!("Feedback loop '{}' enabled", self.shared.name);
    }

    /// 停止输出
    ///
    /// 仅在 使能 → 禁用 的转换上写一次零；重复调用不会再写。
    /// 返回后保证不会再有旧 tick 写入 sink。
    pub fn disable(&self) -> Result<(), ControlError> {
        let mut sink = self.shared.sink.lock();
        if !self.shared.enabled.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared
            .last_output_bits
            .store(0.0f64.to_bits(), Ordering::Release);
        debug!("Feedback loop '{}' disabled", self.shared.name);
        sink.write(0.0)
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn last_output(&self) -> f64 {
        f64::from_bits(self.shared.last_output_bits.load(Ordering::Acquire))
    }

    /// 最近一次导致回路自行关闭的故障（`enable()` 时清除）
    pub fn last_fault(&self) -> Option<Arc<ControlError>> {
        self.shared.last_fault.lock().clone()
    }

    /// 当前目标值与 `pv` 的误差（与控制器相同的环绕规则）
    pub fn error_to(&self, pv: f64) -> f64 {
        self.shared.pid_config.error_between(self.setpoint(), pv)
    }

    /// 已执行的控制 tick 总数
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    /// 禁用并等待工作线程退出
    pub fn shutdown(&mut self) -> Result<(), ControlError> {
        let disabled = self.disable();

        // 关闭通道，工作线程在 recv_deadline 上立即看到 Disconnected
        self.shutdown_tx.take();
        if let Some(handle) = self.worker.take() {
            join_worker(handle, &self.shared.name, self.join_timeout)?;
            info!("Feedback loop '{}' stopped", self.shared.name);
        }
        disabled
    }
}

impl fmt::Debug for FeedbackLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackLoop")
            .field("name", &self.shared.name)
            .field("enabled", &self.is_enabled())
            .field("setpoint", &self.setpoint())
            .field("last_output", &self.last_output())
            .finish()
    }
}

impl Drop for FeedbackLoop {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Feedback loop '{}' failed to shut down: {}", self.shared.name, e);
        }
    }
}

/// 反馈回路工作线程主循环
///
/// 使用绝对时间锚点消除累积漂移；休眠通过 `recv_deadline` 实现，
/// 关闭通道即可立即唤醒退出。
fn feedback_loop<P: ProcessVariable>(
    mut process_variable: P,
    shared: Arc<LoopShared>,
    config: LoopConfig,
    shutdown_rx: Receiver<()>,
) {
    let period = config.period();
    let max_dt = period.mul_f64(config.dt_clamp_multiplier);

    let mut next_tick = Instant::now();
    let mut last_tick: Option<Instant> = None;
    let mut seen_generation = u64::MAX;

    loop {
        // 1. 设定下一个锚点并等待
        next_tick += period;
        match shutdown_rx.recv_deadline(next_tick) {
            Err(RecvTimeoutError::Timeout) => {},
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                trace!("Feedback loop '{}': shutdown signalled, exiting", shared.name);
                break;
            },
        }

        let now = Instant::now();
        if now > next_tick + period {
            // 追赶锚点：重置到当前时间，避免后续连续 overrun
            trace!(
                "Feedback loop '{}': overrun by {:?}",
                shared.name,
                now.duration_since(next_tick)
            );
            next_tick = now;
        }

        if !shared.enabled.load(Ordering::Acquire) {
            last_tick = None;
            continue;
        }

        // 2. 新的使能周期从标称 dt 开始
        let generation = shared.generation.load(Ordering::Acquire);
        if generation != seen_generation {
            seen_generation = generation;
            last_tick = None;
        }
        let real_dt = last_tick.map_or(period, |t| now.duration_since(t));
        last_tick = Some(now);

        // 3. 读取过程变量
        let pv = match process_variable.read() {
            Ok(pv) => pv,
            Err(e) => {
                shared.fault(generation, e);
                continue;
            },
        };

        // 4. 计算输出（只在这一步持有控制器锁）
        let output = {
            let mut controller = shared.controller.lock();
            controller.set_setpoint(shared.setpoint());

            let mut dt = real_dt;
            if real_dt > max_dt {
                if let Err(e) = controller.on_time_jump(real_dt) {
                    warn!("Feedback loop '{}': on_time_jump failed: {}", shared.name, e);
                }
                dt = max_dt;
            }
            controller.tick(pv, dt)
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                shared.fault(generation, e);
                continue;
            },
        };

        // 5. 经写入闸门输出
        match shared.write_if_current(generation, output) {
            Ok(true) => {
                shared.ticks.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "Feedback loop '{}': pv={:.4} setpoint={:.4} output={:.4}",
                    shared.name,
                    pv,
                    shared.setpoint(),
                    output
                );
            },
            Ok(false) => {
                trace!("Feedback loop '{}': dropped stale tick", shared.name);
            },
            Err(e) => shared.fault(generation, e),
        }
    }
}
