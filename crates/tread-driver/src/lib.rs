//! 驱动层模块
//!
//! 本模块提供差速底盘控制核心的后台数值工作线程，包括：
//! - 采样积分线程（梯形积分，后台持续运行）
//! - 状态同步（ArcSwap 无锁读取，快照原子发布）
//! - 工作线程生命周期管理（运行标志 + 带超时的 join）
//! - 原子计数器指标
//!
//! # 使用场景
//!
//! 大多数用户应该使用 `tread-control` 提供的 `DriveController`。
//! 需要单独积分某个速率信号时，可以直接使用 [`SampledIntegrator`]。

mod error;
pub mod integrator;
mod join;
pub mod metrics;
pub mod status;

pub use error::DriverError;
pub use integrator::{
    IntegralReader, IntegralReading, IntegratorConfig, IntegratorSnapshot, Sample,
    SampledIntegrator, TrapezoidAccumulator,
};
pub use join::{JoinTimeout, join_worker};
pub use metrics::{IntegratorMetrics, MetricsSnapshot};
pub use status::IntegratorStatus;
