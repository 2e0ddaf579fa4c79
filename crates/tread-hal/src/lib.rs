//! # Tread Hardware Abstraction Layer
//!
//! 差速底盘硬件抽象层：控制核心只通过这里定义的窄接口读取编码器/陀螺仪、写电机。
//! 真实硬件或仿真对象由调用方实现 [`DriveHardware`] 后注入。

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// 差速底盘的左右侧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// 硬件层统一错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HalError {
    #[error("Failed to read {what}: {reason}")]
    Read { what: &'static str, reason: String },
    #[error("Failed to write {side} motor: {reason}")]
    Write { side: Side, reason: String },
    #[error("Invalid sample from {what}: {value}")]
    InvalidSample { what: &'static str, value: f64 },
    #[error("Not supported by this hardware: {0}")]
    Unsupported(&'static str),
}

impl HalError {
    pub fn read(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Read {
            what,
            reason: reason.into(),
        }
    }

    /// 采样函数返回 NaN/Inf 时视为无效数据
    pub fn check_finite(what: &'static str, value: f64) -> Result<f64, HalError> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(HalError::InvalidSample { what, value })
        }
    }
}

/// 差速底盘硬件接口
///
/// 实现方必须是 `Send + Sync`：积分线程、反馈线程和调用线程会同时访问。
/// 电机命令范围为 `[-1, 1]`，由调用方保证已钳位。
pub trait DriveHardware: Send + Sync {
    /// 编码器速度（距离单位/秒）
    fn encoder_rate(&self, side: Side) -> Result<f64, HalError>;
    /// 编码器累计距离（会话内不会被重置）
    fn encoder_distance(&self, side: Side) -> Result<f64, HalError>;
    /// 陀螺仪角速度（rad/s），可选
    fn gyro_rate(&self) -> Result<f64, HalError> {
        Err(HalError::Unsupported("gyro"))
    }
    fn write_motor(&self, side: Side, command: f64) -> Result<(), HalError>;
}

impl<T: DriveHardware + ?Sized> DriveHardware for Arc<T> {
    fn encoder_rate(&self, side: Side) -> Result<f64, HalError> {
        (**self).encoder_rate(side)
    }
    fn encoder_distance(&self, side: Side) -> Result<f64, HalError> {
        (**self).encoder_distance(side)
    }
    fn gyro_rate(&self) -> Result<f64, HalError> {
        (**self).gyro_rate()
    }
    fn write_motor(&self, side: Side, command: f64) -> Result<(), HalError> {
        (**self).write_motor(side, command)
    }
}

/// 共享硬件句柄
pub type SharedHardware = Arc<dyn DriveHardware>;

/// 标量速率源（积分器的采样函数）
///
/// 闭包 `FnMut() -> Result<f64, HalError>` 自动实现此 trait。
pub trait RateSource: Send {
    fn sample(&mut self) -> Result<f64, HalError>;
}

impl<F> RateSource for F
where
    F: FnMut() -> Result<f64, HalError> + Send,
{
    fn sample(&mut self) -> Result<f64, HalError> {
        self()
    }
}
