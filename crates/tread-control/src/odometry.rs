//! 航位推算坐标估计
//!
//! 两个后台积分器分别积分全局坐标系下的 x、y 速度：
//!
//! ```text
//! v   = (left_rate + right_rate) / 2
//! dx  = v * cos(heading)
//! dy  = v * sin(heading)
//! ```
//!
//! 误差随时间无界累积（打滑、采样抖动、航向误差都会被积分进去），
//! 这是航位推算本身的精度上限，本模块不做校正。

use crate::config::IntegratorSettings;
use crate::error::ControlError;
use std::time::Duration;
use tracing::info;
use tread_driver::{IntegralReader, IntegralReading, SampledIntegrator};
use tread_hal::{DriveHardware, HalError, RateSource, SharedHardware, Side};

/// 全局坐标轴
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
        }
    }
}

/// 全局坐标系下某一轴的速度采样
///
/// 航向估计过期时视为采样失败，对应的位置积分器随之失效。
pub struct GlobalVelocity {
    hardware: SharedHardware,
    heading: IntegralReader,
    axis: Axis,
}

impl GlobalVelocity {
    pub fn new(hardware: SharedHardware, heading: IntegralReader, axis: Axis) -> Self {
        Self {
            hardware,
            heading,
            axis,
        }
    }
}

impl RateSource for GlobalVelocity {
    fn sample(&mut self) -> Result<f64, HalError> {
        let heading = self
            .heading
            .fresh_value()
            .map_err(|e| HalError::read("heading", e.to_string()))?;
        let left = self.hardware.encoder_rate(Side::Left)?;
        let right = self.hardware.encoder_rate(Side::Right)?;
        let speed = (left + right) / 2.0;
        Ok(match self.axis {
            Axis::X => speed * heading.cos(),
            Axis::Y => speed * heading.sin(),
        })
    }
}

/// 估计位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    /// 任一轴的积分器已失败或停止
    pub stale: bool,
}

/// 航位推算坐标估计器
#[derive(Debug)]
pub struct CoordinateEstimator {
    x: SampledIntegrator,
    y: SampledIntegrator,
}

impl CoordinateEstimator {
    pub fn spawn(
        hardware: SharedHardware,
        heading: IntegralReader,
        settings: &IntegratorSettings,
    ) -> Result<Self, ControlError> {
        let spawn_axis = |axis: Axis| {
            SampledIntegrator::spawn(
                GlobalVelocity::new(hardware.clone(), heading.clone(), axis),
                settings.integrator_config(axis.name()),
            )
        };
        let x = spawn_axis(Axis::X)?;
        let y = spawn_axis(Axis::Y)?;
        info!("Coordinate estimator started");
        Ok(Self { x, y })
    }

    pub fn x(&self) -> IntegralReading {
        self.x.read()
    }

    pub fn y(&self) -> IntegralReading {
        self.y.read()
    }

    pub fn position(&self) -> Position {
        let x = self.x.read();
        let y = self.y.read();
        Position {
            x: x.value,
            y: y.value,
            stale: x.stale || y.stale,
        }
    }

    pub fn readers(&self) -> (IntegralReader, IntegralReader) {
        (self.x.reader(), self.y.reader())
    }

    /// 请求两轴积分清零（由各自工作线程应用）
    pub fn request_reset(&self) {
        self.x.request_reset();
        self.y.request_reset();
    }

    /// 等待两轴完成首次采样
    pub fn wait_until_running(&self, timeout: Duration) -> bool {
        self.x.reader().wait_until_running(timeout) && self.y.reader().wait_until_running(timeout)
    }

    pub fn stop(&mut self) -> Result<(), ControlError> {
        let x = self.x.stop();
        let y = self.y.stop();
        x?;
        y?;
        Ok(())
    }
}
