//! PID Controller - 比例-积分-微分控制器
//!
//! # 算法
//!
//! ```text
//! output = clamp(Kp * e + Ki * ∫e dt + Kd * de/dt, output_min, output_max)
//! ```
//!
//! 其中 `e = setpoint - pv`。连续输入（如航向角）时，误差取在输入区间内环绕后的
//! 最短有符号距离，因此从 `π - 0.01` 转到 `-π + 0.01` 只需 0.02 rad。
//!
//! # 特性
//!
//! - **积分饱和保护**: 累积误差钳位到 `[output_min / Ki, output_max / Ki]`
//! - **时间跳变处理**: 只重置微分项，保留积分项
//!
//! # 示例
//!
//! ```rust
//! use tread_control::{Controller, PidConfig, PidController};
//! use std::time::Duration;
//!
//! let mut pid = PidController::new(PidConfig::heading())?;
//! pid.set_setpoint(std::f64::consts::FRAC_PI_2);
//! let output = pid.tick(0.0, Duration::from_millis(20))?;
//! assert!(output > 0.0 && output <= 1.0);
//! # Ok::<(), tread_control::ControlError>(())
//! ```

use crate::controller::Controller;
use crate::error::ControlError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::time::Duration;

/// PID 参数（构造时校验，之后不可变）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    /// 比例增益 (Kp)
    pub kp: f64,
    /// 积分增益 (Ki)
    pub ki: f64,
    /// 微分增益 (Kd)
    pub kd: f64,
    pub output_min: f64,
    pub output_max: f64,
    pub input_min: f64,
    pub input_max: f64,
    /// 输入是否首尾相接（如角度）
    pub continuous: bool,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self::heading()
    }
}

impl PidConfig {
    /// 航向控制预设：Kp 0.5，Ki 0.04，输出 [-1, 1]，输入 [-π, π] 连续
    pub fn heading() -> Self {
        Self {
            kp: 0.5,
            ki: 0.04,
            kd: 0.0,
            output_min: -1.0,
            output_max: 1.0,
            input_min: -PI,
            input_max: PI,
            continuous: true,
        }
    }

    /// 旧版航向预设：输入 [-2π, 2π]，不连续
    ///
    /// 大角度转向时会绕远路（例如从 3.1 转到 -3.1 会转接近一整圈）。
    /// 仅用于复现旧行为。
    pub fn legacy_heading() -> Self {
        Self {
            input_min: -2.0 * PI,
            input_max: 2.0 * PI,
            continuous: false,
            ..Self::heading()
        }
    }

    pub fn with_gains(mut self, kp: f64, ki: f64, kd: f64) -> Self {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
        self
    }

    pub fn with_output_range(mut self, min: f64, max: f64) -> Self {
        self.output_min = min;
        self.output_max = max;
        self
    }

    pub fn with_input_range(mut self, min: f64, max: f64, continuous: bool) -> Self {
        self.input_min = min;
        self.input_max = max;
        self.continuous = continuous;
        self
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        for (name, gain) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !gain.is_finite() || gain < 0.0 {
                return Err(ControlError::invalid_config(format!(
                    "pid.{name} must be finite and non-negative, got {gain}"
                )));
            }
        }
        if !self.output_min.is_finite() || !self.output_max.is_finite() {
            return Err(ControlError::invalid_config("pid output range must be finite"));
        }
        if self.output_min > self.output_max {
            return Err(ControlError::invalid_config(format!(
                "pid output_min {} exceeds output_max {}",
                self.output_min, self.output_max
            )));
        }
        if !self.input_min.is_finite() || !self.input_max.is_finite() {
            return Err(ControlError::invalid_config("pid input range must be finite"));
        }
        if self.input_min > self.input_max {
            return Err(ControlError::invalid_config(format!(
                "pid input_min {} exceeds input_max {}",
                self.input_min, self.input_max
            )));
        }
        if self.continuous && self.input_min >= self.input_max {
            return Err(ControlError::invalid_config(format!(
                "continuous pid input range [{}, {}] is empty",
                self.input_min, self.input_max
            )));
        }
        Ok(())
    }

    /// 非连续输入时把目标值钳位到输入区间
    pub fn clamp_setpoint(&self, setpoint: f64) -> f64 {
        if self.continuous {
            setpoint
        } else {
            setpoint.clamp(self.input_min, self.input_max)
        }
    }

    /// `setpoint - pv`，连续输入时取环绕后的最短有符号误差
    pub fn error_between(&self, setpoint: f64, pv: f64) -> f64 {
        let raw = setpoint - pv;
        if !self.continuous {
            return raw;
        }
        let span = self.input_max - self.input_min;
        let wrapped = raw.rem_euclid(span);
        if wrapped > span / 2.0 {
            wrapped - span
        } else {
            wrapped
        }
    }
}

/// PID 控制器
#[derive(Debug, Clone)]
pub struct PidController {
    config: PidConfig,

    /// 目标值
    setpoint: f64,

    /// 上一次的误差（用于计算微分）
    previous_error: f64,

    /// 积分项累积值
    accumulated_error: f64,
}

impl PidController {
    /// 校验参数并创建控制器（目标值为 0）
    pub fn new(config: PidConfig) -> Result<Self, ControlError> {
        config.validate()?;
        Ok(Self {
            config,
            setpoint: 0.0,
            previous_error: 0.0,
            accumulated_error: 0.0,
        })
    }

    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    /// 更新目标值
    ///
    /// 非连续输入时目标值被钳位到输入区间内。
    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = self.config.clamp_setpoint(setpoint);
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// 当前目标值与 `pv` 之间的误差（与 `tick` 使用相同度量）
    pub fn error_to(&self, pv: f64) -> f64 {
        self.config.error_between(self.setpoint, pv)
    }

    /// 获取当前积分项
    ///
    /// 用于调试和监控。
    pub fn accumulated_error(&self) -> f64 {
        self.accumulated_error
    }
}

impl Controller for PidController {
    type Error = ControlError;

    fn tick(&mut self, current: f64, dt: Duration) -> Result<f64, Self::Error> {
        if !current.is_finite() {
            return Err(ControlError::InvalidArgument(format!(
                "process variable must be finite, got {current}"
            )));
        }

        let dt_sec = dt.as_secs_f64();

        // 防止除零
        if dt_sec <= 0.0 {
            tracing::warn!(
                "PID controller received zero dt: {:?}, returning zero output",
                dt
            );
            return Ok(0.0);
        }

        let PidConfig {
            kp,
            ki,
            kd,
            output_min,
            output_max,
            ..
        } = self.config;

        // 1. 误差
        let error = self.error_to(current);

        // 2. 积分项 + 饱和保护
        if ki > 0.0 {
            self.accumulated_error =
                (self.accumulated_error + error * dt_sec).clamp(output_min / ki, output_max / ki);
        }

        // 3. 微分项
        let derivative = (error - self.previous_error) / dt_sec;
        self.previous_error = error;

        let output = kp * error + ki * self.accumulated_error + kd * derivative;
        Ok(output.clamp(output_min, output_max))
    }

    fn on_time_jump(&mut self, dt: Duration) -> Result<(), Self::Error> {
        tracing::warn!(
            "PID controller detected time jump: {:?}, resetting derivative term only",
            dt
        );
        self.previous_error = 0.0;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.previous_error = 0.0;
        self.accumulated_error = 0.0;
        Ok(())
    }
}
