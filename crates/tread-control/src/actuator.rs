//! 电机输出
//!
//! - [`DriveMotors`]: 左右电机命令（钳位到 [-1, 1]）及停车策略
//! - [`HeadingActuator`]: 把标量转向输出映射为左右反向的电机命令

use crate::error::ControlError;
use crate::feedback::OutputSink;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use tread_hal::{DriveHardware, SharedHardware, Side};

/// 直行结束时的停车策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopPolicy {
    /// 直接写零
    #[default]
    Zero,
    /// 以满功率反向脉冲制动 `pulse_ms` 毫秒后写零
    Brake { pulse_ms: u64 },
}

/// 左右电机
///
/// 克隆后共享同一份"最近命令"记录。
#[derive(Clone)]
pub struct DriveMotors {
    hardware: SharedHardware,
    last_command: Arc<Mutex<(f64, f64)>>,
}

impl DriveMotors {
    pub fn new(hardware: SharedHardware) -> Self {
        Self {
            hardware,
            last_command: Arc::new(Mutex::new((0.0, 0.0))),
        }
    }

    /// 写左右电机命令，超出 [-1, 1] 的值被钳位
    pub fn drive(&self, left: f64, right: f64) -> Result<(), ControlError> {
        if !left.is_finite() || !right.is_finite() {
            return Err(ControlError::InvalidArgument(format!(
                "motor commands must be finite, got left={left} right={right}"
            )));
        }
        let left = left.clamp(-1.0, 1.0);
        let right = right.clamp(-1.0, 1.0);

        let mut last = self.last_command.lock();
        self.hardware.write_motor(Side::Left, left)?;
        self.hardware.write_motor(Side::Right, right)?;
        *last = (left, right);
        trace!("Motors: left={:.3} right={:.3}", left, right);
        Ok(())
    }

    /// 最近一次成功写入的 (left, right)
    pub fn last_command(&self) -> (f64, f64) {
        *self.last_command.lock()
    }

    /// 按策略停车
    ///
    /// `Brake` 按最近命令的方向反向满功率脉冲，然后写零；
    /// 最近命令为零的一侧不施加脉冲。
    pub fn stop(&self, policy: StopPolicy) -> Result<(), ControlError> {
        if let StopPolicy::Brake { pulse_ms } = policy {
            let (left, right) = self.last_command();
            let reverse = |command: f64| {
                if command == 0.0 {
                    0.0
                } else {
                    -command.signum()
                }
            };
            if pulse_ms > 0 && (left != 0.0 || right != 0.0) {
                debug!("Motors: brake pulse for {}ms", pulse_ms);
                self.drive(reverse(left), reverse(right))?;
                std::thread::sleep(Duration::from_millis(pulse_ms));
            }
        }
        self.drive(0.0, 0.0)
    }
}

impl std::fmt::Debug for DriveMotors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveMotors")
            .field("last_command", &self.last_command())
            .finish()
    }
}

/// 转向执行器：`left = -output`，`right = +output`
///
/// 正输出使车辆逆时针旋转（航向增大）。
#[derive(Debug, Clone)]
pub struct HeadingActuator {
    motors: DriveMotors,
}

impl HeadingActuator {
    pub fn new(motors: DriveMotors) -> Self {
        Self { motors }
    }

    pub fn write(&self, output: f64) -> Result<(), ControlError> {
        self.motors.drive(-output, output)
    }
}

impl OutputSink for HeadingActuator {
    fn write(&mut self, output: f64) -> Result<(), ControlError> {
        HeadingActuator::write(self, output)
    }
}
