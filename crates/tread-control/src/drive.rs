//! 差速底盘运动控制器
//!
//! [`DriveController`] 组合航向积分器、航向反馈回路、坐标估计器和电机输出，
//! 提供三个阻塞式运动原语：
//!
//! - [`face`](DriveController::face): 闭环转向到目标航向
//! - [`forward_by`](DriveController::forward_by): 开环直行指定距离
//! - [`translate_to`](DriveController::translate_to): 先转向再直行到 (x, y)
//!
//! 所有运动都有超时，以 [`MotionOutcome`] 报告结果；任何错误返回前电机都已停止。
//!
//! # 示例
//!
//! ```rust,ignore
//! use tread_control::{DriveConfig, DriveController};
//!
//! let drive = DriveController::new(hardware, DriveConfig::default())?;
//! let report = drive.translate_to(13.0, 3.0)?;
//! println!("face: {:?}, forward: {:?}", report.face, report.forward);
//! ```

use crate::actuator::{DriveMotors, HeadingActuator, StopPolicy};
use crate::config::DriveConfig;
use crate::error::ControlError;
use crate::feedback::FeedbackLoop;
use crate::odometry::{CoordinateEstimator, Position};
use crate::pid::PidController;
use crate::state::{AtomicDriveState, DriveState};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tread_driver::{IntegralReader, IntegralReading, SampledIntegrator};
use tread_hal::{DriveHardware, SharedHardware, Side};

/// 运动结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOutcome {
    /// 到达目标
    Converged,
    /// 超时（电机已停止）
    TimedOut,
    /// 被 `stop()` 取消（电机已停止）
    Cancelled,
}

impl MotionOutcome {
    pub fn is_converged(self) -> bool {
        self == Self::Converged
    }

    /// 转换为 `Result`，便于调用方使用 `?`
    pub fn into_result(self, operation: &'static str, timeout: Duration) -> Result<(), ControlError> {
        match self {
            Self::Converged => Ok(()),
            Self::TimedOut => Err(ControlError::ConvergenceTimeout {
                operation,
                timeout_ms: timeout.as_millis() as u64,
            }),
            Self::Cancelled => Err(ControlError::Cancelled),
        }
    }
}

/// 平移规划：目标方向与直线距离
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranslatePlan {
    /// `atan2(y, x)`
    pub heading: f64,
    /// `hypot(x, y)`
    pub distance: f64,
}

impl TranslatePlan {
    pub fn to(x: f64, y: f64) -> Self {
        Self {
            heading: y.atan2(x),
            distance: x.hypot(y),
        }
    }
}

/// 平移结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranslateReport {
    pub plan: TranslatePlan,
    pub face: MotionOutcome,
    /// 转向未收敛时不执行直行
    pub forward: Option<MotionOutcome>,
}

impl TranslateReport {
    pub fn is_converged(&self) -> bool {
        self.face.is_converged() && self.forward.is_some_and(MotionOutcome::is_converged)
    }
}

/// 差速底盘运动控制器
///
/// 方法都接收 `&self`，可以放进 `Arc` 由多个线程共享：
/// 同一时刻只允许一个运动，其它线程可以随时调用 [`stop`](Self::stop)。
pub struct DriveController {
    config: DriveConfig,
    hardware: SharedHardware,
    motors: DriveMotors,
    heading: SampledIntegrator,
    estimator: CoordinateEstimator,
    feedback: FeedbackLoop,
    motion_lock: Mutex<()>,
    state: AtomicDriveState,
    cancel_requested: AtomicBool,
    is_shut_down: bool,
}

impl DriveController {
    /// 校验配置，启动航向/坐标积分器和航向反馈回路
    ///
    /// 航向积分器首次采样失败（例如配置为陀螺仪但硬件不支持）时返回错误。
    pub fn new(hardware: SharedHardware, config: DriveConfig) -> Result<Self, ControlError> {
        config.validate()?;

        let heading = SampledIntegrator::spawn(
            config.heading_source.rate_source(hardware.clone()),
            config.integrator.integrator_config("heading"),
        )?;
        let heading_reader = heading.reader();
        if !heading_reader.wait_until_running(config.integrator.startup_timeout()) {
            return Err(match heading_reader.failure() {
                Some(source) => ControlError::SensorReadFailure {
                    what: "heading rate".to_string(),
                    source,
                },
                None => ControlError::SensorStale {
                    what: "heading".to_string(),
                },
            });
        }

        let estimator =
            CoordinateEstimator::spawn(hardware.clone(), heading_reader.clone(), &config.integrator)?;

        let motors = DriveMotors::new(hardware.clone());
        let controller = PidController::new(config.pid)?;
        let feedback = FeedbackLoop::spawn(
            "heading",
            controller,
            heading_reader,
            HeadingActuator::new(motors.clone()),
            config.feedback.clone(),
        )?;

        let drive = Self {
            config,
            hardware,
            motors,
            heading,
            estimator,
            feedback,
            motion_lock: Mutex::new(()),
            state: AtomicDriveState::default(),
            cancel_requested: AtomicBool::new(false),
            is_shut_down: false,
        };

        if drive.config.reset_pose_on_start {
            drive.request_pose_reset();
        }

        info!(
            "Drive controller ready (heading source: {:?})",
            drive.config.heading_source
        );
        Ok(drive)
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn state(&self) -> DriveState {
        self.state.get(Ordering::Acquire)
    }

    /// 当前航向估计（rad）
    pub fn heading(&self) -> IntegralReading {
        self.heading.read()
    }

    /// 航向只读句柄
    pub fn heading_reader(&self) -> IntegralReader {
        self.heading.reader()
    }

    /// 当前坐标估计
    pub fn position(&self) -> Position {
        self.estimator.position()
    }

    /// 左右编码器累计距离的平均值
    pub fn distance_traveled(&self) -> Result<f64, ControlError> {
        let read = |side: Side| {
            self.hardware
                .encoder_distance(side)
                .map_err(|source| ControlError::SensorReadFailure {
                    what: format!("{side} encoder distance"),
                    source,
                })
        };
        let left = read(Side::Left)?;
        let right = read(Side::Right)?;
        Ok((left + right) / 2.0)
    }

    /// 转向到目标航向（rad）
    pub fn face(&self, target: f64) -> Result<MotionOutcome, ControlError> {
        let _guard = self.begin_motion()?;
        self.face_locked(target)
    }

    /// 沿当前航向直行 `distance`
    pub fn forward_by(&self, distance: f64) -> Result<MotionOutcome, ControlError> {
        let _guard = self.begin_motion()?;
        self.forward_locked(distance)
    }

    /// 移动到相对当前位置的 (x, y)：先转向 `atan2(y, x)`，收敛后直行 `hypot(x, y)`
    pub fn translate_to(&self, x: f64, y: f64) -> Result<TranslateReport, ControlError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(ControlError::InvalidArgument(format!(
                "translate target must be finite, got ({x}, {y})"
            )));
        }
        let _guard = self.begin_motion()?;

        let plan = TranslatePlan::to(x, y);
        info!(
            "Translate to ({:.3}, {:.3}): heading {:.4} rad, distance {:.3}",
            x, y, plan.heading, plan.distance
        );

        let face = self.face_locked(plan.heading)?;
        let forward = if face.is_converged() {
            Some(self.forward_locked(plan.distance)?)
        } else {
            warn!("Translate: face ended {:?}, skipping forward", face);
            None
        };

        Ok(TranslateReport {
            plan,
            face,
            forward,
        })
    }

    /// 取消当前运动并停止电机（任意线程）
    pub fn stop(&self) -> Result<(), ControlError> {
        self.cancel_requested.store(true, Ordering::Release);
        let disabled = self.feedback.disable();
        let stopped = self.motors.stop(StopPolicy::Zero);
        info!("Drive stop requested");
        disabled.and(stopped)
    }

    /// 航向与坐标清零
    ///
    /// 清零由各积分器工作线程应用；本方法等待应用完成（以启动超时为上限）。
    /// 运动进行中时返回 [`ControlError::Busy`]。
    pub fn reset_pose(&self) -> Result<(), ControlError> {
        let _guard = self.motion_lock.try_lock().ok_or(ControlError::Busy)?;

        let readers = {
            let (x, y) = self.estimator.readers();
            [self.heading.reader(), x, y]
        };
        let before: Vec<u64> = readers.iter().map(|r| r.metrics().resets_applied).collect();

        self.request_pose_reset();

        let deadline = Instant::now() + self.config.integrator.startup_timeout();
        for (reader, before) in readers.iter().zip(before) {
            while reader.metrics().resets_applied == before {
                if reader.status().is_stale() {
                    return Err(ControlError::SensorStale {
                        what: reader.name().to_string(),
                    });
                }
                if Instant::now() >= deadline {
                    warn!("Pose reset not yet applied by '{}'", reader.name());
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        Ok(())
    }

    /// 停止所有工作线程
    ///
    /// 重复调用是安全的；`Drop` 时自动调用。
    pub fn shutdown(&mut self) -> Result<(), ControlError> {
        if self.is_shut_down {
            return Ok(());
        }
        self.is_shut_down = true;

        let stopped = self.stop();
        let feedback = self.feedback.shutdown();
        let estimator = self.estimator.stop();
        let heading = self.heading.stop().map_err(ControlError::from);
        info!("Drive controller shut down");

        stopped.and(feedback).and(estimator).and(heading)
    }

    fn request_pose_reset(&self) {
        self.heading.request_reset();
        self.estimator.request_reset();
        debug!("Pose reset requested");
    }

    /// 获取运动锁并清除上一次的取消请求
    fn begin_motion(&self) -> Result<MutexGuard<'_, ()>, ControlError> {
        let guard = self.motion_lock.try_lock().ok_or(ControlError::Busy)?;
        self.cancel_requested.store(false, Ordering::Release);
        Ok(guard)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// 出错路径：关闭反馈回路并写零，保留原始错误
    fn halt(&self, reason: &ControlError) {
        error!("Motion aborted: {}", reason);
        if let Err(e) = self.feedback.disable() {
            error!("Failed to disable heading loop while halting: {}", e);
        }
        if let Err(e) = self.motors.stop(StopPolicy::Zero) {
            error!("Failed to stop motors while halting: {}", e);
        }
        self.state.set(DriveState::Idle, Ordering::Release);
    }

    fn fresh_heading(&self) -> Result<f64, ControlError> {
        self.heading
            .reader()
            .fresh_value()
            .map_err(|e| ControlError::from_estimate("heading", e))
    }

    fn face_locked(&self, target: f64) -> Result<MotionOutcome, ControlError> {
        if !target.is_finite() {
            return Err(ControlError::InvalidArgument(format!(
                "target heading must be finite, got {target}"
            )));
        }
        self.fresh_heading()?;

        self.feedback.set_setpoint(target)?;
        self.state.set(DriveState::Turning, Ordering::Release);
        self.feedback.enable();
        debug!("Face: target {:.4} rad", target);

        let outcome = match self.await_heading() {
            Ok(outcome) => outcome,
            Err(e) => {
                self.halt(&e);
                return Err(e);
            },
        };

        if let Err(e) = self.feedback.disable() {
            self.halt(&e);
            return Err(e);
        }
        self.state.set(DriveState::Idle, Ordering::Release);

        match outcome {
            MotionOutcome::Converged => {
                info!("Face converged at {:.4} rad", self.heading.value())
            },
            MotionOutcome::TimedOut => warn!(
                "Face timed out after {}ms (error {:.4} rad)",
                self.config.motion.face_timeout_ms,
                self.feedback.error_to(self.heading.value())
            ),
            MotionOutcome::Cancelled => info!("Face cancelled"),
        }
        Ok(outcome)
    }

    /// 轮询航向误差直到连续 `settle_samples` 次在容差内，或超时/取消
    fn await_heading(&self) -> Result<MotionOutcome, ControlError> {
        let motion = &self.config.motion;
        let timeout = motion.face_timeout();
        let poll_interval = motion.poll_interval();
        let start = Instant::now();
        let mut settled = 0u32;

        loop {
            if self.is_cancelled() {
                return Ok(MotionOutcome::Cancelled);
            }

            let heading = self.fresh_heading()?;
            if !self.feedback.is_enabled() {
                return self.outcome_after_loop_disabled();
            }

            if self.feedback.error_to(heading).abs() <= motion.angle_tolerance {
                settled += 1;
                if settled >= motion.settle_samples {
                    return Ok(MotionOutcome::Converged);
                }
            } else {
                settled = 0;
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(MotionOutcome::TimedOut);
            }
            std::thread::sleep(poll_interval.min(timeout - elapsed));
        }
    }

    /// 转向期间反馈回路已关闭
    ///
    /// `stop()` 先设置取消标志再关闭回路，因此取消优先；其次报告航向过期，
    /// 最后才是回路自身的故障。
    fn outcome_after_loop_disabled(&self) -> Result<MotionOutcome, ControlError> {
        if self.is_cancelled() {
            return Ok(MotionOutcome::Cancelled);
        }
        self.fresh_heading()?;
        let reason = self
            .feedback
            .last_fault()
            .map_or_else(|| "disabled externally".to_string(), |f| f.to_string());
        Err(ControlError::FeedbackFault {
            name: self.feedback.name().to_string(),
            reason,
        })
    }

    fn forward_locked(&self, distance: f64) -> Result<MotionOutcome, ControlError> {
        if !distance.is_finite() || distance < 0.0 {
            return Err(ControlError::InvalidArgument(format!(
                "forward distance must be finite and non-negative, got {distance}"
            )));
        }
        let start_distance = self.distance_traveled()?;
        if distance == 0.0 {
            return Ok(MotionOutcome::Converged);
        }

        self.state.set(DriveState::DrivingStraight, Ordering::Release);
        let power = self.config.motion.drive_power;
        debug!("Forward: {:.3} at power {:.2}", distance, power);

        let outcome = match self
            .motors
            .drive(power, power)
            .and_then(|()| self.await_distance(start_distance, distance))
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.halt(&e);
                return Err(e);
            },
        };

        if let Err(e) = self.motors.stop(self.config.motion.stop_policy) {
            self.halt(&e);
            return Err(e);
        }
        self.state.set(DriveState::Idle, Ordering::Release);

        let traveled = self.distance_traveled().unwrap_or(f64::NAN) - start_distance;
        match outcome {
            MotionOutcome::Converged => info!("Forward reached {:.3} (target {:.3})", traveled, distance),
            MotionOutcome::TimedOut => warn!(
                "Forward timed out after {}ms: traveled {:.3} of {:.3}",
                self.config.motion.forward_timeout_ms, traveled, distance
            ),
            MotionOutcome::Cancelled => info!("Forward cancelled after {:.3}", traveled),
        }
        Ok(outcome)
    }

    fn await_distance(&self, start_distance: f64, distance: f64) -> Result<MotionOutcome, ControlError> {
        let motion = &self.config.motion;
        let timeout = motion.forward_timeout();
        let poll_interval = motion.poll_interval();
        let start = Instant::now();

        loop {
            if self.is_cancelled() {
                return Ok(MotionOutcome::Cancelled);
            }
            if self.distance_traveled()? - start_distance >= distance {
                return Ok(MotionOutcome::Converged);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(MotionOutcome::TimedOut);
            }
            std::thread::sleep(poll_interval.min(timeout - elapsed));
        }
    }
}

impl fmt::Debug for DriveController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveController")
            .field("state", &self.state())
            .field("heading", &self.heading())
            .field("position", &self.position())
            .field("feedback", &self.feedback)
            .finish()
    }
}

impl Drop for DriveController {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Drive controller failed to shut down cleanly: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pid::PidConfig;
    use approx::assert_relative_eq;
    use std::sync::Arc;
    use tread_hal::HalError;

    /// 静止底盘：速率为零，记录电机写入次数
    #[derive(Default)]
    struct Parked {
        writes: Mutex<usize>,
    }

    impl DriveHardware for Parked {
        fn encoder_rate(&self, _side: Side) -> Result<f64, HalError> {
            Ok(0.0)
        }
        fn encoder_distance(&self, _side: Side) -> Result<f64, HalError> {
            Ok(0.0)
        }
        fn write_motor(&self, _side: Side, _command: f64) -> Result<(), HalError> {
            *self.writes.lock() += 1;
            Ok(())
        }
    }

    fn parked_drive(config: DriveConfig) -> (DriveController, Arc<Parked>) {
        let hardware = Arc::new(Parked::default());
        let drive = DriveController::new(hardware.clone(), config).unwrap();
        (drive, hardware)
    }

    #[test]
    fn test_stop_between_polls_reports_cancel() {
        let (drive, _hw) = parked_drive(DriveConfig::default());
        drive.feedback.set_setpoint(1.0).unwrap();
        drive.feedback.enable();

        // 轮询已通过取消检查后，stop() 才设置标志并关闭回路
        drive.cancel_requested.store(true, Ordering::Release);
        drive.feedback.disable().unwrap();

        assert!(!drive.feedback.is_enabled());
        assert_eq!(
            drive.outcome_after_loop_disabled().unwrap(),
            MotionOutcome::Cancelled
        );
    }

    #[test]
    fn test_loop_disabled_without_cancel_is_fault() {
        let (drive, _hw) = parked_drive(DriveConfig::default());
        assert!(matches!(
            drive.outcome_after_loop_disabled(),
            Err(ControlError::FeedbackFault { reason, .. }) if reason == "disabled externally"
        ));
    }

    #[test]
    fn test_face_rejects_target_outside_legacy_range() {
        let config = DriveConfig {
            pid: PidConfig::legacy_heading(),
            ..Default::default()
        };
        let (drive, hw) = parked_drive(config);

        assert!(matches!(
            drive.face(7.0),
            Err(ControlError::InvalidArgument(_))
        ));
        assert_eq!(*hw.writes.lock(), 0);
        assert_eq!(drive.state(), DriveState::Idle);
    }

    #[test]
    fn test_translate_plan() {
        let plan = TranslatePlan::to(13.0, 3.0);
        assert_relative_eq!(plan.heading, 0.2267988, epsilon = 1e-6);
        assert_relative_eq!(plan.distance, 13.3416641, epsilon = 1e-6);

        let plan = TranslatePlan::to(0.0, 0.0);
        assert_eq!(plan.heading, 0.0);
        assert_eq!(plan.distance, 0.0);

        let plan = TranslatePlan::to(-1.0, 0.0);
        assert_relative_eq!(plan.heading, std::f64::consts::PI);
    }

    #[test]
    fn test_outcome_into_result() {
        let timeout = Duration::from_secs(5);
        assert!(MotionOutcome::Converged.into_result("face", timeout).is_ok());
        assert!(matches!(
            MotionOutcome::TimedOut.into_result("face", timeout),
            Err(ControlError::ConvergenceTimeout {
                operation: "face",
                timeout_ms: 5000
            })
        ));
        assert!(matches!(
            MotionOutcome::Cancelled.into_result("forward", timeout),
            Err(ControlError::Cancelled)
        ));
    }

    #[test]
    fn test_report_convergence() {
        let plan = TranslatePlan::to(1.0, 0.0);
        let report = TranslateReport {
            plan,
            face: MotionOutcome::Converged,
            forward: Some(MotionOutcome::Converged),
        };
        assert!(report.is_converged());

        let report = TranslateReport {
            plan,
            face: MotionOutcome::TimedOut,
            forward: None,
        };
        assert!(!report.is_converged());
    }
}
