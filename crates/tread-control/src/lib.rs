//! 控制层模块
//!
//! 本模块在驱动层积分器之上提供差速底盘的闭环控制，包括：
//! - PID 控制器（连续输入回绕、积分抗饱和、输出钳位）
//! - 定周期反馈回路（后台线程，禁用时恰好写一次零）
//! - 航位推算坐标估计
//! - 运动原语：转向、直行、平移
//!
//! # 使用场景
//!
//! 大多数用户只需要 [`DriveController`] 和 [`DriveConfig`]：
//!
//! ```rust,ignore
//! use tread_control::{DriveConfig, DriveController};
//!
//! let config = DriveConfig::load("drive.toml")?;
//! let drive = DriveController::new(hardware, config)?;
//! drive.face(std::f64::consts::FRAC_PI_2)?;
//! drive.forward_by(10.0)?;
//! ```
//!
//! 需要自定义闭环（例如其它过程变量）时，可以直接组合 [`PidController`] 与 [`FeedbackLoop`]。

pub mod actuator;
pub mod config;
pub mod controller;
pub mod drive;
mod error;
pub mod feedback;
pub mod heading;
pub mod odometry;
pub mod pid;
pub mod state;

pub use actuator::{DriveMotors, HeadingActuator, StopPolicy};
pub use config::{DriveConfig, IntegratorSettings, MAX_POLL_INTERVAL_MS, MotionConfig};
pub use controller::Controller;
pub use drive::{DriveController, MotionOutcome, TranslatePlan, TranslateReport};
pub use error::ControlError;
pub use feedback::{FeedbackLoop, LoopConfig, OutputSink, ProcessVariable};
pub use heading::{DEFAULT_TRACK_WIDTH, HeadingRate, HeadingSource};
pub use odometry::{Axis, CoordinateEstimator, GlobalVelocity, Position};
pub use pid::{PidConfig, PidController};
pub use state::{AtomicDriveState, DriveState};
