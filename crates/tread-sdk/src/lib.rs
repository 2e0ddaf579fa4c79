//! Tread SDK - 差速底盘运动控制核心
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **硬件抽象层** (`hal`): 编码器、陀螺仪、电机的窄接口，由调用方实现
//! - **驱动层** (`driver`): 后台采样积分线程、无锁快照、线程生命周期
//! - **控制层** (`control`): PID、反馈回路、航位推算、运动原语
//!
//! # 快速开始
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tread_sdk::prelude::*;
//!
//! tread_sdk::logging::init().ok();
//!
//! let hardware: SharedHardware = Arc::new(MyRobot::open()?);
//! let drive = DriveController::new(hardware, DriveConfig::default())?;
//! let report = drive.translate_to(13.0, 3.0)?;
//! assert!(report.is_converged());
//! ```

pub mod logging;
pub mod prelude;

pub use tread_control as control;
pub use tread_driver as driver;
pub use tread_hal as hal;

pub use tread_control::{ControlError, DriveConfig, DriveController, MotionOutcome};
pub use tread_driver::DriverError;
pub use tread_hal::{DriveHardware, HalError, SharedHardware, Side};
