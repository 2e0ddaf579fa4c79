//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use tread_sdk::prelude::*;
//! ```

// 控制层（推荐使用）
pub use tread_control::{
    DriveConfig, DriveController, DriveState, MotionConfig, MotionOutcome, Position, StopPolicy,
    TranslateReport,
};
pub use tread_control::{HeadingSource, PidConfig};

// 硬件抽象（由调用方实现）
pub use tread_hal::{DriveHardware, SharedHardware, Side};

// 驱动层
pub use tread_driver::IntegralReading;

// 错误类型
pub use tread_control::ControlError;
pub use tread_driver::DriverError;
pub use tread_hal::HalError;
