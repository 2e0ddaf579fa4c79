//! 驱动层错误类型定义

use crate::status::IntegratorStatus;
use tread_hal::HalError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 硬件层错误
    #[error("Hardware error: {0}")]
    Hal(#[from] HalError),

    /// 工作线程创建失败
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// 工作线程未能在超时内退出
    #[error("Worker '{name}' did not shut down within {timeout_ms}ms")]
    JoinTimeout { name: String, timeout_ms: u64 },

    /// 工作线程 panic
    #[error("Worker '{name}' panicked")]
    ThreadPanicked { name: String },

    /// 积分值已过期（工作线程失败或已停止）
    #[error("Integrator '{name}' is stale ({status})")]
    Stale {
        name: String,
        status: IntegratorStatus,
        #[source]
        cause: Option<HalError>,
    },

    /// 无效配置
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::JoinTimeout {
            name: "heading".to_string(),
            timeout_ms: 2000,
        };
        assert_eq!(
            err.to_string(),
            "Worker 'heading' did not shut down within 2000ms"
        );

        let err = DriverError::ThreadPanicked {
            name: "x".to_string(),
        };
        assert!(err.to_string().contains("panicked"));
    }

    #[test]
    fn test_stale_error_keeps_cause() {
        let err = DriverError::Stale {
            name: "heading".to_string(),
            status: IntegratorStatus::Failed,
            cause: Some(HalError::read("gyro", "disconnected")),
        };
        assert!(err.to_string().contains("failed"));
        let source = err.source().expect("cause should be exposed as source");
        assert!(source.to_string().contains("gyro"));

        let err = DriverError::Stale {
            name: "heading".to_string(),
            status: IntegratorStatus::Stopped,
            cause: None,
        };
        assert!(err.source().is_none());
    }

    #[test]
    fn test_from_hal_error() {
        let err: DriverError = HalError::Unsupported("gyro").into();
        assert_eq!(
            err.to_string(),
            "Hardware error: Not supported by this hardware: gyro"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::other("no threads left");
        let err: DriverError = io.into();
        assert!(matches!(err, DriverError::Spawn(_)));
    }
}
