//! 控制层错误类型

use thiserror::Error;
use tread_driver::DriverError;
use tread_hal::HalError;

/// 控制层错误类型
#[derive(Error, Debug)]
pub enum ControlError {
    /// 配置无效（构造时立即失败）
    #[error("Invalid configuration: {what}")]
    InvalidConfiguration { what: String },

    /// 传感器读取失败
    #[error("Failed to read {what}: {source}")]
    SensorReadFailure { what: String, source: HalError },

    /// 积分估计已过期（采样线程失败或已停止）
    #[error("Sensor estimate '{what}' is stale")]
    SensorStale { what: String },

    /// 运动未能在超时内收敛
    #[error("{operation} did not converge within {timeout_ms}ms")]
    ConvergenceTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// 已有运动正在执行
    #[error("Another motion is already in progress")]
    Busy,

    /// 运动被 stop() 取消
    #[error("Motion cancelled")]
    Cancelled,

    /// 反馈回路因故障自行关闭
    #[error("Feedback loop '{name}' faulted: {reason}")]
    FeedbackFault { name: String, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 电机写入失败
    #[error("Actuator error: {0}")]
    Actuator(#[from] HalError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlError {
    pub(crate) fn invalid_config(what: impl Into<String>) -> Self {
        Self::InvalidConfiguration { what: what.into() }
    }

    /// 把积分器过期错误映射为 [`ControlError::SensorStale`]，其余保持为 `Driver`
    pub(crate) fn from_estimate(what: &str, err: DriverError) -> Self {
        match err {
            DriverError::Stale { .. } => Self::SensorStale {
                what: what.to_string(),
            },
            other => Self::Driver(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use tread_driver::IntegratorStatus;

    #[test]
    fn test_display() {
        let err = ControlError::ConvergenceTimeout {
            operation: "face",
            timeout_ms: 5000,
        };
        assert_eq!(err.to_string(), "face did not converge within 5000ms");
        assert_eq!(
            ControlError::Busy.to_string(),
            "Another motion is already in progress"
        );
    }

    #[test]
    fn test_sensor_failure_exposes_source() {
        let err = ControlError::SensorReadFailure {
            what: "encoder distance".to_string(),
            source: HalError::read("left encoder", "timeout"),
        };
        assert!(err.source().is_some());
    }

    #[test]
    fn test_from_estimate() {
        let stale = DriverError::Stale {
            name: "heading".to_string(),
            status: IntegratorStatus::Failed,
            cause: None,
        };
        assert!(matches!(
            ControlError::from_estimate("heading", stale),
            ControlError::SensorStale { ref what } if what == "heading"
        ));

        let other = DriverError::InvalidConfig("bad".to_string());
        assert!(matches!(
            ControlError::from_estimate("heading", other),
            ControlError::Driver(_)
        ));
    }
}
