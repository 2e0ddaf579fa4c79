//! Controller trait - 标量控制器通用接口
//!
//! # 设计理念
//!
//! - **Tick 模式**: 调用方（通常是 [`FeedbackLoop`](crate::FeedbackLoop)）负责定时，控制器只负责计算
//! - **时间感知**: 显式传入 `dt`，便于单元测试
//! - **错误处理**: 关联类型 `Error` 允许自定义错误
//!
//! # 时间跳变处理
//!
//! 当检测到异常的 `dt` 时（线程调度延迟、系统卡顿），`on_time_jump()` 会先被调用，
//! 随后 `tick()` 收到被钳位的 `dt`。时间敏感的控制器应在这里重置微分项。

use std::time::Duration;

/// 标量控制器接口
///
/// # 线程安全
///
/// `Controller` 本身不要求 `Send` 或 `Sync`。
/// 如果需要在多线程中使用，请将其包装在 `Mutex` 中。
pub trait Controller {
    /// 控制器错误类型
    type Error: std::error::Error + Send + 'static;

    /// 计算一步控制输出
    ///
    /// # 参数
    ///
    /// - `current`: 过程变量当前值
    /// - `dt`: 时间步长（可能已被钳位）
    fn tick(&mut self, current: f64, dt: Duration) -> Result<f64, Self::Error>;

    /// 处理时间跳变
    ///
    /// 默认实现不做任何事情。
    fn on_time_jump(&mut self, _dt: Duration) -> Result<(), Self::Error> {
        Ok(())
    }

    /// 完全重置控制器内部状态
    fn reset(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Proportional {
        target: f64,
        jumps: usize,
    }

    impl Controller for Proportional {
        type Error = std::io::Error;

        fn tick(&mut self, current: f64, _dt: Duration) -> Result<f64, Self::Error> {
            Ok(2.0 * (self.target - current))
        }

        fn on_time_jump(&mut self, _dt: Duration) -> Result<(), Self::Error> {
            self.jumps += 1;
            Ok(())
        }
    }

    #[test]
    fn test_default_methods() {
        let mut c = Proportional {
            target: 1.0,
            jumps: 0,
        };
        assert_eq!(c.tick(0.25, Duration::from_millis(10)).unwrap(), 1.5);
        c.on_time_jump(Duration::from_secs(1)).unwrap();
        assert_eq!(c.jumps, 1);
        assert!(c.reset().is_ok());
    }
}
