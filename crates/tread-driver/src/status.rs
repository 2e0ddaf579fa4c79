//! 积分工作线程状态定义

use std::fmt;

/// 积分工作线程状态
///
/// # 状态流转
///
/// ```text
/// Starting ──首次采样成功──> Running ──stop()──> Stopped
///     │                        │
///     └──────采样失败──────────┴──> Failed（终态）
/// ```
///
/// `Failed` 和 `Stopped` 之后积分值不再更新，读取结果标记为过期（stale）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegratorStatus {
    /// 工作线程已创建，尚未完成首次采样
    #[default]
    Starting,
    /// 正常积分中
    Running,
    /// 采样函数出错或返回无效数据，积分停止
    Failed,
    /// 已被显式停止
    Stopped,
}

impl IntegratorStatus {
    /// 积分值是否已不再更新
    pub fn is_stale(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

impl fmt::Display for IntegratorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
