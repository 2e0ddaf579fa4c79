//! 日志初始化
//!
//! 库代码只通过 `tracing` 宏输出日志，不安装订阅者。
//! 应用程序（或测试）调用 [`init`] 一次即可：
//!
//! ```rust,no_run
//! tread_sdk::logging::init().ok();
//! ```
//!
//! 过滤规则优先取 `RUST_LOG`，未设置时使用 [`DEFAULT_DIRECTIVE`]。
//! 依赖 `log` crate 的第三方库输出会经 `tracing-log` 转发。

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// 默认过滤规则：所有 `tread_*` crate 输出 info 及以上
pub const DEFAULT_DIRECTIVE: &str = "tread=info";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{directive}': {source}")]
    InvalidFilter {
        directive: String,
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("A global tracing subscriber is already installed")]
    SubscriberAlreadySet(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("A global log logger is already installed")]
    LoggerAlreadySet(#[from] log::SetLoggerError),
}

/// 使用默认过滤规则初始化
pub fn init() -> Result<(), LoggingError> {
    init_with(DEFAULT_DIRECTIVE)
}

/// 使用指定的默认过滤规则初始化（`RUST_LOG` 仍然优先）
pub fn init_with(default_directive: &str) -> Result<(), LoggingError> {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), default_directive)?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    tracing_log::LogTracer::builder()
        .with_max_level(log::LevelFilter::Trace)
        .init()?;
    Ok(())
}

fn build_filter(env: Option<&str>, default_directive: &str) -> Result<EnvFilter, LoggingError> {
    let directive = match env {
        Some(env) if !env.trim().is_empty() => env,
        _ => default_directive,
    };
    EnvFilter::try_new(directive).map_err(|source| LoggingError::InvalidFilter {
        directive: directive.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_env_overrides_default() {
        let filter = build_filter(Some("tread_control=debug"), DEFAULT_DIRECTIVE).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));

        let filter = build_filter(None, DEFAULT_DIRECTIVE).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));

        let filter = build_filter(Some("  "), DEFAULT_DIRECTIVE).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_invalid_directive() {
        let err = build_filter(Some("tread=loud"), DEFAULT_DIRECTIVE).unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFilter { .. }));
        assert!(err.to_string().contains("tread=loud"));
    }
}
