//! # 底盘控制配置
//!
//! 所有段都带 `#[serde(default)]`，TOML 中缺省的字段取默认值。
//!
//! ```toml
//! reset_pose_on_start = true
//!
//! [pid]
//! kp = 0.6
//!
//! [heading_source]
//! kind = "gyro"
//!
//! [motion]
//! face_timeout_ms = 4000
//! stop_policy = { kind = "brake", pulse_ms = 100 }
//! ```

use crate::actuator::StopPolicy;
use crate::error::ControlError;
use crate::feedback::LoopConfig;
use crate::heading::HeadingSource;
use crate::pid::PidConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tread_driver::IntegratorConfig;

/// 轮询间隔上限（毫秒）
pub const MAX_POLL_INTERVAL_MS: u64 = 20;

/// 底盘控制配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// 构造完成后立即请求航向与坐标清零
    pub reset_pose_on_start: bool,

    /// 航向 PID 参数
    pub pid: PidConfig,

    /// 航向反馈回路
    pub feedback: LoopConfig,

    /// 航向、x、y 积分器
    pub integrator: IntegratorSettings,

    pub heading_source: HeadingSource,

    pub motion: MotionConfig,
}

impl DriveConfig {
    /// 从 TOML 字符串解析并校验
    pub fn from_toml_str(content: &str) -> Result<Self, ControlError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载并校验
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ControlError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 序列化为 TOML
    pub fn to_toml_string(&self) -> Result<String, ControlError> {
        toml::to_string(self)
            .map_err(|e| ControlError::invalid_config(format!("cannot serialize config: {e}")))
    }

    /// 保存到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ControlError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        self.pid.validate()?;
        self.feedback.validate()?;
        self.integrator.validate()?;
        self.heading_source.validate()?;
        self.motion.validate()
    }
}

/// 积分器设置（航向、x、y 共用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    /// 采样周期（微秒），0 表示不休眠
    pub sample_period_us: u64,
    /// 关闭时等待工作线程退出的超时（毫秒）
    pub join_timeout_ms: u64,
    /// 启动时等待首次采样的超时（毫秒）
    pub startup_timeout_ms: u64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            sample_period_us: 1_000,
            join_timeout_ms: 2_000,
            startup_timeout_ms: 1_000,
        }
    }
}

impl IntegratorSettings {
    pub fn integrator_config(&self, name: &str) -> IntegratorConfig {
        IntegratorConfig {
            name: name.to_string(),
            sample_period_us: self.sample_period_us,
            join_timeout_ms: self.join_timeout_ms,
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        self.integrator_config("integrator").validate()?;
        if self.startup_timeout_ms == 0 {
            return Err(ControlError::invalid_config(
                "integrator.startup_timeout_ms must be > 0",
            ));
        }
        Ok(())
    }
}

/// 运动参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// 航向收敛容差（rad）
    pub angle_tolerance: f64,
    /// 连续满足容差的轮询次数
    pub settle_samples: u32,
    /// 轮询间隔（毫秒，不超过 20）
    pub poll_interval_ms: u64,
    pub face_timeout_ms: u64,
    pub forward_timeout_ms: u64,
    /// 直行功率（开环，(0, 1]）
    pub drive_power: f64,
    pub stop_policy: StopPolicy,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            angle_tolerance: 0.01,
            settle_samples: 3,
            poll_interval_ms: 10,
            face_timeout_ms: 5_000,
            forward_timeout_ms: 10_000,
            drive_power: 1.0,
            stop_policy: StopPolicy::Zero,
        }
    }
}

impl MotionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn face_timeout(&self) -> Duration {
        Duration::from_millis(self.face_timeout_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if !self.angle_tolerance.is_finite() || self.angle_tolerance <= 0.0 {
            return Err(ControlError::invalid_config(format!(
                "motion.angle_tolerance must be positive, got {}",
                self.angle_tolerance
            )));
        }
        if self.settle_samples == 0 {
            return Err(ControlError::invalid_config(
                "motion.settle_samples must be >= 1",
            ));
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ControlError::invalid_config(format!(
                "motion.poll_interval_ms must be in 1..={MAX_POLL_INTERVAL_MS}, got {}",
                self.poll_interval_ms
            )));
        }
        if self.face_timeout_ms == 0 || self.forward_timeout_ms == 0 {
            return Err(ControlError::invalid_config(
                "motion timeouts must be > 0",
            ));
        }
        if !self.drive_power.is_finite() || self.drive_power <= 0.0 || self.drive_power > 1.0 {
            return Err(ControlError::invalid_config(format!(
                "motion.drive_power must be in (0, 1], got {}",
                self.drive_power
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DriveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pid, PidConfig::heading());
        assert_eq!(config.heading_source, HeadingSource::default());
        assert_eq!(config.motion.stop_policy, StopPolicy::Zero);
        assert!(!config.reset_pose_on_start);
    }

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = DriveConfig::from_toml_str("").unwrap();
        assert_eq!(config, DriveConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = DriveConfig::from_toml_str(
            r#"
reset_pose_on_start = true

[pid]
kp = 0.6
continuous = false
input_min = -6.283185307179586
input_max = 6.283185307179586

[heading_source]
kind = "gyro"

[motion]
face_timeout_ms = 4000
stop_policy = { kind = "brake", pulse_ms = 100 }
"#,
        )
        .unwrap();

        assert!(config.reset_pose_on_start);
        assert_eq!(config.pid.kp, 0.6);
        assert_eq!(config.pid.ki, 0.04);
        assert!(!config.pid.continuous);
        assert!((config.pid.input_max - 2.0 * PI).abs() < 1e-12);
        assert_eq!(config.heading_source, HeadingSource::Gyro);
        assert_eq!(config.motion.face_timeout_ms, 4000);
        assert_eq!(config.motion.settle_samples, 3);
        assert_eq!(config.motion.stop_policy, StopPolicy::Brake { pulse_ms: 100 });
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = DriveConfig::from_toml_str("[motion]\npoll_interval_ms = 50\n").unwrap_err();
        assert!(matches!(err, ControlError::InvalidConfiguration { .. }));

        let err = DriveConfig::from_toml_str("[pid]\noutput_min = 2.0\n").unwrap_err();
        assert!(matches!(err, ControlError::InvalidConfiguration { .. }));

        let err = DriveConfig::from_toml_str("[motion]\ndrive_power = 1.5\n").unwrap_err();
        assert!(matches!(err, ControlError::InvalidConfiguration { .. }));

        let err = DriveConfig::from_toml_str(
            "[heading_source]\nkind = \"encoders\"\ntrack_width = -1.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ControlError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_malformed_toml() {
        let err = DriveConfig::from_toml_str("[motion\n").unwrap_err();
        assert!(matches!(err, ControlError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[feedback]\nperiod_ms = 10").unwrap();

        let config = DriveConfig::load(file.path()).unwrap();
        assert_eq!(config.feedback.period_ms, 10);

        assert!(matches!(
            DriveConfig::load(file.path().with_extension("missing")),
            Err(ControlError::Io(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drive.toml");

        let mut config = DriveConfig::default();
        config.motion.stop_policy = StopPolicy::Brake { pulse_ms: 80 };
        config.heading_source = HeadingSource::Gyro;
        config.save(&path).unwrap();

        assert_eq!(DriveConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_integrator_config_mapping() {
        let settings = IntegratorSettings {
            sample_period_us: 500,
            ..Default::default()
        };
        let config = settings.integrator_config("heading");
        assert_eq!(config.name, "heading");
        assert_eq!(config.sample_period_us, 500);
        assert_eq!(config.join_timeout_ms, 2_000);
    }
}
