//! 航向角速度来源

use serde::{Deserialize, Serialize};
use tread_hal::{DriveHardware, HalError, RateSource, SharedHardware, Side};

use crate::error::ControlError;

/// 默认轮距：编码器差速 `(right - left) * 3 / 20`
pub const DEFAULT_TRACK_WIDTH: f64 = 20.0 / 3.0;

fn default_track_width() -> f64 {
    DEFAULT_TRACK_WIDTH
}

/// 航向角速度的测量方式
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeadingSource {
    /// 陀螺仪角速度
    Gyro,
    /// 左右编码器速度差除以轮距
    Encoders {
        #[serde(default = "default_track_width")]
        track_width: f64,
    },
}

impl Default for HeadingSource {
    fn default() -> Self {
        Self::Encoders {
            track_width: DEFAULT_TRACK_WIDTH,
        }
    }
}

impl HeadingSource {
    pub fn validate(&self) -> Result<(), ControlError> {
        if let Self::Encoders { track_width } = self
            && (!track_width.is_finite() || *track_width <= 0.0)
        {
            return Err(ControlError::invalid_config(format!(
                "heading_source.track_width must be positive, got {track_width}"
            )));
        }
        Ok(())
    }

    /// 构造供积分器使用的采样函数
    pub fn rate_source(&self, hardware: SharedHardware) -> HeadingRate {
        HeadingRate {
            hardware,
            source: *self,
        }
    }
}

/// 航向角速度采样（rad/s，逆时针为正）
pub struct HeadingRate {
    hardware: SharedHardware,
    source: HeadingSource,
}

impl RateSource for HeadingRate {
    fn sample(&mut self) -> Result<f64, HalError> {
        match self.source {
            HeadingSource::Gyro => self.hardware.gyro_rate(),
            HeadingSource::Encoders { track_width } => {
                let left = self.hardware.encoder_rate(Side::Left)?;
                let right = self.hardware.encoder_rate(Side::Right)?;
                Ok((right - left) / track_width)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    struct Rates {
        left: f64,
        right: f64,
        gyro: Option<f64>,
    }

    impl DriveHardware for Rates {
        fn encoder_rate(&self, side: Side) -> Result<f64, HalError> {
            Ok(match side {
                Side::Left => self.left,
                Side::Right => self.right,
            })
        }
        fn encoder_distance(&self, _side: Side) -> Result<f64, HalError> {
            Ok(0.0)
        }
        fn gyro_rate(&self) -> Result<f64, HalError> {
            self.gyro.ok_or(HalError::Unsupported("gyro"))
        }
        fn write_motor(&self, _side: Side, _command: f64) -> Result<(), HalError> {
            Ok(())
        }
    }

    #[test]
    fn test_encoder_rate_matches_legacy_factor() {
        let hw: SharedHardware = Arc::new(Rates {
            left: -1.0,
            right: 1.0,
            gyro: None,
        });
        let mut rate = HeadingSource::default().rate_source(hw);
        // (1 - (-1)) * 3 / 20
        assert_relative_eq!(rate.sample().unwrap(), 0.3);
    }

    #[test]
    fn test_gyro_source() {
        let hw: SharedHardware = Arc::new(Rates {
            left: 0.0,
            right: 0.0,
            gyro: Some(0.75),
        });
        let mut rate = HeadingSource::Gyro.rate_source(hw.clone());
        assert_eq!(rate.sample().unwrap(), 0.75);

        let hw: SharedHardware = Arc::new(Rates {
            left: 0.0,
            right: 0.0,
            gyro: None,
        });
        let mut rate = HeadingSource::Gyro.rate_source(hw);
        assert_eq!(rate.sample(), Err(HalError::Unsupported("gyro")));
    }

    #[test]
    fn test_validate_track_width() {
        assert!(HeadingSource::default().validate().is_ok());
        assert!(HeadingSource::Gyro.validate().is_ok());
        assert!(
            HeadingSource::Encoders { track_width: 0.0 }
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_deserialize_default_track_width() {
        #[derive(Deserialize)]
        struct Wrapper {
            source: HeadingSource,
        }
        let w: Wrapper = toml::from_str("source = { kind = \"encoders\" }").unwrap();
        assert_eq!(w.source, HeadingSource::default());
        let w: Wrapper = toml::from_str("source = { kind = \"gyro\" }").unwrap();
        assert_eq!(w.source, HeadingSource::Gyro);
    }
}
