//! 底盘运动状态
//!
//! ```text
//! Idle ──face()──> Turning ──> Idle ──forward_by()──> DrivingStraight ──> Idle
//! ```
//!
//! 运动串行执行，不可重入。

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// 底盘运动状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DriveState {
    #[default]
    Idle = 0,
    /// 航向闭环转向中
    Turning = 1,
    /// 开环直行中
    DrivingStraight = 2,
}

impl DriveState {
    /// 从 u8 转换，无效值视为 Idle
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Turning,
            2 => Self::DrivingStraight,
            _ => Self::Idle,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Turning => write!(f, "turning"),
            Self::DrivingStraight => write!(f, "driving straight"),
        }
    }
}

/// 底盘运动状态（原子版本，用于线程间共享）
#[derive(Debug)]
pub struct AtomicDriveState {
    inner: AtomicU8,
}

impl AtomicDriveState {
    pub fn new(state: DriveState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> DriveState {
        DriveState::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, state: DriveState, ordering: Ordering) {
        self.inner.store(state.as_u8(), ordering);
    }
}

impl Default for AtomicDriveState {
    fn default() -> Self {
        Self::new(DriveState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_round_trip() {
        for state in [DriveState::Idle, DriveState::Turning, DriveState::DrivingStraight] {
            assert_eq!(DriveState::from_u8(state.as_u8()), state);
        }
        assert_eq!(DriveState::from_u8(200), DriveState::Idle);
    }

    #[test]
    fn test_atomic_state() {
        let state = AtomicDriveState::default();
        assert!(state.get(Ordering::Relaxed).is_idle());
        state.set(DriveState::Turning, Ordering::Release);
        assert_eq!(state.get(Ordering::Acquire), DriveState::Turning);
        assert_eq!(DriveState::DrivingStraight.to_string(), "driving straight");
    }
}
