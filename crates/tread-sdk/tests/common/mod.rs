//! 仿真底盘
//!
//! 轮速与电机命令成正比（无惯性），编码器距离按时间解析积分。
//! 所有测试共享此模型。

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tread_sdk::control::{DriveConfig, HeadingSource};
use tread_sdk::{DriveHardware, HalError, SharedHardware, Side};

#[derive(Debug, Clone, Copy)]
pub struct PlantConfig {
    /// 满命令时的轮速（距离单位/秒）
    pub wheel_speed: f64,
    /// 轮距（陀螺仪读数使用）
    pub track_width: f64,
    pub has_gyro: bool,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            wheel_speed: 2.0,
            track_width: 1.0,
            has_gyro: false,
        }
    }
}

struct PlantState {
    updated_at: Instant,
    commands: [f64; 2],
    distances: [f64; 2],
    writes: Vec<(Side, f64)>,
}

pub struct SimulatedPlant {
    config: PlantConfig,
    state: Mutex<PlantState>,
    sensors_failed: AtomicBool,
}

fn index(side: Side) -> usize {
    match side {
        Side::Left => 0,
        Side::Right => 1,
    }
}

impl SimulatedPlant {
    pub fn new(config: PlantConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(PlantState {
                updated_at: Instant::now(),
                commands: [0.0; 2],
                distances: [0.0; 2],
                writes: Vec::new(),
            }),
            sensors_failed: AtomicBool::new(false),
        })
    }

    /// 让所有传感器读取从此刻起失败
    pub fn fail_sensors(&self) {
        self.sensors_failed.store(true, Ordering::Release);
    }

    pub fn commands(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.commands[0], state.commands[1])
    }

    pub fn writes(&self) -> Vec<(Side, f64)> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    fn check(&self, what: &'static str) -> Result<(), HalError> {
        if self.sensors_failed.load(Ordering::Acquire) {
            Err(HalError::read(what, "simulated sensor fault"))
        } else {
            Ok(())
        }
    }

    fn advance(&self, state: &mut PlantState) {
        let now = Instant::now();
        let dt = now.duration_since(state.updated_at).as_secs_f64();
        for i in 0..2 {
            state.distances[i] += state.commands[i] * self.config.wheel_speed * dt;
        }
        state.updated_at = now;
    }
}

impl DriveHardware for SimulatedPlant {
    fn encoder_rate(&self, side: Side) -> Result<f64, HalError> {
        self.check("encoder rate")?;
        Ok(self.state.lock().commands[index(side)] * self.config.wheel_speed)
    }

    fn encoder_distance(&self, side: Side) -> Result<f64, HalError> {
        self.check("encoder distance")?;
        let mut state = self.state.lock();
        self.advance(&mut state);
        Ok(state.distances[index(side)])
    }

    fn gyro_rate(&self) -> Result<f64, HalError> {
        if !self.config.has_gyro {
            return Err(HalError::Unsupported("gyro"));
        }
        self.check("gyro")?;
        let state = self.state.lock();
        let (left, right) = (state.commands[0], state.commands[1]);
        Ok((right - left) * self.config.wheel_speed / self.config.track_width)
    }

    fn write_motor(&self, side: Side, command: f64) -> Result<(), HalError> {
        let mut state = self.state.lock();
        self.advance(&mut state);
        state.commands[index(side)] = command;
        state.writes.push((side, command));
        Ok(())
    }
}

/// 与仿真底盘轮距一致的配置
pub fn drive_config(plant: &PlantConfig) -> DriveConfig {
    let mut config = DriveConfig::default();
    config.heading_source = HeadingSource::Encoders {
        track_width: plant.track_width,
    };
    config
}

pub fn shared(plant: &Arc<SimulatedPlant>) -> SharedHardware {
    plant.clone()
}

pub fn wait_for(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    pred()
}
