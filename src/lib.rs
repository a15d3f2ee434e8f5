#![cfg_attr(not(test), no_std)]

// must stay first so the logging macros are visible to every module below
mod fmt;

pub mod alarm;
pub mod command;
pub mod config;
pub mod fall;
pub mod health;
pub mod sampler;
pub mod shutdown;

use embassy_time::Instant;

pub use alarm::{AlarmAggregator, AlarmCondition, AlarmSet, AlarmStatus};
pub use command::{Button, Command, Press};
pub use fall::{FallDetector, FallEvent, FallState};
pub use health::{HealthMetrics, HealthStore};
pub use sampler::{MotionReading, MotionSensor, PushOutcome, SampleQueue, Sampler};
pub use shutdown::Shutdown;

const RAD_TO_DEG: f32 = 180.0 / core::f32::consts::PI;

/// Three-axis measurement
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean magnitude
    pub fn norm(&self) -> f32 {
        libm::sqrtf(self.x * self.x + self.y * self.y + self.z * self.z)
    }
}

/// Time stamped motion sample, acceleration in g and angular rate in deg/s
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImuSample {
    pub accel: Vec3,
    pub gyro: Vec3,
    pub temp_c: f32,
    pub roll_deg: f32,
    pub pitch_deg: f32,
    pub timestamp: Instant,
}

impl ImuSample {
    /// Builds a sample and derives roll/pitch from the gravity vector.
    pub fn new(accel: Vec3, gyro: Vec3, temp_c: f32, timestamp: Instant) -> Self {
        Self {
            accel,
            gyro,
            temp_c,
            roll_deg: libm::atan2f(accel.y, accel.z) * RAD_TO_DEG,
            pitch_deg: libm::atan2f(accel.x, accel.z) * RAD_TO_DEG,
            timestamp,
        }
    }
}
