//! Tunables for sampling, fall classification and vital-sign limits.

use embassy_time::Duration;

/// Motion sensor polling period
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(200);

/// Slots in the sampler -> detector queue
pub const SAMPLE_QUEUE_LEN: usize = 16;

/// Vital-sign evaluation period
pub const HEALTH_PERIOD: Duration = Duration::from_secs(5);

/// Slots in the button command queue
pub const COMMAND_QUEUE_LEN: usize = 4;

/// Press held at least this long counts as a long press
pub const LONG_PRESS: Duration = Duration::from_millis(1500);

/// Fall classifier thresholds.
///
/// Defaults were tuned on a wrist-worn MPU6050 sampled at 5 Hz.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FallConfig {
    /// Acceleration magnitude below this is free-fall (g)
    pub free_fall_g: f32,
    /// Free-fall shorter than this is a dip, not a drop
    pub free_fall_min: Duration,
    /// Free-fall longer than this without landing is discarded
    pub free_fall_max: Duration,
    /// Acceleration magnitude above this is an impact (g)
    pub impact_g: f32,
    /// How long to wait for the impact once free-fall ends
    pub impact_timeout: Duration,
    /// Angular rate below this counts as lying still (deg/s)
    pub inactivity_dps: f32,
    /// How long to watch for stillness after impact
    pub post_window: Duration,
    /// Minimum spacing between two reported falls
    pub report_cooldown: Duration,
    /// When set, a fall is only reported if |roll| or |pitch| exceeds this angle (deg)
    pub posture_angle_deg: Option<f32>,
}

impl FallConfig {
    pub const DEFAULT: Self = Self {
        free_fall_g: 0.35,
        free_fall_min: Duration::from_millis(120),
        free_fall_max: Duration::from_millis(1000),
        impact_g: 1.0,
        impact_timeout: Duration::from_millis(300),
        inactivity_dps: 10.0,
        post_window: Duration::from_millis(1500),
        report_cooldown: Duration::from_millis(3000),
        posture_angle_deg: None,
    };

    /// Enables the lying-down posture gate.
    pub const fn with_posture_check(mut self, angle_deg: f32) -> Self {
        self.posture_angle_deg = Some(angle_deg);
        self
    }
}

impl Default for FallConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Normal ranges for vital signs
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HealthThresholds {
    pub heart_rate_min_bpm: i32,
    pub heart_rate_max_bpm: i32,
    pub spo2_min_pct: f64,
    pub temp_max_c: f32,
}

impl HealthThresholds {
    pub const DEFAULT: Self = Self {
        heart_rate_min_bpm: 60,
        heart_rate_max_bpm: 100,
        spo2_min_pct: 90.0,
        temp_max_c: 38.0,
    };
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self::DEFAULT
    }
}
