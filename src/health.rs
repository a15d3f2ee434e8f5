//! Vital-sign snapshot, threshold evaluation and the periodic health check.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Ticker};
use embedded_hal::digital::OutputPin;

use crate::alarm::{AlarmAggregator, AlarmCondition, AlarmSet};
use crate::config::HealthThresholds;
use crate::shutdown::Shutdown;

/// Latest vital signs. Zero means the sensor has not reported yet.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HealthMetrics {
    pub heart_rate_bpm: i32,
    pub spo2_pct: f64,
    pub temp_c: f32,
}

impl HealthMetrics {
    pub const UNSET: Self = Self {
        heart_rate_bpm: 0,
        spo2_pct: 0.0,
        temp_c: 0.0,
    };
}

/// Returns the first violated limit, checked in the order
/// low heart rate, high heart rate, low SpO2, high temperature.
///
/// Readings that were never populated are skipped instead of flagged.
pub fn first_violation(metrics: &HealthMetrics, limits: &HealthThresholds) -> Option<AlarmCondition> {
    if metrics.heart_rate_bpm > 0 {
        if metrics.heart_rate_bpm < limits.heart_rate_min_bpm {
            return Some(AlarmCondition::HeartRateLow);
        }
        if metrics.heart_rate_bpm > limits.heart_rate_max_bpm {
            return Some(AlarmCondition::HeartRateHigh);
        }
    }
    if metrics.spo2_pct > 0.0 && metrics.spo2_pct < limits.spo2_min_pct {
        return Some(AlarmCondition::SpO2Low);
    }
    if metrics.temp_c > limits.temp_max_c {
        return Some(AlarmCondition::TempHigh);
    }
    None
}

/// Set form of [`first_violation`]; holds at most one condition.
pub fn evaluate(metrics: &HealthMetrics, limits: &HealthThresholds) -> AlarmSet {
    let mut set = AlarmSet::EMPTY;
    if let Some(condition) = first_violation(metrics, limits) {
        set.insert(condition);
    }
    set
}

/// Shared latest-value cell written by the vital-sign sensor workers.
pub struct HealthStore<M: RawMutex> {
    latest: Mutex<M, Cell<HealthMetrics>>,
}

impl<M: RawMutex> HealthStore<M> {
    pub const fn new() -> Self {
        Self {
            latest: Mutex::new(Cell::new(HealthMetrics::UNSET)),
        }
    }

    /// Heart-rate/SpO2 sensor update
    pub fn record_pulse(&self, heart_rate_bpm: i32, spo2_pct: f64) {
        self.latest.lock(|cell| {
            let mut metrics = cell.get();
            metrics.heart_rate_bpm = heart_rate_bpm;
            metrics.spo2_pct = spo2_pct;
            cell.set(metrics);
        });
    }

    /// Body temperature sensor update
    pub fn record_temperature(&self, temp_c: f32) {
        self.latest.lock(|cell| {
            let mut metrics = cell.get();
            metrics.temp_c = temp_c;
            cell.set(metrics);
        });
    }

    pub fn snapshot(&self) -> HealthMetrics {
        self.latest.lock(|cell| cell.get())
    }
}

impl<M: RawMutex> Default for HealthStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Feeds a snapshot of `store` to `alarms` every `period` until shutdown.
pub async fn watch<M, A, S, P>(
    store: &HealthStore<M>,
    alarms: &AlarmAggregator<A, P>,
    period: Duration,
    shutdown: &Shutdown<S>,
) where
    M: RawMutex,
    A: RawMutex,
    S: RawMutex,
    P: OutputPin,
{
    info!("health watch started, period {} ms", period.as_millis());
    let mut ticker = Ticker::every(period);

    while !shutdown.is_requested() {
        let metrics = store.snapshot();
        trace!(
            "vitals: hr {} bpm, spo2 {} %, temp {} C",
            metrics.heart_rate_bpm,
            metrics.spo2_pct,
            metrics.temp_c
        );
        alarms.on_health_update(&metrics);
        ticker.next().await;
    }

    info!("health watch stopped");
}
