//! Alarm conditions and the aggregator that owns the live alarm set.

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::digital::{OutputPin, PinState};

use crate::command::Command;
use crate::config::HealthThresholds;
use crate::fmt::Debug2Format;
use crate::health::{HealthMetrics, first_violation};

/// Longest possible status line: every token plus separators
pub const STATUS_CAPACITY: usize = 80;

/// Rendered alarm status, e.g. `"heart_rate_high fall_detection"` or `"normal"`
pub type AlarmStatus = heapless::String<STATUS_CAPACITY>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmCondition {
    HeartRateHigh,
    HeartRateLow,
    SpO2Low,
    TempHigh,
    FallDetected,
    Sos,
}

impl AlarmCondition {
    pub const COUNT: usize = 6;

    /// Every condition, in status-string order
    pub const ALL: [AlarmCondition; Self::COUNT] = [
        AlarmCondition::HeartRateHigh,
        AlarmCondition::HeartRateLow,
        AlarmCondition::SpO2Low,
        AlarmCondition::TempHigh,
        AlarmCondition::FallDetected,
        AlarmCondition::Sos,
    ];

    /// Telemetry token
    pub const fn as_str(self) -> &'static str {
        match self {
            AlarmCondition::HeartRateHigh => "heart_rate_high",
            AlarmCondition::HeartRateLow => "heart_rate_low",
            AlarmCondition::SpO2Low => "spo2_low",
            AlarmCondition::TempHigh => "temperature_high",
            AlarmCondition::FallDetected => "fall_detection",
            AlarmCondition::Sos => "sos",
        }
    }

    const fn slot(self) -> usize {
        match self {
            AlarmCondition::HeartRateHigh => 0,
            AlarmCondition::HeartRateLow => 1,
            AlarmCondition::SpO2Low => 2,
            AlarmCondition::TempHigh => 3,
            AlarmCondition::FallDetected => 4,
            AlarmCondition::Sos => 5,
        }
    }
}

/// Membership set of alarm conditions
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlarmSet {
    members: [bool; AlarmCondition::COUNT],
}

impl AlarmSet {
    pub const EMPTY: Self = Self {
        members: [false; AlarmCondition::COUNT],
    };

    /// Adds `condition`, returns true if it was not already present.
    pub fn insert(&mut self, condition: AlarmCondition) -> bool {
        let slot = &mut self.members[condition.slot()];
        let added = !*slot;
        *slot = true;
        added
    }

    /// Removes `condition`, returns true if it was present.
    pub fn remove(&mut self, condition: AlarmCondition) -> bool {
        let slot = &mut self.members[condition.slot()];
        let removed = *slot;
        *slot = false;
        removed
    }

    pub fn contains(&self, condition: AlarmCondition) -> bool {
        self.members[condition.slot()]
    }

    pub fn clear(&mut self) {
        self.members = [false; AlarmCondition::COUNT];
    }

    pub fn is_empty(&self) -> bool {
        !self.members.iter().any(|m| *m)
    }

    pub fn len(&self) -> usize {
        self.members.iter().filter(|m| **m).count()
    }

    /// Members in [`AlarmCondition::ALL`] order
    pub fn iter(&self) -> impl Iterator<Item = AlarmCondition> + '_ {
        AlarmCondition::ALL.into_iter().filter(move |c| self.contains(*c))
    }

    /// Legacy event-group layout: bit `n` is set for the n-th condition of
    /// the historical enum, which reserved 0 for "none".
    pub fn bits(&self) -> u8 {
        self.iter().fold(0, |acc, c| acc | 1 << (c.slot() + 1))
    }

    /// Space separated tokens in stable order, `"normal"` when empty.
    pub fn render(&self) -> AlarmStatus {
        let mut status = AlarmStatus::new();
        if self.is_empty() {
            let _ = status.push_str("normal");
            return status;
        }
        for (i, condition) in self.iter().enumerate() {
            if i > 0 {
                let _ = status.push(' ');
            }
            let _ = status.push_str(condition.as_str());
        }
        status
    }
}

impl fmt::Display for AlarmSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromIterator<AlarmCondition> for AlarmSet {
    fn from_iter<I: IntoIterator<Item = AlarmCondition>>(iter: I) -> Self {
        let mut set = AlarmSet::EMPTY;
        for condition in iter {
            set.insert(condition);
        }
        set
    }
}

struct AlarmState<P> {
    active: AlarmSet,
    /// Condition currently owned by vital-sign evaluation
    vital_sign: Option<AlarmCondition>,
    buzzer: P,
    buzzing: bool,
}

impl<P: OutputPin> AlarmState<P> {
    fn drive_buzzer(&mut self, on: bool) {
        self.buzzing = on;
        if let Err(err) = self.buzzer.set_state(PinState::from(on)) {
            warn!("buzzer pin write failed: {:?}", Debug2Format(&err));
        }
    }

    fn raise(&mut self, condition: AlarmCondition) {
        if self.active.insert(condition) {
            warn!("alarm raised: {}", condition.as_str());
        }
        self.drive_buzzer(true);
    }
}

/// Single writer of the live alarm set.
///
/// `P` drives the buzzer; `M` picks the lock flavour (critical section on the
/// device, anything `RawMutex` in tests).
pub struct AlarmAggregator<M: RawMutex, P> {
    limits: HealthThresholds,
    state: Mutex<M, RefCell<AlarmState<P>>>,
}

impl<M: RawMutex, P: OutputPin> AlarmAggregator<M, P> {
    /// Starts with every condition clear and the buzzer silenced.
    pub fn new(buzzer: P, limits: HealthThresholds) -> Self {
        let mut state = AlarmState {
            active: AlarmSet::EMPTY,
            vital_sign: None,
            buzzer,
            buzzing: false,
        };
        state.drive_buzzer(false);

        Self {
            limits,
            state: Mutex::new(RefCell::new(state)),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut AlarmState<P>) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Re-evaluates vital signs.
    ///
    /// A new violation replaces the previous vital-sign condition and sounds
    /// the buzzer. Once vitals are back in range the vital-sign condition is
    /// dropped; the buzzer stops only if nothing else is still active.
    pub fn on_health_update(&self, metrics: &HealthMetrics) {
        let detected = first_violation(metrics, &self.limits);

        self.with_state(|state| match (detected, state.vital_sign) {
            (Some(new), current) if current != Some(new) => {
                if let Some(old) = current {
                    state.active.remove(old);
                }
                state.vital_sign = Some(new);
                state.raise(new);
            }
            (None, Some(old)) => {
                state.active.remove(old);
                state.vital_sign = None;
                info!("vital signs normalized, cleared {}", old.as_str());
                if state.active.is_empty() {
                    state.drive_buzzer(false);
                }
            }
            _ => {}
        });
    }

    /// Latches a fall report. Does not touch any other condition.
    pub fn on_fall_detected(&self) {
        self.with_state(|state| state.raise(AlarmCondition::FallDetected));
    }

    /// Manual emergency call; stays until [`stop_buzzer`](Self::stop_buzzer).
    pub fn trigger_sos(&self) {
        self.with_state(|state| state.raise(AlarmCondition::Sos));
    }

    /// Acknowledges everything, including `Sos`, and silences the buzzer.
    pub fn stop_buzzer(&self) {
        self.with_state(|state| {
            state.active.clear();
            state.vital_sign = None;
            state.drive_buzzer(false);
        });
        info!("alarms acknowledged, buzzer stopped");
    }

    /// Routes an input command to the matching operation.
    pub fn apply(&self, command: Command) {
        match command {
            Command::TriggerSos => self.trigger_sos(),
            Command::StopBuzzer => self.stop_buzzer(),
            Command::ExternalFall => debug!("ignoring externally reported fall"),
        }
    }

    pub fn snapshot(&self) -> AlarmSet {
        self.with_state(|state| state.active)
    }

    /// Any condition set; keeps the device from sleeping
    pub fn is_active(&self) -> bool {
        self.with_state(|state| !state.active.is_empty())
    }

    pub fn is_buzzing(&self) -> bool {
        self.with_state(|state| state.buzzing)
    }

    pub fn status_string(&self) -> AlarmStatus {
        self.snapshot().render()
    }
}
