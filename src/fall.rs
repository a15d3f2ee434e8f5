//! Fall classification over the motion sample stream, timed by sample timestamps.

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Instant};

use crate::ImuSample;
use crate::config::FallConfig;
use crate::sampler::SampleQueue;
use crate::shutdown::Shutdown;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FallState {
    #[default]
    Idle,
    FreeFall { since: Instant },
    ImpactWait { since: Instant },
    PostMonitor { since: Instant },
}

/// A reported fall
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FallEvent {
    pub detected_at: Instant,
    /// Strongest acceleration seen while landing (g)
    pub impact_g: f32,
}

pub struct FallDetector {
    config: FallConfig,
    state: FallState,
    last_report: Option<Instant>,
    /// Set after a free-fall timed out; cleared once acceleration recovers
    awaiting_recovery: bool,
    impact_g: f32,
}

impl FallDetector {
    pub fn new(config: FallConfig) -> Self {
        Self {
            config,
            state: FallState::Idle,
            last_report: None,
            awaiting_recovery: false,
            impact_g: 0.0,
        }
    }

    pub fn state(&self) -> FallState {
        self.state
    }

    pub fn config(&self) -> &FallConfig {
        &self.config
    }

    /// Advances the state machine by one sample.
    pub fn process(&mut self, sample: &ImuSample) -> Option<FallEvent> {
        let now = sample.timestamp;
        let acc_norm = sample.accel.norm();
        let cfg = self.config;

        let (next, event) = match self.state {
            FallState::Idle => {
                if acc_norm >= cfg.free_fall_g {
                    self.awaiting_recovery = false;
                    (FallState::Idle, None)
                } else if self.awaiting_recovery {
                    (FallState::Idle, None)
                } else {
                    (FallState::FreeFall { since: now }, None)
                }
            }

            FallState::FreeFall { since } => {
                let elapsed = elapsed(since, now);
                if acc_norm < cfg.free_fall_g {
                    if elapsed > cfg.free_fall_max {
                        debug!("free-fall lasted {} ms without impact, discarding", elapsed.as_millis());
                        self.awaiting_recovery = true;
                        (FallState::Idle, None)
                    } else {
                        (FallState::FreeFall { since }, None)
                    }
                } else if elapsed < cfg.free_fall_min {
                    trace!("free-fall of {} ms too short", elapsed.as_millis());
                    (FallState::Idle, None)
                } else if acc_norm > cfg.impact_g {
                    self.impact_g = acc_norm;
                    (FallState::PostMonitor { since: now }, None)
                } else {
                    self.impact_g = 0.0;
                    (FallState::ImpactWait { since: now }, None)
                }
            }

            FallState::ImpactWait { since } => {
                if acc_norm > cfg.impact_g {
                    self.impact_g = acc_norm;
                    (FallState::PostMonitor { since: now }, None)
                } else if elapsed(since, now) > cfg.impact_timeout {
                    trace!("no impact after free-fall");
                    (FallState::Idle, None)
                } else {
                    (FallState::ImpactWait { since }, None)
                }
            }

            FallState::PostMonitor { since } => {
                self.impact_g = self.impact_g.max(acc_norm);
                if elapsed(since, now) > cfg.post_window {
                    debug!("movement after impact, not a fall");
                    (FallState::Idle, None)
                } else if sample.gyro.norm() < cfg.inactivity_dps && self.posture_allows(sample) {
                    (FallState::Idle, self.report(now))
                } else {
                    (FallState::PostMonitor { since }, None)
                }
            }
        };

        if next != self.state {
            trace!("fall state {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        event
    }

    fn posture_allows(&self, sample: &ImuSample) -> bool {
        match self.config.posture_angle_deg {
            Some(limit) => libm::fabsf(sample.roll_deg) > limit || libm::fabsf(sample.pitch_deg) > limit,
            None => true,
        }
    }

    fn report(&mut self, now: Instant) -> Option<FallEvent> {
        if let Some(last) = self.last_report
            && elapsed(last, now) <= self.config.report_cooldown
        {
            debug!("fall within cooldown, suppressed");
            return None;
        }

        self.last_report = Some(now);
        warn!("fall detected, impact {} g", self.impact_g);
        Some(FallEvent {
            detected_at: now,
            impact_g: self.impact_g,
        })
    }

    /// Consumes samples until shutdown, handing each fall to `on_fall`.
    ///
    /// Blocks indefinitely while the queue is empty. Samples already queued
    /// when shutdown is requested are still classified.
    pub async fn run<M, S, F, const N: usize>(
        &mut self,
        queue: &SampleQueue<M, N>,
        shutdown: &Shutdown<S>,
        mut on_fall: F,
    ) where
        M: RawMutex,
        S: RawMutex,
        F: FnMut(FallEvent),
    {
        info!("fall detector started");

        loop {
            match select(queue.receive(), shutdown.wait()).await {
                Either::First(sample) => {
                    if let Some(event) = self.process(&sample) {
                        on_fall(event);
                    }
                }
                Either::Second(()) => break,
            }
        }

        info!("fall detector stopped");
    }
}

impl Default for FallDetector {
    fn default() -> Self {
        Self::new(FallConfig::DEFAULT)
    }
}

fn elapsed(since: Instant, now: Instant) -> Duration {
    now.saturating_duration_since(since)
}
