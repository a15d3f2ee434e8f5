//! Fixed-period motion sampling into a bounded, drop-oldest queue.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_time::{Duration, Instant, Ticker};

use crate::fmt::Debug2Format;
use crate::shutdown::Shutdown;
use crate::{ImuSample, Vec3};

/// One reading as delivered by the motion sensor driver
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotionReading {
    /// g
    pub accel: Vec3,
    /// deg/s
    pub gyro: Vec3,
    pub temp_c: f32,
}

/// Motion sensor read capability.
#[allow(async_fn_in_trait)]
pub trait MotionSensor {
    type Error: core::fmt::Debug;

    async fn read(&mut self) -> Result<MotionReading, Self::Error>;
}

/// Which overflow policy, if any, a push went through
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PushOutcome {
    Queued,
    /// Queue was full, the oldest sample was discarded
    DroppedOldest,
    /// Lost the race for the freed slot, the new sample was discarded
    DroppedNewest,
}

/// Bounded sample queue between the sampler and the fall detector
pub struct SampleQueue<M: RawMutex, const N: usize> {
    channel: Channel<M, ImuSample, N>,
}

impl<M: RawMutex, const N: usize> SampleQueue<M, N> {
    pub const fn new() -> Self {
        Self { channel: Channel::new() }
    }

    /// Enqueues without waiting, flushing the oldest sample when full.
    pub fn push(&self, sample: ImuSample) -> PushOutcome {
        let sample = match self.channel.try_send(sample) {
            Ok(()) => return PushOutcome::Queued,
            Err(TrySendError::Full(sample)) => sample,
        };

        self.flush_oldest_and_send(sample)
    }

    fn flush_oldest_and_send(&self, sample: ImuSample) -> PushOutcome {
        // the consumer may have drained a slot since the failed send
        let flushed = self.channel.try_receive().is_ok();

        match (self.channel.try_send(sample), flushed) {
            (Ok(()), true) => {
                warn!("imu queue full, dropped oldest sample");
                PushOutcome::DroppedOldest
            }
            (Ok(()), false) => PushOutcome::Queued,
            (Err(TrySendError::Full(_)), _) => {
                warn!("imu queue still full, dropped newest sample");
                PushOutcome::DroppedNewest
            }
        }
    }

    /// Waits for the next sample, oldest first.
    pub async fn receive(&self) -> ImuSample {
        self.channel.receive().await
    }

    pub fn try_receive(&self) -> Option<ImuSample> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<M: RawMutex, const N: usize> Default for SampleQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls a [`MotionSensor`] at a fixed period.
pub struct Sampler<S> {
    sensor: S,
    period: Duration,
    read_failures: u32,
}

impl<S: MotionSensor> Sampler<S> {
    pub fn new(sensor: S, period: Duration) -> Self {
        Self {
            sensor,
            period,
            read_failures: 0,
        }
    }

    /// Reads once and enqueues the result stamped with `now`.
    ///
    /// A failed read is logged and skipped; nothing is enqueued.
    pub async fn tick<M: RawMutex, const N: usize>(
        &mut self,
        queue: &SampleQueue<M, N>,
        now: Instant,
    ) -> Option<PushOutcome> {
        match self.sensor.read().await {
            Ok(reading) => {
                let sample = ImuSample::new(reading.accel, reading.gyro, reading.temp_c, now);
                trace!(
                    "imu: a=({}, {}, {}) g=({}, {}, {}) roll={} pitch={}",
                    sample.accel.x,
                    sample.accel.y,
                    sample.accel.z,
                    sample.gyro.x,
                    sample.gyro.y,
                    sample.gyro.z,
                    sample.roll_deg,
                    sample.pitch_deg
                );
                Some(queue.push(sample))
            }
            Err(err) => {
                self.read_failures = self.read_failures.wrapping_add(1);
                warn!("imu read failed, skipping tick: {:?}", Debug2Format(&err));
                None
            }
        }
    }

    /// Samples every period until shutdown is requested.
    pub async fn run<M: RawMutex, R: RawMutex, const N: usize>(
        &mut self,
        queue: &SampleQueue<M, N>,
        shutdown: &Shutdown<R>,
    ) {
        info!("imu sampler started, period {} ms", self.period.as_millis());
        let mut ticker = Ticker::every(self.period);

        while !shutdown.is_requested() {
            self.tick(queue, Instant::now()).await;
            ticker.next().await;
        }

        info!("imu sampler stopped after {} read failures", self.read_failures);
    }

    pub fn read_failures(&self) -> u32 {
        self.read_failures
    }
}
