use core::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::Instant;
use embedded_hal::digital::{ErrorType, OutputPin};

use vitals_guard::command::{CommandQueue, dispatch};
use vitals_guard::config::{FallConfig, HealthThresholds, SAMPLE_QUEUE_LEN};
use vitals_guard::{
    AlarmAggregator, AlarmCondition, Button, Command, FallDetector, HealthMetrics, HealthStore, ImuSample, Press,
    SampleQueue, Shutdown, Vec3,
};

#[derive(Clone, Default)]
struct Buzzer(Arc<AtomicBool>);

impl ErrorType for Buzzer {
    type Error = Infallible;
}

impl OutputPin for Buzzer {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.store(true, Ordering::SeqCst);
        Ok(())
    }
}

type Mutex = CriticalSectionRawMutex;

fn sample(ms: u64, acc_g: f32, gyro_dps: f32) -> ImuSample {
    ImuSample::new(
        Vec3::new(0.0, 0.0, acc_g),
        Vec3::new(0.0, gyro_dps, 0.0),
        29.5,
        Instant::from_millis(ms),
    )
}

/// 300 ms of free-fall, one impact sample, then 2 s lying still, 200 ms period
fn fall_stream(start: u64) -> Vec<ImuSample> {
    let mut samples = vec![sample(start, 0.1, 30.0), sample(start + 200, 0.1, 30.0)];
    samples.push(sample(start + 400, 1.5, 150.0));
    samples.extend((1..=10).map(|i| sample(start + 400 + i * 200, 1.0, 2.0)));
    samples
}

fn drain_detector(queue: &SampleQueue<Mutex, SAMPLE_QUEUE_LEN>, alarms: &AlarmAggregator<Mutex, Buzzer>) -> usize {
    let shutdown: Shutdown<Mutex> = Shutdown::new();
    shutdown.request();

    let mut detector = FallDetector::new(FallConfig::DEFAULT);
    let mut reported = 0;
    block_on(detector.run(queue, &shutdown, |_| {
        reported += 1;
        alarms.on_fall_detected();
    }));
    reported
}

#[test]
fn queued_fall_reaches_the_alarm_set() {
    let queue: SampleQueue<Mutex, SAMPLE_QUEUE_LEN> = SampleQueue::new();
    let buzzer = Buzzer::default();
    let alarms = AlarmAggregator::new(buzzer.clone(), HealthThresholds::DEFAULT);

    for s in fall_stream(0) {
        queue.push(s);
    }
    let reported = drain_detector(&queue, &alarms);

    assert_eq!(reported, 1);
    assert!(queue.is_empty());
    assert_eq!(alarms.status_string().as_str(), "fall_detection");
    assert!(alarms.is_active());
    assert!(buzzer.0.load(Ordering::SeqCst));
}

#[test]
fn overflowing_queue_still_holds_the_latest_episode() {
    let queue: SampleQueue<Mutex, SAMPLE_QUEUE_LEN> = SampleQueue::new();
    let alarms: AlarmAggregator<Mutex, Buzzer> = AlarmAggregator::new(Buzzer::default(), HealthThresholds::DEFAULT);

    // idle chatter first; the detector is not draining, so it gets flushed
    for i in 0..10 {
        queue.push(sample(i * 200, 1.0, 20.0));
    }
    for s in fall_stream(2_000) {
        queue.push(s);
    }

    assert_eq!(queue.len(), SAMPLE_QUEUE_LEN);
    assert_eq!(drain_detector(&queue, &alarms), 1);
}

#[test]
fn vitals_fall_and_buttons_share_one_alarm_set() {
    let store: HealthStore<Mutex> = HealthStore::new();
    let buzzer = Buzzer::default();
    let alarms: AlarmAggregator<Mutex, Buzzer> = AlarmAggregator::new(buzzer.clone(), HealthThresholds::DEFAULT);
    let commands: CommandQueue<Mutex, 4> = Channel::new();

    // nothing reported by the sensors yet
    alarms.on_health_update(&store.snapshot());
    assert_eq!(alarms.status_string().as_str(), "normal");

    store.record_pulse(48, 97.0);
    store.record_temperature(36.9);
    alarms.on_health_update(&store.snapshot());
    alarms.on_fall_detected();

    let sos = Command::from_press(Button::Sos, Press::Click).unwrap();
    commands.try_send(sos).unwrap();
    let shutdown: Shutdown<Mutex> = Shutdown::new();
    shutdown.request();
    block_on(dispatch(&commands, &alarms, &shutdown));

    assert_eq!(alarms.status_string().as_str(), "heart_rate_low fall_detection sos");

    // vitals recover: only the vital-sign alarm goes away
    store.record_pulse(72, 97.0);
    alarms.on_health_update(&store.snapshot());
    let active = alarms.snapshot();
    assert!(!active.contains(AlarmCondition::HeartRateLow));
    assert!(active.contains(AlarmCondition::Sos));
    assert!(buzzer.0.load(Ordering::SeqCst));

    let silence = Command::from_press(Button::Silence, Press::Click).unwrap();
    commands.try_send(silence).unwrap();
    block_on(dispatch(&commands, &alarms, &shutdown));

    assert_eq!(alarms.status_string().as_str(), "normal");
    assert!(!alarms.is_active());
    assert!(!buzzer.0.load(Ordering::SeqCst));
}

#[test]
fn concurrent_sources_never_clear_sos() {
    let buzzer = Buzzer::default();
    let alarms: Arc<AlarmAggregator<Mutex, Buzzer>> =
        Arc::new(AlarmAggregator::new(buzzer.clone(), HealthThresholds::DEFAULT));
    alarms.trigger_sos();

    let normal = HealthMetrics {
        heart_rate_bpm: 72,
        spo2_pct: 98.0,
        temp_c: 36.6,
    };
    let feverish = HealthMetrics { temp_c: 39.5, ..normal };

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let alarms = alarms.clone();
            thread::spawn(move || {
                for i in 0..2_000 {
                    match (worker, i % 2) {
                        (0, _) => alarms.on_fall_detected(),
                        (_, 0) => alarms.on_health_update(&feverish),
                        _ => alarms.on_health_update(&normal),
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let active = alarms.snapshot();
    assert!(active.contains(AlarmCondition::Sos));
    assert!(active.contains(AlarmCondition::FallDetected));
    assert!(buzzer.0.load(Ordering::SeqCst));

    alarms.on_health_update(&normal);
    assert_eq!(alarms.status_string().as_str(), "fall_detection sos");
}

#[test]
fn queue_stays_bounded_and_ordered_across_threads() {
    let queue: SampleQueue<Mutex, SAMPLE_QUEUE_LEN> = SampleQueue::new();
    let done = AtomicBool::new(false);
    const PUSHES: u64 = 5_000;

    let received = thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..PUSHES {
                queue.push(sample(i, 1.0, 0.0));
                assert!(queue.len() <= SAMPLE_QUEUE_LEN);
            }
            done.store(true, Ordering::SeqCst);
        });

        let mut received = Vec::new();
        loop {
            let finished = done.load(Ordering::SeqCst);
            while let Some(s) = queue.try_receive() {
                received.push(s.timestamp.as_millis());
            }
            if finished {
                break received;
            }
            thread::yield_now();
        }
    });

    assert!(received.windows(2).all(|w| w[0] < w[1]));
    // the newest sample is never the one flushed
    assert_eq!(received.last(), Some(&(PUSHES - 1)));
}
