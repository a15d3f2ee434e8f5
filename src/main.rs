#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::{Spawner, task};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_time::{Duration, Instant, Timer, WithTimeout};
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::Channel,
};
use static_cell::StaticCell;
use vitals_guard::command::{self, CommandQueue};
use vitals_guard::config::{
    COMMAND_QUEUE_LEN, FallConfig, HEALTH_PERIOD, HealthThresholds, LONG_PRESS, SAMPLE_PERIOD, SAMPLE_QUEUE_LEN,
};
use vitals_guard::*;
use {defmt_rtt as _, panic_probe as _};

type Alarms = AlarmAggregator<CriticalSectionRawMutex, Output<'static>>;

// sampler -> fall detector
static IMU_SAMPLES: SampleQueue<CriticalSectionRawMutex, SAMPLE_QUEUE_LEN> = SampleQueue::new();
// buttons -> alarm aggregator
static COMMANDS: CommandQueue<CriticalSectionRawMutex, COMMAND_QUEUE_LEN> = Channel::new();
static VITALS: HealthStore<CriticalSectionRawMutex> = HealthStore::new(); // latest heart rate, spo2, temperature
static SHUTDOWN: Shutdown<CriticalSectionRawMutex> = Shutdown::new();
static ALARMS: StaticCell<Alarms> = StaticCell::new();

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let p = embassy_stm32::init(Default::default());
    info!("Health monitor starting");

    let led = Output::new(p.PB7, Level::High, Speed::Low);
    let buzzer = Output::new(p.PB0, Level::Low, Speed::Low);
    let sos_button = ExtiInput::new(p.PC13, p.EXTI13, Pull::Down);
    let silence_button = ExtiInput::new(p.PA0, p.EXTI0, Pull::Down);

    let alarms: &'static Alarms = ALARMS.init(AlarmAggregator::new(buzzer, HealthThresholds::DEFAULT));

    _spawner.spawn(control_task(led, alarms)).unwrap();
    _spawner.spawn(imu_task()).unwrap();
    _spawner.spawn(fall_task(alarms)).unwrap();
    _spawner.spawn(vitals_task()).unwrap();
    _spawner.spawn(health_task(alarms)).unwrap();
    _spawner.spawn(button_task(sos_button, Button::Sos)).unwrap();
    _spawner.spawn(button_task(silence_button, Button::Silence)).unwrap();
    _spawner.spawn(command_task(alarms)).unwrap();

    info!("All tasks spawned");
}

// heartbeat led and alarm status report
// while any alarm is live the device must not go to sleep
#[task]
async fn control_task(mut led: Output<'static>, alarms: &'static Alarms) {
    info!("Starting main control loop");

    loop {
        led.toggle();

        let status = alarms.status_string();
        if alarms.is_active() {
            warn!("alarm status: {}, sleep inhibited", status.as_str());
        } else {
            debug!("alarm status: {}", status.as_str());
        }

        Timer::after(Duration::from_millis(1000)).await;
    }
}

// fake motion source, a device resting flat on a table
struct SimulatedImu;

impl MotionSensor for SimulatedImu {
    type Error = core::convert::Infallible;

    async fn read(&mut self) -> Result<MotionReading, Self::Error> {
        Ok(MotionReading {
            accel: Vec3::new(0.0, 0.0, 1.0),
            gyro: Vec3::new(0.0, 0.0, 0.0),
            temp_c: 25.0,
        })
    }
}

// imu acquisition at a fixed rate, never waits on the detector
#[task]
async fn imu_task() {
    info!("Starting imu task");

    let mut sampler = Sampler::new(SimulatedImu, SAMPLE_PERIOD);
    sampler.run(&IMU_SAMPLES, &SHUTDOWN).await;
}

// classifies the sample stream, reports falls to the aggregator
#[task]
async fn fall_task(alarms: &'static Alarms) {
    info!("Starting fall detection task");

    let mut detector = FallDetector::new(FallConfig::DEFAULT);
    detector
        .run(&IMU_SAMPLES, &SHUTDOWN, |event| {
            info!("fall at {} ms, impact {} g", event.detected_at.as_millis(), event.impact_g);
            alarms.on_fall_detected();
        })
        .await;
}

// fake heart rate / spo2 / temperature workers
#[task]
async fn vitals_task() {
    info!("Starting vitals task");

    loop {
        VITALS.record_pulse(72, 98.0);
        VITALS.record_temperature(36.7);

        Timer::after(Duration::from_millis(2000)).await;
    }
}

#[task]
async fn health_task(alarms: &'static Alarms) {
    health::watch(&VITALS, alarms, HEALTH_PERIOD, &SHUTDOWN).await;
}

// press length decides click vs long press, double clicks are not detected here
#[task(pool_size = 2)]
async fn button_task(mut button: ExtiInput<'static>, which: Button) {
    info!("Starting button task {}", which);

    loop {
        button.wait_for_rising_edge().await;
        let pressed_at = Instant::now();

        let press = match button.wait_for_falling_edge().with_timeout(LONG_PRESS).await {
            Ok(()) => Press::Click,
            Err(_) => {
                button.wait_for_falling_edge().await;
                Press::LongPress
            }
        };
        debug!("button {} {} after {} ms", which, press, pressed_at.elapsed().as_millis());

        if let Some(command) = Command::from_press(which, press) {
            // try sending command, if channel is full drop it, the user will press again
            if COMMANDS.try_send(command).is_err() {
                warn!("command channel full, dropping {}", command);
            }
        }

        // crude debounce
        Timer::after(Duration::from_millis(50)).await;
    }
}

#[task]
async fn command_task(alarms: &'static Alarms) {
    command::dispatch(&COMMANDS, alarms, &SHUTDOWN).await;
}
