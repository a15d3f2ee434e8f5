//! Manual alarm commands and the button mapping that produces them.

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embedded_hal::digital::OutputPin;

use crate::alarm::AlarmAggregator;
use crate::shutdown::Shutdown;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    TriggerSos,
    StopBuzzer,
    /// Fall reported by an outside source, accepted but not acted on
    ExternalFall,
}

/// Physical buttons on the device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Button {
    Sos,
    Silence,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Press {
    Click,
    DoubleClick,
    LongPress,
}

impl Command {
    /// Long press on the silence button is left to the reconfiguration mode.
    pub fn from_press(button: Button, press: Press) -> Option<Command> {
        match (button, press) {
            (Button::Sos, Press::Click | Press::LongPress) => Some(Command::TriggerSos),
            (Button::Silence, Press::Click) => Some(Command::StopBuzzer),
            _ => None,
        }
    }
}

pub type CommandQueue<M, const N: usize> = Channel<M, Command, N>;

/// Applies queued commands in arrival order until shutdown.
///
/// Commands already queued when shutdown is requested are still applied.
pub async fn dispatch<M, A, S, P, const N: usize>(
    commands: &CommandQueue<M, N>,
    alarms: &AlarmAggregator<A, P>,
    shutdown: &Shutdown<S>,
) where
    M: RawMutex,
    A: RawMutex,
    S: RawMutex,
    P: OutputPin,
{
    info!("command dispatch started");

    loop {
        match select(commands.receive(), shutdown.wait()).await {
            Either::First(command) => {
                debug!("command: {:?}", command);
                alarms.apply(command);
            }
            Either::Second(()) => break,
        }
    }

    info!("command dispatch stopped");
}
