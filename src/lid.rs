use std::fmt;

use rppal::gpio::{Gpio, InputPin, Level};

use crate::error::Result;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LidState {
    Open,
    Closed,
}

impl From<Level> for LidState {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => LidState::Open,
            Level::High => LidState::Closed,
        }
    }
}

pub trait LidSensor {
    fn is_closed(&self) -> bool;

    fn is_opened(&self) -> bool {
        !self.is_closed()
    }
}

pub struct GpioLid {
    pin: InputPin,
    active_low: bool,
}

impl GpioLid {
    /// `active_low` flips the reading for sensors that pull the line low
    /// while the lid is shut.
    pub fn new(gpio: &Gpio, pin: u8, active_low: bool) -> Result<Self> {
        let pin = gpio.get(pin)?.into_input_pulldown();
        Ok(GpioLid { pin, active_low })
    }

    pub fn read(&self) -> LidState {
        let level = if self.active_low {
            !self.pin.read()
        } else {
            self.pin.read()
        };
        level.into()
    }
}

impl LidSensor for GpioLid {
    fn is_closed(&self) -> bool {
        self.read() == LidState::Closed
    }
}

impl fmt::Display for LidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LidState::Open => f.write_str("Open"),
            LidState::Closed => f.write_str("Closed"),
        }
    }
}
