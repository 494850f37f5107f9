use std::fmt;
use std::thread;
use std::time::Duration;

use rppal::gpio::{Gpio, OutputPin};

use crate::error::Result;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Channel {
    Green,
    Red,
}

/// Driver for the two indicator lights.
///
/// Calls are expected to be quick and safe to repeat. `status` reports what
/// the driver last drove the channel to.
pub trait Indicators {
    fn turn_on(&mut self, channel: Channel);
    fn turn_off(&mut self, channel: Channel);
    fn status(&self, channel: Channel) -> bool;

    fn set(&mut self, channel: Channel, on: bool) {
        if on {
            self.turn_on(channel)
        } else {
            self.turn_off(channel)
        }
    }
}

pub struct GpioLights {
    green: OutputPin,
    red: OutputPin,
}

impl GpioLights {
    pub fn new(gpio: &Gpio, green_pin: u8, red_pin: u8) -> Result<Self> {
        let green = gpio.get(green_pin)?.into_output_low();
        let red = gpio.get(red_pin)?.into_output_low();
        Ok(GpioLights { green, red })
    }

    fn pin(&mut self, channel: Channel) -> &mut OutputPin {
        match channel {
            Channel::Green => &mut self.green,
            Channel::Red => &mut self.red,
        }
    }
}

impl Indicators for GpioLights {
    fn turn_on(&mut self, channel: Channel) {
        self.pin(channel).set_high()
    }

    fn turn_off(&mut self, channel: Channel) {
        self.pin(channel).set_low()
    }

    fn status(&self, channel: Channel) -> bool {
        match channel {
            Channel::Green => self.green.is_set_high(),
            Channel::Red => self.red.is_set_high(),
        }
    }
}

impl Drop for GpioLights {
    fn drop(&mut self) {
        self.green.set_low();
        self.red.set_low();
    }
}

/// Lights `channel` for `duration` then turns it off again.
pub fn flash<L: Indicators + ?Sized>(lights: &mut L, channel: Channel, duration: Duration) {
    lights.turn_on(channel);
    thread::sleep(duration);
    lights.turn_off(channel);
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Green => f.write_str("green"),
            Channel::Red => f.write_str("red"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLights;

    #[test]
    fn flash_leaves_channel_off() {
        let mut lights = MockLights::new();
        flash(&mut lights, Channel::Red, Duration::from_millis(1));
        assert!(!lights.status(Channel::Red));
        assert_eq!(lights.count_on(Channel::Red), 1);
        assert_eq!(lights.count_on(Channel::Green), 0);
    }

    #[test]
    fn set_dispatches_on_flag() {
        let mut lights = MockLights::new();
        lights.set(Channel::Green, true);
        assert!(lights.status(Channel::Green));
        lights.set(Channel::Green, false);
        assert!(!lights.status(Channel::Green));
    }
}
