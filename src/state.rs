use std::fmt;

use crate::error::{BoxError, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BoxState {
    Stopped,
    Starting,
    Standby,
    Open,
    Error,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Start,
    StartSuccess,
    Stop,
    Reset,
    Error,
    Opened,
    Closed,
}

impl BoxState {
    pub const ALL: [BoxState; 5] = [
        BoxState::Stopped,
        BoxState::Starting,
        BoxState::Standby,
        BoxState::Open,
        BoxState::Error,
    ];

    /// Looks up the state reached by firing `event` from `self`.
    ///
    /// Any pair missing from the table is an `InvalidTransition`; `error` is
    /// accepted from every state and `reset` is the only way out of `Error`.
    pub fn on(self, event: Event) -> Result<BoxState> {
        use BoxState::*;
        let next = match (self, event) {
            (Stopped, Event::Start) => Starting,
            (Starting, Event::StartSuccess) => Standby,
            (Standby, Event::Stop) | (Error, Event::Stop) => Stopped,
            (Error, Event::Reset) => Stopped,
            (_, Event::Error) => Error,
            (Standby, Event::Opened) => Open,
            (Open, Event::Closed) => Standby,
            (state, event) => return Err(BoxError::InvalidTransition { state, event }),
        };
        Ok(next)
    }
}

impl Event {
    pub const ALL: [Event; 7] = [
        Event::Start,
        Event::StartSuccess,
        Event::Stop,
        Event::Reset,
        Event::Error,
        Event::Opened,
        Event::Closed,
    ];
}

impl fmt::Display for BoxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoxState::Stopped => f.write_str("Stopped"),
            BoxState::Starting => f.write_str("Starting"),
            BoxState::Standby => f.write_str("Standby"),
            BoxState::Open => f.write_str("Open"),
            BoxState::Error => f.write_str("Error"),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Start => f.write_str("start"),
            Event::StartSuccess => f.write_str("start_success"),
            Event::Stop => f.write_str("stop"),
            Event::Reset => f.write_str("reset"),
            Event::Error => f.write_str("error"),
            Event::Opened => f.write_str("opened"),
            Event::Closed => f.write_str("closed"),
        }
    }
}
