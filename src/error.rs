use std::time::Duration;

use crate::state::{BoxState, Event};

pub type Result<T> = std::result::Result<T, BoxError>;

#[derive(Debug, thiserror::Error)]
pub enum BoxError {
    #[error("invalid transition: cannot {event} while {state}")]
    InvalidTransition { state: BoxState, event: Event },

    #[error("startup failed: {0}")]
    StartupFailure(String),

    #[error("startup timed out after {}s", .0.as_secs_f32())]
    StartupTimeout(Duration),

    #[error("hardware anomaly: {0}")]
    HardwareAnomaly(String),

    #[error("backend error: {0}")]
    Auth(#[from] AuthError),

    #[error("credential source {0} closed")]
    ReaderDisconnected(String),

    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the backend client that are not a plain "no" from the server.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid backend url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("unable to read response from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

impl BoxError {
    pub fn anomaly(message: impl Into<String>) -> Self {
        BoxError::HardwareAnomaly(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        BoxError::Config(message.into())
    }
}
