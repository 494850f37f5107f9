use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::LevelFilter;
use serde::Deserialize;

use crate::error::{BoxError, Result};
use crate::manager::{BoxIdentity, Timing};

pub const DEFAULT_PATH: &str = "config.yaml";

const REQUIRED: [&str; 5] = ["name", "id", "password", "address", "backend_url"];

/// Upper bound for every configured interval: one week.
const MAX_SECONDS: f64 = 7.0 * 24.0 * 3600.0;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub name: String,
    pub id: String,
    password: String,
    /// Where the box is installed, shown on the status page.
    pub address: String,
    pub backend_url: String,
    #[serde(default = "default_status_addr")]
    pub status_addr: String,
    /// Only read through the accessors, which rely on `validate`.
    #[serde(default)]
    timing: TimingConfig,
    #[serde(default)]
    pub pins: PinConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// All values in seconds.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub grace: f64,
    pub close: f64,
    pub refresh_rate: f64,
    pub deny_flash: f64,
    pub start_timeout: f64,
    pub start_retry: f64,
    pub request_timeout: f64,
    pub loop_interval: f64,
}

/// BCM pin numbers.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    pub green: u8,
    pub red: u8,
    pub lid: u8,
    pub lid_active_low: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Reads from stdin when unset.
    pub device: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub syslog: bool,
    pub level: String,
}

fn default_status_addr() -> String {
    String::from("0.0.0.0:8888")
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            grace: 10.0,
            close: 10.0,
            refresh_rate: 5.0,
            deny_flash: 1.0,
            start_timeout: 60.0,
            start_retry: 5.0,
            request_timeout: 10.0,
            loop_interval: 0.2,
        }
    }
}

impl Default for PinConfig {
    fn default() -> Self {
        // header pins 11, 12 and 13
        PinConfig {
            green: 17,
            red: 18,
            lid: 27,
            lid_active_low: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            syslog: true,
            level: String::from("info"),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .map_err(|err| BoxError::config(format!("unable to read {}: {}", path.display(), err)))?;
        Config::parse(&text).map_err(|err| match err {
            BoxError::Config(message) => BoxError::Config(format!("{}: {}", path.display(), message)),
            err => err,
        })
    }

    pub fn parse(text: &str) -> Result<Config> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|err| BoxError::config(err.to_string()))?;
        let mapping = value
            .as_mapping()
            .ok_or_else(|| BoxError::config("expected a mapping at the top level"))?;
        if let Some(missing) = REQUIRED.iter().find(|key| !mapping.contains_key(**key)) {
            return Err(BoxError::config(format!("missing entry {}", missing)));
        }
        let config: Config =
            serde_yaml::from_value(value).map_err(|err| BoxError::config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let t = &self.timing;
        let durations = [
            ("grace", t.grace),
            ("close", t.close),
            ("deny_flash", t.deny_flash),
            ("start_timeout", t.start_timeout),
            ("start_retry", t.start_retry),
            ("request_timeout", t.request_timeout),
            ("loop_interval", t.loop_interval),
        ];
        for (name, secs) in durations.iter() {
            seconds(name, *secs)?;
        }
        if !t.refresh_rate.is_finite() || t.refresh_rate <= 0.0 {
            return Err(BoxError::config("timing.refresh_rate must be positive"));
        }
        seconds("refresh_rate", 1.0 / t.refresh_rate)?;
        self.log_level()?;
        Ok(())
    }

    pub fn identity(&self) -> BoxIdentity {
        BoxIdentity {
            username: self.id.clone(),
            password: self.password.clone(),
        }
    }

    pub fn timing(&self) -> Timing {
        let t = &self.timing;
        Timing {
            grace: Duration::from_secs_f64(t.grace),
            close: Duration::from_secs_f64(t.close),
            refresh: Duration::from_secs_f64(1.0 / t.refresh_rate),
            deny_flash: Duration::from_secs_f64(t.deny_flash),
        }
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timing.start_timeout)
    }

    pub fn start_retry(&self) -> Duration {
        Duration::from_secs_f64(self.timing.start_retry)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timing.request_timeout)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs_f64(self.timing.loop_interval)
    }

    pub fn log_level(&self) -> Result<LevelFilter> {
        self.log
            .level
            .parse()
            .map_err(|_| BoxError::config(format!("unknown log level {}", self.log.level)))
    }
}

fn seconds(name: &str, secs: f64) -> Result<Duration> {
    if !(0.0..=MAX_SECONDS).contains(&secs) {
        return Err(BoxError::config(format!(
            "timing.{} must be between 0 and {} seconds",
            name, MAX_SECONDS
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|err| BoxError::config(format!("timing.{}: {}", name, err)))
}
