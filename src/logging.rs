use log::{LevelFilter, Log};
use syslog::{BasicLogger, Facility, Formatter3164};
use tracing_subscriber::filter::LevelFilter as StderrLevel;

use crate::error::{BoxError, Result};

const PROCESS: &str = "delivery-box";

/// Routes the `log` facade to syslog, or to a stderr formatter when `syslog`
/// is false or no syslog socket is available.
pub fn init(syslog: bool, level: LevelFilter) -> Result<()> {
    if syslog {
        let formatter = Formatter3164 {
            facility: Facility::LOG_DAEMON,
            hostname: None,
            process: PROCESS.into(),
            pid: std::process::id(),
        };
        match syslog::unix(formatter) {
            Ok(logger) => return install(Box::new(BasicLogger::new(logger)), level),
            Err(err) => eprintln!("unable to connect to syslog, logging to stderr: {}", err),
        }
    }
    init_stderr(level)
}

fn install(logger: Box<dyn Log>, level: LevelFilter) -> Result<()> {
    log::set_boxed_logger(logger)
        .map(|()| log::set_max_level(level))
        .map_err(|err| BoxError::config(format!("logger already set: {}", err)))
}

// The subscriber also picks up `log` records through its log bridge.
fn init_stderr(level: LevelFilter) -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_max_level(stderr_level(level))
        .try_init()
        .map_err(|err| BoxError::config(format!("unable to set up stderr logging: {}", err)))
}

fn stderr_level(level: LevelFilter) -> StderrLevel {
    match level {
        LevelFilter::Off => StderrLevel::OFF,
        LevelFilter::Error => StderrLevel::ERROR,
        LevelFilter::Warn => StderrLevel::WARN,
        LevelFilter::Info => StderrLevel::INFO,
        LevelFilter::Debug => StderrLevel::DEBUG,
        LevelFilter::Trace => StderrLevel::TRACE,
    }
}
