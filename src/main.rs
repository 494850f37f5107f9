use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{env, process, thread};

use log::{error, info, warn};
use rppal::gpio::Gpio;

use delivery_box::auth::HttpAuthClient;
use delivery_box::config::{self, Config};
use delivery_box::http::{self, BoxInfo};
use delivery_box::led::{self, Channel, GpioLights};
use delivery_box::lid::GpioLid;
use delivery_box::reader::LineReader;
use delivery_box::{logging, term_on_err, BoxError, BoxManager, BoxState};

const ONE_SECOND: Duration = Duration::from_secs(1);
const LAMP_TEST: Duration = Duration::from_millis(250);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() {
    if let Err(err) = run() {
        error!("{}", err);
        eprintln!("delivery-box: {}", err);
        process::exit(1);
    }
}

fn run() -> Result<(), BoxError> {
    let path = env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_PATH));
    let config = Config::load(&path)?;
    logging::init(config.log.syslog, config.log_level()?)?;
    info!("starting box {} at {}", config.name, config.address);

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;

    // Both lights blink once so a physical inspection shows the GPIO came up.
    let gpio = Gpio::new()?;
    let mut lights = GpioLights::new(&gpio, config.pins.green, config.pins.red)?;
    led::flash(&mut lights, Channel::Green, LAMP_TEST);
    led::flash(&mut lights, Channel::Red, LAMP_TEST);
    let lid = GpioLid::new(&gpio, config.pins.lid, config.pins.lid_active_low)?;
    info!("lid reads {}", lid.read());

    let auth = HttpAuthClient::new(&config.backend_url, config.request_timeout())?;
    let manager = Arc::new(BoxManager::new(
        lights,
        lid,
        auth,
        config.identity(),
        config.timing(),
    ));

    let mut reader = match &config.reader.device {
        Some(device) => LineReader::spawn(
            device.display().to_string(),
            BufReader::new(File::open(device)?),
        ),
        None => {
            // Under a service manager stdin is usually /dev/null, which closes at once.
            warn!("no reader.device configured, reading credentials from stdin");
            LineReader::spawn("stdin", BufReader::new(io::stdin()))
        }
    };

    let mut threads = Vec::new();

    // Driver loop
    {
        let term = Arc::clone(&term);
        let manager = Arc::clone(&manager);
        let start_timeout = config.start_timeout();
        let start_retry = config.start_retry();
        let loop_interval = config.loop_interval();
        let thread = thread::spawn(move || {
            let mut next_start = Instant::now();
            while !term.load(Ordering::Relaxed) {
                match manager.state() {
                    BoxState::Stopped | BoxState::Starting if Instant::now() >= next_start => {
                        if let Err(err) = manager.start(start_timeout) {
                            warn!("unable to start: {}", err);
                            next_start = Instant::now() + start_retry;
                        }
                    }
                    _ => {}
                }

                match manager.poll(&mut reader) {
                    Ok(Some(outcome)) => info!("access cycle finished: {:?}", outcome),
                    Ok(None) => {}
                    Err(err) => error!("access cycle failed: {}", err),
                }
                term_on_err!(reader.ensure_connected(), &term);
                thread::sleep(loop_interval);
            }
            info!("driver thread exiting");
        });
        threads.push(thread);
    }

    // Start HTTP server
    let server = match http::Server::new(config.status_addr.as_str()) {
        Ok(server) => Arc::new(server),
        Err(err) => {
            error!("Unable to start http server on {}: {}", config.status_addr, err);
            term.store(true, Ordering::SeqCst);
            manager.release();
            return Err(BoxError::Io(io::Error::new(io::ErrorKind::Other, err)));
        }
    };
    info!("http server running on {}", config.status_addr);

    // Handle HTTP requests
    {
        let manager = Arc::clone(&manager);
        let server = Arc::clone(&server);
        let info = BoxInfo {
            name: config.name.clone(),
            address: config.address.clone(),
        };
        let thread = thread::spawn(move || {
            server.handle_requests(manager, info);
            info!("server thread exiting");
        });
        threads.push(thread);
    }

    // Wait for signals to exit
    while !term.load(Ordering::Relaxed) {
        thread::sleep(ONE_SECOND);
    }
    server.shutdown();
    // The driver may be blocked waiting for the lid; the lights go off regardless.
    manager.release();

    let deadline = Instant::now() + SHUTDOWN_GRACE;
    for handle in threads {
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(100));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!("thread still busy at shutdown, exiting without it");
        }
    }

    Ok(())
}
