//! In-memory stand-ins for the box hardware and the backend, for tests and
//! for running the controller away from the Pi.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::auth::AuthClient;
use crate::error::AuthError;
use crate::led::{Channel, Indicators};
use crate::lid::LidSensor;
use crate::reader::{Credential, CredentialReader};

/// Lights that remember their level and how often each was switched on.
#[derive(Debug, Default)]
pub struct MockLights {
    green: bool,
    red: bool,
    green_on: usize,
    red_on: usize,
    dead: Option<Channel>,
}

impl MockLights {
    pub fn new() -> Self {
        MockLights::default()
    }

    /// A channel that ignores every command, like a blown LED driver.
    pub fn with_dead(mut self, channel: Channel) -> Self {
        self.dead = Some(channel);
        self
    }

    pub fn count_on(&self, channel: Channel) -> usize {
        match channel {
            Channel::Green => self.green_on,
            Channel::Red => self.red_on,
        }
    }

    fn drive(&mut self, channel: Channel, on: bool) {
        if self.dead == Some(channel) {
            return;
        }
        let (level, count) = match channel {
            Channel::Green => (&mut self.green, &mut self.green_on),
            Channel::Red => (&mut self.red, &mut self.red_on),
        };
        if on {
            *count += 1;
        }
        *level = on;
    }
}

impl Indicators for MockLights {
    fn turn_on(&mut self, channel: Channel) {
        self.drive(channel, true)
    }

    fn turn_off(&mut self, channel: Channel) {
        self.drive(channel, false)
    }

    fn status(&self, channel: Channel) -> bool {
        match channel {
            Channel::Green => self.green,
            Channel::Red => self.red,
        }
    }
}

/// A lid sensor that replays a script of `(closed, reads)` steps, one step
/// per call to `is_closed`. The last step repeats forever.
#[derive(Debug)]
pub struct ScriptedLid {
    steps: Vec<(bool, usize)>,
    reads: AtomicUsize,
}

impl ScriptedLid {
    pub fn script(steps: Vec<(bool, usize)>) -> Self {
        assert!(!steps.is_empty(), "lid script needs at least one step");
        ScriptedLid {
            steps,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn closed() -> Self {
        ScriptedLid::script(vec![(true, 1)])
    }

    pub fn open() -> Self {
        ScriptedLid::script(vec![(false, 1)])
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl LidSensor for ScriptedLid {
    fn is_closed(&self) -> bool {
        let mut n = self.reads.fetch_add(1, Ordering::SeqCst);
        for (closed, reads) in &self.steps {
            if n < *reads {
                return *closed;
            }
            n -= reads;
        }
        self.steps.last().map_or(true, |(closed, _)| *closed)
    }
}

#[derive(Debug)]
enum Answer {
    Yes,
    No,
    Fail,
}

#[derive(Debug)]
struct AuthState {
    login: Answer,
    login_delay: Duration,
    authorize: bool,
    report: bool,
    logins: Vec<(String, String)>,
    authorizations: Vec<(String, String)>,
    reports: Vec<(String, String)>,
}

/// A backend that records every call. Clones share the same record.
#[derive(Clone, Debug)]
pub struct MockAuth {
    state: Arc<Mutex<AuthState>>,
}

impl Default for MockAuth {
    fn default() -> Self {
        MockAuth::new()
    }
}

impl MockAuth {
    pub fn new() -> Self {
        MockAuth {
            state: Arc::new(Mutex::new(AuthState {
                login: Answer::Yes,
                login_delay: Duration::from_millis(0),
                authorize: true,
                report: true,
                logins: Vec::new(),
                authorizations: Vec::new(),
                reports: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AuthState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn rejecting_login(self) -> Self {
        self.lock().login = Answer::No;
        self
    }

    /// Login fails on the client side rather than being refused.
    pub fn failing_login(self) -> Self {
        self.lock().login = Answer::Fail;
        self
    }

    pub fn with_login_delay(self, delay: Duration) -> Self {
        self.lock().login_delay = delay;
        self
    }

    pub fn rejecting_access(self) -> Self {
        self.lock().authorize = false;
        self
    }

    pub fn rejecting_reports(self) -> Self {
        self.lock().report = false;
        self
    }

    pub fn set_login(&self, accept: bool) {
        self.lock().login = if accept { Answer::Yes } else { Answer::No };
    }

    pub fn logins(&self) -> Vec<(String, String)> {
        self.lock().logins.clone()
    }

    pub fn authorizations(&self) -> Vec<(String, String)> {
        self.lock().authorizations.clone()
    }

    pub fn reports(&self) -> Vec<(String, String)> {
        self.lock().reports.clone()
    }
}

impl AuthClient for MockAuth {
    fn login(&self, identity: &str, secret: &str) -> Result<bool, AuthError> {
        let delay = {
            let mut state = self.lock();
            state.logins.push((identity.to_string(), secret.to_string()));
            state.login_delay
        };
        thread::sleep(delay);
        match self.lock().login {
            Answer::Yes => Ok(true),
            Answer::No => Ok(false),
            Answer::Fail => Err(AuthError::Transport {
                url: "mock://login".to_string(),
                message: "mock failure".to_string(),
            }),
        }
    }

    fn authorize(&self, id: &str, token: &str) -> Result<bool, AuthError> {
        let mut state = self.lock();
        state
            .authorizations
            .push((id.to_string(), token.to_string()));
        Ok(state.authorize)
    }

    fn report_result(&self, id: &str, token: &str) -> Result<bool, AuthError> {
        let mut state = self.lock();
        state.reports.push((id.to_string(), token.to_string()));
        Ok(state.report)
    }
}

/// Credentials queued up front and handed out one per read.
#[derive(Debug, Default)]
pub struct MockReader {
    queue: VecDeque<Credential>,
}

impl MockReader {
    pub fn new() -> Self {
        MockReader::default()
    }

    pub fn present(&mut self, credential: Credential) {
        self.queue.push_back(credential);
    }
}

impl CredentialReader for MockReader {
    fn read(&mut self) -> Option<Credential> {
        self.queue.pop_front()
    }
}
