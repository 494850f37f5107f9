//! The box access state machine.
//!
//! One [`BoxManager`] owns the logical state of the box together with the
//! indicator lights. Every transition happens under a single mutex that is
//! only held while the table is consulted and the state, the open window and
//! the lights are updated. Sensor polling, sleeps and backend calls all run
//! with the guard released so that an administrative `reset` or `error` from
//! another thread is never starved by an access cycle in progress.

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::auth::AuthClient;
use crate::error::{BoxError, Result};
use crate::led::{Channel, Indicators};
use crate::lid::LidSensor;
use crate::reader::{Credential, CredentialReader};
use crate::state::{BoxState, Event};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Timing {
    /// How long a granted user has to open the lid.
    pub grace: Duration,
    /// How long the lid may stay open before the overdue warning is lit.
    pub close: Duration,
    /// Interval between lid sensor polls.
    pub refresh: Duration,
    /// How long red stays lit when a credential is rejected.
    pub deny_flash: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            grace: Duration::from_secs(10),
            close: Duration::from_secs(10),
            refresh: Duration::from_millis(200),
            deny_flash: Duration::from_secs(1),
        }
    }
}

/// Login credentials of the box itself.
#[derive(Clone)]
pub struct BoxIdentity {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BoxIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxIdentity")
            .field("username", &self.username)
            .finish()
    }
}

/// Bookkeeping for a single grant, alive while the box is `Open`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OpenWindow {
    pub started_at: Instant,
    pub was_opened: bool,
    pub grace_deadline: Instant,
    /// Set once the lid has been seen open; the clock restarts at that point.
    pub close_deadline: Option<Instant>,
}

impl OpenWindow {
    fn new(started_at: Instant, grace: Duration) -> Self {
        OpenWindow {
            started_at,
            was_opened: false,
            grace_deadline: started_at + grace,
            close_deadline: None,
        }
    }

    pub fn is_overdue(&self, now: Instant) -> bool {
        self.close_deadline.map_or(false, |deadline| now >= deadline)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessOutcome {
    /// The backend rejected the credential.
    Denied,
    /// Access was granted but the lid was never opened.
    NotOpened,
    /// The lid was opened and closed again. `reported` tells whether the
    /// backend acknowledged the completed access.
    Completed { reported: bool },
}

impl AccessOutcome {
    pub fn is_completed(self) -> bool {
        matches!(self, AccessOutcome::Completed { .. })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Status {
    pub state: BoxState,
    pub green: bool,
    pub red: bool,
    pub window: Option<OpenWindow>,
}

struct Inner<L> {
    state: BoxState,
    window: Option<OpenWindow>,
    lights: L,
    /// Set on shutdown; nothing may light up afterwards.
    released: bool,
}

impl<L: Indicators> Inner<L> {
    fn fire(&mut self, event: Event) -> Result<BoxState> {
        let from = self.state;
        let to = from.on(event)?;
        self.state = to;
        info!("{} -> {} on {}", from, to, event);
        Ok(to)
    }

    /// A light that is already on was lit behind the state machine's back.
    fn light_on(&mut self, channel: Channel) -> Result<()> {
        if self.lights.status(channel) {
            return Err(BoxError::anomaly(format!("{} light is already on", channel)));
        }
        if self.released {
            debug!("lights released, leaving {} off", channel);
            return Ok(());
        }
        self.lights.turn_on(channel);
        Ok(())
    }

    fn light_off(&mut self, channel: Channel) {
        if !self.lights.status(channel) && !self.released {
            error!("Turning {} light off while it is already off", channel);
        }
        self.lights.turn_off(channel);
    }

    /// Drives `channel` to `on` without treating the current level as suspicious.
    fn ensure(&mut self, channel: Channel, on: bool) {
        if on && self.released {
            return;
        }
        if self.lights.status(channel) != on {
            self.lights.set(channel, on);
        }
    }

    /// Fires `opened` and lights green. Returns whether green reads back on.
    fn grant(&mut self, window: OpenWindow) -> Result<bool> {
        if self.lights.status(Channel::Green) {
            return Err(BoxError::anomaly("green light is already on"));
        }
        self.fire(Event::Opened)?;
        self.window = Some(window);
        self.light_on(Channel::Green)?;
        Ok(self.released || self.lights.status(Channel::Green))
    }
}

pub struct BoxManager<L, S, A> {
    inner: Mutex<Inner<L>>,
    sensor: S,
    auth: A,
    identity: BoxIdentity,
    timing: Timing,
}

impl<L, S, A> BoxManager<L, S, A>
where
    L: Indicators,
    S: LidSensor,
    A: AuthClient,
{
    pub fn new(lights: L, sensor: S, auth: A, identity: BoxIdentity, timing: Timing) -> Self {
        BoxManager {
            inner: Mutex::new(Inner {
                state: BoxState::Stopped,
                window: None,
                lights,
                released: false,
            }),
            sensor,
            auth,
            identity,
            timing,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<L>> {
        // Every update leaves Inner consistent before anything that can panic.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> BoxState {
        self.lock().state
    }

    pub fn status(&self) -> Status {
        let inner = self.lock();
        Status {
            state: inner.state,
            green: inner.lights.status(Channel::Green),
            red: inner.lights.status(Channel::Red),
            window: inner.window,
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Brings the box into `Standby` by logging in to the backend.
    ///
    /// A box that is already up is left alone. A box stuck in `Starting` after
    /// a rejected login retries the handshake. A client-side failure or a
    /// handshake slower than `timeout` moves the box to `Error`.
    pub fn start(&self, timeout: Duration) -> Result<()> {
        let began = Instant::now();
        {
            let mut inner = self.lock();
            let state = inner.state;
            match state {
                BoxState::Stopped => {
                    inner.fire(Event::Start)?;
                }
                BoxState::Starting => debug!("retrying login handshake"),
                BoxState::Standby | BoxState::Open => {
                    debug!("start requested while {}, nothing to do", state);
                    return Ok(());
                }
                BoxState::Error => {
                    return Err(BoxError::InvalidTransition {
                        state,
                        event: Event::Start,
                    })
                }
            }
        }

        let logged_in = match self
            .auth
            .login(&self.identity.username, &self.identity.password)
        {
            Ok(logged_in) => logged_in,
            Err(err) => {
                error!("Start error: {}", err);
                self.error(&err);
                return Err(err.into());
            }
        };
        if began.elapsed() > timeout {
            let err = BoxError::StartupTimeout(timeout);
            self.error(&err);
            return Err(err);
        }
        if !logged_in {
            warn!("backend rejected login for {}", self.identity.username);
            return Err(BoxError::StartupFailure(format!(
                "backend rejected login for {}",
                self.identity.username
            )));
        }

        self.lock().fire(Event::StartSuccess)?;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.fire(Event::Stop)?;
        inner.window = None;
        inner.ensure(Channel::Green, false);
        inner.ensure(Channel::Red, false);
        Ok(())
    }

    /// Clears an `Error`, leaving the box `Stopped`.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.fire(Event::Reset)?;
        inner.ensure(Channel::Red, false);
        inner.ensure(Channel::Green, false);
        Ok(())
    }

    /// Forces the box into `Error`. Green goes off and red stays lit until
    /// the box is reset.
    pub fn error(&self, reason: impl fmt::Display) {
        error!("box error: {}", reason);
        let mut inner = self.lock();
        // `error` is legal from every state.
        let _ = inner.fire(Event::Error);
        inner.window = None;
        inner.ensure(Channel::Green, false);
        inner.ensure(Channel::Red, true);
    }

    fn anomaly(&self, message: impl Into<String>) -> BoxError {
        self.escalate(BoxError::anomaly(message))
    }

    /// Anomalies move the box to `Error`; anything else is passed through.
    fn escalate(&self, err: BoxError) -> BoxError {
        if let BoxError::HardwareAnomaly(_) = err {
            self.error(&err);
        }
        err
    }

    /// Switches all lights off whatever state the box is in. They stay off
    /// even if a cycle still running on another thread tries to light them.
    pub fn release(&self) {
        let mut inner = self.lock();
        inner.released = true;
        inner.ensure(Channel::Green, false);
        inner.ensure(Channel::Red, false);
    }

    /// One iteration of the driver loop: check the lid is secured, then serve
    /// at most one presented credential.
    pub fn poll<R>(&self, reader: &mut R) -> Result<Option<AccessOutcome>>
    where
        R: CredentialReader + ?Sized,
    {
        if self.state() == BoxState::Standby && self.sensor.is_opened() {
            return Err(self.anomaly("lid is open while the box is secured"));
        }
        let credential = match reader.read() {
            Some(credential) => credential,
            None => return Ok(None),
        };
        let state = self.state();
        if state != BoxState::Standby {
            info!("ignoring credential from {} while {}", credential, state);
            return Ok(None);
        }
        self.request_open(credential).map(Some)
    }

    /// Runs a full access cycle for `credential`.
    ///
    /// The lid must be opened within the grace period or the grant lapses.
    /// Once opened, the call blocks until the lid is closed again, lighting
    /// red when closing is overdue. Only a completed open and close is
    /// reported to the backend.
    pub fn request_open(&self, credential: Credential) -> Result<AccessOutcome> {
        let state = self.state();
        if state != BoxState::Standby {
            return Err(BoxError::InvalidTransition {
                state,
                event: Event::Opened,
            });
        }
        if self.sensor.is_opened() {
            return Err(self.anomaly("lid is open before access was granted"));
        }

        let authorized = match self.auth.authorize(&credential.id, &credential.token) {
            Ok(authorized) => authorized,
            Err(err) => {
                warn!("authorization for {} failed: {}", credential, err);
                false
            }
        };
        if !authorized {
            info!("access denied for {}", credential);
            self.deny_signal()?;
            return Ok(AccessOutcome::Denied);
        }

        let window = OpenWindow::new(Instant::now(), self.timing.grace);
        let granted = self.lock().grant(window);
        if !granted.map_err(|err| self.escalate(err))? {
            return Err(self.anomaly("green light did not come on after granting access"));
        }
        info!("access granted for {}", credential);

        if !self.wait_for_open(window.grace_deadline) {
            info!("grant for {} lapsed without the lid being opened", credential);
            let mut inner = self.lock();
            inner.fire(Event::Closed)?;
            inner.window = None;
            inner.light_off(Channel::Green);
            return Ok(AccessOutcome::NotOpened);
        }

        let close_deadline = Instant::now() + self.timing.close;
        {
            let mut inner = self.lock();
            if inner.state == BoxState::Open {
                if let Some(window) = inner.window.as_mut() {
                    window.was_opened = true;
                    window.close_deadline = Some(close_deadline);
                }
                inner.light_off(Channel::Green);
            }
        }

        let overdue = self.wait_for_close(close_deadline, &credential)?;

        {
            let mut inner = self.lock();
            if let Err(err) = inner.fire(Event::Closed) {
                warn!("open window for {} was superseded: {}", credential, err);
                return Err(err);
            }
            inner.window = None;
            if overdue {
                inner.light_off(Channel::Red);
            }
        }
        info!("lid closed after access by {}", credential);

        let reported = match self.auth.report_result(&credential.id, &credential.token) {
            Ok(true) => true,
            Ok(false) => {
                warn!("backend did not accept the result for {}", credential);
                false
            }
            Err(err) => {
                error!("reporting the result for {} failed: {}", credential, err);
                false
            }
        };
        Ok(AccessOutcome::Completed { reported })
    }

    fn wait_for_open(&self, deadline: Instant) -> bool {
        loop {
            if self.sensor.is_opened() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.timing.refresh);
        }
    }

    /// Blocks until the lid is closed. Returns whether the overdue warning
    /// had to be lit.
    fn wait_for_close(&self, deadline: Instant, credential: &Credential) -> Result<bool> {
        let mut overdue = false;
        while self.sensor.is_opened() {
            if !overdue && Instant::now() >= deadline {
                overdue = true;
                warn!("lid still open after access by {}", credential);
                let lit = {
                    let mut inner = self.lock();
                    if inner.state == BoxState::Open {
                        inner.light_on(Channel::Red)
                    } else {
                        Ok(())
                    }
                };
                lit.map_err(|err| self.escalate(err))?;
            }
            thread::sleep(self.timing.refresh);
        }
        Ok(overdue)
    }

    fn deny_signal(&self) -> Result<()> {
        let lit = self.lock().light_on(Channel::Red);
        lit.map_err(|err| self.escalate(err))?;
        thread::sleep(self.timing.deny_flash);
        let mut inner = self.lock();
        // An error raised meanwhile owns the red light now.
        if inner.state != BoxState::Error {
            inner.light_off(Channel::Red);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::{MockAuth, MockLights, MockReader, ScriptedLid};

    fn fast_timing() -> Timing {
        Timing {
            grace: Duration::from_millis(300),
            close: Duration::from_millis(30),
            refresh: Duration::from_millis(2),
            deny_flash: Duration::from_millis(5),
        }
    }

    fn identity() -> BoxIdentity {
        BoxIdentity {
            username: "box-1".to_string(),
            password: "secret".to_string(),
        }
    }

    fn manager(lid: ScriptedLid, auth: MockAuth) -> BoxManager<MockLights, ScriptedLid, MockAuth> {
        BoxManager::new(MockLights::new(), lid, auth, identity(), fast_timing())
    }

    fn standby(lid: ScriptedLid, auth: MockAuth) -> BoxManager<MockLights, ScriptedLid, MockAuth> {
        started(lid, auth, fast_timing())
    }

    fn started(
        lid: ScriptedLid,
        auth: MockAuth,
        timing: Timing,
    ) -> BoxManager<MockLights, ScriptedLid, MockAuth> {
        let manager = BoxManager::new(MockLights::new(), lid, auth, identity(), timing);
        manager.start(Duration::from_secs(5)).unwrap();
        assert_eq!(manager.state(), BoxState::Standby);
        manager
    }

    /// Long grace, short close allowance.
    fn late_open_timing() -> Timing {
        Timing {
            grace: Duration::from_secs(5),
            close: Duration::from_millis(100),
            ..fast_timing()
        }
    }

    /// Leaves room to act on the box between opening and the overdue warning.
    fn slow_close_timing() -> Timing {
        Timing {
            close: Duration::from_millis(150),
            ..fast_timing()
        }
    }

    fn wait_for_lid_opened<L, S, A>(manager: &BoxManager<L, S, A>)
    where
        L: Indicators,
        S: LidSensor,
        A: AuthClient,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !manager.status().window.map_or(false, |window| window.was_opened) {
            assert!(Instant::now() < deadline, "lid never seen open");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn start_reaches_standby() {
        let auth = MockAuth::new();
        let manager = standby(ScriptedLid::closed(), auth.clone());
        assert_eq!(auth.logins(), vec![("box-1".to_string(), "secret".to_string())]);
        // a second start is a no-op
        manager.start(Duration::from_secs(5)).unwrap();
        assert_eq!(auth.logins().len(), 1);
    }

    #[test]
    fn failed_login_stays_starting_then_retries() {
        let auth = MockAuth::new().rejecting_login();
        let manager = manager(ScriptedLid::closed(), auth.clone());

        let err = manager.start(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, BoxError::StartupFailure(_)));
        assert_eq!(manager.state(), BoxState::Starting);

        auth.set_login(true);
        manager.start(Duration::from_secs(5)).unwrap();
        assert_eq!(manager.state(), BoxState::Standby);
        assert_eq!(auth.logins().len(), 2);
    }

    #[test]
    fn login_client_error_moves_to_error() {
        let auth = MockAuth::new().failing_login();
        let manager = manager(ScriptedLid::closed(), auth);

        let err = manager.start(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, BoxError::Auth(_)));
        assert_eq!(manager.state(), BoxState::Error);
        assert!(manager.status().red);

        manager.reset().unwrap();
        assert_eq!(manager.state(), BoxState::Stopped);
        assert!(!manager.status().red);
    }

    #[test]
    fn slow_login_times_out_into_error() {
        let auth = MockAuth::new().with_login_delay(Duration::from_millis(20));
        let manager = manager(ScriptedLid::closed(), auth);
        let err = manager.start(Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, BoxError::StartupTimeout(_)));
        assert_eq!(manager.state(), BoxState::Error);
    }

    #[test]
    fn start_from_error_is_invalid() {
        let manager = manager(ScriptedLid::closed(), MockAuth::new());
        manager.error("test");
        let err = manager.start(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err,
            BoxError::InvalidTransition {
                state: BoxState::Error,
                event: Event::Start
            }
        ));
    }

    #[test]
    fn reset_outside_error_is_rejected() {
        let manager = standby(ScriptedLid::closed(), MockAuth::new());
        let err = manager.reset().unwrap_err();
        assert!(matches!(
            err,
            BoxError::InvalidTransition {
                state: BoxState::Standby,
                event: Event::Reset
            }
        ));
        assert_eq!(manager.state(), BoxState::Standby);
    }

    #[test]
    fn stop_turns_everything_off() {
        let manager = standby(ScriptedLid::closed(), MockAuth::new());
        manager.stop().unwrap();
        let status = manager.status();
        assert_eq!(status.state, BoxState::Stopped);
        assert!(!status.green && !status.red);
        assert!(manager.stop().is_err());
    }

    #[test]
    fn request_open_outside_standby_is_invalid() {
        let auth = MockAuth::new();
        let manager = manager(ScriptedLid::closed(), auth.clone());
        let err = manager.request_open(Credential::new("1", "t")).unwrap_err();
        assert!(matches!(
            err,
            BoxError::InvalidTransition {
                state: BoxState::Stopped,
                event: Event::Opened
            }
        ));
        assert!(auth.authorizations().is_empty());
    }

    #[test]
    fn rejected_credential_flashes_red() {
        let auth = MockAuth::new().rejecting_access();
        let manager = standby(ScriptedLid::closed(), auth.clone());

        let outcome = manager.request_open(Credential::new("1", "t")).unwrap();
        assert_eq!(outcome, AccessOutcome::Denied);
        assert_eq!(manager.state(), BoxState::Standby);
        assert!(auth.reports().is_empty());

        let status = manager.status();
        assert!(!status.red && !status.green);
        let lights = manager.lock();
        assert_eq!(lights.lights.count_on(Channel::Red), 1);
        assert_eq!(lights.lights.count_on(Channel::Green), 0);
    }

    #[test]
    fn open_lid_before_grant_is_an_anomaly() {
        let auth = MockAuth::new();
        let manager = standby(ScriptedLid::open(), auth.clone());
        let err = manager.request_open(Credential::new("1", "t")).unwrap_err();
        assert!(matches!(err, BoxError::HardwareAnomaly(_)));
        assert_eq!(manager.state(), BoxState::Error);
        assert!(auth.authorizations().is_empty());
    }

    #[test]
    fn lapsed_grant_is_not_reported() {
        let auth = MockAuth::new();
        let manager = standby(ScriptedLid::closed(), auth.clone());

        let outcome = manager.request_open(Credential::new("1", "t")).unwrap();
        assert_eq!(outcome, AccessOutcome::NotOpened);
        let status = manager.status();
        assert_eq!(status.state, BoxState::Standby);
        assert!(!status.green);
        assert!(status.window.is_none());
        assert!(auth.reports().is_empty());
    }

    #[test]
    fn completed_cycle_is_reported_once() {
        let auth = MockAuth::new();
        // precondition read, two closed grace polls, open for three polls, closed
        let lid = ScriptedLid::script(vec![(true, 3), (false, 3), (true, 1)]);
        let manager = standby(lid, auth.clone());

        let outcome = manager.request_open(Credential::new("17", "tok")).unwrap();
        assert_eq!(outcome, AccessOutcome::Completed { reported: true });
        assert_eq!(auth.reports(), vec![("17".to_string(), "tok".to_string())]);

        let status = manager.status();
        assert_eq!(status.state, BoxState::Standby);
        assert!(!status.green && !status.red);
        assert_eq!(manager.lock().lights.count_on(Channel::Red), 0);
    }

    #[test]
    fn overdue_lid_lights_red_once() {
        let auth = MockAuth::new();
        // 100 open polls at 2ms each comfortably exceeds the 30ms close deadline
        let lid = ScriptedLid::script(vec![(true, 1), (false, 100), (true, 1)]);
        let manager = standby(lid, auth.clone());

        let outcome = manager.request_open(Credential::new("17", "tok")).unwrap();
        assert!(outcome.is_completed());
        assert_eq!(auth.reports().len(), 1);

        let inner = manager.lock();
        assert_eq!(inner.lights.count_on(Channel::Red), 1);
        assert!(!inner.lights.status(Channel::Red));
        assert_eq!(inner.lights.count_on(Channel::Green), 1);
    }

    #[test]
    fn failed_report_still_completes() {
        let auth = MockAuth::new().rejecting_reports();
        let lid = ScriptedLid::script(vec![(true, 1), (false, 2), (true, 1)]);
        let manager = standby(lid, auth);
        let outcome = manager.request_open(Credential::new("1", "t")).unwrap();
        assert_eq!(outcome, AccessOutcome::Completed { reported: false });
    }

    #[test]
    fn poll_without_credential_does_nothing() {
        let auth = MockAuth::new();
        let manager = standby(ScriptedLid::closed(), auth.clone());
        let mut reader = MockReader::new();
        assert_eq!(manager.poll(&mut reader).unwrap(), None);
        assert!(auth.authorizations().is_empty());
    }

    #[test]
    fn poll_detects_open_lid_in_standby() {
        let manager = standby(ScriptedLid::open(), MockAuth::new());
        let mut reader = MockReader::new();
        let err = manager.poll(&mut reader).unwrap_err();
        assert!(matches!(err, BoxError::HardwareAnomaly(_)));
        assert_eq!(manager.state(), BoxState::Error);
    }

    #[test]
    fn poll_ignores_credentials_while_stopped() {
        let auth = MockAuth::new();
        let manager = manager(ScriptedLid::closed(), auth.clone());
        let mut reader = MockReader::new();
        reader.present(Credential::new("1", "t"));
        assert_eq!(manager.poll(&mut reader).unwrap(), None);
        assert!(auth.authorizations().is_empty());
    }

    #[test]
    fn green_lit_before_grant_is_an_anomaly() {
        let auth = MockAuth::new();
        let manager = standby(ScriptedLid::closed(), auth.clone());
        manager.lock().lights.turn_on(Channel::Green);

        let err = manager.request_open(Credential::new("1", "t")).unwrap_err();
        assert!(matches!(err, BoxError::HardwareAnomaly(_)));
        let status = manager.status();
        assert_eq!(status.state, BoxState::Error);
        assert!(status.window.is_none());
        assert!(!status.green && status.red);
        assert!(auth.reports().is_empty());
    }

    #[test]
    fn red_lit_before_deny_flash_is_an_anomaly() {
        let manager = standby(ScriptedLid::closed(), MockAuth::new().rejecting_access());
        manager.lock().lights.turn_on(Channel::Red);

        let err = manager.request_open(Credential::new("1", "t")).unwrap_err();
        assert!(matches!(err, BoxError::HardwareAnomaly(_)));
        assert_eq!(manager.state(), BoxState::Error);
    }

    #[test]
    fn red_lit_before_overdue_warning_is_an_anomaly() {
        let auth = MockAuth::new();
        let lid = ScriptedLid::script(vec![(true, 1), (false, 1_000), (true, 1)]);
        let manager = Arc::new(started(lid, auth.clone(), slow_close_timing()));

        let cycle = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.request_open(Credential::new("1", "t")))
        };
        wait_for_lid_opened(&manager);
        manager.lock().lights.turn_on(Channel::Red);

        let err = cycle.join().unwrap().unwrap_err();
        assert!(matches!(err, BoxError::HardwareAnomaly(_)));
        assert_eq!(manager.state(), BoxState::Error);
        assert!(auth.reports().is_empty());
    }

    #[test]
    fn close_clock_starts_when_the_lid_opens() {
        let auth = MockAuth::new();
        // opened after at least 200ms, well past the 100ms close allowance
        // counted from the grant, then closed again within it
        let lid = ScriptedLid::script(vec![(true, 101), (false, 10), (true, 1)]);
        let manager = started(lid, auth.clone(), late_open_timing());

        let outcome = manager.request_open(Credential::new("1", "t")).unwrap();
        assert_eq!(outcome, AccessOutcome::Completed { reported: true });
        assert_eq!(manager.lock().lights.count_on(Channel::Red), 0);
        assert_eq!(auth.reports().len(), 1);
    }

    #[test]
    fn late_opening_still_gets_an_overdue_warning() {
        let auth = MockAuth::new();
        // at least 300ms open after a late opening
        let lid = ScriptedLid::script(vec![(true, 101), (false, 150), (true, 1)]);
        let manager = started(lid, auth.clone(), late_open_timing());

        let outcome = manager.request_open(Credential::new("1", "t")).unwrap();
        assert_eq!(outcome, AccessOutcome::Completed { reported: true });
        let inner = manager.lock();
        assert_eq!(inner.lights.count_on(Channel::Red), 1);
        assert!(!inner.lights.status(Channel::Red));
    }

    #[test]
    fn dead_green_light_is_an_anomaly() {
        let manager = BoxManager::new(
            MockLights::new().with_dead(Channel::Green),
            ScriptedLid::closed(),
            MockAuth::new(),
            identity(),
            fast_timing(),
        );
        manager.start(Duration::from_secs(1)).unwrap();
        let err = manager.request_open(Credential::new("1", "t")).unwrap_err();
        assert!(matches!(err, BoxError::HardwareAnomaly(_)));
        assert_eq!(manager.state(), BoxState::Error);
    }

    #[test]
    fn release_switches_lights_off() {
        let manager = manager(ScriptedLid::closed(), MockAuth::new());
        manager.error("boom");
        assert!(manager.status().red);
        manager.release();
        let status = manager.status();
        assert!(!status.red && !status.green);
        assert_eq!(status.state, BoxState::Error);
    }

    #[test]
    fn released_lights_stay_off_mid_cycle() {
        let auth = MockAuth::new();
        let lid = ScriptedLid::script(vec![(true, 1), (false, 150), (true, 1)]);
        let manager = Arc::new(started(lid, auth, slow_close_timing()));

        let cycle = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.request_open(Credential::new("1", "t")))
        };
        wait_for_lid_opened(&manager);
        manager.release();

        // the lid stays open well past the close deadline
        let outcome = cycle.join().unwrap().unwrap();
        assert!(outcome.is_completed());
        let inner = manager.lock();
        assert_eq!(inner.lights.count_on(Channel::Red), 0);
        assert!(!inner.lights.status(Channel::Red));
        assert!(!inner.lights.status(Channel::Green));
    }

    #[test]
    fn released_lights_ignore_a_later_error() {
        let manager = standby(ScriptedLid::closed(), MockAuth::new());
        manager.release();
        manager.error("late failure");
        let status = manager.status();
        assert_eq!(status.state, BoxState::Error);
        assert!(!status.red);
    }

    #[test]
    fn window_records_grace_deadline() {
        let now = Instant::now();
        let window = OpenWindow::new(now, Duration::from_secs(10));
        assert_eq!(window.grace_deadline, now + Duration::from_secs(10));
        assert!(!window.was_opened);
        assert!(!window.is_overdue(now + Duration::from_secs(60)));
    }
}
