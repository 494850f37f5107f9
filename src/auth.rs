use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use json::object;
use log::{error, info, warn};
use ureq::{Agent, AgentBuilder, ErrorKind, Request, Response};
use url::Url;

use crate::error::AuthError;

/// The remote authority the box answers to.
///
/// `Ok(false)` covers rejections, non-200 responses and an unreachable
/// backend alike. `Err` is kept for failures on our side of the wire.
pub trait AuthClient {
    fn login(&self, identity: &str, secret: &str) -> Result<bool, AuthError>;
    fn authorize(&self, id: &str, token: &str) -> Result<bool, AuthError>;
    fn report_result(&self, id: &str, token: &str) -> Result<bool, AuthError>;
}

type Cookies = BTreeMap<String, String>;

#[derive(Default)]
struct Session {
    csrf: Cookies,
    delivery_csrf: Cookies,
    jwt: Option<Cookies>,
}

pub struct HttpAuthClient {
    agent: Agent,
    base_url: Url,
    session: Mutex<Session>,
}

impl HttpAuthClient {
    /// Builds the client and collects the CSRF cookies needed by later calls.
    /// An unreachable backend is logged; the cookies are fetched again on
    /// the next login.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let agent = AgentBuilder::new().timeout(timeout).build();
        let parsed = Url::parse(base_url).map_err(|err| AuthError::InvalidUrl {
            url: base_url.to_string(),
            reason: err.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(AuthError::InvalidUrl {
                url: base_url.to_string(),
                reason: "cannot carry a path".to_string(),
            });
        }
        let client = HttpAuthClient {
            agent,
            base_url: parsed,
            session: Mutex::new(Session::default()),
        };
        client.refresh_csrf()?;
        Ok(client)
    }

    fn url(&self, segments: &[&str]) -> Result<String, AuthError> {
        endpoint(&self.base_url, segments)
    }

    fn refresh_csrf(&self) -> Result<(), AuthError> {
        let csrf = self.fetch_cookies(&["auth", "csrf"])?;
        let delivery_csrf = self.fetch_cookies(&["delivery", "csrf"])?;
        let mut session = self.lock_session();
        if let Some(csrf) = csrf {
            session.csrf = csrf;
        }
        if let Some(delivery_csrf) = delivery_csrf {
            session.delivery_csrf = delivery_csrf;
        }
        Ok(())
    }

    fn fetch_cookies(&self, segments: &[&str]) -> Result<Option<Cookies>, AuthError> {
        let url = self.url(segments)?;
        let response = send(&url, self.agent.get(&url), None)?;
        Ok(response.map(|response| cookies_from(&response)))
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Session> {
        // A poisoned session only means a panic mid-update; the cookies are still usable.
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AuthClient for HttpAuthClient {
    fn login(&self, identity: &str, secret: &str) -> Result<bool, AuthError> {
        if self.lock_session().csrf.is_empty() {
            self.refresh_csrf()?;
        }
        let url = self.url(&["auth", "jwe", "box"])?;
        let body = object! { username: identity, password: secret }.dump();
        let request = {
            let session = self.lock_session();
            with_csrf(
                self.agent
                    .post(&url)
                    .set("Content-Type", "application/json"),
                &session.csrf,
                &session.csrf,
            )
        };
        let response = match send(&url, request, Some(&body))? {
            Some(response) => response,
            None => return Ok(false),
        };
        let status = response.status();
        let jwt = cookies_from(&response);
        let text = read_body(&url, response)?;
        info!("Login status code: {}, text {}.", status, text);
        if status != 200 {
            return Ok(false);
        }
        self.lock_session().jwt = Some(jwt);
        Ok(true)
    }

    fn authorize(&self, id: &str, token: &str) -> Result<bool, AuthError> {
        let url = self.url(&["order", "list", id])?;
        let request = {
            let session = self.lock_session();
            let jwt = session.jwt.clone().unwrap_or_default();
            with_cookies(self.agent.get(&url), &jwt).query("token", token)
        };
        let response = match send(&url, request, None)? {
            Some(response) => response,
            None => return Ok(false),
        };
        let status = response.status();
        let text = read_body(&url, response)?;
        info!("Auth status code: {}.", status);
        if status != 200 {
            return Ok(false);
        }
        Ok(has_pending_orders(&text))
    }

    fn report_result(&self, id: &str, token: &str) -> Result<bool, AuthError> {
        let url = self.url(&["order", "change-status", id, token])?;
        let request = {
            let session = self.lock_session();
            let mut cookies = match &session.jwt {
                Some(jwt) => jwt.clone(),
                None => {
                    error!("No session cookie cached, unable to access backend");
                    return Ok(false);
                }
            };
            cookies.extend(session.delivery_csrf.clone());
            with_csrf(self.agent.put(&url), &cookies, &session.delivery_csrf)
        };
        let response = match send(&url, request, None)? {
            Some(response) => response,
            None => return Ok(false),
        };
        let status = response.status();
        let text = read_body(&url, response)?;
        info!("Box update status code: {}, text {}.", status, text);
        Ok(status == 200)
    }
}

/// Appends `segments` to the backend url, percent-encoding each one so an
/// opaque id or token can never change the endpoint.
fn endpoint(base: &Url, segments: &[&str]) -> Result<String, AuthError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| AuthError::InvalidUrl {
            url: base.to_string(),
            reason: "cannot carry a path".to_string(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

/// Sends the request and sorts failures: `Ok(None)` when the backend could
/// not be reached, the response (of any status) otherwise.
fn send(url: &str, request: Request, body: Option<&str>) -> Result<Option<Response>, AuthError> {
    let result = match body {
        Some(body) => request.send_string(body),
        None => request.call(),
    };
    match result {
        Ok(response) => Ok(Some(response)),
        Err(ureq::Error::Status(_, response)) => Ok(Some(response)),
        Err(ureq::Error::Transport(transport)) => match transport.kind() {
            ErrorKind::Dns | ErrorKind::ConnectionFailed | ErrorKind::Io => {
                warn!("backend unreachable at {}: {}", url, transport);
                Ok(None)
            }
            _ => Err(AuthError::Transport {
                url: url.to_string(),
                message: transport.to_string(),
            }),
        },
    }
}

fn read_body(url: &str, response: Response) -> Result<String, AuthError> {
    response.into_string().map_err(|source| AuthError::Body {
        url: url.to_string(),
        source,
    })
}

fn cookies_from(response: &Response) -> Cookies {
    response
        .all("set-cookie")
        .into_iter()
        .filter_map(parse_set_cookie)
        .collect()
}

fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let mut parts = pair.splitn(2, '=');
    let name = parts.next()?.trim();
    let value = parts.next()?.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

fn cookie_header(cookies: &Cookies) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn with_cookies(request: Request, cookies: &Cookies) -> Request {
    if cookies.is_empty() {
        request
    } else {
        request.set("Cookie", &cookie_header(cookies))
    }
}

/// The backend expects each CSRF cookie echoed back as a header of the same name.
fn with_csrf(request: Request, cookies: &Cookies, csrf: &Cookies) -> Request {
    csrf.iter().fold(with_cookies(request, cookies), |request, (name, value)| {
        request.set(name, value)
    })
}

/// The order list endpoint answers with a JSON array of pending orders.
fn has_pending_orders(body: &str) -> bool {
    match json::parse(body) {
        Ok(value) => value.is_array() && !value.is_empty(),
        Err(err) => {
            warn!("unable to parse order list: {}", err);
            false
        }
    }
}
