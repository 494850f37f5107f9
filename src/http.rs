use std::borrow::Cow;
use std::error::Error;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Instant;

use json::object;
use log::{info, warn};
use tiny_http::{Method, Response};

use crate::auth::AuthClient;
use crate::led::Indicators;
use crate::lid::LidSensor;
use crate::manager::{BoxManager, Status};
use crate::state::BoxState;

const HTML: &str = include_str!("home.html");

/// What the status page says about the box besides its state.
#[derive(Clone, Debug)]
pub struct BoxInfo {
    pub name: String,
    pub address: String,
}

pub struct Server(tiny_http::Server);

impl Server {
    pub fn new<A>(addr: A) -> Result<Server, Box<dyn Error + Send + Sync + 'static>>
    where
        A: ToSocketAddrs,
    {
        tiny_http::Server::http(addr).map(Server)
    }

    pub fn handle_requests<L, S, A>(&self, manager: Arc<BoxManager<L, S, A>>, info: BoxInfo)
    where
        L: Indicators,
        S: LidSensor,
        A: AuthClient,
    {
        let json = "Content-type: application/json; charset=utf-8"
            .parse::<tiny_http::Header>()
            .ok();
        let html_content = "Content-type: text/html; charset=utf-8"
            .parse::<tiny_http::Header>()
            .ok();
        for request in self.0.incoming_requests() {
            let response = match (request.method(), request.url()) {
                (Method::Get, "/") => {
                    let html = HTML
                        .replace("$boxname$", &escape_html(&info.name))
                        .replace("$boxstate$", &escape_html(&describe(&manager.status(), Instant::now())));
                    with_header(Response::from_string(html), &html_content)
                }
                (Method::Get, "/box.json") => {
                    let body = json::stringify_pretty(status_json(&manager.status(), &info, Instant::now()), 2);
                    with_header(Response::from_string(body), &json)
                }
                (Method::Post, "/reset") => match manager.reset() {
                    Ok(()) => {
                        info!("box reset through the status endpoint");
                        Response::from_string("reset\n")
                    }
                    Err(err) => {
                        warn!("reset through the status endpoint refused: {}", err);
                        Response::from_string(format!("{}\n", err)).with_status_code(409)
                    }
                },
                _ => Response::from_string("Not found").with_status_code(404),
            };

            // Ignoring I/O errors that occur here so that we don't take down the process if there
            // is an issue sending the response.
            let _ = request.respond(response);
        }
    }

    pub fn shutdown(&self) {
        self.0.unblock();
    }
}

fn with_header<R: std::io::Read>(response: Response<R>, header: &Option<tiny_http::Header>) -> Response<R> {
    match header {
        Some(header) => response.with_header(header.clone()),
        None => response,
    }
}

fn escape_html(text: &str) -> Cow<'_, str> {
    if !text.contains(|c: char| matches!(c, '&' | '<' | '>' | '"' | '\'')) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

fn open_for(status: &Status, now: Instant) -> Option<std::time::Duration> {
    status
        .window
        .map(|window| now.saturating_duration_since(window.started_at))
}

pub fn describe(status: &Status, now: Instant) -> String {
    match status.state {
        BoxState::Open => {
            let since = open_for(status, now)
                .map(|duration| {
                    let formatter = timeago::Formatter::new();
                    Cow::from(formatter.convert(duration))
                })
                .unwrap_or_else(|| Cow::from("at an unknown time"));
            match status.window {
                Some(window) if window.is_overdue(now) => format!("🔴 Open, closing overdue, granted {}", since),
                Some(window) if window.was_opened => format!("🟡 Open, granted {}", since),
                _ => format!("🟢 Access granted {}, waiting for the lid", since),
            }
        }
        BoxState::Standby => String::from("🔒 Secured"),
        BoxState::Starting => String::from("🔵 Starting"),
        BoxState::Stopped => String::from("⚪ Stopped"),
        BoxState::Error => String::from("🔴 Error, needs reset"),
    }
}

pub fn status_json(status: &Status, info: &BoxInfo, now: Instant) -> json::JsonValue {
    object! {
        name: info.name.as_str(),
        address: info.address.as_str(),
        state: status.state.to_string(),
        green: status.green,
        red: status.red,
        open_for: open_for(status, now).map(|duration| duration.as_secs()),
        lid_opened: status.window.map(|window| window.was_opened)
    }
}
