use std::fmt;
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use log::{debug, warn};

use crate::error::{BoxError, Result};

/// An (identifier, token) pair presented at the box.
#[derive(Clone, Eq, PartialEq)]
pub struct Credential {
    pub id: String,
    pub token: String,
}

impl Credential {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Credential {
            id: id.into(),
            token: token.into(),
        }
    }

    /// Parses a reader line of the form `<id> <token>`. The token is the
    /// remainder of the line and may contain spaces.
    pub fn parse(line: &str) -> Option<Credential> {
        let line = line.trim();
        let mut parts = line.splitn(2, char::is_whitespace);
        let id = parts.next().filter(|id| !id.is_empty())?;
        let token = parts.next().map(str::trim).filter(|token| !token.is_empty())?;
        Some(Credential::new(id, token))
    }
}

// Tokens never end up in logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("token", &"***")
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

pub trait CredentialReader {
    /// Returns promptly with `None` when nothing has been presented.
    fn read(&mut self) -> Option<Credential>;
}

/// Reads credentials line by line from a blocking source on its own thread.
pub struct LineReader {
    name: String,
    rx: Receiver<Credential>,
    disconnected: bool,
}

impl LineReader {
    /// `name` identifies the source in logs and in the disconnect error.
    pub fn spawn<R>(name: impl Into<String>, source: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let name = name.into();
        let thread_name = name.clone();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in source.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!("credential reader failed: {}", err);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match Credential::parse(&line) {
                    Some(credential) => {
                        debug!("credential presented by {}", credential);
                        if tx.send(credential).is_err() {
                            break;
                        }
                    }
                    None => warn!("ignoring malformed credential line"),
                }
            }
            warn!("credential source {} reached end of input", thread_name);
        });
        LineReader {
            name,
            rx,
            disconnected: false,
        }
    }

    /// Like `read` but reports a source that has gone away.
    pub fn try_read(&mut self) -> Result<Option<Credential>> {
        match self.rx.try_recv() {
            Ok(credential) => Ok(Some(credential)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                self.disconnected = true;
                Err(BoxError::ReaderDisconnected(self.name.clone()))
            }
        }
    }

    /// Fails once a read has found the source gone.
    pub fn ensure_connected(&self) -> Result<()> {
        if self.disconnected {
            Err(BoxError::ReaderDisconnected(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

impl CredentialReader for LineReader {
    fn read(&mut self) -> Option<Credential> {
        self.try_read().ok().flatten()
    }
}
