pub mod auth;
pub mod config;
mod error;
pub mod http;
pub mod led;
pub mod lid;
pub mod logging;
pub mod manager;
pub mod mock;
pub mod reader;
mod state;

pub use error::{AuthError, BoxError, Result};
pub use manager::{AccessOutcome, BoxIdentity, BoxManager, Status, Timing};
pub use reader::{Credential, CredentialReader};
pub use state::{BoxState, Event};

#[macro_export]
macro_rules! term_on_err {
    ($expr:expr, $term:expr) => {
        match $expr {
            std::result::Result::Ok(val) => val,
            std::result::Result::Err(err) => {
                log::error!("setting term due to error: {}", err);
                $term.store(true, std::sync::atomic::Ordering::SeqCst);
                break;
            }
        }
    };
}
