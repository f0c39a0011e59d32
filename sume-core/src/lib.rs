//! Secure session and message delivery core for SuMe peer-to-peer chat.
//!
//! A [`session::SessionManager`] consumes [`transport::TransportEvent`]s from
//! the network and wireless backends, runs key agreement, seals and opens
//! envelopes and reports everything user-facing as [`session::ChatEvent`]s.

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod queue;
pub mod session;
pub mod store;
pub mod transport;

pub use config::ChatConfig;
pub use envelope::Envelope;
pub use error::{ChatError, Result};
pub use session::{ChatEvent, SendOutcome, SessionManager, SessionSettings, SessionState};
pub use store::MessageStore;
pub use transport::{Link, TransportEvent, TransportKind};
