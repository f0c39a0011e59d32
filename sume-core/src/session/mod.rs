//! Session lifecycle: the pure state machine, per-peer records and the
//! manager that drives them from transport events.

mod manager;
mod record;
mod state;

pub use manager::{ChatEvent, SendOutcome, SessionManager, SessionSettings};
pub use record::{ConnectionRecord, MAX_HELD_ENVELOPES};
pub use state::{transition, SessionEvent, SessionState};
