pub mod input;
mod message;

pub use message::{Direction, StoredMessage};
