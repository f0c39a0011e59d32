//! Validated user input.

use crate::error::ChatError;
use garde::Validate;
use serde::Deserialize;

pub const MAX_MESSAGE_LENGTH: usize = 10000;
pub const MAX_PEER_ID_LENGTH: usize = 128;

/// A chat line typed by the user, trimmed before validation.
#[derive(Debug, Deserialize, Validate)]
#[garde(context(()))]
pub struct OutgoingText {
    #[garde(length(min = 1, max = MAX_MESSAGE_LENGTH))]
    pub text: String,
}

impl OutgoingText {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.trim().to_string(),
        }
    }
}

/// Target of a `/connect`.
#[derive(Debug, Deserialize, Validate)]
#[garde(context(()))]
pub struct ConnectTarget {
    #[garde(length(min = 1, max = MAX_PEER_ID_LENGTH), custom(validate_ws_url))]
    pub url: String,
}

fn validate_ws_url(value: &str, _ctx: &()) -> garde::Result {
    if value.starts_with("ws://") || value.starts_with("wss://") {
        Ok(())
    } else {
        Err(garde::Error::new("peer address must start with ws:// or wss://"))
    }
}

/// Convert garde reports into [`ChatError::InvalidInput`].
pub trait ValidateExt {
    fn validate_input(&self) -> Result<(), ChatError>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<(), ChatError> {
        self.validate()
            .map_err(|e| ChatError::InvalidInput(e.to_string()))
    }
}
