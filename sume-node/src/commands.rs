//! Parsing of lines typed at the prompt.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(String),
    Close,
    Retry,
    /// The wireless medium came up (`true`) or went away.
    Wireless(bool),
    Status,
    History,
    Clear,
    Quit,
    Help,
    /// Anything that is not a command is chat text.
    Say(String),
    Unknown(String),
}

pub const HELP: &str = "\
/connect <ws-url>  dial a peer
/close             end the session (queued messages are kept)
/retry             retry after a failed connection or key exchange
/wireless on|off   report the wireless link as available or lost
/status            show session state
/history           print stored messages
/clear             delete stored messages
/quit              exit";

/// `None` for blank lines, which are ignored.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(Command::Say(line.to_string()));
    }

    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    let command = match name {
        "/connect" if !rest.is_empty() => Command::Connect(rest.to_string()),
        "/connect" => Command::Unknown("usage: /connect <ws-url>".to_string()),
        "/close" => Command::Close,
        "/retry" => Command::Retry,
        "/wireless" => match rest {
            "on" => Command::Wireless(true),
            "off" => Command::Wireless(false),
            _ => Command::Unknown("usage: /wireless on|off".to_string()),
        },
        "/status" => Command::Status,
        "/history" => Command::History,
        "/clear" => Command::Clear,
        "/quit" | "/exit" => Command::Quit,
        "/help" => Command::Help,
        other => Command::Unknown(format!("unknown command {}", other)),
    };
    Some(command)
}
