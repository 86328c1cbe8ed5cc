use std::fmt;

/// An action requested by the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Call,
    OpenApp,
    Unrecognized,
}

impl Command {
    pub fn is_recognized(&self) -> bool {
        *self != Command::Unrecognized
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Call => "call",
            Command::OpenApp => "open-app",
            Command::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/**
 * Payload tags sent by the peripheral. Matched exactly: no trimming, no case folding.
 */
pub const COMMAND_TAGS: [(&str, Command); 2] = [
    ("tel", Command::Call),
    ("msg", Command::OpenApp),
];

pub fn interpret(payload: &str) -> Command {
    COMMAND_TAGS
        .iter()
        .find(|(tag, _)| *tag == payload)
        .map(|(_, command)| *command)
        .unwrap_or(Command::Unrecognized)
}

/// Decodes a raw notification value as text and interprets it.
pub fn interpret_bytes(value: &[u8]) -> Command {
    let payload = String::from_utf8_lossy(value);
    interpret(&payload)
}
