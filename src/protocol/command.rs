//! Command definitions
//!
//! Requests sent to backends, and accepted from proxy clients.

use bytes::Bytes;

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Get = 0x01,
    Set = 0x02,
    Delete = 0x03,
    Ping = 0x04,
    GetMulti = 0x05,
}

/// A parsed command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Get a value by key
    Get { key: String },

    /// Get several values in one exchange
    GetMulti { keys: Vec<String> },

    /// Store a value; with `no_reply` the backend sends nothing back
    Set {
        key: String,
        value: Bytes,
        no_reply: bool,
    },

    /// Delete a key
    Delete { key: String },

    /// Ping (liveness check)
    Ping,
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Get { .. } => CommandType::Get,
            Command::GetMulti { .. } => CommandType::GetMulti,
            Command::Set { .. } => CommandType::Set,
            Command::Delete { .. } => CommandType::Delete,
            Command::Ping => CommandType::Ping,
        }
    }

    /// True when no response will be read for this command
    pub fn no_reply(&self) -> bool {
        matches!(self, Command::Set { no_reply: true, .. })
    }

    /// The first key carried by the command, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            Command::Get { key } | Command::Set { key, .. } | Command::Delete { key } => {
                Some(key)
            }
            Command::GetMulti { keys } => keys.first().map(String::as_str),
            Command::Ping => None,
        }
    }
}
