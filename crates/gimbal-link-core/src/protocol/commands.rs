//! Gimbal commands
//!
//! Defines the logical commands the host sends to the gimbal microcontroller and
//! the immutable table that maps them to one-byte wire codes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::{LinkError, NACK_FLAG};

/// Commands understood by the gimbal firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Sweep towards yaw/pitch while searching for a target
    SearchTarget,

    /// Follow a locked target at yaw/pitch
    TrackTarget,

    /// Stop and hold the current pose
    Hold,

    /// Return to the mechanical center
    Center,
}

impl Command {
    /// All commands, in wire-code order of the default table
    pub const ALL: [Command; 4] = [
        Command::SearchTarget,
        Command::TrackTarget,
        Command::Hold,
        Command::Center,
    ];

    /// Name used in configuration files (e.g. `SEARCH_TARGET`)
    pub fn config_name(&self) -> &'static str {
        match self {
            Command::SearchTarget => "SEARCH_TARGET",
            Command::TrackTarget => "TRACK_TARGET",
            Command::Hold => "HOLD",
            Command::Center => "CENTER",
        }
    }

    /// Code used when no table overrides it
    pub fn default_code(&self) -> u8 {
        match self {
            Command::SearchTarget => 0x01,
            Command::TrackTarget => 0x02,
            Command::Hold => 0x03,
            Command::Center => 0x04,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

impl FromStr for Command {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.config_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| LinkError::InvalidCommand(s.to_string()))
    }
}

/// Immutable mapping from [`Command`] to its wire code
///
/// A command may be left out of the table, in which case encoding it fails with
/// [`LinkError::InvalidCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTable {
    codes: BTreeMap<Command, u8>,
}

impl CommandTable {
    /// Build a table from (command, code) pairs
    ///
    /// Codes must be unique and must not collide with the NACK flag bit.
    pub fn new<I>(entries: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (Command, u8)>,
    {
        let mut codes: BTreeMap<Command, u8> = BTreeMap::new();
        for (command, code) in entries {
            if code & NACK_FLAG != 0 {
                return Err(format!(
                    "code {code:#04x} for {command} has the NACK bit ({NACK_FLAG:#04x}) set"
                ));
            }
            if let Some((other, _)) = codes.iter().find(|&(_, &c)| c == code) {
                return Err(format!("code {code:#04x} is used by both {other} and {command}"));
            }
            codes.insert(command, code);
        }
        Ok(Self { codes })
    }

    /// Wire code for a command
    pub fn code(&self, command: Command) -> Result<u8, LinkError> {
        self.codes
            .get(&command)
            .copied()
            .ok_or_else(|| LinkError::InvalidCommand(command.to_string()))
    }

    /// Reverse lookup of a wire code
    pub fn command(&self, code: u8) -> Option<Command> {
        self.codes
            .iter()
            .find_map(|(&command, &c)| (c == code).then_some(command))
    }

    /// Number of commands with a code
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// True if no command has a code
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self {
            codes: Command::ALL.iter().map(|&c| (c, c.default_code())).collect(),
        }
    }
}
