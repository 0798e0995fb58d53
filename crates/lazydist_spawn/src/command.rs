use std::fmt;

use lazydist_error::DbError;
use serde::{Deserialize, Serialize};

/// Top level command sent by the coordinator to every worker.
///
/// Encoded as a small integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum CommandType {
    /// Run a computation.
    Execute = 0,
    /// Send a stored result partition back to the coordinator.
    Gather = 1,
    /// Drop a stored result partition.
    DeleteResult = 2,
    /// Leave the worker loop.
    Exit = 3,
}

impl From<CommandType> for u8 {
    fn from(value: CommandType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for CommandType {
    type Error = DbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => CommandType::Execute,
            1 => CommandType::Gather,
            2 => CommandType::DeleteResult,
            3 => CommandType::Exit,
            other => {
                return Err(DbError::protocol(format!("Unknown command tag: {other}")));
            }
        })
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execute => write!(f, "EXECUTE"),
            Self::Gather => write!(f, "GATHER"),
            Self::DeleteResult => write!(f, "DELETE_RESULT"),
            Self::Exit => write!(f, "EXIT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_ordered_small_ints() {
        assert_eq!(0, u8::from(CommandType::Execute));
        assert_eq!(3, u8::from(CommandType::Exit));
        assert!(CommandType::Execute < CommandType::Gather);
        assert!(CommandType::DeleteResult < CommandType::Exit);
    }

    #[test]
    fn unknown_tag() {
        assert!(CommandType::try_from(9).is_err());
        assert_eq!(CommandType::Gather, CommandType::try_from(1).unwrap());
    }
}
