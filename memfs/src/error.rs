use std::fmt;

use thiserror::Error;

/// The fixed capacity pool that ran dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Blocks,
    Nodes,
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pool::Blocks => write!(f, "block"),
            Pool::Nodes => write!(f, "node"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemFsError {
    #[error("found no file at path")]
    NotFound,
    #[error("path component is not a directory")]
    NotADirectory,
    #[error("operation does not apply to a directory")]
    IsADirectory,
    #[error("an entry already exists at path")]
    AlreadyExists,
    #[error("directory is not empty")]
    NotEmpty,
    #[error("{0} pool exhausted")]
    Exhausted(Pool),
    #[error("file name exceeds the maximum length")]
    NameTooLong,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An internal invariant does not hold. Always a bug, never user input.
    #[error("structural fault: {0}")]
    StructuralFault(String),
}

impl MemFsError {
    /// Builds a structural fault and reports it loudly.
    pub(crate) fn fault(message: String) -> Self {
        error!("{}", message);
        MemFsError::StructuralFault(message)
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, MemFsError::StructuralFault(_))
    }
}

pub type Result<T> = std::result::Result<T, MemFsError>;
