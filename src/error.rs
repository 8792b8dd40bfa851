//! Error taxonomy of the execution engine.
//!
//! None of these errors end the interactive session; each one maps to an exit
//! status via [`ShellError::exit_code`] and a one-line diagnostic.

use crate::command::{ExitCode, FAILURE, NOT_FOUND};
use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShellError>;

#[derive(Debug, Error)]
pub enum ShellError {
    /// Memory for the argument vector could not be reserved.
    #[error("out of memory while parsing command line")]
    Allocation(#[from] TryReserveError),

    /// The command name did not resolve to a builtin or an executable.
    #[error("{0}: command not found")]
    NotFound(String),

    /// A directory change, cwd query or process creation call failed.
    #[error("{call}: {source}")]
    System {
        call: String,
        #[source]
        source: io::Error,
    },

    /// The child could not replace its image with the target program.
    #[error("{name}: execution failed: {source}")]
    Exec {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The alias or job table is full; the mutation was ignored.
    #[error("maximum number of {table} reached ({capacity})")]
    CapacityExceeded {
        table: &'static str,
        capacity: usize,
    },

    #[error("{0}: no such job")]
    NoSuchJob(String),
}

impl ShellError {
    pub fn system(call: impl Into<String>, source: io::Error) -> Self {
        ShellError::System {
            call: call.into(),
            source,
        }
    }

    /// Status the dispatcher reports for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ShellError::NotFound(_) | ShellError::Exec { .. } => NOT_FOUND,
            _ => FAILURE,
        }
    }
}
