//! xsh: a small interactive command shell.
//!
//! This crate is the execution engine behind the `xsh` binary. A line of input
//! is split into whitespace-separated words, an alias in command position is
//! replaced, and the result runs either as a builtin inside the shell process
//! or as an external program found through `PATH` and a fixed list of standard
//! directories. A trailing `&` starts an external program as a background job.
//!
//! The main entry point is [`Interpreter`], which owns a [`Session`] holding all
//! mutable state: environment, aliases, jobs, history and settings. The
//! [`repl`] module wraps it in a rustyline read loop.

pub mod alias;
mod builtin;
pub mod command;
mod completion;
pub mod config;
pub mod env;
pub mod error;
pub mod external;
pub mod history;
mod interpreter;
pub mod jobs;
pub mod lexer;
pub mod repl;
pub mod resolve;
pub mod session;
pub mod signals;

pub use builtin::{Builtin, MAX_SOURCE_DEPTH};
pub use command::{Command, ExitCode};
pub use completion::{CommandNames, ShellHelper};
pub use config::Settings;
pub use env::Environment;
pub use error::{Result, ShellError};
/// Just a convenient re-export of the command dispatcher.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::{Interpreter, dispatch_line, expand};
pub use session::Session;
