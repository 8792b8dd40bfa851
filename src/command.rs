/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells.
pub type ExitCode = i32;

/// The command (builtin or external) completed successfully.
pub const SUCCESS: ExitCode = 0;
/// Generic failure, also used for children killed by a signal.
pub const FAILURE: ExitCode = 1;
/// The command could not be found or its image could not be executed.
pub const NOT_FOUND: ExitCode = 127;

/// A single parsed input line: the argument vector and whether it should run
/// as a background job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// Argument vector; `args[0]` is the command name.
    pub args: Vec<String>,
    /// Set when the line ended with a standalone `&`.
    pub background: bool,
}

impl Command {
    pub fn name(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Arguments after the command name.
    pub fn rest(&self) -> &[String] {
        self.args.get(1..).unwrap_or_default()
    }
}
