use crate::alias::DEFAULT_ALIAS_CAPACITY;
use crate::history::DEFAULT_HISTORY_SIZE;
use crate::jobs::DEFAULT_JOB_CAPACITY;
use crate::signals::ForegroundSignals;

/// Session settings, fixed at startup from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Emit ANSI colors in the prompt.
    pub color_prompt: bool,
    /// Maximum number of history entries kept and persisted.
    pub history_size: usize,
    pub alias_capacity: usize,
    pub job_capacity: usize,
    /// Treatment of signals that arrive while a foreground child runs.
    pub foreground_signals: ForegroundSignals,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            color_prompt: true,
            history_size: DEFAULT_HISTORY_SIZE,
            alias_capacity: DEFAULT_ALIAS_CAPACITY,
            job_capacity: DEFAULT_JOB_CAPACITY,
            foreground_signals: ForegroundSignals::Swallow,
        }
    }
}
