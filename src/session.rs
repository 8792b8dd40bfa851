use crate::alias::AliasTable;
use crate::command::{ExitCode, SUCCESS};
use crate::config::Settings;
use crate::env::Environment;
use crate::history::History;
use crate::jobs::JobTable;
use crate::resolve::PathResolver;
use crate::signals::SignalBridge;

/// All mutable state of one interactive session.
///
/// Every operation of the engine takes the session explicitly; nothing is
/// kept in globals apart from the signal flags.
#[derive(Debug)]
pub struct Session {
    pub env: Environment,
    pub aliases: AliasTable,
    pub jobs: JobTable,
    pub history: History,
    pub settings: Settings,
    pub signals: SignalBridge,
    /// Cleared by `exit`; the read loop stops after the current line.
    pub running: bool,
    /// Status the process exits with once the loop stops.
    pub exit_status: ExitCode,
    /// Nesting level of `source`.
    pub(crate) source_depth: usize,
}

impl Session {
    pub fn new(env: Environment, settings: Settings, signals: SignalBridge) -> Self {
        Self {
            env,
            aliases: AliasTable::new(settings.alias_capacity),
            jobs: JobTable::new(settings.job_capacity),
            history: History::new(settings.history_size),
            settings,
            signals,
            running: true,
            exit_status: SUCCESS,
            source_depth: 0,
        }
    }

    /// Resolver reflecting the current `PATH`, `HOME` and working directory.
    pub fn resolver(&self) -> PathResolver {
        PathResolver::from_env(&self.env)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(
            Environment::new(),
            Settings::default(),
            SignalBridge::detached(),
        )
    }
}
