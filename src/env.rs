use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;

/// The session's view of the process environment.
///
/// Variables are captured once at startup; afterwards `set`/`unset` only touch
/// this map, and external commands receive exactly these variables. The
/// working directory is the one the session tracks for `cd`, `pwd` and child
/// processes.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Key-value store of environment variables (e.g., PATH, HOME).
    pub vars: HashMap<String, String>,
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
}

impl Environment {
    /// Capture the current process state.
    pub fn new() -> Self {
        // Non-UTF-8 variables are skipped rather than aborting startup.
        let vars = stdenv::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self { vars, current_dir }
    }

    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    /// Set or override a variable.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    pub fn remove_var(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    /// `HOME`, if set and non-empty.
    pub fn home(&self) -> Option<PathBuf> {
        self.vars
            .get("HOME")
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
