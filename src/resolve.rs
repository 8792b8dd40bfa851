//! Executable lookup: literal paths, then `PATH`, then a fixed set of standard
//! directories.

use crate::env::Environment;
use nix::unistd::{AccessFlags, access};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Search path used when `PATH` is not set.
pub const DEFAULT_PATH: &str = "/bin:/usr/bin";

/// Directories searched after `PATH`, in order. A leading `~` stands for `HOME`.
pub const STANDARD_PATHS: &[&str] = &[
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/usr/local/bin",
    "~/.local/bin",
];

/// Maps command names to executable files.
///
/// The search list is fixed at construction: `PATH` entries first, then the
/// supplemental directories. The first directory holding an executable
/// regular file with the requested name wins.
#[derive(Debug, Clone)]
pub struct PathResolver {
    search: Vec<PathBuf>,
    cwd: PathBuf,
}

impl PathResolver {
    /// Build a resolver from raw parts.
    ///
    /// `path_var` is the `PATH` value (`None` falls back to [`DEFAULT_PATH`]),
    /// `supplemental` is appended after it, `home` expands a leading `~` and
    /// `cwd` anchors relative entries and relative literal paths.
    pub fn new(
        path_var: Option<&str>,
        supplemental: &[&str],
        home: Option<&Path>,
        cwd: &Path,
    ) -> Self {
        let path_var = path_var.unwrap_or(DEFAULT_PATH);
        let mut search: Vec<PathBuf> = std::env::split_paths(OsStr::new(path_var))
            .map(|dir| cwd.join(dir))
            .collect();
        search.extend(supplemental.iter().map(|dir| cwd.join(expand_tilde(dir, home))));
        Self {
            search,
            cwd: cwd.to_owned(),
        }
    }

    /// Resolver for the session: its `PATH`, `HOME` and working directory.
    pub fn from_env(env: &Environment) -> Self {
        let path_var = env.get_var("PATH");
        let home = env.home();
        Self::new(
            path_var.as_deref(),
            STANDARD_PATHS,
            home.as_deref(),
            &env.current_dir,
        )
    }

    /// Directories in search order.
    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search
    }

    /// Resolve `name` to an executable path.
    ///
    /// A name containing a path separator is taken literally and no search is
    /// performed.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }
        if name.contains(std::path::MAIN_SEPARATOR) {
            let path = self.cwd.join(name);
            return is_executable(&path).then_some(path);
        }
        self.search
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }
}

fn expand_tilde(dir: &str, home: Option<&Path>) -> PathBuf {
    match (dir.strip_prefix('~'), home) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(dir),
    }
}

/// An existing regular file the current user may execute.
pub fn is_executable(path: &Path) -> bool {
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}
