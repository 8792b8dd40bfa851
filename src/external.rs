use crate::command::{ExitCode, FAILURE};
use crate::error::{Result, ShellError};
use crate::signals::SignalBridge;
use nix::errno::Errno;
use std::collections::HashMap;
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};

/// Everything needed to start one external program.
///
/// The program image is started directly: arguments reach it exactly as given,
/// with no shell in between.
pub struct ProcessSpec {
    program: PathBuf,
    name: String,
    args: Vec<String>,
    cwd: PathBuf,
    env: HashMap<String, String>,
    stdin: Option<Stdio>,
}

impl ProcessSpec {
    /// `program` is the resolved executable; `name` becomes `argv[0]`.
    pub fn new(program: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            name: name.into(),
            args: Vec::new(),
            cwd: PathBuf::from("."),
            env: HashMap::new(),
            stdin: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = dir.as_ref().to_owned();
        self
    }

    /// Replace the child's environment with exactly these variables.
    pub fn envs(mut self, vars: &HashMap<String, String>) -> Self {
        self.env = vars.clone();
        self
    }

    /// Standard input for the child; inherited when not set. Output always
    /// goes to the shell's own terminal.
    pub fn stdin(mut self, stdio: Stdio) -> Self {
        self.stdin = Some(stdio);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The command line as typed, for job listings.
    pub fn command_line(&self) -> String {
        std::iter::once(self.name.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Start the child without waiting for it.
    pub fn spawn(self) -> Result<Child> {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.arg0(&self.name)
            .args(&self.args)
            .env_clear()
            .envs(&self.env)
            .current_dir(&self.cwd)
            .stdin(self.stdin.unwrap_or_else(Stdio::inherit));
        tracing::debug!(program = %self.program.display(), args = ?self.args, "spawning");
        cmd.spawn().map_err(|source| classify_spawn_error(self.name, source))
    }
}

/// Tells an image that could not be executed apart from a process that could
/// not be created at all.
fn classify_spawn_error(name: String, source: io::Error) -> ShellError {
    let exec_failed = matches!(
        source.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    ) || matches!(
        source.raw_os_error().map(Errno::from_raw),
        Some(Errno::ENOEXEC | Errno::ETXTBSY | Errno::EISDIR | Errno::ENOTDIR)
    );
    if exec_failed {
        ShellError::Exec { name, source }
    } else {
        ShellError::system(format!("{name}: fork"), source)
    }
}

/// Run `spec` in the foreground and wait for it to terminate.
///
/// While the child runs it is registered with the signal bridge. A child that
/// exits normally yields its exit code; one killed by a signal yields
/// [`FAILURE`].
pub fn run_foreground(spec: ProcessSpec, signals: &SignalBridge) -> Result<ExitCode> {
    let name = spec.name().to_owned();
    let mut child = spec.spawn()?;
    let status = {
        let _fg = signals.foreground(child.id());
        child
            .wait()
            .map_err(|e| ShellError::system(format!("{name}: wait"), e))?
    };
    Ok(exit_code(&name, status))
}

/// Start `spec` without waiting and return the child's pid.
///
/// The `Child` handle is dropped here; the job table reaps the process by pid.
pub fn spawn_background(spec: ProcessSpec) -> Result<u32> {
    let child = spec.spawn()?;
    Ok(child.id())
}

/// Map a wait status to the status the dispatcher reports.
pub fn exit_code(name: &str, status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(code) => code,
        None => {
            terminated_by_signal(name, status);
            FAILURE
        }
    }
}

fn terminated_by_signal(name: &str, status: ExitStatus) {
    if let Some(signal) = status.signal() {
        tracing::warn!(command = name, signal, core_dumped = status.core_dumped(), "terminated by signal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::NOT_FOUND;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn spec_for(path: &Path) -> ProcessSpec {
        ProcessSpec::new(path, path.to_string_lossy())
            .envs(&HashMap::from([("PATH".to_string(), "/bin:/usr/bin".to_string())]))
    }

    #[test]
    fn test_exit_code_is_passed_through() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "three", "exit 3");
        let code = run_foreground(spec_for(&path), &SignalBridge::detached()).unwrap();
        assert_eq!(code, 3);
    }

    #[test]
    fn test_killed_child_is_generic_failure() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "suicide", "kill -9 $$");
        let code = run_foreground(spec_for(&path), &SignalBridge::detached()).unwrap();
        assert_eq!(code, FAILURE);
    }

    #[test]
    fn test_arguments_are_passed_verbatim() {
        let dir = TempDir::new().unwrap();
        let out_file = dir.path().join("args.out");
        let body = format!("printf '%s|' \"$@\" > '{}'", out_file.display());
        let path = script(&dir, "args", &body);
        let spec = spec_for(&path).args(["*", "$HOME", "a;b"]);
        assert_eq!(run_foreground(spec, &SignalBridge::detached()).unwrap(), 0);
        assert_eq!(fs::read_to_string(&out_file).unwrap(), "*|$HOME|a;b|");
    }

    #[test]
    fn test_stdin_can_be_detached() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "reader", "if read line; then exit 1; fi");
        let spec = spec_for(&path).stdin(Stdio::null());
        assert_eq!(run_foreground(spec, &SignalBridge::detached()).unwrap(), 0);
    }

    #[test]
    fn test_child_sees_only_the_given_environment() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "env", "[ -z \"$XSH_NOT_EXPORTED\" ] && [ \"$ONLY\" = yes ]");
        let vars = HashMap::from([("ONLY".to_string(), "yes".to_string())]);
        let spec = ProcessSpec::new(&path, "env").envs(&vars);
        assert_eq!(run_foreground(spec, &SignalBridge::detached()).unwrap(), 0);
    }

    #[test]
    fn test_runs_in_the_given_directory() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "here", "[ -f ./here ]");
        let spec = spec_for(&path).current_dir(dir.path());
        assert_eq!(run_foreground(spec, &SignalBridge::detached()).unwrap(), 0);
    }

    #[test]
    fn test_unexecutable_image_is_exec_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage");
        fs::write(&path, [0u8, 1, 2, 3]).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let err = run_foreground(spec_for(&path), &SignalBridge::detached()).unwrap_err();
        assert!(matches!(err, ShellError::Exec { .. }), "{err:?}");
        assert_eq!(err.exit_code(), NOT_FOUND);
    }

    #[test]
    fn test_missing_program_is_exec_failure() {
        let err = ProcessSpec::new("/definitely/not/here", "here").spawn().unwrap_err();
        assert_eq!(err.exit_code(), NOT_FOUND);
    }

    #[test]
    fn test_command_line_uses_argv0() {
        let spec = ProcessSpec::new("/bin/sleep", "sleep").args(["5"]);
        assert_eq!(spec.command_line(), "sleep 5");
    }
}
