use crate::command::{ExitCode, FAILURE, SUCCESS};
use crate::error::ShellError;
use crate::interpreter;
use crate::jobs::{self, JobId, JobState};
use crate::resolve::STANDARD_PATHS;
use crate::session::Session;
use anyhow::{Context, Result, anyhow, bail};
use argh::{EarlyExit, FromArgs};
use nix::sys::signal::{Signal, kill};
use regex::Regex;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Nesting limit for `source`, so a file that sources itself terminates.
pub const MAX_SOURCE_DEPTH: usize = 32;

static VAR_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid variable name pattern"));

static ALIAS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.+-]+$").expect("valid alias name pattern"));

static REGISTRY: LazyLock<HashMap<&'static str, Builtin>> =
    LazyLock::new(|| Builtin::ALL.iter().map(|b| (b.name(), *b)).collect());

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd".
    fn name() -> &'static str;

    /// Executes the command against the session.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode>;
}

/// Tag for every builtin; the registry maps names to these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Cd,
    Pwd,
    Exit,
    Clear,
    Help,
    History,
    Alias,
    Unalias,
    Jobs,
    Fg,
    Bg,
    Kill,
    Set,
    Unset,
    Source,
}

impl Builtin {
    pub const ALL: [Builtin; 15] = [
        Builtin::Cd,
        Builtin::Pwd,
        Builtin::Exit,
        Builtin::Clear,
        Builtin::Help,
        Builtin::History,
        Builtin::Alias,
        Builtin::Unalias,
        Builtin::Jobs,
        Builtin::Fg,
        Builtin::Bg,
        Builtin::Kill,
        Builtin::Set,
        Builtin::Unset,
        Builtin::Source,
    ];

    /// Exact, case-sensitive lookup. `None` means "not a builtin".
    pub fn lookup(name: &str) -> Option<Builtin> {
        REGISTRY.get(name).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Cd => Cd::name(),
            Builtin::Pwd => Pwd::name(),
            Builtin::Exit => Exit::name(),
            Builtin::Clear => Clear::name(),
            Builtin::Help => Help::name(),
            Builtin::History => History::name(),
            Builtin::Alias => Alias::name(),
            Builtin::Unalias => Unalias::name(),
            Builtin::Jobs => Jobs::name(),
            Builtin::Fg => Fg::name(),
            Builtin::Bg => Bg::name(),
            Builtin::Kill => Kill::name(),
            Builtin::Set => Set::name(),
            Builtin::Unset => Unset::name(),
            Builtin::Source => Source::name(),
        }
    }

    /// Synopsis and one-line description for `help`.
    fn synopsis(self) -> (&'static str, &'static str) {
        match self {
            Builtin::Cd => ("cd [dir]", "Change directory"),
            Builtin::Pwd => ("pwd", "Print working directory"),
            Builtin::Exit => ("exit [status]", "Exit shell"),
            Builtin::Clear => ("clear", "Clear screen"),
            Builtin::Help => ("help", "Show this help"),
            Builtin::History => ("history [n]", "Show command history"),
            Builtin::Alias => ("alias [name=value]", "Show/set aliases"),
            Builtin::Unalias => ("unalias name", "Remove an alias"),
            Builtin::Jobs => ("jobs", "List background jobs"),
            Builtin::Fg => ("fg [id]", "Wait for a job in the foreground"),
            Builtin::Bg => ("bg [id]", "Resume a stopped job in the background"),
            Builtin::Kill => ("kill id", "Terminate a job"),
            Builtin::Set => ("set [name value]", "Show/set variables"),
            Builtin::Unset => ("unset name", "Remove a variable"),
            Builtin::Source => ("source file", "Run the commands in a file"),
        }
    }

    /// Parse `args` (without the command name) and run the builtin.
    ///
    /// Usage errors and handler failures are reported on `stderr` and yield
    /// [`FAILURE`]; they never escape to the caller.
    pub fn run(
        self,
        args: &[&str],
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        session: &mut Session,
    ) -> ExitCode {
        match self {
            Builtin::Cd => invoke::<Cd>(args, stdout, stderr, session),
            Builtin::Pwd => invoke::<Pwd>(args, stdout, stderr, session),
            Builtin::Exit => invoke::<Exit>(args, stdout, stderr, session),
            Builtin::Clear => invoke::<Clear>(args, stdout, stderr, session),
            Builtin::Help => invoke::<Help>(args, stdout, stderr, session),
            Builtin::History => invoke::<History>(args, stdout, stderr, session),
            Builtin::Alias => invoke::<Alias>(args, stdout, stderr, session),
            Builtin::Unalias => invoke::<Unalias>(args, stdout, stderr, session),
            Builtin::Jobs => invoke::<Jobs>(args, stdout, stderr, session),
            Builtin::Fg => invoke::<Fg>(args, stdout, stderr, session),
            Builtin::Bg => invoke::<Bg>(args, stdout, stderr, session),
            Builtin::Kill => invoke::<Kill>(args, stdout, stderr, session),
            Builtin::Set => invoke::<Set>(args, stdout, stderr, session),
            Builtin::Unset => invoke::<Unset>(args, stdout, stderr, session),
            Builtin::Source => invoke::<Source>(args, stdout, stderr, session),
        }
    }
}

fn invoke<T: BuiltinCommand>(
    args: &[&str],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    session: &mut Session,
) -> ExitCode {
    let cmd = match T::from_args(&[T::name()], args) {
        Ok(cmd) => cmd,
        Err(EarlyExit { output, status }) => {
            return match status {
                Ok(()) => {
                    let _ = writeln!(stdout, "{}", output.trim_end());
                    SUCCESS
                }
                Err(()) => {
                    let _ = writeln!(stderr, "{}", output.trim_end());
                    FAILURE
                }
            };
        }
    };
    match cmd.execute(stdout, stderr, session) {
        Ok(code) => code,
        Err(e) => {
            let _ = writeln!(stderr, "xsh: {e:#}");
            FAILURE
        }
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", session.env.current_dir.to_string_lossy())?;
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => session
                .env
                .home()
                .ok_or_else(|| anyhow!("cd: HOME environment variable not set"))?,
        };

        let new_dir = session.env.current_dir.join(target);

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("cd: {}", canonical.display()))?;

        let pwd = canonical.to_string_lossy().into_owned();
        let previous = std::mem::replace(&mut session.env.current_dir, canonical);
        session.env.set_var("OLDPWD", previous.to_string_lossy());
        session.env.set_var("PWD", pwd);
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Leave the shell once the current line has finished.
pub struct Exit {
    #[argh(positional)]
    /// status the shell exits with; defaults to 0.
    pub status: Option<ExitCode>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        session.running = false;
        session.exit_status = self.status.unwrap_or(SUCCESS);
        Ok(session.exit_status)
    }
}

#[derive(FromArgs)]
/// Clear the terminal screen.
pub struct Clear {}

impl BuiltinCommand for Clear {
    fn name() -> &'static str {
        "clear"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _session: &mut Session,
    ) -> Result<ExitCode> {
        write!(stdout, "\x1b[H\x1b[J")?;
        stdout.flush()?;
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// List the built-in commands and where external commands are looked up.
pub struct Help {}

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "help"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        _session: &mut Session,
    ) -> Result<ExitCode> {
        writeln!(stdout, "\nAvailable built-in commands:")?;
        for builtin in Builtin::ALL {
            let (usage, description) = builtin.synopsis();
            writeln!(stdout, "  {usage:<20} - {description}")?;
        }
        writeln!(stdout, "\nExternal commands are searched in every directory in $PATH, then:")?;
        for dir in STANDARD_PATHS {
            writeln!(stdout, "  {dir}")?;
        }
        writeln!(stdout, "\nEnd a line with `&` to run it in the background.")?;
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Show the command history.
pub struct History {
    #[argh(positional)]
    /// only show the last N entries.
    pub count: Option<usize>,
}

impl BuiltinCommand for History {
    fn name() -> &'static str {
        "history"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let total = session.history.len();
        let skip = self.count.map_or(0, |n| total.saturating_sub(n));
        for (i, line) in session.history.iter().enumerate().skip(skip) {
            writeln!(stdout, "{:5}  {}", i + 1, line)?;
        }
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Show all aliases, or define one.
/// Everything after the first `=` up to the end of the line becomes the value.
pub struct Alias {
    #[argh(positional, greedy)]
    /// alias definition in the form name=value.
    pub definition: Vec<String>,
}

impl BuiltinCommand for Alias {
    fn name() -> &'static str {
        "alias"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        if self.definition.is_empty() {
            for (name, value) in session.aliases.iter() {
                writeln!(stdout, "alias {name}='{value}'")?;
            }
            return Ok(SUCCESS);
        }

        let definition = self.definition.join(" ");
        let (name, value) = definition
            .split_once('=')
            .ok_or_else(|| anyhow!("alias: invalid format. Use: alias name=value"))?;
        if !ALIAS_NAME.is_match(name) {
            bail!("alias: `{name}': invalid alias name");
        }
        session.aliases.add(name, value)?;
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Remove an alias.
pub struct Unalias {
    #[argh(positional)]
    /// name of the alias to remove.
    pub name: String,
}

impl BuiltinCommand for Unalias {
    fn name() -> &'static str {
        "unalias"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        if !session.aliases.remove(&self.name) {
            bail!("unalias: {}: not found", self.name);
        }
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// List background jobs. Finished jobs are reported once and then forgotten.
pub struct Jobs {}

impl BuiltinCommand for Jobs {
    fn name() -> &'static str {
        "jobs"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        // Jobs that just finished get their one-time notice instead of a row.
        for done in session.jobs.poll() {
            writeln!(stdout, "{done}")?;
            session.jobs.remove(done.id);
        }
        for line in session.jobs.list() {
            writeln!(stdout, "{line}")?;
        }
        session.jobs.prune_finished();
        Ok(SUCCESS)
    }
}

/// Parse `N` or `%N`, or pick the most recent job when absent.
fn job_id(session: &Session, arg: Option<&str>, builtin: &str) -> Result<JobId> {
    let id = match arg {
        Some(raw) => raw
            .strip_prefix('%')
            .unwrap_or(raw)
            .parse::<JobId>()
            .map_err(|_| anyhow!("{builtin}: {raw}: invalid job id"))?,
        None => session
            .jobs
            .latest()
            .ok_or_else(|| anyhow!("{builtin}: no current job"))?,
    };
    if session.jobs.get(id).is_none() {
        return Err(ShellError::NoSuchJob(format!("{builtin}: %{id}")).into());
    }
    Ok(id)
}

#[derive(FromArgs)]
/// Resume a job in the foreground and wait for it to finish.
pub struct Fg {
    #[argh(positional)]
    /// job id, as `N` or `%N`; defaults to the most recent job.
    pub job: Option<String>,
}

impl BuiltinCommand for Fg {
    fn name() -> &'static str {
        "fg"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let id = job_id(session, self.job.as_deref(), "fg")?;
        let Some(job) = session.jobs.get(id).cloned() else {
            bail!("fg: %{id}: no such job");
        };
        if job.is_finished() {
            bail!("fg: job {id} has already finished");
        }

        writeln!(stdout, "{}", job.command)?;
        stdout.flush()?;
        kill(job.nix_pid(), Signal::SIGCONT).with_context(|| format!("fg: job {id}"))?;
        let code = jobs::wait_foreground(job.pid, &session.signals)?;
        session.jobs.remove(id);
        Ok(code)
    }
}

#[derive(FromArgs)]
/// Resume a stopped job in the background.
pub struct Bg {
    #[argh(positional)]
    /// job id, as `N` or `%N`; defaults to the most recent job.
    pub job: Option<String>,
}

impl BuiltinCommand for Bg {
    fn name() -> &'static str {
        "bg"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let id = job_id(session, self.job.as_deref(), "bg")?;
        let Some(job) = session.jobs.get_mut(id) else {
            bail!("bg: %{id}: no such job");
        };
        if job.is_finished() {
            bail!("bg: job {id} has already finished");
        }
        kill(job.nix_pid(), Signal::SIGCONT).with_context(|| format!("bg: job {id}"))?;
        job.state = JobState::Running;
        writeln!(stdout, "[{}] {} &", job.id, job.command)?;
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Terminate a job with SIGTERM. Its completion is reported like any other.
pub struct Kill {
    #[argh(positional)]
    /// job id, as `N` or `%N`.
    pub job: String,
}

impl BuiltinCommand for Kill {
    fn name() -> &'static str {
        "kill"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let id = job_id(session, Some(&self.job), "kill")?;
        let Some(job) = session.jobs.get(id) else {
            bail!("kill: %{id}: no such job");
        };
        if job.is_finished() {
            bail!("kill: job {id} has already finished");
        }
        kill(job.nix_pid(), Signal::SIGTERM).with_context(|| format!("kill: job {id}"))?;
        // A stopped job only acts on SIGTERM once it runs again.
        if job.state == JobState::Stopped {
            kill(job.nix_pid(), Signal::SIGCONT).with_context(|| format!("kill: job {id}"))?;
        }
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Show all variables, or set one.
/// The value is the rest of the line; `set NAME=value` works as well.
pub struct Set {
    #[argh(positional, greedy)]
    /// variable name followed by its value.
    pub words: Vec<String>,
}

impl BuiltinCommand for Set {
    fn name() -> &'static str {
        "set"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        let Some((first, rest)) = self.words.split_first() else {
            let mut vars: Vec<_> = session.env.vars.iter().collect();
            vars.sort();
            for (name, value) in vars {
                writeln!(stdout, "{name}={value}")?;
            }
            return Ok(SUCCESS);
        };

        let (name, value) = match first.split_once('=') {
            Some((name, value)) if rest.is_empty() => (name.to_owned(), value.to_owned()),
            _ => (first.clone(), rest.join(" ")),
        };
        if !VAR_NAME.is_match(&name) {
            bail!("set: `{name}': not a valid identifier");
        }
        session.env.set_var(name, value);
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Remove a variable from the environment passed to commands.
pub struct Unset {
    #[argh(positional)]
    /// name of the variable.
    pub name: String,
}

impl BuiltinCommand for Unset {
    fn name() -> &'static str {
        "unset"
    }

    fn execute(
        self,
        _stdout: &mut dyn Write,
        _stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        if !VAR_NAME.is_match(&self.name) {
            bail!("unset: `{}': not a valid identifier", self.name);
        }
        session.env.remove_var(&self.name);
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Run each line of a file as a command.
/// Blank lines and lines starting with `#` are skipped.
pub struct Source {
    #[argh(positional)]
    /// path of the file, relative to the current directory.
    pub file: String,
}

impl BuiltinCommand for Source {
    fn name() -> &'static str {
        "source"
    }

    fn execute(
        self,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        if session.source_depth >= MAX_SOURCE_DEPTH {
            bail!("source: {}: maximum nesting depth exceeded", self.file);
        }
        let path = session.env.current_dir.join(&self.file);
        let script = fs::read_to_string(&path).with_context(|| format!("source: {}", self.file))?;

        session.source_depth += 1;
        let mut status = SUCCESS;
        for line in script.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            status = interpreter::dispatch_line(session, line, stdout, stderr);
            if !session.running {
                break;
            }
        }
        session.source_depth -= 1;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::env::Environment;
    use crate::signals::SignalBridge;
    use std::env as stdenv;
    use std::path::Path;
    use std::process::Command;
    use std::sync::{Mutex, MutexGuard};
    use tempfile::TempDir;

    fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: Mutex<()> = Mutex::new(());
        MUTEX.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn session_at(dir: &Path) -> Session {
        let mut vars = HashMap::new();
        vars.insert("PATH".to_string(), "/bin:/usr/bin".to_string());
        let env = Environment {
            vars,
            current_dir: dir.to_owned(),
        };
        Session::new(env, Settings::default(), SignalBridge::detached())
    }

    fn run(session: &mut Session, line: &[&str]) -> (ExitCode, String, String) {
        let builtin = Builtin::lookup(line[0]).expect("builtin");
        let (mut out, mut err) = (Vec::new(), Vec::new());
        let code = builtin.run(&line[1..], &mut out, &mut err, session);
        (
            code,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    fn spawn_job(session: &mut Session, script: &str) -> JobId {
        let child = Command::new("sh").args(["-c", script]).spawn().unwrap();
        session.jobs.add(child.id(), script).unwrap()
    }

    #[test]
    fn test_lookup_is_exact_and_case_sensitive() {
        assert_eq!(Builtin::lookup("cd"), Some(Builtin::Cd));
        assert_eq!(Builtin::lookup("source"), Some(Builtin::Source));
        assert_eq!(Builtin::lookup("CD"), None);
        assert_eq!(Builtin::lookup("ls"), None);
        for builtin in Builtin::ALL {
            assert_eq!(Builtin::lookup(builtin.name()), Some(builtin));
        }
    }

    #[test]
    fn test_pwd_prints_tracked_dir() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        let (code, out, _) = run(&mut session, &["pwd"]);
        assert_eq!(code, SUCCESS);
        assert_eq!(out, format!("{}\n", dir.path().to_string_lossy()));
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let temp = TempDir::new().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();
        let mut session = session_at(&orig);

        let cmd = Cd {
            target: Some(canonical_temp.to_string_lossy().to_string()),
        };
        let res = cmd.execute(&mut Vec::new(), &mut Vec::new(), &mut session);
        let process_cwd = stdenv::current_dir().unwrap();
        stdenv::set_current_dir(&orig).expect("failed to restore cwd");

        assert_eq!(res.unwrap(), SUCCESS);
        assert_eq!(fs::canonicalize(process_cwd).unwrap(), canonical_temp);
        assert_eq!(session.env.current_dir, canonical_temp);
        assert_eq!(
            session.env.get_var("OLDPWD"),
            Some(orig.to_string_lossy().to_string())
        );
        assert_eq!(
            session.env.get_var("PWD"),
            Some(canonical_temp.to_string_lossy().to_string())
        );
    }

    #[test]
    fn test_cd_relative_to_tracked_dir() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let temp = TempDir::new().unwrap();
        let base = fs::canonicalize(temp.path()).unwrap();
        fs::create_dir(base.join("sub")).unwrap();
        let mut session = session_at(&base);

        let (code, _, _) = run(&mut session, &["cd", "sub"]);
        stdenv::set_current_dir(&orig).expect("failed to restore cwd");

        assert_eq!(code, SUCCESS);
        assert_eq!(session.env.current_dir, base.join("sub"));
    }

    #[test]
    fn test_cd_to_home_when_none() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let temp = TempDir::new().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();
        let mut session = session_at(&orig);
        session
            .env
            .set_var("HOME", canonical_temp.to_string_lossy().to_string());

        let res = Cd { target: None }.execute(&mut Vec::new(), &mut Vec::new(), &mut session);
        stdenv::set_current_dir(&orig).expect("failed to restore cwd");

        assert!(res.is_ok());
        assert_eq!(session.env.current_dir, canonical_temp);
    }

    #[test]
    fn test_cd_without_home_fails() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut session = session_at(&orig);

        let (code, _, err) = run(&mut session, &["cd"]);
        assert_eq!(code, FAILURE);
        assert!(err.contains("HOME"));
        assert_eq!(session.env.current_dir, orig);
    }

    #[test]
    fn test_cd_nonexistent_path_fails_and_keeps_dir() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let mut session = session_at(&orig);

        let (code, _, err) = run(&mut session, &["cd", "/definitely/does/not/exist"]);
        assert_eq!(code, FAILURE);
        assert!(err.starts_with("xsh: cd: /definitely/does/not/exist"));
        assert!(err.contains("No such file or directory"));
        assert_eq!(session.env.current_dir, orig);
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_exit_clears_running_flag() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        let (code, _, _) = run(&mut session, &["exit"]);
        assert_eq!(code, SUCCESS);
        assert!(!session.running);

        let mut session = session_at(dir.path());
        let (code, _, _) = run(&mut session, &["exit", "7"]);
        assert_eq!(code, 7);
        assert_eq!(session.exit_status, 7);
    }

    #[test]
    fn test_clear_writes_escape_sequence() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        let (_, out, _) = run(&mut session, &["clear"]);
        assert_eq!(out, "\x1b[H\x1b[J");
    }

    #[test]
    fn test_help_lists_every_builtin() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        let (code, out, _) = run(&mut session, &["help"]);
        assert_eq!(code, SUCCESS);
        for builtin in Builtin::ALL {
            assert!(out.contains(builtin.synopsis().0), "missing {}", builtin.name());
        }
        assert!(out.contains("~/.local/bin"));
    }

    #[test]
    fn test_history_numbers_entries() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        for line in ["ls", "pwd", "history"] {
            session.history.push(line);
        }
        let (_, out, _) = run(&mut session, &["history"]);
        assert_eq!(out, "    1  ls\n    2  pwd\n    3  history\n");

        let (_, out, _) = run(&mut session, &["history", "1"]);
        assert_eq!(out, "    3  history\n");
    }

    #[test]
    fn test_alias_define_and_list() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());

        let (code, _, _) = run(&mut session, &["alias", "ll=ls", "-la"]);
        assert_eq!(code, SUCCESS);
        assert_eq!(session.aliases.get("ll"), Some("ls -la"));

        run(&mut session, &["alias", "g=git"]);
        let (_, out, _) = run(&mut session, &["alias"]);
        assert_eq!(out, "alias g='git'\nalias ll='ls -la'\n");
    }

    #[test]
    fn test_alias_rejects_bad_definitions() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());

        let (code, _, err) = run(&mut session, &["alias", "ll"]);
        assert_eq!(code, FAILURE);
        assert!(err.contains("invalid format"));

        let (code, _, _) = run(&mut session, &["alias", "a/b=ls"]);
        assert_eq!(code, FAILURE);
        assert!(session.aliases.is_empty());
    }

    #[test]
    fn test_alias_capacity_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        session.aliases = crate::alias::AliasTable::new(1);
        run(&mut session, &["alias", "a=1"]);
        let (code, _, err) = run(&mut session, &["alias", "b=2"]);
        assert_eq!(code, FAILURE);
        assert!(err.contains("maximum number of aliases"));
        assert_eq!(session.aliases.len(), 1);
    }

    #[test]
    fn test_unalias() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        session.aliases.add("ll", "ls -la").unwrap();

        assert_eq!(run(&mut session, &["unalias", "ll"]).0, SUCCESS);
        assert_eq!(session.aliases.get("ll"), None);

        let (code, _, err) = run(&mut session, &["unalias", "ll"]);
        assert_eq!(code, FAILURE);
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_set_and_unset() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());

        assert_eq!(run(&mut session, &["set", "GREETING", "hello", "there"]).0, SUCCESS);
        assert_eq!(session.env.get_var("GREETING"), Some("hello there".into()));

        assert_eq!(run(&mut session, &["set", "EDITOR=vi"]).0, SUCCESS);
        assert_eq!(session.env.get_var("EDITOR"), Some("vi".into()));

        let (_, out, _) = run(&mut session, &["set"]);
        assert!(out.contains("EDITOR=vi\n"));
        assert!(out.contains("GREETING=hello there\n"));

        assert_eq!(run(&mut session, &["unset", "GREETING"]).0, SUCCESS);
        assert_eq!(session.env.get_var("GREETING"), None);

        assert_eq!(run(&mut session, &["set", "1BAD", "x"]).0, FAILURE);
        assert_eq!(run(&mut session, &["unset", "NOT-VALID"]).0, FAILURE);
    }

    #[test]
    fn test_usage_errors_and_help_output() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());

        let (code, _, err) = run(&mut session, &["unalias"]);
        assert_eq!(code, FAILURE);
        assert!(!err.is_empty());

        let (code, out, _) = run(&mut session, &["cd", "--help"]);
        assert_eq!(code, SUCCESS);
        assert!(out.contains("Usage: cd"));
    }

    #[test]
    fn test_jobs_lists_then_prunes_finished() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        let id = spawn_job(&mut session, "true");
        let running = spawn_job(&mut session, "sleep 30");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while session.jobs.poll().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let (_, out, _) = run(&mut session, &["jobs"]);
        assert!(out.contains(&format!("[{id}] Done  (success)  true")));
        assert!(out.contains(&format!("[{running}] Running")));
        assert!(session.jobs.get(id).is_none());

        run(&mut session, &["kill", &running.to_string()]);
        jobs::wait_foreground(session.jobs.get(running).unwrap().pid, &session.signals).unwrap();
    }

    #[test]
    fn test_jobs_reports_unseen_completion_once() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        let id = spawn_job(&mut session, "true");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        let mut out = String::new();
        while !out.contains("Done") && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
            out.push_str(&run(&mut session, &["jobs"]).1);
        }

        assert_eq!(out.matches("Done").count(), 1, "{out}");
        assert!(out.contains(&format!("[{id}] true Done (success)\n")));
        assert!(session.jobs.is_empty());
        assert!(run(&mut session, &["jobs"]).1.is_empty());
    }

    #[test]
    fn test_fg_waits_and_removes_job() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        let id = spawn_job(&mut session, "sleep 0.2; exit 5");

        let (code, out, _) = run(&mut session, &["fg", &format!("%{id}")]);
        assert_eq!(code, 5);
        assert_eq!(out, "sleep 0.2; exit 5\n");
        assert!(session.jobs.get(id).is_none());
    }

    #[test]
    fn test_fg_unknown_job() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        let (code, _, err) = run(&mut session, &["fg", "9"]);
        assert_eq!(code, FAILURE);
        assert!(err.contains("no such job"));

        let (code, _, err) = run(&mut session, &["fg"]);
        assert_eq!(code, FAILURE);
        assert!(err.contains("no current job"));
    }

    #[test]
    fn test_kill_terminates_job() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        let id = spawn_job(&mut session, "sleep 30");

        assert_eq!(run(&mut session, &["kill", &id.to_string()]).0, SUCCESS);
        let code = jobs::wait_foreground(session.jobs.get(id).unwrap().pid, &session.signals);
        assert_eq!(code.unwrap(), FAILURE);
    }

    #[test]
    fn test_bg_resumes_stopped_job() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        let id = spawn_job(&mut session, "sleep 30");
        let pid = session.jobs.get(id).unwrap().nix_pid();
        kill(pid, Signal::SIGSTOP).unwrap();
        session.jobs.get_mut(id).unwrap().state = JobState::Stopped;

        let (code, out, _) = run(&mut session, &["bg"]);
        assert_eq!(code, SUCCESS);
        assert_eq!(out, format!("[{id}] sleep 30 &\n"));
        assert_eq!(session.jobs.get(id).unwrap().state, JobState::Running);

        kill(pid, Signal::SIGKILL).unwrap();
        jobs::wait_foreground(pid.as_raw() as u32, &session.signals).unwrap();
    }

    #[test]
    fn test_source_runs_lines_and_returns_last_status() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("setup.xsh");
        fs::write(
            &script,
            "# comment\n\nalias ll=ls -la\nset FOO bar\nunalias nope\n",
        )
        .unwrap();
        let mut session = session_at(dir.path());

        let (code, _, err) = run(&mut session, &["source", "setup.xsh"]);
        assert_eq!(code, FAILURE);
        assert!(err.contains("unalias: nope: not found"));
        assert_eq!(session.aliases.get("ll"), Some("ls -la"));
        assert_eq!(session.env.get_var("FOO"), Some("bar".into()));
        assert!(session.history.is_empty());
    }

    #[test]
    fn test_source_stops_at_exit() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("quit.xsh"), "exit 3\nset AFTER yes\n").unwrap();
        let mut session = session_at(dir.path());

        let (code, _, _) = run(&mut session, &["source", "quit.xsh"]);
        assert_eq!(code, 3);
        assert!(!session.running);
        assert_eq!(session.env.get_var("AFTER"), None);
    }

    #[test]
    fn test_source_recursion_is_bounded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("loop.xsh"), "source loop.xsh\n").unwrap();
        let mut session = session_at(dir.path());

        let (code, _, err) = run(&mut session, &["source", "loop.xsh"]);
        assert_eq!(code, FAILURE);
        assert!(err.contains("maximum nesting depth"));
        assert_eq!(session.source_depth, 0);
    }

    #[test]
    fn test_source_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut session = session_at(dir.path());
        let (code, _, err) = run(&mut session, &["source", "missing.xsh"]);
        assert_eq!(code, FAILURE);
        assert!(err.contains("source: missing.xsh"));
    }
}
