use crate::builtin::Builtin;
use crate::command::{Command, ExitCode, SUCCESS};
use crate::error::{Result, ShellError};
use crate::external::{self, ProcessSpec};
use crate::lexer::parse_command;
use crate::session::Session;
use std::io::{self, Write};
use std::process::Stdio;

/// The command dispatcher of the shell.
///
/// Each input line goes through the same pipeline: tokenize, strip the
/// background marker, expand an alias in command position, then run either a
/// builtin or an external program. After every non-empty line the job table is
/// polled and completion notices are printed.
///
/// Example
/// ```
/// use xsh::Interpreter;
/// let mut sh = Interpreter::default();
/// let mut out = Vec::new();
/// let mut err = Vec::new();
/// let code = sh.execute_line("set GREETING hello", &mut out, &mut err);
/// assert_eq!(code, 0);
/// assert_eq!(sh.session().env.get_var("GREETING").as_deref(), Some("hello"));
/// ```
#[derive(Debug, Default)]
pub struct Interpreter {
    session: Session,
}

impl Interpreter {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// False once `exit` ran.
    pub fn is_running(&self) -> bool {
        self.session.running
    }

    /// Run one line typed by the user and record it in the history.
    ///
    /// Blank lines return 0 and touch nothing. Diagnostics go to `stderr`;
    /// builtin output and job notices go to `stdout`.
    pub fn execute_line(
        &mut self,
        line: &str,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> ExitCode {
        let line = line.trim();
        if line.is_empty() {
            return SUCCESS;
        }
        self.session.history.push(line);
        dispatch_line(&mut self.session, line, stdout, stderr)
    }

    /// Run a single command invocation by name with arguments.
    ///
    /// No alias expansion and no history. Output goes to the process's own
    /// standard streams.
    pub fn run(&mut self, name: &str, args: &[&str]) -> Result<ExitCode> {
        let mut stdout = io::stdout();
        if let Some(builtin) = Builtin::lookup(name) {
            let mut stderr = io::stderr();
            return Ok(builtin.run(args, &mut stdout, &mut stderr, &mut self.session));
        }
        stdout.flush().map_err(|e| ShellError::system("flush", e))?;
        let spec = process_spec(&self.session, name, args)?;
        external::run_foreground(spec, &self.session.signals)
    }
}

/// Tokenize `line` and apply alias substitution to the first word.
///
/// An alias replaces the entire line: words typed after the alias name are
/// dropped. The value is tokenized once more and not expanded again. A
/// background marker on the typed line carries over.
pub fn expand(session: &Session, line: &str) -> Result<Command> {
    let cmd = parse_command(line)?;
    let Some(value) = cmd.name().and_then(|name| session.aliases.get(name)) else {
        return Ok(cmd);
    };
    tracing::debug!(alias = cmd.name(), value, "expanding alias");
    let mut expanded = parse_command(value)?;
    expanded.background |= cmd.background;
    Ok(expanded)
}

/// Execute a line without recording it in the history, then report finished
/// background jobs.
pub fn dispatch_line(
    session: &mut Session,
    line: &str,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> ExitCode {
    let status = match expand(session, line) {
        Ok(cmd) => execute(session, &cmd, stdout, stderr),
        Err(e) => report(stderr, &e),
    };
    for done in session.jobs.poll() {
        let _ = writeln!(stdout, "{done}");
    }
    let _ = stdout.flush();
    status
}

fn execute(
    session: &mut Session,
    cmd: &Command,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> ExitCode {
    let Some(name) = cmd.name() else {
        return SUCCESS;
    };
    let args: Vec<&str> = cmd.rest().iter().map(String::as_str).collect();

    if let Some(builtin) = Builtin::lookup(name) {
        tracing::debug!(builtin = name, background = cmd.background, "running builtin");
        return builtin.run(&args, stdout, stderr, session);
    }

    // Children write straight to the terminal; keep our own output ordered.
    let _ = stdout.flush();
    let result = process_spec(session, name, &args).and_then(|spec| {
        if cmd.background {
            launch_background(session, spec, stdout)
        } else {
            external::run_foreground(spec, &session.signals)
        }
    });
    match result {
        Ok(code) => code,
        Err(e) => report(stderr, &e),
    }
}

fn process_spec(session: &Session, name: &str, args: &[&str]) -> Result<ProcessSpec> {
    let program = session
        .resolver()
        .resolve(name)
        .ok_or_else(|| ShellError::NotFound(name.to_owned()))?;
    tracing::debug!(command = name, program = %program.display(), "resolved");
    Ok(ProcessSpec::new(program, name)
        .args(args.iter().copied())
        .current_dir(&session.env.current_dir)
        .envs(&session.env.vars))
}

fn launch_background(
    session: &mut Session,
    spec: ProcessSpec,
    stdout: &mut dyn Write,
) -> Result<ExitCode> {
    // Refuse before spawning so a full table never leaves an untracked child.
    if session.jobs.is_full() {
        return Err(ShellError::CapacityExceeded {
            table: "background jobs",
            capacity: session.settings.job_capacity,
        });
    }
    let command = spec.command_line();
    // Background jobs never read from the terminal.
    let pid = external::spawn_background(spec.stdin(Stdio::null()))?;
    let id = session.jobs.add(pid, command)?;
    let _ = writeln!(stdout, "[{id}] {pid}");
    Ok(SUCCESS)
}

fn report(stderr: &mut dyn Write, err: &ShellError) -> ExitCode {
    let _ = writeln!(stderr, "xsh: {err}");
    err.exit_code()
}
