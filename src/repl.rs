//! The interactive read loop.
//!
//! Reads lines with rustyline, feeds them to the [`Interpreter`] and keeps the
//! on-disk history in sync with the session's history log.

use crate::completion::ShellHelper;
use crate::history::history_path;
use crate::interpreter::Interpreter;
use crate::session::Session;
use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::io::{self, Write};
use std::path::Path;

const CYAN: &str = "\x1b[1;36m";
const BLUE: &str = "\x1b[1;34m";
const GREEN: &str = "\x1b[1;32m";
const RESET: &str = "\x1b[0m";

/// `cwd` with a leading `home` replaced by `~`.
fn short_path(cwd: &Path, home: Option<&Path>) -> String {
    match home.and_then(|home| cwd.strip_prefix(home).ok()) {
        Some(rest) if rest.as_os_str().is_empty() => "~".to_owned(),
        Some(rest) => format!("~/{}", rest.display()),
        None => cwd.display().to_string(),
    }
}

/// `user dir ➜ `, colored unless disabled in the settings.
pub fn prompt(session: &Session) -> String {
    let user = session
        .env
        .get_var("USER")
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "user".to_owned());
    let home = session.env.home();
    let dir = short_path(&session.env.current_dir, home.as_deref());
    if session.settings.color_prompt {
        format!("{CYAN}{user}{RESET} {BLUE}{dir}{RESET} {GREEN}➜{RESET} ")
    } else {
        format!("{user} {dir} ➜ ")
    }
}

/// What the loop does after one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop,
}

/// Act on the result of one `readline` call.
///
/// A signal that arrived while the shell sat at the prompt wins over the
/// line: the line is dropped and a newline is printed. Ctrl-C needs no
/// newline since the editor already moved to a fresh line.
pub fn handle_read(
    sh: &mut Interpreter,
    read: rustyline::Result<String>,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<Step> {
    let pending = sh.session().signals.take_pending();
    match read {
        Err(ReadlineError::Interrupted) => Ok(Step::Continue),
        Err(ReadlineError::Eof) => {
            let _ = writeln!(stdout);
            Ok(Step::Stop)
        }
        Err(e) => Err(e).context("Failed to read line"),
        Ok(_) if pending.is_some() => {
            tracing::debug!(signal = ?pending, "line dropped by signal");
            let _ = writeln!(stdout);
            Ok(Step::Continue)
        }
        Ok(line) => {
            sh.execute_line(&line, stdout, stderr);
            if let Some(signal) = sh.session().signals.take_pending() {
                tracing::debug!(?signal, "signal while running a command");
            }
            Ok(if sh.is_running() {
                Step::Continue
            } else {
                Step::Stop
            })
        }
    }
}

/// Run the interactive loop until end of input or `exit`.
///
/// Ctrl-C at the prompt, or SIGINT, SIGTERM or SIGQUIT sent to the shell
/// while it waits for input, drops the partial line and prompts again.
pub fn run(sh: &mut Interpreter) -> Result<()> {
    let config = Config::builder()
        .max_history_size(sh.session().settings.history_size.max(1))
        .context("invalid history size")?
        .auto_add_history(false)
        .build();
    let mut rl: Editor<ShellHelper, DefaultHistory> =
        Editor::with_config(config).context("Failed to create editor")?;
    rl.set_helper(Some(ShellHelper::new()));
    // The editor installs its own SIGINT handler; take it back and chain to it.
    if let Err(e) = sh.session().signals.attach_line_editor() {
        tracing::warn!("Failed to reinstall SIGINT handler: {}", e);
    }

    let history_file = history_path(&sh.session().env);
    if let Some(path) = &history_file {
        if let Err(e) = sh.session_mut().history.load(path) {
            tracing::warn!("Failed to load history: {}", e);
        }
        for line in sh.session().history.iter() {
            let _ = rl.add_history_entry(line);
        }
    }

    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let mut result = Ok(());
    while sh.is_running() {
        if let Some(helper) = rl.helper_mut() {
            helper.sync(sh.session());
        }
        let read = rl.readline(&prompt(sh.session()));
        if let Ok(line) = &read {
            if !line.trim().is_empty() {
                if let Err(e) = rl.add_history_entry(line.trim()) {
                    tracing::warn!("Failed to add history entry: {}", e);
                }
            }
        }
        match handle_read(sh, read, &mut stdout, &mut stderr) {
            Ok(Step::Continue) => {}
            Ok(Step::Stop) => break,
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    if let Some(path) = &history_file {
        if let Err(e) = sh.session().history.save(path) {
            tracing::warn!("Failed to save history: {}", e);
        }
    }
    result
}
