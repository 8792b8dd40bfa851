//! xsh entry point.
//!
//! Usage:
//!   xsh                 # Interactive shell
//!   xsh -c <command>    # Run one line and exit
//!   xsh script.xsh      # Run each line of a file

use anyhow::{Context, Result};
use argh::FromArgs;
use std::io;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use xsh::history::DEFAULT_HISTORY_SIZE;
use xsh::signals::{ForegroundSignals, SignalBridge};
use xsh::{Environment, Interpreter, Session, Settings, repl};

#[derive(FromArgs)]
/// A small interactive command shell.
struct Cli {
    /// run a single command line and exit
    #[argh(option, short = 'c')]
    command: Option<String>,

    /// print the prompt without ANSI colors
    #[argh(switch)]
    no_color: bool,

    /// number of history entries to keep
    #[argh(option, default = "DEFAULT_HISTORY_SIZE")]
    history_size: usize,

    /// re-send SIGINT, SIGTERM and SIGQUIT to the running foreground command
    #[argh(switch)]
    forward_signals: bool,

    /// script to run instead of reading commands interactively
    #[argh(positional)]
    script: Option<String>,
}

fn main() -> ExitCode {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli: Cli = argh::from_env();
    match run(cli) {
        Ok(code) => ExitCode::from((code & 0xff) as u8),
        Err(e) => {
            eprintln!("xsh: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let settings = Settings {
        color_prompt: !cli.no_color,
        history_size: cli.history_size,
        foreground_signals: if cli.forward_signals {
            ForegroundSignals::Forward
        } else {
            ForegroundSignals::Swallow
        },
        ..Settings::default()
    };

    let interactive = cli.command.is_none() && cli.script.is_none();
    let signals = if interactive {
        SignalBridge::install(settings.foreground_signals)
            .context("Failed to install signal handlers")?
    } else {
        let bridge = SignalBridge::detached();
        bridge.set_policy(settings.foreground_signals);
        bridge
    };
    let mut sh = Interpreter::new(Session::new(Environment::new(), settings, signals));

    let status = if let Some(command) = cli.command {
        sh.execute_line(&command, &mut io::stdout(), &mut io::stderr())
    } else if let Some(script) = cli.script {
        sh.run("source", &[script.as_str()])?
    } else {
        repl::run(&mut sh)?;
        return Ok(sh.session().exit_status);
    };

    let session = sh.session();
    Ok(if session.running {
        status
    } else {
        session.exit_status
    })
}
