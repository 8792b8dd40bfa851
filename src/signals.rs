//! Bridge between asynchronous signal delivery and the read loop.
//!
//! The installed handler only touches atomics, calls `kill(2)` under the
//! forwarding policy, and chains to the line editor's own SIGINT handler while
//! the shell is idle. All of these are async-signal-safe. Everything visible
//! to the user, such as the newline and the fresh prompt, is done by the read
//! loop after the editor returns.

use nix::libc::c_int;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, kill, sigaction};
use nix::unistd::Pid;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

/// Signals that interrupt the read loop instead of ending the session.
pub const HANDLED_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGQUIT];

/// What happens to a running foreground child when the shell is signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForegroundSignals {
    /// The shell records the signal and leaves the child alone. Terminal
    /// generated signals still reach the child through its process group.
    #[default]
    Swallow,
    /// The shell re-sends the signal to the foreground child.
    Forward,
}

/// Observable state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Waiting for input.
    Idle,
    /// A foreground child is running.
    Executing(u32),
}

/// Lock-free state shared with the signal handler.
#[derive(Debug)]
pub struct SignalState {
    pending: AtomicI32,
    foreground: AtomicI32,
    forward: AtomicBool,
    /// Address of the handler that wakes a blocked line read, or 0.
    wake: AtomicUsize,
}

impl SignalState {
    pub const fn new() -> Self {
        Self {
            pending: AtomicI32::new(0),
            foreground: AtomicI32::new(0),
            forward: AtomicBool::new(false),
            wake: AtomicUsize::new(0),
        }
    }

    /// Runs in signal context.
    fn record(&self, signo: c_int) {
        self.pending.store(signo, Ordering::SeqCst);
        let pid = self.foreground.load(Ordering::SeqCst);
        if pid > 0 {
            if self.forward.load(Ordering::SeqCst) {
                if let Ok(signal) = Signal::try_from(signo) {
                    let _ = kill(Pid::from_raw(pid), signal);
                }
            }
            return;
        }
        let wake = self.wake.load(Ordering::SeqCst);
        if wake != 0 {
            // SAFETY: `wake` is only ever stored from an `extern "C" fn(c_int)`.
            let wake = unsafe { std::mem::transmute::<usize, extern "C" fn(c_int)>(wake) };
            // The editor's handler only understands SIGINT.
            wake(Signal::SIGINT as c_int);
        }
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: SignalState = SignalState::new();

extern "C" fn handle_signal(signo: c_int) {
    GLOBAL.record(signo);
}

#[derive(Debug, Clone)]
enum Shared {
    /// The state the installed handlers write to.
    Process,
    /// Private state, never touched by a real handler.
    Detached(Arc<SignalState>),
}

/// Handle to the signal state used by the session.
#[derive(Debug, Clone)]
pub struct SignalBridge {
    shared: Shared,
}

impl SignalBridge {
    /// Install handlers for [`HANDLED_SIGNALS`] and return the process-wide
    /// bridge.
    ///
    /// Handlers are installed without `SA_RESTART`, so blocking waits return
    /// early with `EINTR`.
    pub fn install(policy: ForegroundSignals) -> nix::Result<Self> {
        let bridge = Self {
            shared: Shared::Process,
        };
        bridge.set_policy(policy);
        for signal in HANDLED_SIGNALS {
            // SAFETY: the handler only performs async-signal-safe operations.
            unsafe { sigaction(signal, &handler_action()) }?;
        }
        tracing::info!(?policy, "signal handlers installed");
        Ok(bridge)
    }

    /// A bridge with private state and no handlers, for non-interactive use
    /// and tests.
    pub fn detached() -> Self {
        Self {
            shared: Shared::Detached(Arc::new(SignalState::new())),
        }
    }

    fn state_ref(&self) -> &SignalState {
        match &self.shared {
            Shared::Process => &GLOBAL,
            Shared::Detached(state) => state,
        }
    }

    /// Take SIGINT back from a line editor that installed its own handler.
    ///
    /// The editor's handler is kept and called whenever a handled signal
    /// arrives while no foreground child runs, so the blocked read returns as
    /// if Ctrl-C had been pressed. No-op for detached bridges.
    pub fn attach_line_editor(&self) -> nix::Result<()> {
        if matches!(self.shared, Shared::Detached(_)) {
            return Ok(());
        }
        // SAFETY: the handler only performs async-signal-safe operations.
        let previous = unsafe { sigaction(Signal::SIGINT, &handler_action()) }?;
        if let SigHandler::Handler(wake) = previous.handler() {
            self.chain_idle_handler(wake);
        }
        Ok(())
    }

    /// Call `wake` with SIGINT for every signal delivered while idle.
    pub fn chain_idle_handler(&self, wake: extern "C" fn(c_int)) {
        if wake as usize == handle_signal as usize {
            return;
        }
        self.state_ref().wake.store(wake as usize, Ordering::SeqCst);
        tracing::debug!("idle signals chained to line editor");
    }

    pub fn set_policy(&self, policy: ForegroundSignals) {
        self.state_ref()
            .forward
            .store(policy == ForegroundSignals::Forward, Ordering::SeqCst);
    }

    pub fn policy(&self) -> ForegroundSignals {
        if self.state_ref().forward.load(Ordering::SeqCst) {
            ForegroundSignals::Forward
        } else {
            ForegroundSignals::Swallow
        }
    }

    pub fn state(&self) -> BridgeState {
        match self.state_ref().foreground.load(Ordering::SeqCst) {
            pid if pid > 0 => BridgeState::Executing(pid as u32),
            _ => BridgeState::Idle,
        }
    }

    /// Mark `pid` as the foreground child until the guard is dropped.
    pub fn foreground(&self, pid: u32) -> ForegroundGuard<'_> {
        let state = self.state_ref();
        let raw = i32::try_from(pid).unwrap_or(0);
        state.foreground.store(raw, Ordering::SeqCst);
        ForegroundGuard { state }
    }

    /// Take the most recent signal, if any arrived since the last call.
    pub fn take_pending(&self) -> Option<Signal> {
        match self.state_ref().pending.swap(0, Ordering::SeqCst) {
            0 => None,
            signo => Signal::try_from(signo).ok(),
        }
    }

    /// Deliver a signal as the installed handler would.
    pub fn deliver(&self, signal: Signal) {
        self.state_ref().record(signal as c_int);
    }
}

fn handler_action() -> SigAction {
    SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::empty(),
        SigSet::empty(),
    )
}

/// Clears the foreground registration when dropped.
#[must_use = "the child is only registered while the guard lives"]
pub struct ForegroundGuard<'a> {
    state: &'a SignalState,
}

impl Drop for ForegroundGuard<'_> {
    fn drop(&mut self) {
        self.state.foreground.store(0, Ordering::SeqCst);
    }
}
