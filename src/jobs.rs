//! Bookkeeping for processes launched in the background.
//!
//! Jobs are only observed through [`JobTable::poll`], which the dispatcher
//! calls once per input line. Job ids are assigned at launch and never change,
//! so removing a job does not renumber the others.

use crate::command::{ExitCode, FAILURE, SUCCESS};
use crate::error::{Result, ShellError};
use crate::signals::SignalBridge;
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_JOB_CAPACITY: usize = 512;

pub type JobId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done(ExitCode),
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub pid: u32,
    pub command: String,
    pub state: JobState,
}

impl Job {
    pub fn is_finished(&self) -> bool {
        matches!(self.state, JobState::Done(_))
    }

    pub fn nix_pid(&self) -> Pid {
        Pid::from_raw(self.pid as i32)
    }
}

/// One-time notice that a background job finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: JobId,
    pub command: String,
    pub code: ExitCode,
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.code == SUCCESS { "success" } else { "failed" };
        write!(f, "[{}] {} Done ({})", self.id, self.command, outcome)
    }
}

#[derive(Debug)]
pub struct JobTable {
    jobs: BTreeMap<JobId, Job>,
    capacity: usize,
}

impl JobTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: BTreeMap::new(),
            capacity,
        }
    }

    /// Track a freshly spawned background process.
    pub fn add(&mut self, pid: u32, command: impl Into<String>) -> Result<JobId> {
        if self.is_full() {
            return Err(ShellError::CapacityExceeded {
                table: "background jobs",
                capacity: self.capacity,
            });
        }
        let id = self.jobs.last_key_value().map_or(1, |(id, _)| id + 1);
        let job = Job {
            id,
            pid,
            command: command.into(),
            state: JobState::Running,
        };
        tracing::debug!(id, pid, command = %job.command, "job started");
        self.jobs.insert(id, job);
        Ok(id)
    }

    /// Non-blocking status check of every unfinished job.
    ///
    /// Returns a notice for each job that finished since the previous poll.
    /// Finished jobs stay in the table until removed or pruned but are never
    /// reported again. Stops and resumptions only update the state.
    #[must_use = "each completion is reported only once"]
    pub fn poll(&mut self) -> Vec<Completion> {
        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
        let mut done = Vec::new();
        for job in self.jobs.values_mut().filter(|job| !job.is_finished()) {
            let code = match waitpid(job.nix_pid(), Some(flags)) {
                Ok(WaitStatus::Exited(_, code)) => code,
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    tracing::debug!(id = job.id, ?signal, "job killed");
                    FAILURE
                }
                Ok(WaitStatus::Stopped(..)) => {
                    job.state = JobState::Stopped;
                    continue;
                }
                Ok(WaitStatus::Continued(_)) => {
                    job.state = JobState::Running;
                    continue;
                }
                Ok(_) => continue,
                Err(e) => {
                    // Somebody else reaped it; there is no status to report.
                    tracing::warn!(id = job.id, pid = job.pid, "failed to poll job: {}", e);
                    FAILURE
                }
            };
            job.state = JobState::Done(code);
            tracing::debug!(id = job.id, code, "job finished");
            done.push(Completion {
                id: job.id,
                command: job.command.clone(),
                code,
            });
        }
        done
    }

    /// One line per job, for the `jobs` builtin.
    pub fn list(&self) -> Vec<String> {
        self.jobs
            .values()
            .map(|job| {
                let (state, outcome) = match job.state {
                    JobState::Running => ("Running", ""),
                    JobState::Stopped => ("Stopped", ""),
                    JobState::Done(SUCCESS) => ("Done", "(success)"),
                    JobState::Done(_) => ("Done", "(failed)"),
                };
                format!("[{}] {}  {}  {}", job.id, state, outcome, job.command)
            })
            .collect()
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    /// Most recently launched job still in the table.
    pub fn latest(&self) -> Option<JobId> {
        self.jobs.last_key_value().map(|(id, _)| *id)
    }

    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        self.jobs.remove(&id)
    }

    /// Drop all finished jobs.
    pub fn prune_finished(&mut self) {
        self.jobs.retain(|_, job| !job.is_finished());
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.capacity
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new(DEFAULT_JOB_CAPACITY)
    }
}

/// Block until `pid` exits or is killed, ignoring stops, with the process
/// registered as the foreground child.
pub fn wait_foreground(pid: u32, signals: &SignalBridge) -> Result<ExitCode> {
    let _fg = signals.foreground(pid);
    let target = Pid::from_raw(pid as i32);
    loop {
        match waitpid(target, Some(WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(..)) => return Ok(FAILURE),
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(e) => return Err(ShellError::system("wait", e.into())),
        }
    }
}
