use crate::env::Environment;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const HISTORY_FILE: &str = ".xsh_history";
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

/// Where the history is kept between sessions: `$HOME/.xsh_history`.
pub fn history_path(env: &Environment) -> Option<PathBuf> {
    env.home().map(|home| home.join(HISTORY_FILE))
}

/// Log of entered lines, oldest first, bounded to `max_len` entries.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    max_len: usize,
}

impl History {
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len,
        }
    }

    /// Append a line; blank lines are ignored and the oldest entry is dropped
    /// once the log is full.
    pub fn push(&mut self, line: &str) {
        if line.trim().is_empty() || self.max_len == 0 {
            return;
        }
        if self.entries.len() == self.max_len {
            self.entries.pop_front();
        }
        self.entries.push_back(line.to_owned());
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append the lines of `path`. A missing file is an empty history.
    pub fn load(&mut self, path: &Path) -> io::Result<()> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        for line in text.lines() {
            self.push(line);
        }
        Ok(())
    }

    /// Write the whole log to `path`, one entry per line.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut text = String::new();
        for line in &self.entries {
            text.push_str(line);
            text.push('\n');
        }
        fs::write(path, text)
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}
