//! Tab completion for the line editor.

use crate::builtin::Builtin;
use crate::resolve::is_executable;
use crate::session::Session;
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;

/// Command names starting with a prefix: builtins first, then executables
/// found in `PATH` directories (sorted, without duplicates).
///
/// Each completion request builds its own cursor, so requests never share
/// iteration state.
#[derive(Debug, Clone)]
pub struct CommandNames {
    candidates: Vec<String>,
    next: usize,
}

impl CommandNames {
    pub fn new(prefix: &str, path_var: Option<&str>) -> Self {
        let mut candidates: Vec<String> = Builtin::ALL
            .iter()
            .map(|b| b.name())
            .filter(|name| name.starts_with(prefix))
            .map(str::to_owned)
            .collect();
        let mut seen: HashSet<String> = candidates.iter().cloned().collect();

        let dirs: Vec<_> = path_var
            .map(|p| std::env::split_paths(OsStr::new(p)).collect())
            .unwrap_or_default();
        let mut external = Vec::new();
        for dir in dirs {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                if name.starts_with(prefix) && !seen.contains(&name) && is_executable(&entry.path()) {
                    seen.insert(name.clone());
                    external.push(name);
                }
            }
        }
        external.sort();
        candidates.extend(external);

        Self {
            candidates,
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl Iterator for CommandNames {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let name = self.candidates.get(self.next)?.clone();
        self.next += 1;
        Some(name)
    }
}

/// rustyline helper: command names for the first word, file names after it.
pub struct ShellHelper {
    path_var: Option<String>,
    files: FilenameCompleter,
}

impl ShellHelper {
    pub fn new() -> Self {
        Self {
            path_var: None,
            files: FilenameCompleter::new(),
        }
    }

    /// Pick up `PATH` changes made by `set`/`unset`.
    pub fn sync(&mut self, session: &Session) {
        self.path_var = session.env.get_var("PATH");
    }
}

impl Default for ShellHelper {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offset where the word under the cursor starts.
fn word_start(head: &str) -> usize {
    head.char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(i, c)| i + c.len_utf8())
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let head = &line[..pos];
        let start = word_start(head);
        if !head[..start].trim().is_empty() {
            return self.files.complete(line, pos, ctx);
        }
        let pairs = CommandNames::new(&head[start..], self.path_var.as_deref())
            .map(|name| Pair {
                display: name.clone(),
                replacement: name,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Highlighter for ShellHelper {}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}
