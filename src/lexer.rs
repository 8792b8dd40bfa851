//! Lexical analysis for the command line: whitespace-separated words only.
//!
//! There is no quoting, escaping or substitution; a word is any
//! maximal run of non-separator characters.

use crate::command::Command;
use crate::error::Result;

/// Upper bound on the argument vector, including the slot an `argv` array
/// reserves for its terminating null.
pub const MAX_ARGS: usize = 512;

/// Token that marks a line for background execution when it stands last.
pub const BACKGROUND_MARKER: &str = "&";

fn is_separator(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r')
}

/// Splits `line` into words on runs of spaces, tabs, carriage returns and
/// newlines.
///
/// At most `MAX_ARGS - 1` words are returned; anything after that is dropped
/// silently. Fails only when the argument vector cannot be allocated.
pub fn split_into_tokens(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    for word in line.split(is_separator).filter(|w| !w.is_empty()) {
        if tokens.len() == MAX_ARGS - 1 {
            break;
        }
        tokens.try_reserve(1)?;
        let mut owned = String::new();
        owned.try_reserve_exact(word.len())?;
        owned.push_str(word);
        tokens.push(owned);
    }
    Ok(tokens)
}

/// Tokenizes a line and strips a trailing background marker.
pub fn parse_command(line: &str) -> Result<Command> {
    let mut args = split_into_tokens(line)?;
    let background = args.last().is_some_and(|last| last == BACKGROUND_MARKER);
    if background {
        args.pop();
    }
    Ok(Command { args, background })
}
