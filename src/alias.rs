use crate::error::{Result, ShellError};
use std::collections::BTreeMap;

pub const DEFAULT_ALIAS_CAPACITY: usize = 100;

/// User-defined text substitutions for the first word of a line.
///
/// Names are unique; re-adding a name overwrites its value in place.
#[derive(Debug, Clone)]
pub struct AliasTable {
    entries: BTreeMap<String, String>,
    capacity: usize,
}

impl AliasTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    /// Insert or overwrite `name`.
    ///
    /// A new name beyond capacity is rejected and the table is left as is.
    pub fn add(&mut self, name: &str, value: &str) -> Result<()> {
        if let Some(existing) = self.entries.get_mut(name) {
            value.clone_into(existing);
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(ShellError::CapacityExceeded {
                table: "aliases",
                capacity: self.capacity,
            });
        }
        self.entries.insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    /// Returns `false` when no alias had that name.
    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aliases in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::new(DEFAULT_ALIAS_CAPACITY)
    }
}
