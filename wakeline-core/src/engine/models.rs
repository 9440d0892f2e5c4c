//! Model store: the names of the models installed in a model partition.
//!
//! A partition is a directory whose entries are model names (one directory
//! or file per model). Lookup follows the naming convention of the model
//! families: wake-word models start with [`WAKE_PREFIX`], command models
//! with [`COMMAND_PREFIX`].

use std::path::Path;

use tracing::info;

use crate::error::{Result, WakelineError};

/// Name prefix of wake-word models.
pub const WAKE_PREFIX: &str = "wn";

/// Name prefix of command-recognition models.
pub const COMMAND_PREFIX: &str = "mn";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelStore {
    names: Vec<String>,
}

impl ModelStore {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Read model names from the entries of `dir`, sorted by name.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| WakelineError::ModelPartition(format!("{}: {e}", dir.display())))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        if names.is_empty() {
            return Err(WakelineError::ModelPartition(format!(
                "{}: no models installed",
                dir.display()
            )));
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// First model whose name starts with `prefix` and contains `keyword`.
    ///
    /// An empty keyword matches the first model of the family.
    pub fn filter(&self, prefix: &str, keyword: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|name| name.starts_with(prefix) && name.contains(keyword))
            .map(String::as_str)
    }

    /// Like [`filter`](Self::filter), but a miss is a startup error.
    pub fn require(&self, prefix: &str, keyword: &str) -> Result<&str> {
        self.filter(prefix, keyword)
            .ok_or_else(|| WakelineError::ModelNotFound {
                prefix: prefix.into(),
                keyword: keyword.into(),
            })
    }

    pub fn log_inventory(&self) {
        for name in &self.names {
            info!(model = %name, "model available");
        }
    }
}
