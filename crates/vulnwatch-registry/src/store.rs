//! Durable registry storage shared by the monitor and the console
//!
//! Both processes read and write the same JSON document. Every write goes to
//! a temporary file in the target directory which is fsynced and then renamed
//! over the state file, so a concurrent reader sees either the old or the new
//! document, never a torn one. Between processes the policy is
//! last-writer-wins; callers narrow the window by mutating through
//! [`RegistryStore::update`], which reloads immediately before writing.

use crate::Registry;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use vulnwatch_core::{Error, Result, TaskRecord};

/// On-disk shape: `{"tasks": [...]}`; a missing `tasks` key is an empty list
#[derive(Deserialize)]
struct StateDocument {
    #[serde(default)]
    tasks: Vec<TaskRecord>,
}

/// File-backed registry store
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted registry.
    ///
    /// A missing or blank file is an empty registry. Anything that does not
    /// parse is `CorruptState`; it is never treated as empty.
    pub fn load(&self) -> Result<Registry> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", self.path.display());
                return Ok(Registry::new());
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if content.trim().is_empty() {
            return Ok(Registry::new());
        }

        let document: StateDocument =
            serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;

        let registry = Registry::from_records(document.tasks).map_err(|e| match e {
            Error::DuplicateTask { task_id } => {
                self.corrupt(format!("task_id {} appears more than once", task_id))
            }
            other => other,
        })?;

        trace!(
            "Loaded {} task(s) from {}",
            registry.len(),
            self.path.display()
        );
        Ok(registry)
    }

    /// Atomically replace the persisted registry
    pub fn save(&self, registry: &Registry) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".vulnwatch-state.")
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, registry)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        trace!("Saved {} task(s) to {}", registry.len(), self.path.display());
        Ok(())
    }

    /// One load-mutate-save cycle.
    ///
    /// The file is only rewritten when `mutate` actually changed the
    /// registry. If `mutate` fails nothing is written.
    pub fn update<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Registry) -> Result<T>,
    {
        let mut registry = self.load()?;
        let before = registry.clone();
        let out = mutate(&mut registry)?;
        if registry != before {
            self.save(&registry)?;
        }
        Ok(out)
    }

    fn corrupt(&self, message: String) -> Error {
        Error::CorruptState {
            path: self.path.display().to_string(),
            message,
        }
    }
}
