//! Names of files already ingested into the collection.
//!
//! The persistent form is a plain text log with one file name per line.

use crate::IngestError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct UploadRegistry {
    names: Vec<String>,
    log_path: Option<PathBuf>,
}

impl UploadRegistry {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let mut names: Vec<String> = Vec::new();

        if path.exists() {
            for line in fs::read_to_string(path)?.lines() {
                let name = line.trim();
                if !name.is_empty() && !names.iter().any(|known| known == name) {
                    names.push(name.to_string());
                }
            }
        } else if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(Self {
            names,
            log_path: Some(path.to_path_buf()),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|known| known == name)
    }

    /// A name must fit on one line of the log.
    pub fn validate_name(name: &str) -> Result<(), IngestError> {
        if name.trim().is_empty() || name.contains(['\n', '\r']) {
            return Err(IngestError::InvalidArgument(format!(
                "not a valid file name: {name:?}"
            )));
        }
        Ok(())
    }

    /// Returns `false` when the name was already recorded.
    pub fn insert(&mut self, name: &str) -> Result<bool, IngestError> {
        Self::validate_name(name)?;
        if self.contains(name) {
            return Ok(false);
        }

        if let Some(path) = &self.log_path {
            let mut log = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(log, "{name}")?;
        }
        self.names.push(name.to_string());
        Ok(true)
    }

    pub fn remove(&mut self, name: &str) -> Result<bool, IngestError> {
        let before = self.names.len();
        self.names.retain(|known| known != name);
        if self.names.len() == before {
            return Ok(false);
        }

        if let Some(path) = &self.log_path {
            let mut contents = self.names.join("\n");
            if !contents.is_empty() {
                contents.push('\n');
            }
            fs::write(path, contents)?;
        }
        Ok(true)
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
}
