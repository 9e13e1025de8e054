//! Append-only snapshot journal, one JSON document per line.

use crate::snapshot::TickSnapshot;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("journal encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct SnapshotJournal {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl SnapshotJournal {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| JournalError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn append(&mut self, snapshot: &TickSnapshot) -> Result<(), JournalError> {
        let line = snapshot.to_json()?;
        writeln!(self.writer, "{}", line).map_err(|source| self.io_error(source))?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), JournalError> {
        self.writer.flush().map_err(|source| self.io_error(source))
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Read every snapshot back from a journal file.
    pub fn read_all(path: &Path) -> Result<Vec<TickSnapshot>, JournalError> {
        let file = File::open(path).map_err(|source| JournalError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut snapshots = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| JournalError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            snapshots.push(serde_json::from_str(&line)?);
        }
        Ok(snapshots)
    }
}

impl Drop for SnapshotJournal {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
