//! Advisory lock over a database dir
//!
//! Every writer serving a dir, in this process or another, takes the
//! exclusive lock on `.confdb.lock` before it reads and replaces a table
//! file. The lock file also holds the number of the last applied change,
//! so numbering stays monotonic across writers and restarts.

use crate::error::{WriterError, WriterResult};
use fs4::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const LOCK_FILENAME: &str = ".confdb.lock";

/// Held exclusive lock; released on drop
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Block until the lock on `dir` is ours
    pub fn acquire(dir: &Path) -> WriterResult<Self> {
        let path = dir.join(LOCK_FILENAME);
        let fail = |source| WriterError::Lock {
            path: path.display().to_string(),
            source,
        };

        fs::create_dir_all(dir).map_err(fail)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(fail)?;
        file.lock_exclusive().map_err(fail)?;
        Ok(Self { file, path })
    }

    /// Number of the last change applied in this dir; 0 before the first
    pub fn sequence(&mut self) -> WriterResult<u64> {
        let mut text = String::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut text))
            .map_err(|e| self.fail(e))?;

        let text = text.trim();
        if text.is_empty() {
            return Ok(0);
        }
        text.parse().map_err(|_| {
            self.fail(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad sequence number {text:?}"),
            ))
        })
    }

    /// Record `sequence` as the last applied change
    pub fn store_sequence(&mut self, sequence: u64) -> WriterResult<()> {
        self.file
            .set_len(0)
            .and_then(|()| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| writeln!(self.file, "{sequence}"))
            .and_then(|()| self.file.sync_data())
            .map_err(|e| self.fail(e))
    }

    fn fail(&self, source: std::io::Error) -> WriterError {
        WriterError::Lock {
            path: self.path.display().to_string(),
            source,
        }
    }
}
