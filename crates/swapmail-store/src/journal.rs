//! JSON-lines journal backing the message store.
//!
//! Each committed mutation is one line:
//!
//! ```text
//! {"op":"append","message":{"id":"m1","senderId":"u1",...}}
//! {"op":"read","id":"m1"}
//! {"op":"profile","profile":{"id":"u1","name":"Ana"}}
//! ```
//!
//! Records are written and flushed before the in-memory snapshot is
//! published, so anything a reader has seen survives a restart. The file is
//! held under an exclusive advisory lock for the lifetime of the journal.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use swapmail_core::{Message, MessageId, SenderDisplay};

use crate::error::{StoreError, StoreResult};

/// One committed store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum JournalRecord {
    Append { message: Message },
    Read { id: MessageId },
    Profile { profile: SenderDisplay },
}

/// Append-only journal file.
#[derive(Debug)]
pub struct Journal {
    file: File,
    fsync: bool,
}

impl Journal {
    /// Open (or create) the journal at `path` and return every record in it.
    ///
    /// A final line without its trailing newline is a write torn by a crash;
    /// it is dropped and the file truncated back to the last full record.
    /// Any other unparsable line is reported as corruption.
    pub fn open(path: &Path, fsync: bool) -> StoreResult<(Self, Vec<JournalRecord>)> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        file.try_lock_exclusive().map_err(|e| {
            StoreError::Journal(format!(
                "journal {} is locked by another process: {e}",
                path.display()
            ))
        })?;

        let (records, good_len, torn) = read_records(&file, path)?;
        if torn {
            tracing::warn!(
                path = %path.display(),
                keep_bytes = good_len,
                "dropping torn trailing journal record"
            );
            file.set_len(good_len)?;
        }
        file.seek(SeekFrom::End(0))?;

        tracing::debug!(
            path = %path.display(),
            records = records.len(),
            "journal opened"
        );
        Ok((
            Self {
                file,
                fsync,
            },
            records,
        ))
    }

    /// Durably append one record.
    pub fn append(&mut self, record: &JournalRecord) -> StoreResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        if self.fsync {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Returns the parsed records, the byte length of the intact prefix, and
/// whether a torn trailing line was found.
fn read_records(file: &File, path: &Path) -> StoreResult<(Vec<JournalRecord>, u64, bool)> {
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut good_len = 0u64;
    let mut line = String::new();
    let mut line_no = 0usize;

    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            return Ok((records, good_len, false));
        }
        line_no += 1;
        let complete = line.ends_with('\n');
        let body = line.trim();
        if body.is_empty() {
            good_len += read as u64;
            continue;
        }
        if !complete {
            // Only the last line can lack its newline: a write torn by a crash.
            return Ok((records, good_len, true));
        }
        let record = serde_json::from_str::<JournalRecord>(body).map_err(|e| {
            StoreError::Journal(format!(
                "{}:{line_no}: corrupt record: {e}",
                path.display()
            ))
        })?;
        records.push(record);
        good_len += read as u64;
    }
}
