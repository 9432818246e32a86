//! Append-only JSON-lines journal implementing [`StateStore`].
//!
//! Layout of a journal directory:
//! - `manifest.toml`: algorithm and vial set the journal was started with.
//! - `records.jsonl`: one line per append call, each line a JSON array of
//!   records. A tick's batch is a single line, so a crash mid-write leaves at
//!   most one torn trailing line, which is dropped on reopen.
//!
//! The whole history is indexed in memory by `(vial, channel)` on open.

use crate::atomic::replace_file;
use culture_traits::{LogChannel, Record, StateStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const MANIFEST: &str = "manifest.toml";
const RECORDS: &str = "records.jsonl";

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("journal line {line} is corrupt: {reason}")]
    Corrupt { line: usize, reason: String },
    #[error("journal refused writes after an earlier failure; reopen it")]
    Poisoned,
    #[error("manifest: {0}")]
    Manifest(String),
    #[error("journal was started with algorithm `{found}`, config selects `{expected}`")]
    AlgorithmMismatch { found: String, expected: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub algorithm: String,
    pub vials: Vec<usize>,
}

pub struct Journal {
    dir: PathBuf,
    file: File,
    fsync: bool,
    index: HashMap<(usize, LogChannel), Vec<Record>>,
    lines: usize,
    /// A write failed part-way; the file tail is unknown until reopened.
    poisoned: bool,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("dir", &self.dir)
            .field("fsync", &self.fsync)
            .field("lines", &self.lines)
            .finish_non_exhaustive()
    }
}

impl Journal {
    /// Open (or create) the journal in `dir` and load its history.
    pub fn open(dir: &Path, fsync: bool) -> Result<Self, JournalError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(RECORDS);
        let mut index: HashMap<(usize, LogChannel), Vec<Record>> = HashMap::new();
        let mut lines = 0usize;

        if path.exists() {
            let good_len = load_lines(&path, &mut index, &mut lines)?;
            let actual = fs::metadata(&path)?.len();
            if good_len < actual {
                tracing::warn!(
                    path = %path.display(),
                    dropped_bytes = actual - good_len,
                    "dropping torn trailing journal line"
                );
                OpenOptions::new().write(true).open(&path)?.set_len(good_len)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(dir = %dir.display(), lines, "journal opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            fsync,
            index,
            lines,
            poisoned: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of committed append lines.
    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn manifest(&self) -> Result<Option<Manifest>, JournalError> {
        let path = self.dir.join(MANIFEST);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        toml::from_str(&text)
            .map(Some)
            .map_err(|e| JournalError::Manifest(e.to_string()))
    }

    /// Write the manifest for a fresh journal, or check that an existing one
    /// was started with the same algorithm.
    pub fn ensure_manifest(&self, expected: &Manifest) -> Result<(), JournalError> {
        match self.manifest()? {
            Some(found) if found.algorithm != expected.algorithm => {
                Err(JournalError::AlgorithmMismatch {
                    found: found.algorithm,
                    expected: expected.algorithm.clone(),
                })
            }
            Some(found) => {
                if found.vials != expected.vials {
                    tracing::warn!(
                        was = ?found.vials,
                        now = ?expected.vials,
                        "vial set changed since the journal was started"
                    );
                }
                Ok(())
            }
            None => {
                let text =
                    toml::to_string(expected).map_err(|e| JournalError::Manifest(e.to_string()))?;
                replace_file(&self.dir.join(MANIFEST), text.as_bytes(), self.fsync)?;
                Ok(())
            }
        }
    }

    /// Vials with any history.
    pub fn vials(&self) -> Vec<usize> {
        let mut v: Vec<usize> = self.index.keys().map(|(vial, _)| *vial).collect();
        v.sort_unstable();
        v.dedup();
        v
    }

    fn write_line(&mut self, records: &[Record]) -> Result<(), JournalError> {
        if self.poisoned {
            return Err(JournalError::Poisoned);
        }
        let mut line = serde_json::to_vec(records)?;
        line.push(b'\n');
        let written = self.file.write_all(&line).and_then(|()| {
            if self.fsync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            self.poisoned = true;
            return Err(e.into());
        }
        for r in records {
            self.index.entry((r.vial, r.channel())).or_default().push(r.clone());
        }
        self.lines += 1;
        Ok(())
    }
}

/// Parse every complete line into `index`; return the byte length of the
/// valid prefix.
fn load_lines(
    path: &Path,
    index: &mut HashMap<(usize, LogChannel), Vec<Record>>,
    lines: &mut usize,
) -> Result<u64, JournalError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut good_len = 0u64;
    let mut buf = String::new();
    let mut lineno = 0usize;
    loop {
        buf.clear();
        let n = reader.read_line(&mut buf)?;
        if n == 0 {
            break;
        }
        lineno += 1;
        let complete = buf.ends_with('\n');
        let text = buf.trim();
        if text.is_empty() {
            good_len += n as u64;
            continue;
        }
        match serde_json::from_str::<Vec<Record>>(text) {
            Ok(batch) if complete => {
                for r in batch {
                    index.entry((r.vial, r.channel())).or_default().push(r);
                }
                *lines += 1;
                good_len += n as u64;
            }
            // unterminated final line: never acknowledged
            Ok(_) => break,
            Err(_) if !complete => break,
            Err(e) => {
                return Err(JournalError::Corrupt {
                    line: lineno,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(good_len)
}

impl StateStore for Journal {
    fn append(&mut self, record: &Record) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.write_line(std::slice::from_ref(record))?;
        Ok(())
    }

    fn append_batch(
        &mut self,
        records: &[Record],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if records.is_empty() {
            return Ok(());
        }
        self.write_line(records)?;
        Ok(())
    }

    fn read_last(
        &self,
        vial: usize,
        channel: LogChannel,
        n: usize,
    ) -> Result<Vec<Record>, Box<dyn std::error::Error + Send + Sync>> {
        let Some(all) = self.index.get(&(vial, channel)) else {
            return Ok(Vec::new());
        };
        let skip = all.len().saturating_sub(n);
        Ok(all[skip..].to_vec())
    }

    fn read_since(
        &self,
        vial: usize,
        channel: LogChannel,
        after_h: f64,
    ) -> Result<Vec<Record>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self
            .index
            .get(&(vial, channel))
            .map(|all| all.iter().filter(|r| r.at_h > after_h).cloned().collect())
            .unwrap_or_default())
    }
}
