//! Append-only progress log (`log.csv`).
//!
//! One `,\t`-joined row per completed epoch under a fixed header. Rows are
//! never rewritten; the only non-append operation is forking, which copies
//! a prefix of another run's log into a new file and marks the branch point
//! with a separator row.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::checkpoint::naming::LOG_FILE;
use crate::error::{ArtifactError, Result, missing_or_io};
use crate::state::{EpochMetrics, RunState, SplitMetrics};

/// Column names, in file order.
pub const HEADERS: [&str; 11] = [
    "Epoch",
    "LR",
    "Train_Loss",
    "Train_Top1",
    "Train_Top5",
    "Test_Loss",
    "Test_Top1",
    "Test_Top5",
    "Val_Loss",
    "Val_Top1",
    "Val_Top5",
];

/// Row inserted where a branched log diverges from its source.
pub const SEPARATOR: &str = "-----------------------------------------------";

const DELIMITER: &str = ",\t";

/// One data row of the log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEntry {
    pub epoch: u64,
    pub lr: f64,
    pub metrics: EpochMetrics,
}

impl ProgressEntry {
    pub fn from_state(state: &RunState) -> Self {
        Self {
            epoch: state.curr_epoch,
            lr: state.lr,
            metrics: state.metrics,
        }
    }

    pub fn to_row(&self) -> String {
        let m = &self.metrics;
        let values = [
            self.lr,
            m.train.loss,
            m.train.top1,
            m.train.top5,
            m.test.loss,
            m.test.top1,
            m.test.top5,
            m.val.loss,
            m.val.top1,
            m.val.top5,
        ];
        let mut row = self.epoch.to_string();
        for v in values {
            row.push_str(DELIMITER);
            row.push_str(&v.to_string());
        }
        row
    }

    /// Parse a data row; the error names the offending field.
    pub fn parse_row(row: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = row.split(',').map(str::trim).collect();
        if fields.len() != HEADERS.len() {
            return Err(format!(
                "expected {} fields, found {}",
                HEADERS.len(),
                fields.len()
            ));
        }
        let epoch = fields[0]
            .parse::<u64>()
            .map_err(|_| format!("epoch '{}' is not an integer", fields[0]))?;
        let mut nums = [0.0f64; 10];
        for (i, slot) in nums.iter_mut().enumerate() {
            let raw = fields[i + 1];
            *slot = raw
                .parse::<f64>()
                .map_err(|_| format!("{} '{raw}' is not a number", HEADERS[i + 1]))?;
        }
        let split = |at: usize| SplitMetrics {
            loss: nums[at],
            top1: nums[at + 1],
            top5: nums[at + 2],
        };
        Ok(Self {
            epoch,
            lr: nums[0],
            metrics: EpochMetrics {
                train: split(1),
                test: split(4),
                val: split(7),
            },
        })
    }
}

/// A non-header line of the log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Entry(ProgressEntry),
    Separator,
}

/// Handle on a run directory's `log.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    /// Handle on the log in `dir` without touching the filesystem.
    pub fn at(dir: &Path) -> Self {
        Self {
            path: dir.join(LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a new log holding only the header row. Never clobbers.
    pub fn create(dir: &Path) -> Result<Self> {
        let log = Self::at(dir);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&log.path)?;
        writeln!(file, "{}", HEADERS.join(DELIMITER))?;
        debug!(path = %log.path.display(), "Created progress log");
        Ok(log)
    }

    /// Start the log of a branch from the log of its source run.
    ///
    /// Copies the header and the first `fork_epoch + 1` data rows verbatim,
    /// then writes one separator. Separator rows already in the source are
    /// copied through and not counted, so a branch of a branch keeps the
    /// full history of its ancestors.
    pub fn fork_from(source_dir: &Path, target_dir: &Path, fork_epoch: u64) -> Result<Self> {
        let fork = ForkedLog::read(source_dir, fork_epoch)?;
        fork.write(target_dir)
    }

    /// Append one row. The log must already exist.
    pub fn append(&self, entry: &ProgressEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| missing_or_io(e, &self.path))?;
        writeln!(file, "{}", entry.to_row())?;
        Ok(())
    }

    /// Read back every row after the header.
    pub fn records(&self) -> Result<Vec<LogRecord>> {
        let text =
            std::fs::read_to_string(&self.path).map_err(|e| missing_or_io(e, &self.path))?;
        let mut records = Vec::new();
        for (i, line) in text.lines().enumerate().skip(1) {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if line == SEPARATOR {
                records.push(LogRecord::Separator);
                continue;
            }
            let entry = ProgressEntry::parse_row(line).map_err(|reason| {
                ArtifactError::MalformedLogRow {
                    path: self.path.clone(),
                    line: i + 1,
                    reason,
                }
            })?;
            records.push(LogRecord::Entry(entry));
        }
        Ok(records)
    }

    /// Data rows only, separators dropped.
    pub fn entries(&self) -> Result<Vec<ProgressEntry>> {
        Ok(self
            .records()?
            .into_iter()
            .filter_map(|r| match r {
                LogRecord::Entry(e) => Some(e),
                LogRecord::Separator => None,
            })
            .collect())
    }
}

/// A branch log read and validated from its source, not yet written.
#[derive(Debug, Clone)]
pub(crate) struct ForkedLog {
    source: PathBuf,
    fork_epoch: u64,
    contents: String,
}

impl ForkedLog {
    /// Build the prefix of the branch log. Fails on a missing or short
    /// source without touching the filesystem.
    pub(crate) fn read(source_dir: &Path, fork_epoch: u64) -> Result<Self> {
        let source = ProgressLog::at(source_dir).path;
        let text = std::fs::read_to_string(&source).map_err(|e| missing_or_io(e, &source))?;

        // No log holds u64::MAX rows, so saturating still reports short.
        let wanted = fork_epoch.saturating_add(1);
        let mut lines = text.split_inclusive('\n');
        let mut contents = String::with_capacity(text.len());
        let mut rows = 0u64;

        if let Some(header) = lines.next() {
            push_line(&mut contents, header);
        }
        for line in lines {
            if rows == wanted {
                break;
            }
            if line.trim_end() != SEPARATOR {
                rows += 1;
            }
            push_line(&mut contents, line);
        }
        if rows < wanted {
            return Err(ArtifactError::LogTooShort {
                path: source,
                rows,
                fork_epoch,
            }
            .into());
        }
        contents.push_str(SEPARATOR);
        contents.push('\n');
        Ok(Self {
            source,
            fork_epoch,
            contents,
        })
    }

    /// Write the branch log into `target_dir`. Never clobbers.
    pub(crate) fn write(&self, target_dir: &Path) -> Result<ProgressLog> {
        let target = ProgressLog::at(target_dir);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target.path)?;
        file.write_all(self.contents.as_bytes())?;
        info!(
            source = %self.source.display(),
            target = %target.path.display(),
            fork_epoch = self.fork_epoch,
            "Forked progress log"
        );
        Ok(target)
    }
}

fn push_line(buf: &mut String, line: &str) {
    buf.push_str(line);
    if !line.ends_with('\n') {
        buf.push('\n');
    }
}
