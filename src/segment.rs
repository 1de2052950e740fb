//! Durable segment files and the active-segment writer.
//!
//! A segment is one append-only file named by its sequence number (`1`, `2`,
//! `3`, …) inside the session directory, holding delimited rows of
//! `timestamp,load,battery,device_clock`. Exactly one segment is writable at
//! any time; once the writer rotates away from it, a segment is never touched
//! again. Rotation happens strictly *after* the write that brings the active
//! segment to the row limit, so the triggering record is always the last row
//! of the old segment.
//!
//! The counters that earlier revisions of this tool kept in process-wide
//! globals live in [`PersistenceState`], owned by the writer.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{AppResult, LogError};
use crate::sample::Sample;

/// Default number of rows per segment before rotation.
pub const DEFAULT_SEGMENT_ROW_LIMIT: u64 = 1000;

/// Write-side bookkeeping for one logging session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersistenceState {
    /// Sequence number of the currently writable segment.
    pub active_segment_id: u64,
    /// Rows written to the active segment so far.
    pub rows_in_active_segment: u64,
    /// Rows written across all segments this session.
    pub total_rows_written: u64,
}

/// Appends samples to the active segment, rotating at the row limit.
pub struct SegmentWriter {
    dir: PathBuf,
    row_limit: u64,
    file: File,
    writer: csv::Writer<File>,
    state: PersistenceState,
}

impl SegmentWriter {
    /// Open a writer for `dir`, creating the directory and segment `1`.
    pub fn open(dir: &Path, row_limit: u64) -> AppResult<Self> {
        if row_limit == 0 {
            return Err(LogError::Configuration(
                "segment_row_limit must be at least 1".into(),
            ));
        }
        fs::create_dir_all(dir)?;
        let (file, writer) = open_segment(dir, 1)?;
        debug!(dir = %dir.display(), row_limit, "segment writer opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            row_limit,
            file,
            writer,
            state: PersistenceState {
                active_segment_id: 1,
                rows_in_active_segment: 0,
                total_rows_written: 0,
            },
        })
    }

    /// Append one sample to the active segment. If this write reaches the
    /// row limit the old segment is closed and the next one opened.
    pub fn append(&mut self, sample: &Sample) -> AppResult<()> {
        self.writer
            .write_record(&sample.csv_record())
            .map_err(storage_err)?;
        self.state.rows_in_active_segment += 1;
        self.state.total_rows_written += 1;
        if self.state.rows_in_active_segment >= self.row_limit {
            self.rotate()?;
        }
        Ok(())
    }

    /// Commit buffered rows to stable storage without rotating.
    pub fn flush(&mut self) -> AppResult<()> {
        self.writer.flush().map_err(storage_err)?;
        self.file.sync_all().map_err(storage_err)?;
        Ok(())
    }

    /// Sequence number of the active segment.
    pub fn current_segment_id(&self) -> u64 {
        self.state.active_segment_id
    }

    /// Current write-side counters.
    pub fn state(&self) -> &PersistenceState {
        &self.state
    }

    /// Flush and close the active segment, returning the final counters.
    pub fn close(mut self) -> AppResult<PersistenceState> {
        self.flush()?;
        Ok(self.state)
    }

    fn rotate(&mut self) -> AppResult<()> {
        self.flush()?;
        let next = self.state.active_segment_id + 1;
        let (file, writer) = open_segment(&self.dir, next)?;
        self.file = file;
        self.writer = writer;
        info!(
            closed = self.state.active_segment_id,
            rows = self.state.rows_in_active_segment,
            next,
            "segment rotated"
        );
        self.state.active_segment_id = next;
        self.state.rows_in_active_segment = 0;
        Ok(())
    }
}

fn open_segment(dir: &Path, id: u64) -> AppResult<(File, csv::Writer<File>)> {
    let path = dir.join(id.to_string());
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(storage_err)?;
    // The clone shares the descriptor: the csv writer appends through it
    // while the original handle stays available for sync_all.
    let writer = csv::Writer::from_writer(file.try_clone().map_err(storage_err)?);
    Ok((file, writer))
}

fn storage_err<E: ToString>(err: E) -> LogError {
    LogError::Persistence(err.to_string())
}
