//! Result sink: the append-only sweep record stream.
//!
//! One line per sweep point, `<x>,<mean>,<std>`, comma-separated, in
//! acquisition order. Records are buffered and flushed to disk every
//! `flush_every` points; a crash loses at most one flush interval, which is
//! an accepted trade against per-line I/O stalls in the middle of a timed
//! cycle.

use crate::error::AppResult;
use log::info;
use std::fs::File;
use std::path::{Path, PathBuf};

/// The reduced outcome of one sweep point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepPointResult {
    /// Independent variable value (MHz, V, A or ms depending on the sweep).
    pub x: f64,
    /// Mean dip metric over the successful repeats.
    pub mean: f64,
    /// Population standard deviation over the successful repeats.
    pub std_dev: f64,
    /// Number of repeats that actually contributed. Carried for the log and
    /// for downstream consumers of the in-memory results; the file format
    /// stays three columns.
    pub samples: u32,
}

pub struct ResultWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
    flush_every: u32,
    pending: u32,
}

impl ResultWriter {
    /// Create (truncate) the record stream at `path`.
    pub fn create(path: &Path, flush_every: u32) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        info!("result stream open at '{}'", path.display());
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record; hits the disk once per `flush_every` records.
    ///
    /// Floats are rendered with `{:?}` so a whole-valued metric keeps its
    /// decimal point (`5.0`, not `5`); the independent variable uses plain
    /// display formatting, matching how the sweep scripts label points.
    pub fn append(&mut self, result: &SweepPointResult) -> AppResult<()> {
        self.writer.write_record([
            format!("{}", result.x),
            format!("{:?}", result.mean),
            format!("{:?}", result.std_dev),
        ])?;
        self.pending += 1;
        if self.pending >= self.flush_every {
            self.writer.flush()?;
            self.pending = 0;
        }
        Ok(())
    }

    /// Flush everything still buffered and close the stream.
    pub fn finish(mut self) -> AppResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}
