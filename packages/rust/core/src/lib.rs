//! Staged, resumable contour pipeline for ContourKit.
//!
//! A run walks a fixed catalog of named steps ([`StepRegistry`]) for one
//! locality. Steps before the CRS boundary prepare the raster mosaic; the
//! boundary step derives the coordinate parameters ([`CrsParams`]); the
//! remaining steps extract, tile and export contours and publish the tile
//! index. Any step can be the start of a run: earlier steps are skipped and
//! everything the later steps own is removed before they run again.

pub mod batch;
pub mod boundary;
pub mod cleanup;
pub mod context;
pub mod contour;
pub mod layout;
pub mod pipeline;
pub mod steps;

#[cfg(test)]
mod testing;

pub use batch::{BatchEntry, BatchFile, BatchOutcome, load_batch, parse_batch, run_batch};
pub use context::{CrsParams, RunContext, RunRequest};
pub use layout::ArtifactLayout;
pub use pipeline::{
    ExportCounters, ProgressReporter, RunLogProgress, RunSummary, SilentProgress, break_lock,
    run_locality, run_pipeline,
};
pub use steps::{Phase, Step, StepInfo, StepRegistry};
