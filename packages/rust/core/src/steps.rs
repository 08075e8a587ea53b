//! The ordered step catalog and the resume controller.
//!
//! Steps are split by when they can run relative to CRS detection:
//! [`StepAction::PreCrs`] bodies never see coordinate parameters,
//! [`StepAction::PostCrs`] bodies always receive them, and the single
//! [`StepAction::DeriveParameters`] step sits between the two.

use std::fmt;

use contourkit_engine::GeometryEngine;
use contourkit_shared::{ContourError, Result};

use crate::boundary;
use crate::cleanup::Artifact;
use crate::context::{CrsParams, RunContext};
use crate::contour;
use crate::layout::ArtifactLayout;
use crate::pipeline::{ExportCounters, ProgressReporter};

/// Everything a step body may touch.
pub struct StepContext<'a> {
    pub run: &'a RunContext,
    pub engine: &'a mut dyn GeometryEngine,
    pub counters: &'a mut ExportCounters,
    pub progress: &'a dyn ProgressReporter,
}

impl StepContext<'_> {
    pub fn layout(&self) -> &ArtifactLayout {
        &self.run.layout
    }

    /// One line in the run log.
    pub fn note(&self, message: impl AsRef<str>) {
        self.progress.message(message.as_ref());
    }
}

/// How a step that was allowed to run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The step ran but decided there was nothing to do (e.g. a
    /// configuration-gated stage). Logged as skipped with the reason.
    Skipped(String),
}

pub type PreCrsFn = fn(&mut StepContext<'_>) -> Result<Outcome>;
pub type PostCrsFn = fn(&mut StepContext<'_>, &CrsParams) -> Result<Outcome>;
pub type OwnsFn = fn(&ArtifactLayout) -> Vec<Artifact>;

#[derive(Clone, Copy)]
pub enum StepAction {
    PreCrs(PreCrsFn),
    /// Read the mosaic's CRS and derive [`CrsParams`].
    DeriveParameters,
    PostCrs(PostCrsFn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreCrs,
    Boundary,
    PostCrs,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PreCrs => "pre-crs",
            Self::Boundary => "crs",
            Self::PostCrs => "post-crs",
        })
    }
}

/// One named, ordered unit of work.
#[derive(Clone, Copy)]
pub struct Step {
    /// Stable name used for `--step`.
    pub name: &'static str,
    pub action: StepAction,
    /// Artifacts this step creates; removed before it runs.
    pub owns: OwnsFn,
}

impl Step {
    pub fn phase(&self) -> Phase {
        match self.action {
            StepAction::PreCrs(_) => Phase::PreCrs,
            StepAction::DeriveParameters => Phase::Boundary,
            StepAction::PostCrs(_) => Phase::PostCrs,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Position of a step for logging: `[ordinal/total] name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInfo {
    /// 1-based.
    pub ordinal: usize,
    pub total: usize,
    pub name: &'static str,
}

impl fmt::Display for StepInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.ordinal, self.total, self.name)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct StepRegistry {
    steps: &'static [Step],
}

fn owns_nothing(_: &ArtifactLayout) -> Vec<Artifact> {
    Vec::new()
}

static CATALOG: StepRegistry = StepRegistry {
    steps: &[
        // --- contour pipeline ---
        Step {
            name: "remove-legacy-contours",
            action: StepAction::PreCrs(contour::remove_legacy_contours),
            owns: owns_nothing,
        },
        Step {
            name: "compact-workspace",
            action: StepAction::PreCrs(contour::compact_workspace),
            owns: owns_nothing,
        },
        Step {
            name: "normalize-nodata",
            action: StepAction::PreCrs(contour::normalize_nodata),
            owns: owns_nothing,
        },
        Step {
            name: "create-workspace",
            action: StepAction::PreCrs(contour::create_workspace),
            owns: contour::owns_workspace,
        },
        Step {
            name: "create-mosaic",
            action: StepAction::PreCrs(contour::create_mosaic),
            owns: contour::owns_mosaic,
        },
        Step {
            name: "derive-parameters",
            action: StepAction::DeriveParameters,
            owns: owns_nothing,
        },
        Step {
            name: "calculate-statistics",
            action: StepAction::PostCrs(contour::calculate_statistics),
            owns: owns_nothing,
        },
        Step {
            name: "generate-contours",
            action: StepAction::PostCrs(contour::generate_contours),
            owns: contour::owns_raw_contours,
        },
        Step {
            name: "filter-contours",
            action: StepAction::PostCrs(contour::filter_contours),
            owns: owns_nothing,
        },
        Step {
            name: "project-contours",
            action: StepAction::PostCrs(contour::project_contours),
            owns: contour::owns_projected_contours,
        },
        Step {
            name: "smooth-contours",
            action: StepAction::PostCrs(contour::smooth_contours),
            owns: contour::owns_smoothed_contours,
        },
        Step {
            name: "add-contour-fields",
            action: StepAction::PostCrs(contour::add_contour_fields),
            owns: owns_nothing,
        },
        Step {
            name: "drop-contour-fields",
            action: StepAction::PostCrs(contour::drop_contour_fields),
            owns: owns_nothing,
        },
        Step {
            name: "create-output-container",
            action: StepAction::PostCrs(contour::create_output_container),
            owns: contour::owns_output_container,
        },
        Step {
            name: "split-contours",
            action: StepAction::PostCrs(contour::split_contours),
            owns: contour::owns_tile_feature_classes,
        },
        Step {
            name: "export-tiles",
            action: StepAction::PostCrs(contour::export_tiles),
            owns: contour::owns_export_folders,
        },
        Step {
            name: "remove-sidecar-files",
            action: StepAction::PostCrs(contour::remove_sidecar_files),
            owns: owns_nothing,
        },
        // --- boundary / index pipeline ---
        Step {
            name: "remove-legacy-index",
            action: StepAction::PostCrs(boundary::remove_legacy_index),
            owns: owns_nothing,
        },
        Step {
            name: "build-footprints",
            action: StepAction::PostCrs(boundary::build_footprints),
            owns: owns_nothing,
        },
        Step {
            name: "export-boundary",
            action: StepAction::PostCrs(boundary::export_boundary),
            owns: boundary::owns_boundary,
        },
        Step {
            name: "project-boundary",
            action: StepAction::PostCrs(boundary::project_boundary),
            owns: boundary::owns_projected_boundary,
        },
        Step {
            name: "intersect-boundary",
            action: StepAction::PostCrs(boundary::intersect_boundary),
            owns: boundary::owns_data_limits,
        },
        Step {
            name: "dissolve-boundary",
            action: StepAction::PostCrs(boundary::dissolve_boundary),
            owns: boundary::owns_dissolved_limits,
        },
        Step {
            name: "clip-index",
            action: StepAction::PostCrs(boundary::clip_index),
            owns: boundary::owns_clipped_index,
        },
        Step {
            name: "remove-empty-tiles",
            action: StepAction::PostCrs(boundary::remove_empty_tiles),
            owns: owns_nothing,
        },
        Step {
            name: "drop-index-fields",
            action: StepAction::PostCrs(boundary::drop_index_fields),
            owns: owns_nothing,
        },
        Step {
            name: "project-index",
            action: StepAction::PostCrs(boundary::project_index),
            owns: boundary::owns_geographic_index,
        },
        Step {
            name: "export-index",
            action: StepAction::PostCrs(boundary::export_index),
            owns: boundary::owns_index_document,
        },
        Step {
            name: "verify-deliverables",
            action: StepAction::PostCrs(boundary::verify_deliverables),
            owns: boundary::owns_manifest,
        },
    ],
};

impl StepRegistry {
    /// The fixed catalog, in execution order.
    pub fn catalog() -> &'static StepRegistry {
        &CATALOG
    }

    pub fn steps(&self) -> &'static [Step] {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.iter().map(|s| s.name)
    }

    /// Index of the named start step; `None` means the first step.
    pub fn resolve(&self, name: Option<&str>) -> Result<usize> {
        let Some(name) = name else {
            return Ok(0);
        };
        let wanted = name.trim();
        self.steps
            .iter()
            .position(|s| s.name == wanted)
            .ok_or_else(|| {
                ContourError::configuration(format!(
                    "unknown step `{wanted}`; valid steps are: {}",
                    self.names().collect::<Vec<_>>().join(", ")
                ))
            })
    }

    /// Whether the step at `step_index` executes when resuming at `start_index`.
    pub fn should_run(step_index: usize, start_index: usize) -> bool {
        step_index >= start_index
    }

    pub fn info(&self, index: usize) -> StepInfo {
        StepInfo {
            ordinal: index + 1,
            total: self.steps.len(),
            name: self.steps[index].name,
        }
    }

    /// Index of the CRS boundary step.
    pub fn boundary_index(&self) -> usize {
        self.steps
            .iter()
            .position(|s| s.phase() == Phase::Boundary)
            .unwrap_or(0)
    }
}
