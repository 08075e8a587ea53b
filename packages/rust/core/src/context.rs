//! Run identity and the coordinate parameters derived from the mosaic.

use std::fmt;

use contourkit_artifacts::ManifestParameters;
use contourkit_engine::ContourParams;
use contourkit_shared::{
    AppConfig, ContourError, CoordinateSystem, ProjectionPolicy, Result, SpatialReference,
};

use crate::layout::ArtifactLayout;
use crate::steps::StepRegistry;

/// Elevation multiplier for rasters with metric linear units.
pub const Z_FACTOR_METERS: f64 = 3.280839895;
/// Elevation multiplier for rasters already in feet.
pub const Z_FACTOR_FEET: f64 = 1.0;

/// Linear unit name the engine reports for metric systems.
const METRIC_UNIT: &str = "Meter";

/// What the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub state: String,
    pub locality: String,
    pub target_srs: SpatialReference,
    /// Step to resume from; `None` runs everything.
    pub start_step: Option<String>,
}

/// Immutable per-run identity and paths, built once before anything runs.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub state: String,
    pub locality: String,
    pub target_srs: SpatialReference,
    /// Index of the first step to execute.
    pub start_index: usize,
    pub layout: ArtifactLayout,
    pub config: AppConfig,
}

impl RunContext {
    /// Validate the request and resolve every path.
    ///
    /// An unknown start step fails here, before any engine exists.
    pub fn new(request: RunRequest, config: &AppConfig) -> Result<Self> {
        let state = validate_identifier("state", &request.state)?;
        let locality = validate_identifier("locality", &request.locality)?;
        let start_index = StepRegistry::catalog().resolve(request.start_step.as_deref())?;

        let base_dir = config
            .paths
            .data_root
            .join(&state)
            .join(format!("{locality}_Contours"));
        let layout = ArtifactLayout::new(
            base_dir,
            &config.paths.raster_folder,
            config.paths.grids_root.clone(),
            &locality,
            request.target_srs,
            &config.index.document_suffix,
        );

        Ok(Self {
            state,
            locality,
            target_srs: request.target_srs,
            start_index,
            layout,
            config: config.clone(),
        })
    }

    /// Name of the first step to execute.
    pub fn start_step(&self) -> &'static str {
        StepRegistry::catalog().steps()[self.start_index].name
    }

    /// Human-readable summary for `--dry-run` and the run log.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        let layout = &self.layout;
        vec![
            ("state", self.state.clone()),
            ("locality", self.locality.clone()),
            ("target srs", self.target_srs.to_string()),
            ("start step", self.start_step().to_string()),
            ("base dir", layout.base_dir().display().to_string()),
            ("rasters", layout.raster_dir().display().to_string()),
            ("work container", layout.wip_container().to_string()),
            ("output container", layout.output_container().to_string()),
            ("tiling grid", layout.source_grid().to_string()),
            ("shapefiles", layout.shapefile_dir().display().to_string()),
            ("drawings", layout.cad_dir().display().to_string()),
            ("index", layout.index_document().display().to_string()),
            ("projection policy", format!("{:?}", self.config.projection.policy)),
        ]
    }
}

fn validate_identifier(label: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ContourError::configuration(format!("{label} is required")));
    }
    if trimmed.contains(['/', '\\']) || trimmed == "." || trimmed == ".." {
        return Err(ContourError::configuration(format!(
            "{label} `{trimmed}` must be a plain name"
        )));
    }
    Ok(trimmed.to_string())
}

// ---------------------------------------------------------------------------
// CRS parameters
// ---------------------------------------------------------------------------

/// Parameters only known once the mosaic exists.
#[derive(Debug, Clone, PartialEq)]
pub struct CrsParams {
    pub coordinate_system: CoordinateSystem,
    /// Linear unit is meters.
    pub metric: bool,
    /// Elevation multiplier passed to contour extraction.
    pub z_factor: f64,
    /// Contours shorter than this (in the data's linear unit) are removed.
    pub min_length: f64,
}

impl CrsParams {
    pub fn derive(coordinate_system: CoordinateSystem, min_length_ft: f64) -> Self {
        let metric = coordinate_system.linear_unit == METRIC_UNIT;
        let z_factor = if metric { Z_FACTOR_METERS } else { Z_FACTOR_FEET };
        Self {
            coordinate_system,
            metric,
            z_factor,
            min_length: min_length_ft * (Z_FACTOR_METERS / z_factor),
        }
    }

    /// Whether contours and the boundary are reprojected to the target SRS.
    pub fn reprojects(&self, policy: ProjectionPolicy) -> bool {
        match policy {
            ProjectionPolicy::Always => true,
            ProjectionPolicy::MetricOnly => self.metric,
        }
    }

    pub fn contour_params(&self, config: &AppConfig) -> ContourParams {
        ContourParams {
            interval: config.contours.interval,
            z_factor: self.z_factor,
            max_vertices: config.contours.max_vertices,
        }
    }

    pub fn manifest(&self) -> ManifestParameters {
        ManifestParameters {
            linear_unit: self.coordinate_system.linear_unit.clone(),
            metric: self.metric,
            z_factor: self.z_factor,
            min_length: self.min_length,
        }
    }
}

impl fmt::Display for CrsParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "coordinate system unit is {}, Z-factor {}, minimum length {}",
            self.coordinate_system.linear_unit, self.z_factor, self.min_length
        )
    }
}
