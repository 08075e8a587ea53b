//! Geometry engine adapter.
//!
//! The pipeline never touches rasters or vectors itself; every geospatial
//! operation goes through the [`GeometryEngine`] trait. The production
//! implementation is [`BridgeEngine`], which drives an external engine worker
//! process over a JSON-lines protocol.
//!
//! [`EngineSession`] and [`ParallelismOverride`] provide scoped acquisition of
//! engine-level resources (licensed extensions, parallelism settings) with
//! guaranteed release on every exit path.

pub mod bridge;
pub mod session;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use contourkit_shared::{
    CoordinateSystem, DatasetHandle, FieldExpression, FieldSpec, LengthUnit, Predicate, Result,
    SpatialReference,
};

pub use bridge::{BridgeCommand, BridgeEngine, EngineRequest};
pub use session::{EngineSession, ParallelismOverride};

// ---------------------------------------------------------------------------
// Operation parameters
// ---------------------------------------------------------------------------

/// Parameters for contour extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContourParams {
    /// Vertical interval in the raster's native unit.
    pub interval: f64,
    /// Multiplier applied to raster values before contouring.
    pub z_factor: f64,
    /// Cap on vertices per output feature.
    pub max_vertices: u32,
}

/// Parameters for radiometric footprint construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootprintParams {
    pub min_data_value: f64,
    pub max_data_value: f64,
    pub approx_num_vertices: u32,
    pub shrink_distance: f64,
    pub request_size: u32,
    pub min_thinness_ratio: f64,
    pub max_sliver_size: u32,
    pub min_region_size: u32,
    pub skip_overviews: bool,
}

/// Parameters for line smoothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothParams {
    pub algorithm: String,
    pub tolerance: String,
}

/// A selection produced by [`GeometryEngine::select_by_attribute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Dataset the selection was made on.
    pub dataset: DatasetHandle,
    /// Where-clause that produced it.
    pub where_clause: String,
    /// Number of selected features.
    pub count: u64,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Named geospatial operations the pipeline needs.
///
/// Implementations are stateless from the pipeline's point of view beyond
/// the persistent datasets they read and write. Every method that creates an
/// output overwrites an existing dataset of the same name.
pub trait GeometryEngine: Send {
    /// Engine name for tracing.
    fn name(&self) -> &str;

    // --- session ---------------------------------------------------------

    fn check_out_extension(&mut self, extension: &str) -> Result<()>;
    fn check_in_extension(&mut self, extension: &str) -> Result<()>;
    fn set_overwrite_output(&mut self, enabled: bool) -> Result<()>;
    /// Current parallel processing factor (`None` means engine default).
    fn parallel_processing_factor(&mut self) -> Result<Option<String>>;
    fn set_parallel_processing_factor(&mut self, factor: Option<String>) -> Result<()>;

    // --- catalog ---------------------------------------------------------

    fn exists(&mut self, dataset: &DatasetHandle) -> Result<bool>;
    fn delete(&mut self, dataset: &DatasetHandle) -> Result<()>;
    /// Reclaim storage in a container. No semantic effect.
    fn compact(&mut self, container: &DatasetHandle) -> Result<()>;
    fn create_container(&mut self, container: &DatasetHandle) -> Result<()>;
    fn create_feature_dataset(
        &mut self,
        dataset: &DatasetHandle,
        srs: SpatialReference,
    ) -> Result<()>;
    fn copy_features(&mut self, input: &DatasetHandle, output: &DatasetHandle) -> Result<()>;
    /// Line feature classes directly inside a feature dataset, sorted by name.
    fn list_feature_classes(&mut self, dataset: &DatasetHandle) -> Result<Vec<String>>;
    fn list_fields(&mut self, dataset: &DatasetHandle) -> Result<Vec<String>>;

    // --- raster ----------------------------------------------------------

    fn set_raster_nodata(&mut self, raster: &Path, value: f64) -> Result<()>;
    /// Create a mosaic named by `mosaic` referencing every raster in `raster_dir`.
    fn build_mosaic(&mut self, mosaic: &DatasetHandle, raster_dir: &Path) -> Result<()>;
    fn mosaic_crs(&mut self, mosaic: &DatasetHandle) -> Result<CoordinateSystem>;
    fn compute_statistics(&mut self, mosaic: &DatasetHandle) -> Result<()>;
    fn define_mosaic_nodata(&mut self, mosaic: &DatasetHandle, value: f64) -> Result<()>;
    fn build_footprints(&mut self, mosaic: &DatasetHandle, params: &FootprintParams)
    -> Result<()>;
    /// Export the mosaic's footprint boundary as a polygon dataset.
    fn export_boundary(&mut self, mosaic: &DatasetHandle, output: &DatasetHandle) -> Result<()>;

    // --- vector ----------------------------------------------------------

    fn extract_contours(
        &mut self,
        raster: &DatasetHandle,
        output: &DatasetHandle,
        params: &ContourParams,
    ) -> Result<()>;
    fn smooth_lines(
        &mut self,
        input: &DatasetHandle,
        output: &DatasetHandle,
        params: &SmoothParams,
    ) -> Result<()>;
    fn select_by_attribute(
        &mut self,
        dataset: &DatasetHandle,
        predicate: &Predicate,
    ) -> Result<Selection>;
    /// Delete the selected features; returns how many were deleted.
    fn delete_selected(&mut self, selection: &Selection) -> Result<u64>;
    /// Copy features matching `predicate` into a new dataset; returns the count.
    fn select_to(
        &mut self,
        input: &DatasetHandle,
        output: &DatasetHandle,
        predicate: &Predicate,
    ) -> Result<u64>;
    fn reproject(
        &mut self,
        input: &DatasetHandle,
        output: &DatasetHandle,
        srs: SpatialReference,
    ) -> Result<()>;
    fn recalculate_extent(&mut self, dataset: &DatasetHandle) -> Result<()>;
    fn repair_geometry(&mut self, dataset: &DatasetHandle) -> Result<()>;
    fn add_field(&mut self, dataset: &DatasetHandle, field: &FieldSpec) -> Result<()>;
    fn calculate_field(
        &mut self,
        dataset: &DatasetHandle,
        field: &str,
        expression: &FieldExpression,
    ) -> Result<()>;
    fn delete_fields(&mut self, dataset: &DatasetHandle, fields: &[String]) -> Result<()>;
    /// Split `input` by `grid`, one feature class per `split_field` value,
    /// written into `workspace` and named after the value. Returns the names.
    fn split_by_grid(
        &mut self,
        input: &DatasetHandle,
        grid: &DatasetHandle,
        split_field: &str,
        workspace: &DatasetHandle,
    ) -> Result<Vec<String>>;
    fn multipart_to_singlepart(
        &mut self,
        input: &DatasetHandle,
        output: &DatasetHandle,
    ) -> Result<()>;
    fn recalculate_length(
        &mut self,
        dataset: &DatasetHandle,
        field: &str,
        unit: LengthUnit,
    ) -> Result<()>;
    fn export_vector(&mut self, input: &DatasetHandle, path: &Path) -> Result<()>;
    fn export_cad(&mut self, input: &DatasetHandle, format: &str, path: &Path) -> Result<()>;
    fn intersect(
        &mut self,
        a: &DatasetHandle,
        b: &DatasetHandle,
        output: &DatasetHandle,
    ) -> Result<()>;
    fn dissolve(&mut self, input: &DatasetHandle, output: &DatasetHandle) -> Result<()>;
    fn clip(
        &mut self,
        target: &DatasetHandle,
        clipper: &DatasetHandle,
        output: &DatasetHandle,
    ) -> Result<()>;
    /// Delete features of `target` that do not intersect any feature in any
    /// of `others`; returns how many were deleted.
    fn delete_disjoint(&mut self, target: &DatasetHandle, others: &[DatasetHandle])
    -> Result<u64>;
    fn export_geojson(&mut self, input: &DatasetHandle, path: &Path) -> Result<()>;
}

/// Rasters (`.tif`) directly inside `dir`, sorted by file name.
pub fn list_rasters(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| contourkit_shared::ContourError::io(dir, e))?;
    let mut rasters: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("tif"))
        })
        .collect();
    rasters.sort();
    Ok(rasters)
}
