//! Boundary and index pipeline: mosaic footprint to the published GeoJSON
//! tile index, plus the final deliverable check.

use tracing::{info, instrument, warn};

use contourkit_artifacts::{
    CAD_DIR, Manifest, SHAPEFILE_DIR, digest_files, verify_tile_completeness, write_manifest,
};
use contourkit_engine::FootprintParams;
use contourkit_shared::{ContourError, DatasetHandle, FootprintConfig, Result, SpatialReference};

use crate::cleanup::{Artifact, purge};
use crate::context::CrsParams;
use crate::contour::drop_present_fields;
use crate::layout::{ArtifactLayout, LEGACY_INDEX_DATASETS};
use crate::steps::{Outcome, StepContext};

fn footprint_params(config: &FootprintConfig) -> FootprintParams {
    FootprintParams {
        min_data_value: config.min_data_value,
        max_data_value: config.max_data_value,
        approx_num_vertices: config.approx_num_vertices,
        shrink_distance: config.shrink_distance,
        request_size: config.request_size,
        min_thinness_ratio: config.min_thinness_ratio,
        max_sliver_size: config.max_sliver_size,
        min_region_size: config.min_region_size,
        skip_overviews: config.skip_overviews,
    }
}

/// Boundary polygon the intersection runs against.
fn working_boundary(cx: &StepContext<'_>, params: &CrsParams) -> DatasetHandle {
    if params.reprojects(cx.run.config.projection.policy) {
        cx.layout().projected_boundary()
    } else {
        cx.layout().mosaic_boundary()
    }
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

pub fn owns_boundary(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::Dataset(layout.mosaic_boundary())]
}

pub fn owns_projected_boundary(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::Dataset(layout.projected_boundary())]
}

pub fn owns_data_limits(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::Dataset(layout.data_limits())]
}

pub fn owns_dissolved_limits(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::Dataset(layout.dissolved_limits())]
}

pub fn owns_clipped_index(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::Dataset(layout.clipped_index())]
}

pub fn owns_geographic_index(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::Dataset(layout.geographic_index())]
}

pub fn owns_index_document(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::File(layout.index_document())]
}

pub fn owns_manifest(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::File(layout.manifest())]
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

pub fn remove_legacy_index(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let layout = cx.layout().clone();
    for name in LEGACY_INDEX_DATASETS {
        purge(
            cx.engine,
            &layout,
            &Artifact::Dataset(layout.legacy_index_dataset(name)),
        )?;
    }
    cx.note("Legacy boundary datasets removed.");
    Ok(Outcome::Completed)
}

pub fn build_footprints(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let mosaic = cx.layout().mosaic();
    let nodata = cx.run.config.contours.nodata_value;
    let params = footprint_params(&cx.run.config.footprints);

    cx.engine.define_mosaic_nodata(&mosaic, nodata)?;
    cx.engine.build_footprints(&mosaic, &params)?;
    cx.note(format!(
        "Footprints built for {mosaic} (valid data {} to {}).",
        params.min_data_value, params.max_data_value
    ));
    Ok(Outcome::Completed)
}

pub fn export_boundary(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let mosaic = cx.layout().mosaic();
    let output = cx.layout().mosaic_boundary();
    cx.engine.export_boundary(&mosaic, &output)?;
    cx.note(format!("Boundary exported. Output: {output}"));
    Ok(Outcome::Completed)
}

pub fn project_boundary(cx: &mut StepContext<'_>, params: &CrsParams) -> Result<Outcome> {
    if !params.reprojects(cx.run.config.projection.policy) {
        warn!(
            unit = %params.coordinate_system.linear_unit,
            "boundary stays in the raster's coordinate system, not the target"
        );
        return Ok(Outcome::Skipped(format!(
            "coordinate units are {} and projection policy is metric-only",
            params.coordinate_system.linear_unit
        )));
    }
    let target = cx.run.target_srs;
    let input = cx.layout().mosaic_boundary();
    let output = cx.layout().projected_boundary();
    cx.engine.reproject(&input, &output, target)?;
    cx.note(format!("Boundary projected to {target}. Output: {output}"));
    Ok(Outcome::Completed)
}

pub fn intersect_boundary(cx: &mut StepContext<'_>, params: &CrsParams) -> Result<Outcome> {
    let boundary = working_boundary(cx, params);
    let grid = cx.layout().tile_index();
    let output = cx.layout().data_limits();
    cx.engine.intersect(&boundary, &grid, &output)?;
    cx.note(format!("Boundary intersected with {grid}. Output: {output}"));
    Ok(Outcome::Completed)
}

pub fn dissolve_boundary(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let input = cx.layout().data_limits();
    let output = cx.layout().dissolved_limits();
    cx.engine.dissolve(&input, &output)?;
    cx.note(format!("Coverage dissolved. Output: {output}"));
    Ok(Outcome::Completed)
}

pub fn clip_index(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let grid = cx.layout().tile_index();
    let coverage = cx.layout().dissolved_limits();
    let output = cx.layout().clipped_index();
    cx.engine.clip(&grid, &coverage, &output)?;
    cx.note(format!("Tile index clipped to coverage. Output: {output}"));
    Ok(Outcome::Completed)
}

/// Drop index tiles that touch no contour at all.
///
/// Clipping alone can leave zero-area slivers along the coverage edge.
pub fn remove_empty_tiles(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let index = cx.layout().clipped_index();
    let tiles_dataset = cx.layout().contour_tiles();
    let contours: Vec<DatasetHandle> = cx
        .engine
        .list_feature_classes(&tiles_dataset)?
        .into_iter()
        .map(|name| tiles_dataset.child(name))
        .collect();

    if contours.is_empty() {
        return Err(ContourError::configuration(format!(
            "{tiles_dataset} holds no tile contours; resume from `split-contours`"
        )));
    }

    let removed = cx.engine.delete_disjoint(&index, &contours)?;
    cx.counters.empty_tiles_removed += removed;
    cx.note(format!("Removed {removed} tile(s) without contours from {index}."));
    Ok(Outcome::Completed)
}

pub fn drop_index_fields(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let index = cx.layout().clipped_index();
    let wanted = cx.run.config.index.drop_fields.clone();
    let dropped = drop_present_fields(cx, &index, &wanted)?;
    cx.counters.index_fields_dropped += dropped.len() as u64;
    if dropped.is_empty() {
        return Ok(Outcome::Skipped("grid fields already removed".into()));
    }
    cx.note(format!("Deleted fields: {}", dropped.join(", ")));
    Ok(Outcome::Completed)
}

pub fn project_index(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let geographic = SpatialReference(cx.run.config.index.geographic_wkid);
    let input = cx.layout().clipped_index();
    let output = cx.layout().geographic_index();
    cx.engine.reproject(&input, &output, geographic)?;
    cx.note(format!("Tile index projected to {geographic}. Output: {output}"));
    Ok(Outcome::Completed)
}

pub fn export_index(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let input = cx.layout().geographic_index();
    let document = cx.layout().index_document();
    cx.engine.export_geojson(&input, &document)?;
    cx.note(format!("Tile index exported to {}", document.display()));
    Ok(Outcome::Completed)
}

/// Check tile completeness against the published index, then record a
/// manifest with a digest of every deliverable.
#[instrument(skip_all, fields(locality = %cx.run.locality))]
pub fn verify_deliverables(cx: &mut StepContext<'_>, params: &CrsParams) -> Result<Outcome> {
    let layout = cx.layout().clone();
    let run = cx.run;

    let completeness = verify_tile_completeness(
        &layout.index_document(),
        &layout.shapefile_dir(),
        &run.config.contours.split_field,
    )?;
    info!(tiles = completeness.indexed.len(), "every indexed tile has a 1Ft shapefile");

    let index_name = layout.index_document_name();
    let mut manifest = Manifest::new(
        &run.state,
        &run.locality,
        run.target_srs.wkid(),
        run.start_step(),
        params.manifest(),
    );
    manifest.counters = cx.counters.to_map();
    manifest.files = digest_files(
        layout.base_dir(),
        &[SHAPEFILE_DIR, CAD_DIR, index_name.as_str()],
    )?;
    write_manifest(&layout.manifest(), &manifest)?;

    cx.note(format!(
        "Verified {} tile(s); manifest with {} file digest(s) written to {}",
        completeness.indexed.len(),
        manifest.files.len(),
        layout.manifest().display()
    ));
    Ok(Outcome::Completed)
}
