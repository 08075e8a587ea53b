//! Contour pipeline: rasters to tiled, attributed, dual-resolution
//! shapefiles and drawings.

use tracing::{info, instrument, warn};

use contourkit_artifacts::{
    CAD_EXTENSION, CAD_SIDECARS, Resolution, SHAPEFILE_EXTENSION, SHAPEFILE_SIDECARS,
    deliverable_file_name,
};
use contourkit_engine::{ParallelismOverride, SmoothParams, list_rasters};
use contourkit_shared::{
    ContourError, DatasetHandle, FieldExpression, FieldSpec, LengthUnit, LineType, Predicate,
    Result, Tile,
};
use contourkit_storage::remove_files_with_suffixes;

use crate::cleanup::{Artifact, ensure_absent, purge};
use crate::context::CrsParams;
use crate::layout::ArtifactLayout;
use crate::steps::{Outcome, StepContext};

/// Integer elevation copied from the raw contour value.
pub const ELEVATION_FIELD: &str = "Elevation";
/// Raw value written by contour extraction.
pub const CONTOUR_FIELD: &str = "Contour";
/// Extraction bookkeeping fields not shipped with the deliverables.
pub const BOOKKEEPING_FIELDS: [&str; 3] = ["Id", "Contour", "InLine_FID"];
/// Field the filter compares against the minimum length.
pub const LENGTH_FIELD: &str = "Shape_Length";
/// Parent id added by multipart-to-singlepart conversion.
pub const PARENT_ID_FIELD: &str = "ORIG_FID";
/// Length field as it appears in an exported shapefile.
pub const SHAPEFILE_LENGTH_FIELD: &str = "Shape_Leng";

// ---------------------------------------------------------------------------
// Working datasets
// ---------------------------------------------------------------------------

/// The contour set downstream of projection (before smoothing).
pub fn projected_or_raw(cx: &StepContext<'_>, params: &CrsParams) -> DatasetHandle {
    if params.reprojects(cx.run.config.projection.policy) {
        cx.layout().projected_contours()
    } else {
        cx.layout().raw_contours()
    }
}

/// The contour set every step after smoothing works on.
pub fn working_contours(cx: &StepContext<'_>, params: &CrsParams) -> DatasetHandle {
    if cx.run.config.smoothing.enabled {
        cx.layout().smoothed_contours()
    } else {
        projected_or_raw(cx, params)
    }
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

pub fn owns_workspace(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::Dataset(layout.wip_container())]
}

pub fn owns_mosaic(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::Dataset(layout.mosaic())]
}

pub fn owns_raw_contours(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::Dataset(layout.raw_contours())]
}

pub fn owns_projected_contours(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::Dataset(layout.wip_sp_container())]
}

pub fn owns_smoothed_contours(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::Dataset(layout.smoothed_contours())]
}

pub fn owns_output_container(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::Dataset(layout.output_container())]
}

pub fn owns_tile_feature_classes(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![Artifact::FeatureClassesIn(layout.contour_tiles())]
}

pub fn owns_export_folders(layout: &ArtifactLayout) -> Vec<Artifact> {
    vec![
        Artifact::Folder(layout.shapefile_dir()),
        Artifact::Folder(layout.cad_dir()),
    ]
}

// ---------------------------------------------------------------------------
// Pre-CRS steps
// ---------------------------------------------------------------------------

pub fn remove_legacy_contours(cx: &mut StepContext<'_>) -> Result<Outcome> {
    purge(cx.engine, &cx.run.layout, &Artifact::LegacyContainers)?;
    cx.note("Legacy work-in-progress containers removed.");
    Ok(Outcome::Completed)
}

pub fn compact_workspace(cx: &mut StepContext<'_>) -> Result<Outcome> {
    let wip = cx.layout().wip_container();
    if !cx.engine.exists(&wip)? {
        return Ok(Outcome::Skipped(format!("{wip} does not exist yet")));
    }
    cx.note(format!("Compacting {wip}"));
    cx.engine.compact(&wip)?;
    Ok(Outcome::Completed)
}

pub fn normalize_nodata(cx: &mut StepContext<'_>) -> Result<Outcome> {
    let raster_dir = cx.layout().raster_dir().to_path_buf();
    let rasters = list_rasters(&raster_dir).map_err(|_| {
        ContourError::configuration(format!(
            "raster folder {} not found",
            raster_dir.display()
        ))
    })?;
    if rasters.is_empty() {
        return Err(ContourError::configuration(format!(
            "no .tif rasters in {}",
            raster_dir.display()
        )));
    }

    let value = cx.run.config.contours.nodata_value;
    for raster in &rasters {
        cx.engine.set_raster_nodata(raster, value)?;
    }
    cx.note(format!(
        "Set NoData value {value} on {} raster(s).",
        rasters.len()
    ));
    Ok(Outcome::Completed)
}

pub fn create_workspace(cx: &mut StepContext<'_>) -> Result<Outcome> {
    let wip = cx.layout().wip_container();
    cx.engine.create_container(&wip)?;
    cx.note(format!("Created {wip}"));
    Ok(Outcome::Completed)
}

pub fn create_mosaic(cx: &mut StepContext<'_>) -> Result<Outcome> {
    let mosaic = cx.layout().mosaic();
    let raster_dir = cx.layout().raster_dir().to_path_buf();
    cx.engine.build_mosaic(&mosaic, &raster_dir)?;
    cx.note(format!("Created mosaic {mosaic} from {}", raster_dir.display()));
    Ok(Outcome::Completed)
}

// ---------------------------------------------------------------------------
// Post-CRS steps
// ---------------------------------------------------------------------------

pub fn calculate_statistics(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let mosaic = cx.layout().mosaic();
    // The engine's background workers are unstable here with parallelism on.
    let mut engine = ParallelismOverride::set(&mut *cx.engine, "0")?;
    engine.compute_statistics(&mosaic)?;
    drop(engine);
    cx.note("Raster statistics calculated.");
    Ok(Outcome::Completed)
}

#[instrument(skip_all, fields(z_factor = params.z_factor))]
pub fn generate_contours(cx: &mut StepContext<'_>, params: &CrsParams) -> Result<Outcome> {
    let mosaic = cx.layout().mosaic();
    let output = cx.layout().raw_contours();
    let contour_params = params.contour_params(&cx.run.config);
    cx.engine.extract_contours(&mosaic, &output, &contour_params)?;
    cx.note(format!(
        "Contours extracted at interval {} with Z-factor {}. Output: {output}",
        contour_params.interval, contour_params.z_factor
    ));
    Ok(Outcome::Completed)
}

pub fn filter_contours(cx: &mut StepContext<'_>, params: &CrsParams) -> Result<Outcome> {
    let contours = cx.layout().raw_contours();
    let predicate = Predicate::LessThan {
        field: LENGTH_FIELD.into(),
        value: params.min_length,
    };
    let selection = cx.engine.select_by_attribute(&contours, &predicate)?;
    cx.note(format!(
        "Selected {} features with {}.",
        selection.count, selection.where_clause
    ));
    let deleted = cx.engine.delete_selected(&selection)?;
    cx.counters.short_features_deleted += deleted;
    cx.note(format!("Deleted {deleted} short features."));
    Ok(Outcome::Completed)
}

pub fn project_contours(cx: &mut StepContext<'_>, params: &CrsParams) -> Result<Outcome> {
    if !params.reprojects(cx.run.config.projection.policy) {
        warn!(
            unit = %params.coordinate_system.linear_unit,
            "contours stay in the raster's coordinate system, not the target"
        );
        return Ok(Outcome::Skipped(format!(
            "coordinate units are {} and projection policy is metric-only",
            params.coordinate_system.linear_unit
        )));
    }

    let layout = cx.layout().clone();
    let target = cx.run.target_srs;
    let output = layout.projected_contours();

    cx.engine.create_container(&layout.wip_sp_container())?;
    cx.engine
        .create_feature_dataset(&layout.projected_dataset(), target)?;
    cx.engine.reproject(&layout.raw_contours(), &output, target)?;
    cx.engine.recalculate_extent(&output)?;
    cx.engine.repair_geometry(&output)?;

    cx.note(format!("Contours projected to {target}. Output: {output}"));
    Ok(Outcome::Completed)
}

pub fn smooth_contours(cx: &mut StepContext<'_>, params: &CrsParams) -> Result<Outcome> {
    let smoothing = &cx.run.config.smoothing;
    if !smoothing.enabled {
        return Ok(Outcome::Skipped("smoothing is disabled".into()));
    }
    let smooth = SmoothParams {
        algorithm: smoothing.algorithm.clone(),
        tolerance: smoothing.tolerance.clone(),
    };
    let input = projected_or_raw(cx, params);
    let output = cx.layout().smoothed_contours();
    cx.engine.smooth_lines(&input, &output, &smooth)?;
    cx.note(format!(
        "Contours smoothed ({} {}). Output: {output}",
        smooth.algorithm, smooth.tolerance
    ));
    Ok(Outcome::Completed)
}

/// Add Elevation and Line_Type if missing, then recompute both.
///
/// Elevation can only be recomputed while the raw contour field still
/// exists; after field cleanup it is left as is.
pub fn add_contour_fields(cx: &mut StepContext<'_>, params: &CrsParams) -> Result<Outcome> {
    let contours = working_contours(cx, params);
    let fields = cx.engine.list_fields(&contours)?;
    let has = |name: &str| fields.iter().any(|f| f.eq_ignore_ascii_case(name));

    if !has(ELEVATION_FIELD) {
        cx.engine
            .add_field(&contours, &FieldSpec::long(ELEVATION_FIELD))?;
        cx.counters.fields_added += 1;
    }
    if has(CONTOUR_FIELD) {
        cx.engine.calculate_field(
            &contours,
            ELEVATION_FIELD,
            &FieldExpression::CopyField {
                source: CONTOUR_FIELD.into(),
            },
        )?;
    } else if !has(ELEVATION_FIELD) {
        return Err(ContourError::configuration(format!(
            "{contours} has neither `{CONTOUR_FIELD}` nor `{ELEVATION_FIELD}`; \
             resume from `generate-contours`"
        )));
    }

    if !has(LineType::FIELD) {
        cx.engine.add_field(
            &contours,
            &FieldSpec::text(LineType::FIELD, LineType::FIELD_LENGTH),
        )?;
        cx.counters.fields_added += 1;
    }
    cx.engine.calculate_field(
        &contours,
        LineType::FIELD,
        &LineType::classification(ELEVATION_FIELD),
    )?;

    cx.note(format!("Elevation and {} calculated on {contours}.", LineType::FIELD));
    Ok(Outcome::Completed)
}

pub fn drop_contour_fields(cx: &mut StepContext<'_>, params: &CrsParams) -> Result<Outcome> {
    let contours = working_contours(cx, params);
    let dropped = drop_present_fields(cx, &contours, &BOOKKEEPING_FIELDS)?;
    cx.counters.contour_fields_dropped += dropped.len() as u64;
    if dropped.is_empty() {
        return Ok(Outcome::Skipped("bookkeeping fields already removed".into()));
    }
    cx.note(format!("Deleted fields: {}", dropped.join(", ")));
    Ok(Outcome::Completed)
}

/// Delete whichever of `wanted` still exist; returns the names deleted.
pub(crate) fn drop_present_fields(
    cx: &mut StepContext<'_>,
    dataset: &DatasetHandle,
    wanted: &[impl AsRef<str>],
) -> Result<Vec<String>> {
    let present = cx.engine.list_fields(dataset)?;
    let to_drop: Vec<String> = wanted
        .iter()
        .map(|w| w.as_ref())
        .filter_map(|w| present.iter().find(|p| p.eq_ignore_ascii_case(w)).cloned())
        .collect();
    if !to_drop.is_empty() {
        cx.engine.delete_fields(dataset, &to_drop)?;
    }
    Ok(to_drop)
}

pub fn create_output_container(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let layout = cx.layout().clone();
    let target = cx.run.target_srs;
    let grid = layout.source_grid();

    if !cx.engine.exists(&grid)? {
        return Err(ContourError::configuration(format!(
            "no tiling grid for spatial reference {target}: {grid} does not exist"
        )));
    }

    cx.engine.create_container(&layout.output_container())?;
    cx.engine
        .create_feature_dataset(&layout.contour_tiles(), target)?;
    cx.engine
        .create_feature_dataset(&layout.tile_index_dataset(), target)?;
    cx.engine.copy_features(&grid, &layout.tile_index())?;

    cx.note(format!(
        "Created {} with the tiling grid {grid}.",
        layout.output_container()
    ));
    Ok(Outcome::Completed)
}

pub fn split_contours(cx: &mut StepContext<'_>, params: &CrsParams) -> Result<Outcome> {
    let input = working_contours(cx, params);
    let layout = cx.layout().clone();
    let split_field = cx.run.config.contours.split_field.clone();

    let tiles = cx.engine.split_by_grid(
        &input,
        &layout.tile_index(),
        &split_field,
        &layout.contour_tiles(),
    )?;
    cx.counters.tiles_split += tiles.len() as u64;
    cx.note(format!(
        "Split contours into {} tile(s) by {split_field}.",
        tiles.len()
    ));
    Ok(Outcome::Completed)
}

/// Export every tile twice: all contours (1Ft) and the even-foot subset (2Ft),
/// each as a shapefile and a drawing.
#[instrument(skip_all)]
pub fn export_tiles(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let layout = cx.layout().clone();
    let shapefile_dir = layout.shapefile_dir();
    let cad_dir = layout.cad_dir();
    for dir in [&shapefile_dir, &cad_dir] {
        std::fs::create_dir_all(dir).map_err(|e| ContourError::io(dir, e))?;
    }

    let cad_format = cx.run.config.contours.cad_format.clone();
    let tiles = cx.engine.list_feature_classes(&layout.contour_tiles())?;
    info!(tiles = tiles.len(), "exporting tiles");

    for name in &tiles {
        let tile = Tile(name.clone());
        let source = layout.contour_tiles().child(name);
        let singlepart = layout.wip_container().child(format!("Tile_{name}_Singlepart"));

        let shp_1ft = shapefile_dir.join(deliverable_file_name(
            &tile,
            Resolution::OneFoot,
            SHAPEFILE_EXTENSION,
        ));
        let shp_2ft = shapefile_dir.join(deliverable_file_name(
            &tile,
            Resolution::TwoFoot,
            SHAPEFILE_EXTENSION,
        ));
        let dwg_1ft =
            cad_dir.join(deliverable_file_name(&tile, Resolution::OneFoot, CAD_EXTENSION));
        let dwg_2ft =
            cad_dir.join(deliverable_file_name(&tile, Resolution::TwoFoot, CAD_EXTENSION));

        // 1Ft
        ensure_absent_or_warn(cx, &singlepart)?;
        cx.engine.multipart_to_singlepart(&source, &singlepart)?;
        cx.counters.singlepart_conversions += 1;

        if !drop_present_fields(cx, &singlepart, &[PARENT_ID_FIELD])?.is_empty() {
            cx.counters.parent_id_fields_dropped += 1;
        }

        cx.engine.export_vector(&singlepart, &shp_1ft)?;
        let shp_1ft_handle = DatasetHandle::file(&shp_1ft);
        cx.engine
            .recalculate_length(&shp_1ft_handle, SHAPEFILE_LENGTH_FIELD, LengthUnit::FeetUs)?;
        cx.counters.lengths_recalculated += 1;
        cx.counters.shapefiles_1ft += 1;

        cx.engine.export_cad(&shp_1ft_handle, &cad_format, &dwg_1ft)?;
        cx.counters.drawings_1ft += 1;

        // 2Ft
        let shp_2ft_handle = DatasetHandle::file(&shp_2ft);
        cx.engine
            .select_to(&shp_1ft_handle, &shp_2ft_handle, &LineType::two_foot_predicate())?;
        cx.counters.shapefiles_2ft += 1;

        cx.engine.export_cad(&shp_2ft_handle, &cad_format, &dwg_2ft)?;
        cx.counters.drawings_2ft += 1;

        ensure_absent_or_warn(cx, &singlepart)?;
    }

    cx.note(format!(
        "Exported {} tile(s) to {} and {}.",
        tiles.len(),
        shapefile_dir.display(),
        cad_dir.display()
    ));
    Ok(Outcome::Completed)
}

fn ensure_absent_or_warn(cx: &mut StepContext<'_>, dataset: &DatasetHandle) -> Result<()> {
    match ensure_absent(cx.engine, dataset) {
        Ok(_) => Ok(()),
        Err(e) if !e.is_fatal() => {
            warn!(error = %e, "scratch dataset left behind");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

pub fn remove_sidecar_files(cx: &mut StepContext<'_>, _params: &CrsParams) -> Result<Outcome> {
    let layout = cx.layout().clone();
    let shp = remove_files_with_suffixes(&layout.shapefile_dir(), &SHAPEFILE_SIDECARS);
    let cad = remove_files_with_suffixes(&layout.cad_dir(), &CAD_SIDECARS);

    let removed = (shp.files_deleted + cad.files_deleted) as u64;
    cx.counters.sidecars_removed += removed;
    for failure in shp.failures.iter().chain(cad.failures.iter()) {
        cx.note(format!("Failed to delete sidecar: {failure}"));
    }
    cx.note(format!("Removed {removed} auxiliary file(s)."));
    Ok(Outcome::Completed)
}
