//! Canonical locations of every intermediate and output artifact of a run.
//!
//! All paths are pure functions of the base directory, the locality and the
//! target spatial reference.

use std::path::{Path, PathBuf};

use contourkit_artifacts::{CAD_DIR, MANIFEST_SUFFIX, SHAPEFILE_DIR};
use contourkit_shared::{DatasetHandle, SpatialReference};

pub const WIP_CONTAINER: &str = "Contour_Lines_WIP.gdb";
pub const WIP_SP_CONTAINER: &str = "Contour_Lines_WIP_SP.gdb";
pub const MOSAIC: &str = "Mosaic_Dataset";
pub const CONTOURS: &str = "Contour_Lines";
pub const CONTOURS_SP: &str = "Contour_Lines_SP";
pub const CONTOURS_SMOOTHED: &str = "Contour_Lines_Smoothed";
pub const CONTOUR_TILES: &str = "Contour_Tiles";
pub const TILE_INDEX: &str = "Index_5000Ft";
pub const TILE_INDEX_W_LIMITS: &str = "Index_5000Ft_w_Limits";
pub const TILE_INDEX_WGS: &str = "Index_5000Ft_WGS";
pub const MOSAIC_BOUNDARY: &str = "Mosaic_Boundary";
pub const MOSAIC_BOUNDARY_SP: &str = "Mosaic_Boundary_SP";
pub const DATA_LIMITS: &str = "Data_Limits";
pub const DATA_LIMITS_SP: &str = "Data_Limits_SP";
pub const GRIDS_CONTAINER: &str = "grids.gdb";
pub const RUN_LOG_FILE: &str = "contouring.log";

/// Working containers written by earlier versions of the pipeline.
pub const LEGACY_CONTAINERS: [&str; 1] = ["Contours_Work_In_Progress.gdb"];
/// Pattern for the per-step containers of the oldest pipeline versions.
pub const LEGACY_CONTAINER_PATTERN: &str = r"^Contours_Step\d+\.gdb$";
/// Boundary datasets written by earlier versions, inside the output container.
pub const LEGACY_INDEX_DATASETS: [&str; 1] = ["Boundary_UTM"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    base_dir: PathBuf,
    raster_dir: PathBuf,
    grids_root: PathBuf,
    locality: String,
    target_srs: SpatialReference,
    index_suffix: String,
}

impl ArtifactLayout {
    pub fn new(
        base_dir: PathBuf,
        raster_folder: &str,
        grids_root: PathBuf,
        locality: &str,
        target_srs: SpatialReference,
        index_suffix: &str,
    ) -> Self {
        Self {
            raster_dir: base_dir.join(raster_folder),
            base_dir,
            grids_root,
            locality: locality.to_string(),
            target_srs,
            index_suffix: index_suffix.to_string(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn raster_dir(&self) -> &Path {
        &self.raster_dir
    }

    pub fn run_log(&self) -> PathBuf {
        self.base_dir.join(RUN_LOG_FILE)
    }

    // --- containers ---------------------------------------------------------

    pub fn wip_container(&self) -> DatasetHandle {
        DatasetHandle::container(self.base_dir.join(WIP_CONTAINER))
    }

    pub fn wip_sp_container(&self) -> DatasetHandle {
        DatasetHandle::container(self.base_dir.join(WIP_SP_CONTAINER))
    }

    pub fn output_container(&self) -> DatasetHandle {
        DatasetHandle::container(self.base_dir.join(format!("{}_Contours.gdb", self.locality)))
    }

    pub fn legacy_container(&self, name: &str) -> DatasetHandle {
        DatasetHandle::container(self.base_dir.join(name))
    }

    // --- contour datasets ---------------------------------------------------

    pub fn mosaic(&self) -> DatasetHandle {
        self.wip_container().child(MOSAIC)
    }

    pub fn raw_contours(&self) -> DatasetHandle {
        self.wip_container().child(CONTOURS)
    }

    /// Feature dataset fixed to the target spatial reference.
    pub fn projected_dataset(&self) -> DatasetHandle {
        self.wip_sp_container().child(CONTOURS_SP)
    }

    pub fn projected_contours(&self) -> DatasetHandle {
        self.projected_dataset().child(CONTOURS)
    }

    pub fn smoothed_contours(&self) -> DatasetHandle {
        self.wip_container().child(CONTOURS_SMOOTHED)
    }

    /// Feature dataset holding one feature class per tile.
    pub fn contour_tiles(&self) -> DatasetHandle {
        self.output_container().child(CONTOUR_TILES)
    }

    /// Feature dataset holding the copied reference grid.
    pub fn tile_index_dataset(&self) -> DatasetHandle {
        self.output_container().child(TILE_INDEX)
    }

    /// The reference tiling grid inside the output container.
    pub fn tile_index(&self) -> DatasetHandle {
        self.tile_index_dataset().child(TILE_INDEX)
    }

    /// Pre-supplied grid for the target spatial reference.
    pub fn source_grid(&self) -> DatasetHandle {
        DatasetHandle::new(
            self.grids_root.join(GRIDS_CONTAINER),
            format!("{TILE_INDEX}_{}", self.target_srs.wkid()),
        )
    }

    // --- boundary datasets --------------------------------------------------

    pub fn mosaic_boundary(&self) -> DatasetHandle {
        self.output_container().child(MOSAIC_BOUNDARY)
    }

    pub fn projected_boundary(&self) -> DatasetHandle {
        self.output_container().child(MOSAIC_BOUNDARY_SP)
    }

    pub fn data_limits(&self) -> DatasetHandle {
        self.output_container().child(DATA_LIMITS)
    }

    pub fn dissolved_limits(&self) -> DatasetHandle {
        self.output_container().child(DATA_LIMITS_SP)
    }

    pub fn clipped_index(&self) -> DatasetHandle {
        self.output_container().child(TILE_INDEX_W_LIMITS)
    }

    pub fn geographic_index(&self) -> DatasetHandle {
        self.output_container().child(TILE_INDEX_WGS)
    }

    pub fn legacy_index_dataset(&self, name: &str) -> DatasetHandle {
        self.output_container().child(name)
    }

    // --- files ----------------------------------------------------------------

    pub fn shapefile_dir(&self) -> PathBuf {
        self.base_dir.join(SHAPEFILE_DIR)
    }

    pub fn cad_dir(&self) -> PathBuf {
        self.base_dir.join(CAD_DIR)
    }

    pub fn index_document_name(&self) -> String {
        format!("{}_{}.geojson", self.locality, self.index_suffix)
    }

    pub fn index_document(&self) -> PathBuf {
        self.base_dir.join(self.index_document_name())
    }

    pub fn manifest(&self) -> PathBuf {
        self.base_dir
            .join(format!("{}_{MANIFEST_SUFFIX}.json", self.locality))
    }
}
