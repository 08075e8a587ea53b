//! Contour deliverables: file naming, verification against the published
//! tile index, and the run manifest.

mod index;
mod manifest;
mod naming;

pub use index::{TileCompleteness, read_index_tiles, verify_tile_completeness};
pub use manifest::{
    FileDigest, MANIFEST_SUFFIX, Manifest, ManifestParameters, digest_files, write_manifest,
};
pub use naming::{
    CAD_DIR, CAD_EXTENSION, CAD_SIDECARS, Resolution, SHAPEFILE_DIR, SHAPEFILE_EXTENSION,
    SHAPEFILE_SIDECARS, deliverable_file_name,
};
