//! Checks against the published GeoJSON tile index.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{info, instrument};

use contourkit_shared::{ContourError, Result, Tile};

use crate::naming::{Resolution, SHAPEFILE_EXTENSION, deliverable_file_name};

/// Tile numbers listed in a GeoJSON FeatureCollection, read from each
/// feature's `properties[split_field]`.
pub fn read_index_tiles(geojson: &Path, split_field: &str) -> Result<BTreeSet<Tile>> {
    let content = std::fs::read_to_string(geojson).map_err(|e| ContourError::io(geojson, e))?;
    let doc: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        ContourError::validation(format!("invalid GeoJSON {}: {e}", geojson.display()))
    })?;

    let features = doc
        .get("features")
        .and_then(|f| f.as_array())
        .ok_or_else(|| {
            ContourError::validation(format!(
                "{} is not a FeatureCollection",
                geojson.display()
            ))
        })?;

    let mut tiles = BTreeSet::new();
    for (i, feature) in features.iter().enumerate() {
        let value = feature
            .get("properties")
            .and_then(|p| p.get(split_field))
            .unwrap_or(&serde_json::Value::Null);
        let tile = Tile::from_attribute(value).ok_or_else(|| {
            ContourError::validation(format!("feature {i} has no `{split_field}` attribute"))
        })?;
        tiles.insert(tile);
    }
    Ok(tiles)
}

/// Result of comparing the index against the exported shapefiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileCompleteness {
    /// Tiles listed in the index.
    pub indexed: BTreeSet<Tile>,
    /// Indexed tiles without a `<Tile>_1Ft.shp`.
    pub missing: BTreeSet<Tile>,
}

impl TileCompleteness {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Every tile in the GeoJSON index must have a 1-foot shapefile.
///
/// Returns a validation error naming the missing tiles otherwise.
#[instrument(skip_all, fields(index = %geojson.display()))]
pub fn verify_tile_completeness(
    geojson: &Path,
    shapefile_dir: &Path,
    split_field: &str,
) -> Result<TileCompleteness> {
    let indexed = read_index_tiles(geojson, split_field)?;
    let missing: BTreeSet<Tile> = indexed
        .iter()
        .filter(|tile| {
            !shapefile_dir
                .join(deliverable_file_name(tile, Resolution::OneFoot, SHAPEFILE_EXTENSION))
                .is_file()
        })
        .cloned()
        .collect();

    let report = TileCompleteness { indexed, missing };
    if !report.is_complete() {
        let names: Vec<&str> = report.missing.iter().map(Tile::name).collect();
        return Err(ContourError::validation(format!(
            "{} indexed tile(s) have no 1Ft shapefile: {}",
            names.len(),
            names.join(", ")
        )));
    }

    info!(tiles = report.indexed.len(), "tile index is complete");
    Ok(report)
}
