use std::fmt;

use contourkit_shared::Tile;

/// Folder (under the locality base directory) holding vector deliverables.
pub const SHAPEFILE_DIR: &str = "Shapefiles";
/// Folder holding CAD deliverables.
pub const CAD_DIR: &str = "Dwg_Files";

pub const SHAPEFILE_EXTENSION: &str = "shp";
pub const CAD_EXTENSION: &str = "dwg";

/// Export by-products in [`SHAPEFILE_DIR`] that are not deliverables.
pub const SHAPEFILE_SIDECARS: [&str; 4] = [".shp.xml", ".sbx", ".sbn", ".cpg"];
/// Export by-products in [`CAD_DIR`] that are not deliverables.
pub const CAD_SIDECARS: [&str; 1] = [".dwg.xml"];

/// Line density of an exported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resolution {
    /// Every contour.
    OneFoot,
    /// Index-10 and Intermediate-2 only.
    TwoFoot,
}

impl Resolution {
    pub const ALL: [Resolution; 2] = [Self::OneFoot, Self::TwoFoot];

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::OneFoot => "1Ft",
            Self::TwoFoot => "2Ft",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// `<Tile>_<1Ft|2Ft>.<extension>`
pub fn deliverable_file_name(tile: &Tile, resolution: Resolution, extension: &str) -> String {
    format!("{}_{}.{extension}", tile.name(), resolution.suffix())
}
