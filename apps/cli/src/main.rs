//! contourkit: staged, resumable contour and tile-index production for
//! elevation rasters.
//!
//! Turns a folder of DEM tiles into per-tile contour shapefiles and CAD
//! drawings plus a GeoJSON tile index.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
