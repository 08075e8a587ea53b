//! Application configuration for contourkit.
//!
//! User config lives at `~/.contourkit/contourkit.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ContourError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "contourkit.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".contourkit";

// ---------------------------------------------------------------------------
// Config structs (matching contourkit.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Data locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Geometry engine worker.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Contour extraction and export parameters.
    #[serde(default)]
    pub contours: ContourConfig,

    /// Optional line smoothing.
    #[serde(default)]
    pub smoothing: SmoothingConfig,

    /// Radiometric footprint parameters for the coverage boundary.
    #[serde(default)]
    pub footprints: FootprintConfig,

    /// Public tile index document.
    #[serde(default)]
    pub index: IndexConfig,

    /// Reprojection behavior.
    #[serde(default)]
    pub projection: ProjectionConfig,

    /// Multi-locality batch runs.
    #[serde(default)]
    pub batch: BatchConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root holding `<STATE>/<Locality>_Contours` folders.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Folder (inside the locality base directory) holding input rasters.
    #[serde(default = "default_raster_folder")]
    pub raster_folder: String,

    /// Folder holding the pre-supplied tiling grids (`grids.gdb`).
    #[serde(default = "default_grids_root")]
    pub grids_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            raster_folder: default_raster_folder(),
            grids_root: default_grids_root(),
        }
    }
}

fn default_data_root() -> PathBuf {
    PathBuf::from("Z:/")
}
fn default_raster_folder() -> String {
    "Tif_Files_UTM".into()
}
fn default_grids_root() -> PathBuf {
    PathBuf::from("Z:/Clearinghouse_Support/Grids")
}

/// `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interpreter or executable that hosts the engine worker.
    #[serde(default = "default_engine_command")]
    pub command: String,

    /// Worker script passed as the first argument.
    #[serde(default = "default_engine_script")]
    pub script: String,

    /// Working directory for the worker process.
    #[serde(default = "default_engine_working_dir")]
    pub working_dir: PathBuf,

    /// Licensed extensions checked out for the duration of a run.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            script: default_engine_script(),
            working_dir: default_engine_working_dir(),
            extensions: default_extensions(),
        }
    }
}

fn default_engine_command() -> String {
    "python".into()
}
fn default_engine_script() -> String {
    "engine_worker.py".into()
}
fn default_engine_working_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_extensions() -> Vec<String> {
    vec!["3D".into(), "spatial".into()]
}

/// `[contours]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContourConfig {
    /// Vertical interval, in the raster's native vertical unit.
    #[serde(default = "default_interval")]
    pub interval: f64,

    /// Cap on vertices per extracted feature.
    #[serde(default = "default_max_vertices")]
    pub max_vertices: u32,

    /// Minimum contour length in feet; shorter features are dropped.
    #[serde(default = "default_min_length_ft")]
    pub min_length_ft: f64,

    /// Sentinel written as "no data" on every input raster.
    #[serde(default = "default_nodata_value")]
    pub nodata_value: f64,

    /// Tiling grid attribute used to split contours.
    #[serde(default = "default_split_field")]
    pub split_field: String,

    /// CAD drawing version passed to the export.
    #[serde(default = "default_cad_format")]
    pub cad_format: String,
}

impl Default for ContourConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_vertices: default_max_vertices(),
            min_length_ft: default_min_length_ft(),
            nodata_value: default_nodata_value(),
            split_field: default_split_field(),
            cad_format: default_cad_format(),
        }
    }
}

fn default_interval() -> f64 {
    1.0
}
fn default_max_vertices() -> u32 {
    500_000
}
fn default_min_length_ft() -> f64 {
    5.0
}
fn default_nodata_value() -> f64 {
    -999_999.0
}
fn default_split_field() -> String {
    "TILE_NUM".into()
}
fn default_cad_format() -> String {
    "DWG_R2018".into()
}

/// `[smoothing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_smoothing_algorithm")]
    pub algorithm: String,

    /// Tolerance with unit, as the engine expects it (e.g. "10 Feet").
    #[serde(default = "default_smoothing_tolerance")]
    pub tolerance: String,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: default_smoothing_algorithm(),
            tolerance: default_smoothing_tolerance(),
        }
    }
}

fn default_smoothing_algorithm() -> String {
    "PAEK".into()
}
fn default_smoothing_tolerance() -> String {
    "10 Feet".into()
}

/// `[footprints]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FootprintConfig {
    #[serde(default = "default_min_data_value")]
    pub min_data_value: f64,
    #[serde(default = "default_max_data_value")]
    pub max_data_value: f64,
    #[serde(default = "default_approx_vertices")]
    pub approx_num_vertices: u32,
    #[serde(default)]
    pub shrink_distance: f64,
    #[serde(default = "default_request_size")]
    pub request_size: u32,
    #[serde(default = "default_min_thinness_ratio")]
    pub min_thinness_ratio: f64,
    #[serde(default = "default_max_sliver_size")]
    pub max_sliver_size: u32,
    #[serde(default = "default_min_region_size")]
    pub min_region_size: u32,
    #[serde(default = "default_true")]
    pub skip_overviews: bool,
}

impl Default for FootprintConfig {
    fn default() -> Self {
        Self {
            min_data_value: default_min_data_value(),
            max_data_value: default_max_data_value(),
            approx_num_vertices: default_approx_vertices(),
            shrink_distance: 0.0,
            request_size: default_request_size(),
            min_thinness_ratio: default_min_thinness_ratio(),
            max_sliver_size: default_max_sliver_size(),
            min_region_size: default_min_region_size(),
            skip_overviews: true,
        }
    }
}

fn default_min_data_value() -> f64 {
    -300.0
}
fn default_max_data_value() -> f64 {
    25_000.0
}
fn default_approx_vertices() -> u32 {
    5_000
}
fn default_request_size() -> u32 {
    2_000
}
fn default_min_thinness_ratio() -> f64 {
    0.05
}
fn default_max_sliver_size() -> u32 {
    20
}
fn default_min_region_size() -> u32 {
    1
}
fn default_true() -> bool {
    true
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Geographic reference system for the published index.
    #[serde(default = "default_geographic_wkid")]
    pub geographic_wkid: u32,

    /// Suffix of `<Locality>_<suffix>.geojson`.
    #[serde(default = "default_document_suffix")]
    pub document_suffix: String,

    /// Grid bookkeeping fields dropped before publishing.
    #[serde(default = "default_drop_fields")]
    pub drop_fields: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            geographic_wkid: default_geographic_wkid(),
            document_suffix: default_document_suffix(),
            drop_fields: default_drop_fields(),
        }
    }
}

fn default_geographic_wkid() -> u32 {
    4326
}
fn default_document_suffix() -> String {
    "Contours_Index".into()
}
fn default_drop_fields() -> Vec<String> {
    ["LABEL_X", "LABEL_Y", "NAME_X", "NAME_Y"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// When contours and the coverage boundary are reprojected to the target SRS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectionPolicy {
    /// Always reproject to the caller's target spatial reference.
    #[default]
    Always,
    /// Only reproject metric sources; feet sources keep their native system.
    MetricOnly,
}

/// `[projection]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectionConfig {
    #[serde(default)]
    pub policy: ProjectionPolicy,
}

/// `[batch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of localities processed concurrently.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { jobs: default_jobs() }
    }
}

fn default_jobs() -> usize {
    4
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.contourkit/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ContourError::configuration("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.contourkit/contourkit.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ContourError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ContourError::configuration(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ContourError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ContourError::configuration(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ContourError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

impl AppConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.contours.interval <= 0.0 {
            return Err(ContourError::configuration(
                "contours.interval must be greater than zero",
            ));
        }
        if self.contours.min_length_ft < 0.0 {
            return Err(ContourError::configuration(
                "contours.min_length_ft must not be negative",
            ));
        }
        if self.contours.split_field.trim().is_empty() {
            return Err(ContourError::configuration("contours.split_field is empty"));
        }
        if self.batch.jobs == 0 {
            return Err(ContourError::configuration("batch.jobs must be at least 1"));
        }
        Ok(())
    }
}
