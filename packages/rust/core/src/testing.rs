//! In-memory geometry engine and run fixture for pipeline tests.
//!
//! Datasets live in a map keyed by their full path. Shapefiles, drawings
//! and GeoJSON documents are written to disk with deterministic content so
//! tests can compare deliverables byte for byte.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Value, json};

use contourkit_engine::{
    ContourParams, FootprintParams, GeometryEngine, Selection, SmoothParams, list_rasters,
};
use contourkit_shared::{
    AppConfig, ContourError, CoordinateSystem, DatasetHandle, FieldExpression, FieldSpec,
    LengthUnit, Predicate, Result, SpatialReference,
};

use crate::context::{RunContext, RunRequest};
use crate::layout::{GRIDS_CONTAINER, TILE_INDEX};

/// Tile numbers of the seeded reference grid.
pub const GRID_TILES: [&str; 4] = ["1001", "1002", "1003", "1004"];
/// Tiles that receive contours; the last grid tile stays empty.
pub const DATA_TILES: usize = 3;
/// Grid attributes besides the split field.
pub const GRID_EXTRA_FIELDS: [&str; 4] = ["LABEL_X", "LABEL_Y", "NAME_X", "NAME_Y"];

/// `(elevation, length, parts)` of every contour the terrain yields.
const TERRAIN: [(i64, f64, u32); 10] = [
    (100, 50.0, 1),
    (101, 40.0, 2),
    (102, 1.0, 1),
    (104, 0.5, 1),
    (110, 30.0, 1),
    (120, 80.0, 3),
    (123, 20.0, 1),
    (124, 15.0, 1),
    (125, 60.0, 1),
    (130, 25.0, 1),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Line {
    length: f64,
    parts: u32,
    attrs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Layer {
    fields: Vec<String>,
    features: Vec<Line>,
    #[serde(skip)]
    srs: Option<SpatialReference>,
}

impl Layer {
    fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Polygons {
    fields: Vec<String>,
    tiles: BTreeSet<String>,
    srs: Option<SpatialReference>,
}

#[derive(Debug, Clone, PartialEq)]
enum Dataset {
    Container,
    FeatureDataset,
    Mosaic {
        crs: CoordinateSystem,
        nodata: Option<f64>,
        footprints: bool,
    },
    Lines(Layer),
    Polygons(Polygons),
}

/// Deterministic stand-in for the external geometry engine.
#[derive(Debug)]
pub struct SimulatedEngine {
    datasets: BTreeMap<PathBuf, Dataset>,
    crs: CoordinateSystem,
    split_field: String,
    calls: Vec<String>,
    failing: HashSet<String>,
    extensions: Vec<String>,
    overwrite: bool,
    parallel: Option<String>,
    statistics_factor: Option<Option<String>>,
    selection: Option<(PathBuf, Predicate)>,
    rasters_touched: usize,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self {
            datasets: BTreeMap::new(),
            crs: CoordinateSystem {
                name: "NAD_1983_UTM_Zone_17N".into(),
                linear_unit: "Meter".into(),
                wkid: Some(26917),
            },
            split_field: "TILE_NUM".into(),
            calls: Vec::new(),
            failing: HashSet::new(),
            extensions: Vec::new(),
            overwrite: false,
            parallel: None,
            statistics_factor: None,
            selection: None,
            rasters_touched: 0,
        }
    }

    /// Rasters report `linear_unit` instead of meters.
    pub fn with_linear_unit(mut self, linear_unit: &str) -> Self {
        self.crs.linear_unit = linear_unit.into();
        self
    }

    /// Seed the pre-supplied tiling grid for `srs` under `grids_root`.
    pub fn with_grid(mut self, grids_root: &Path, srs: SpatialReference) -> Self {
        let container = grids_root.join(GRIDS_CONTAINER);
        let grid = DatasetHandle::new(&container, format!("{TILE_INDEX}_{}", srs.wkid()));
        let mut fields = vec![self.split_field.clone()];
        fields.extend(GRID_EXTRA_FIELDS.iter().map(|f| f.to_string()));
        self.datasets.insert(container, Dataset::Container);
        self.datasets.insert(
            grid.path(),
            Dataset::Polygons(Polygons {
                fields,
                tiles: GRID_TILES.iter().map(|t| t.to_string()).collect(),
                srs: Some(srs),
            }),
        );
        self
    }

    /// Make every call to `operation` fail.
    pub fn fail_on(&mut self, operation: &str) {
        self.failing.insert(operation.to_string());
    }

    /// Every call made, as `"<operation> <detail>"`.
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    pub fn held_extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn overwrite_enabled(&self) -> bool {
        self.overwrite
    }

    pub fn current_parallel_factor(&self) -> Option<&str> {
        self.parallel.as_deref()
    }

    /// Parallel factor in effect when statistics were last computed.
    pub fn statistics_factor(&self) -> Option<Option<String>> {
        self.statistics_factor.clone()
    }

    pub fn rasters_touched(&self) -> usize {
        self.rasters_touched
    }

    /// Put a line dataset in place without any checks.
    pub fn insert_lines(&mut self, dataset: &DatasetHandle, lines: &[(i64, f64)]) {
        let features = lines
            .iter()
            .map(|(elevation, length)| Line {
                length: *length,
                parts: 1,
                attrs: BTreeMap::from([
                    ("Elevation".to_string(), json!(elevation)),
                    ("Shape_Length".to_string(), json!(length)),
                ]),
            })
            .collect();
        self.datasets.insert(
            dataset.path(),
            Dataset::Lines(Layer {
                fields: vec!["Elevation".into(), "Shape_Length".into()],
                features,
                srs: None,
            }),
        );
    }

    /// Features of a line dataset as `(field → value)` maps.
    pub fn features(&self, dataset: &DatasetHandle) -> Vec<BTreeMap<String, Value>> {
        match self.lookup(&dataset.path()) {
            Some(Dataset::Lines(layer)) => layer.features.iter().map(|l| l.attrs.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Tiles of a polygon dataset.
    pub fn tiles(&self, dataset: &DatasetHandle) -> Vec<String> {
        match self.lookup(&dataset.path()) {
            Some(Dataset::Polygons(p)) => p.tiles.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    // --- internals ---------------------------------------------------------

    fn call(&mut self, operation: &str, detail: impl std::fmt::Display) -> Result<()> {
        self.calls.push(format!("{operation} {detail}"));
        if self.failing.contains(operation) {
            return Err(ContourError::engine(operation, "simulated failure"));
        }
        Ok(())
    }

    fn lookup(&self, path: &Path) -> Option<&Dataset> {
        if is_file_backed(path) && !path.is_file() {
            return None;
        }
        self.datasets.get(path)
    }

    fn lookup_mut(&mut self, path: &Path) -> Option<&mut Dataset> {
        if is_file_backed(path) && !path.is_file() {
            return None;
        }
        self.datasets.get_mut(path)
    }

    fn get(&self, operation: &str, dataset: &DatasetHandle) -> Result<&Dataset> {
        self.lookup(&dataset.path())
            .ok_or_else(|| ContourError::engine(operation, format!("{dataset} does not exist")))
    }

    fn layer(&self, operation: &str, dataset: &DatasetHandle) -> Result<&Layer> {
        match self.get(operation, dataset)? {
            Dataset::Lines(layer) => Ok(layer),
            _ => Err(ContourError::engine(operation, format!("{dataset} is not a line dataset"))),
        }
    }

    fn layer_mut(&mut self, operation: &str, dataset: &DatasetHandle) -> Result<&mut Layer> {
        match self.lookup_mut(&dataset.path()) {
            Some(Dataset::Lines(layer)) => Ok(layer),
            _ => Err(ContourError::engine(operation, format!("{dataset} is not a line dataset"))),
        }
    }

    fn polygons(&self, operation: &str, dataset: &DatasetHandle) -> Result<&Polygons> {
        match self.get(operation, dataset)? {
            Dataset::Polygons(p) => Ok(p),
            _ => Err(ContourError::engine(operation, format!("{dataset} is not a polygon dataset"))),
        }
    }

    fn mosaic_mut(&mut self, operation: &str, dataset: &DatasetHandle) -> Result<&mut Dataset> {
        match self.datasets.get_mut(&dataset.path()) {
            Some(ds @ Dataset::Mosaic { .. }) => Ok(ds),
            _ => Err(ContourError::engine(operation, format!("{dataset} is not a mosaic"))),
        }
    }

    /// Store an output, replacing whatever was there.
    fn put(&mut self, operation: &str, dataset: &DatasetHandle, value: Dataset) -> Result<()> {
        let path = dataset.path();
        if dataset.name.is_some() && !is_file_backed(&path) {
            let parent_ok = path
                .parent()
                .and_then(|p| self.datasets.get(p))
                .is_some_and(|d| matches!(d, Dataset::Container | Dataset::FeatureDataset));
            if !parent_ok {
                return Err(ContourError::engine(
                    operation,
                    format!("parent of {dataset} does not exist"),
                ));
            }
        }
        if self.lookup(&path).is_some() && !self.overwrite {
            return Err(ContourError::engine(operation, format!("{dataset} already exists")));
        }
        self.remove_tree(&path);
        self.datasets.insert(path, value);
        Ok(())
    }

    fn remove_tree(&mut self, path: &Path) {
        self.datasets.retain(|k, _| !k.starts_with(path));
    }

    /// Store a file-backed layer and write it with its companion files.
    fn put_file(&mut self, operation: &str, path: &Path, layer: Layer, companions: &[&str]) -> Result<()> {
        if !path.parent().is_some_and(Path::is_dir) {
            return Err(ContourError::engine(
                operation,
                format!("folder of {} does not exist", path.display()),
            ));
        }
        write_layer(path, &layer)?;
        for suffix in companions {
            let companion = companion_path(path, suffix);
            std::fs::write(&companion, format!("{suffix}\n"))
                .map_err(|e| ContourError::io(&companion, e))?;
        }
        self.datasets.insert(path.to_path_buf(), Dataset::Lines(layer));
        Ok(())
    }

    fn rewrite_if_file(&self, dataset: &DatasetHandle) -> Result<()> {
        let path = dataset.path();
        if is_file_backed(&path) {
            if let Some(Dataset::Lines(layer)) = self.lookup(&path) {
                write_layer(&path, layer)?;
            }
        }
        Ok(())
    }

    fn feet_per_unit(&self) -> f64 {
        if self.crs.linear_unit == "Meter" {
            3.280833333
        } else {
            1.0
        }
    }
}

const SHAPEFILE_COMPANIONS: [&str; 6] = [".shx", ".dbf", ".shp.xml", ".sbx", ".sbn", ".cpg"];
const DRAWING_COMPANIONS: [&str; 1] = [".dwg.xml"];

fn is_file_backed(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e == "shp" || e == "dwg" || e == "geojson")
}

/// `<dir>/<stem><suffix>` for a suffix such as `.shx` or `.shp.xml`.
fn companion_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.with_extension("");
    PathBuf::from(format!("{}{suffix}", stem.display()))
}

fn write_layer(path: &Path, layer: &Layer) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(layer)
        .map_err(|e| ContourError::engine("write", e.to_string()))?;
    std::fs::write(path, bytes).map_err(|e| ContourError::io(path, e))
}

fn satisfies(predicate: &Predicate, attrs: &BTreeMap<String, Value>) -> bool {
    match predicate {
        Predicate::LessThan { field, value } => attrs
            .get(field)
            .and_then(Value::as_f64)
            .is_some_and(|v| v < *value),
        Predicate::InSet { field, values } => attrs
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|v| values.iter().any(|x| x == v)),
    }
}

fn as_integer(value: Option<&Value>) -> Option<i64> {
    value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
}

impl GeometryEngine for SimulatedEngine {
    fn name(&self) -> &str {
        "simulated"
    }

    fn check_out_extension(&mut self, extension: &str) -> Result<()> {
        self.call("check_out_extension", extension)?;
        self.extensions.push(extension.to_string());
        Ok(())
    }

    fn check_in_extension(&mut self, extension: &str) -> Result<()> {
        self.call("check_in_extension", extension)?;
        let before = self.extensions.len();
        self.extensions.retain(|e| e != extension);
        if self.extensions.len() == before {
            return Err(ContourError::engine(
                "check_in_extension",
                format!("{extension} is not checked out"),
            ));
        }
        Ok(())
    }

    fn set_overwrite_output(&mut self, enabled: bool) -> Result<()> {
        self.call("set_overwrite_output", enabled)?;
        self.overwrite = enabled;
        Ok(())
    }

    fn parallel_processing_factor(&mut self) -> Result<Option<String>> {
        self.call("parallel_processing_factor", "")?;
        Ok(self.parallel.clone())
    }

    fn set_parallel_processing_factor(&mut self, factor: Option<String>) -> Result<()> {
        self.call("set_parallel_processing_factor", format!("{factor:?}"))?;
        self.parallel = factor;
        Ok(())
    }

    fn exists(&mut self, dataset: &DatasetHandle) -> Result<bool> {
        self.call("exists", dataset)?;
        Ok(self.lookup(&dataset.path()).is_some())
    }

    fn delete(&mut self, dataset: &DatasetHandle) -> Result<()> {
        self.call("delete", dataset)?;
        let path = dataset.path();
        if is_file_backed(&path) {
            std::fs::remove_file(&path).map_err(|e| ContourError::io(&path, e))?;
        }
        self.remove_tree(&path);
        Ok(())
    }

    fn compact(&mut self, container: &DatasetHandle) -> Result<()> {
        self.call("compact", container)?;
        self.get("compact", container).map(|_| ())
    }

    fn create_container(&mut self, container: &DatasetHandle) -> Result<()> {
        self.call("create_container", container)?;
        self.put("create_container", container, Dataset::Container)
    }

    fn create_feature_dataset(&mut self, dataset: &DatasetHandle, srs: SpatialReference) -> Result<()> {
        self.call("create_feature_dataset", format!("{dataset} {srs}"))?;
        self.put("create_feature_dataset", dataset, Dataset::FeatureDataset)
    }

    fn copy_features(&mut self, input: &DatasetHandle, output: &DatasetHandle) -> Result<()> {
        self.call("copy_features", format!("{input} -> {output}"))?;
        let copy = self.get("copy_features", input)?.clone();
        self.put("copy_features", output, copy)
    }

    fn list_feature_classes(&mut self, dataset: &DatasetHandle) -> Result<Vec<String>> {
        self.call("list_feature_classes", dataset)?;
        let parent = dataset.path();
        let mut names: Vec<String> = self
            .datasets
            .iter()
            .filter(|(path, ds)| {
                path.parent() == Some(parent.as_path()) && matches!(ds, Dataset::Lines(_))
            })
            .filter_map(|(path, _)| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        Ok(names)
    }

    fn list_fields(&mut self, dataset: &DatasetHandle) -> Result<Vec<String>> {
        self.call("list_fields", dataset)?;
        match self.get("list_fields", dataset)? {
            Dataset::Lines(layer) => Ok(layer.fields.clone()),
            Dataset::Polygons(p) => Ok(p.fields.clone()),
            _ => Ok(Vec::new()),
        }
    }

    fn set_raster_nodata(&mut self, raster: &Path, value: f64) -> Result<()> {
        self.call("set_raster_nodata", format!("{} {value}", raster.display()))?;
        if !raster.is_file() {
            return Err(ContourError::engine("set_raster_nodata", "raster not found"));
        }
        self.rasters_touched += 1;
        Ok(())
    }

    fn build_mosaic(&mut self, mosaic: &DatasetHandle, raster_dir: &Path) -> Result<()> {
        self.call("build_mosaic", mosaic)?;
        if list_rasters(raster_dir)?.is_empty() {
            return Err(ContourError::engine("build_mosaic", "no rasters found"));
        }
        let crs = self.crs.clone();
        self.put(
            "build_mosaic",
            mosaic,
            Dataset::Mosaic {
                crs,
                nodata: None,
                footprints: false,
            },
        )
    }

    fn mosaic_crs(&mut self, mosaic: &DatasetHandle) -> Result<CoordinateSystem> {
        self.call("mosaic_crs", mosaic)?;
        match self.get("mosaic_crs", mosaic)? {
            Dataset::Mosaic { crs, .. } => Ok(crs.clone()),
            _ => Err(ContourError::engine("mosaic_crs", "not a mosaic")),
        }
    }

    fn compute_statistics(&mut self, mosaic: &DatasetHandle) -> Result<()> {
        self.call("compute_statistics", mosaic)?;
        self.mosaic_mut("compute_statistics", mosaic)?;
        self.statistics_factor = Some(self.parallel.clone());
        Ok(())
    }

    fn define_mosaic_nodata(&mut self, mosaic: &DatasetHandle, value: f64) -> Result<()> {
        self.call("define_mosaic_nodata", mosaic)?;
        if let Dataset::Mosaic { nodata, .. } = self.mosaic_mut("define_mosaic_nodata", mosaic)? {
            *nodata = Some(value);
        }
        Ok(())
    }

    fn build_footprints(&mut self, mosaic: &DatasetHandle, _params: &FootprintParams) -> Result<()> {
        self.call("build_footprints", mosaic)?;
        if let Dataset::Mosaic {
            nodata, footprints, ..
        } = self.mosaic_mut("build_footprints", mosaic)?
        {
            if nodata.is_none() {
                return Err(ContourError::engine("build_footprints", "no NoData value defined"));
            }
            *footprints = true;
        }
        Ok(())
    }

    fn export_boundary(&mut self, mosaic: &DatasetHandle, output: &DatasetHandle) -> Result<()> {
        self.call("export_boundary", format!("{mosaic} -> {output}"))?;
        match self.get("export_boundary", mosaic)? {
            Dataset::Mosaic {
                footprints: true, ..
            } => {}
            _ => return Err(ContourError::engine("export_boundary", "footprints not built")),
        }
        let boundary = Polygons {
            fields: vec!["Shape_Area".into()],
            tiles: GRID_TILES.iter().map(|t| t.to_string()).collect(),
            srs: None,
        };
        self.put("export_boundary", output, Dataset::Polygons(boundary))
    }

    fn extract_contours(
        &mut self,
        raster: &DatasetHandle,
        output: &DatasetHandle,
        params: &ContourParams,
    ) -> Result<()> {
        self.call("extract_contours", format!("{raster} -> {output} z={}", params.z_factor))?;
        self.mosaic_mut("extract_contours", raster)?;
        let features = TERRAIN
            .iter()
            .enumerate()
            .map(|(i, (elevation, length, parts))| Line {
                length: *length,
                parts: *parts,
                attrs: BTreeMap::from([
                    ("Id".to_string(), json!(i)),
                    ("Contour".to_string(), json!(*elevation as f64)),
                    ("Shape_Length".to_string(), json!(length)),
                ]),
            })
            .collect();
        let layer = Layer {
            fields: vec!["Id".into(), "Contour".into(), "Shape_Length".into()],
            features,
            srs: None,
        };
        self.put("extract_contours", output, Dataset::Lines(layer))
    }

    fn smooth_lines(
        &mut self,
        input: &DatasetHandle,
        output: &DatasetHandle,
        _params: &SmoothParams,
    ) -> Result<()> {
        self.call("smooth_lines", format!("{input} -> {output}"))?;
        let mut layer = self.layer("smooth_lines", input)?.clone();
        layer.fields.push("InLine_FID".into());
        for (i, line) in layer.features.iter_mut().enumerate() {
            line.attrs.insert("InLine_FID".into(), json!(i));
        }
        self.put("smooth_lines", output, Dataset::Lines(layer))
    }

    fn select_by_attribute(
        &mut self,
        dataset: &DatasetHandle,
        predicate: &Predicate,
    ) -> Result<Selection> {
        self.call("select_by_attribute", format!("{dataset} {}", predicate.to_where_clause()))?;
        let count = self
            .layer("select_by_attribute", dataset)?
            .features
            .iter()
            .filter(|l| satisfies(predicate, &l.attrs))
            .count() as u64;
        self.selection = Some((dataset.path(), predicate.clone()));
        Ok(Selection {
            dataset: dataset.clone(),
            where_clause: predicate.to_where_clause(),
            count,
        })
    }

    fn delete_selected(&mut self, selection: &Selection) -> Result<u64> {
        self.call("delete_selected", &selection.dataset)?;
        let predicate = match self.selection.take() {
            Some((path, predicate)) if path == selection.dataset.path() => predicate,
            _ => return Err(ContourError::engine("delete_selected", "no active selection")),
        };
        let layer = self.layer_mut("delete_selected", &selection.dataset)?;
        let before = layer.features.len();
        layer.features.retain(|l| !satisfies(&predicate, &l.attrs));
        Ok((before - layer.features.len()) as u64)
    }

    fn select_to(
        &mut self,
        input: &DatasetHandle,
        output: &DatasetHandle,
        predicate: &Predicate,
    ) -> Result<u64> {
        self.call("select_to", format!("{input} -> {output}"))?;
        let mut layer = self.layer("select_to", input)?.clone();
        layer.features.retain(|l| satisfies(predicate, &l.attrs));
        let count = layer.features.len() as u64;
        let path = output.path();
        if is_file_backed(&path) {
            self.put_file("select_to", &path, layer, &SHAPEFILE_COMPANIONS)?;
        } else {
            self.put("select_to", output, Dataset::Lines(layer))?;
        }
        Ok(count)
    }

    fn reproject(
        &mut self,
        input: &DatasetHandle,
        output: &DatasetHandle,
        srs: SpatialReference,
    ) -> Result<()> {
        self.call("reproject", format!("{input} -> {output} {srs}"))?;
        let projected = match self.get("reproject", input)?.clone() {
            Dataset::Lines(mut layer) => {
                layer.srs = Some(srs);
                Dataset::Lines(layer)
            }
            Dataset::Polygons(mut p) => {
                p.srs = Some(srs);
                Dataset::Polygons(p)
            }
            _ => return Err(ContourError::engine("reproject", "not a feature class")),
        };
        self.put("reproject", output, projected)
    }

    fn recalculate_extent(&mut self, dataset: &DatasetHandle) -> Result<()> {
        self.call("recalculate_extent", dataset)?;
        self.get("recalculate_extent", dataset).map(|_| ())
    }

    fn repair_geometry(&mut self, dataset: &DatasetHandle) -> Result<()> {
        self.call("repair_geometry", dataset)?;
        self.get("repair_geometry", dataset).map(|_| ())
    }

    fn add_field(&mut self, dataset: &DatasetHandle, field: &FieldSpec) -> Result<()> {
        self.call("add_field", format!("{dataset} {}", field.name))?;
        let layer = self.layer_mut("add_field", dataset)?;
        if layer.has_field(&field.name) {
            return Err(ContourError::engine(
                "add_field",
                format!("field {} already exists", field.name),
            ));
        }
        layer.fields.push(field.name.clone());
        for line in &mut layer.features {
            line.attrs.insert(field.name.clone(), Value::Null);
        }
        Ok(())
    }

    fn calculate_field(
        &mut self,
        dataset: &DatasetHandle,
        field: &str,
        expression: &FieldExpression,
    ) -> Result<()> {
        self.call("calculate_field", format!("{dataset} {field}"))?;
        let layer = self.layer_mut("calculate_field", dataset)?;
        let source = match expression {
            FieldExpression::CopyField { source } => source,
            FieldExpression::ModuloClassify { source, .. } => source,
        };
        if !layer.has_field(field) || !layer.has_field(source) {
            return Err(ContourError::engine("calculate_field", "field does not exist"));
        }
        for line in &mut layer.features {
            let value = match expression {
                FieldExpression::CopyField { source } => match as_integer(line.attrs.get(source)) {
                    Some(v) => json!(v),
                    None => Value::Null,
                },
                FieldExpression::ModuloClassify {
                    source,
                    rules,
                    fallback,
                } => {
                    let v = as_integer(line.attrs.get(source)).unwrap_or_default();
                    let class = rules
                        .iter()
                        .find(|(m, _)| v.rem_euclid(*m) == 0)
                        .map_or(fallback, |(_, c)| c);
                    json!(class)
                }
            };
            line.attrs.insert(field.to_string(), value);
        }
        Ok(())
    }

    fn delete_fields(&mut self, dataset: &DatasetHandle, fields: &[String]) -> Result<()> {
        self.call("delete_fields", format!("{dataset} {}", fields.join(",")))?;
        match self.lookup_mut(&dataset.path()) {
            Some(Dataset::Lines(layer)) => {
                for field in fields {
                    if !layer.has_field(field) {
                        return Err(ContourError::engine("delete_fields", format!("no field {field}")));
                    }
                    layer.fields.retain(|f| f != field);
                    for line in &mut layer.features {
                        line.attrs.remove(field);
                    }
                }
                Ok(())
            }
            Some(Dataset::Polygons(p)) => {
                for field in fields {
                    if !p.fields.contains(field) {
                        return Err(ContourError::engine("delete_fields", format!("no field {field}")));
                    }
                    p.fields.retain(|f| f != field);
                }
                Ok(())
            }
            _ => Err(ContourError::engine("delete_fields", format!("{dataset} does not exist"))),
        }
    }

    fn split_by_grid(
        &mut self,
        input: &DatasetHandle,
        grid: &DatasetHandle,
        split_field: &str,
        workspace: &DatasetHandle,
    ) -> Result<Vec<String>> {
        self.call("split_by_grid", format!("{input} by {grid}"))?;
        let grid_tiles: Vec<String> = {
            let polygons = self.polygons("split_by_grid", grid)?;
            if !polygons.fields.iter().any(|f| f == split_field) {
                return Err(ContourError::engine("split_by_grid", format!("no field {split_field}")));
            }
            polygons.tiles.iter().take(DATA_TILES).cloned().collect()
        };
        let layer = self.layer("split_by_grid", input)?.clone();

        let mut per_tile: BTreeMap<String, Vec<Line>> = BTreeMap::new();
        for line in layer.features {
            let elevation = as_integer(line.attrs.get("Elevation"))
                .or_else(|| as_integer(line.attrs.get("Contour")))
                .unwrap_or_default();
            let tile = &grid_tiles[elevation.rem_euclid(grid_tiles.len() as i64) as usize];
            per_tile.entry(tile.clone()).or_default().push(line);
        }

        let mut names = Vec::new();
        for (tile, features) in per_tile {
            let fc = Layer {
                fields: layer.fields.clone(),
                features,
                srs: layer.srs,
            };
            self.put("split_by_grid", &workspace.child(&tile), Dataset::Lines(fc))?;
            names.push(tile);
        }
        Ok(names)
    }

    fn multipart_to_singlepart(&mut self, input: &DatasetHandle, output: &DatasetHandle) -> Result<()> {
        self.call("multipart_to_singlepart", format!("{input} -> {output}"))?;
        let source = self.layer("multipart_to_singlepart", input)?.clone();
        let mut fields = source.fields.clone();
        fields.push("ORIG_FID".into());
        let mut features = Vec::new();
        for (i, line) in source.features.into_iter().enumerate() {
            for _ in 0..line.parts.max(1) {
                let mut attrs = line.attrs.clone();
                attrs.insert("ORIG_FID".into(), json!(i));
                features.push(Line {
                    length: line.length / f64::from(line.parts.max(1)),
                    parts: 1,
                    attrs,
                });
            }
        }
        let layer = Layer {
            fields,
            features,
            srs: source.srs,
        };
        self.put("multipart_to_singlepart", output, Dataset::Lines(layer))
    }

    fn recalculate_length(&mut self, dataset: &DatasetHandle, field: &str, unit: LengthUnit) -> Result<()> {
        self.call("recalculate_length", format!("{dataset} {field}"))?;
        let factor = match unit {
            LengthUnit::FeetUs => self.feet_per_unit(),
            LengthUnit::Meters => 1.0 / self.feet_per_unit(),
        };
        let layer = self.layer_mut("recalculate_length", dataset)?;
        if !layer.has_field(field) {
            return Err(ContourError::engine("recalculate_length", format!("no field {field}")));
        }
        for line in &mut layer.features {
            let length = (line.length * factor * 1000.0).round() / 1000.0;
            line.attrs.insert(field.to_string(), json!(length));
        }
        self.rewrite_if_file(dataset)
    }

    fn export_vector(&mut self, input: &DatasetHandle, path: &Path) -> Result<()> {
        self.call("export_vector", format!("{input} -> {}", path.display()))?;
        let mut layer = self.layer("export_vector", input)?.clone();
        // Shapefile field names are capped at ten characters.
        for field in &mut layer.fields {
            if field == "Shape_Length" {
                *field = "Shape_Leng".into();
            }
        }
        for line in &mut layer.features {
            if let Some(v) = line.attrs.remove("Shape_Length") {
                line.attrs.insert("Shape_Leng".into(), v);
            }
        }
        self.put_file("export_vector", path, layer, &SHAPEFILE_COMPANIONS)
    }

    fn export_cad(&mut self, input: &DatasetHandle, format: &str, path: &Path) -> Result<()> {
        self.call("export_cad", format!("{input} -> {} {format}", path.display()))?;
        let layer = self.layer("export_cad", input)?.clone();
        self.put_file("export_cad", path, layer, &DRAWING_COMPANIONS)
    }

    fn intersect(&mut self, a: &DatasetHandle, b: &DatasetHandle, output: &DatasetHandle) -> Result<()> {
        self.call("intersect", format!("{a} x {b} -> {output}"))?;
        let left = self.polygons("intersect", a)?.clone();
        let right = self.polygons("intersect", b)?.clone();
        let mut fields = left.fields.clone();
        fields.extend(right.fields.iter().cloned());
        let result = Polygons {
            fields,
            tiles: left.tiles.intersection(&right.tiles).cloned().collect(),
            srs: right.srs,
        };
        self.put("intersect", output, Dataset::Polygons(result))
    }

    fn dissolve(&mut self, input: &DatasetHandle, output: &DatasetHandle) -> Result<()> {
        self.call("dissolve", format!("{input} -> {output}"))?;
        let mut dissolved = self.polygons("dissolve", input)?.clone();
        dissolved.fields.clear();
        self.put("dissolve", output, Dataset::Polygons(dissolved))
    }

    fn clip(&mut self, target: &DatasetHandle, clipper: &DatasetHandle, output: &DatasetHandle) -> Result<()> {
        self.call("clip", format!("{target} by {clipper} -> {output}"))?;
        let mut clipped = self.polygons("clip", target)?.clone();
        let coverage = self.polygons("clip", clipper)?.tiles.clone();
        clipped.tiles.retain(|t| coverage.contains(t));
        self.put("clip", output, Dataset::Polygons(clipped))
    }

    fn delete_disjoint(&mut self, target: &DatasetHandle, others: &[DatasetHandle]) -> Result<u64> {
        self.call("delete_disjoint", target)?;
        let mut touched = BTreeSet::new();
        for other in others {
            let layer = self.layer("delete_disjoint", other)?;
            if !layer.features.is_empty() {
                touched.insert(other.leaf_name());
            }
        }
        match self.lookup_mut(&target.path()) {
            Some(Dataset::Polygons(p)) => {
                let before = p.tiles.len();
                p.tiles.retain(|t| touched.contains(t));
                Ok((before - p.tiles.len()) as u64)
            }
            _ => Err(ContourError::engine("delete_disjoint", format!("{target} does not exist"))),
        }
    }

    fn export_geojson(&mut self, input: &DatasetHandle, path: &Path) -> Result<()> {
        self.call("export_geojson", format!("{input} -> {}", path.display()))?;
        let polygons = self.polygons("export_geojson", input)?;
        let features: Vec<Value> = polygons
            .tiles
            .iter()
            .map(|tile| {
                let properties: serde_json::Map<String, Value> = polygons
                    .fields
                    .iter()
                    .map(|f| {
                        let value = if *f == self.split_field {
                            tile.parse::<i64>().map_or_else(|_| json!(tile), |n| json!(n))
                        } else {
                            json!(0)
                        };
                        (f.clone(), value)
                    })
                    .collect();
                json!({ "type": "Feature", "properties": properties, "geometry": null })
            })
            .collect();
        let document = json!({ "type": "FeatureCollection", "features": features });
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| ContourError::engine("export_geojson", e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| ContourError::io(path, e))
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// A throwaway data root with one locality's rasters and a seeded grid.
pub struct Fixture {
    pub root: PathBuf,
    pub config: AppConfig,
}

impl Fixture {
    pub const STATE: &'static str = "OH";
    pub const LOCALITY: &'static str = "Adams";
    pub const TARGET: SpatialReference = SpatialReference(3735);

    pub fn new(label: &str) -> Self {
        let root = std::env::temp_dir().join(format!("ck-{label}-{}", uuid::Uuid::now_v7()));
        let mut config = AppConfig::default();
        config.paths.data_root = root.join("data");
        config.paths.grids_root = root.join("grids");

        let raster_dir = config
            .paths
            .data_root
            .join(Self::STATE)
            .join(format!("{}_Contours", Self::LOCALITY))
            .join(&config.paths.raster_folder);
        std::fs::create_dir_all(&raster_dir).unwrap();
        for name in ["n40w084.tif", "n40w085.tif"] {
            std::fs::write(raster_dir.join(name), b"raster").unwrap();
        }
        Self { root, config }
    }

    pub fn context(&self, step: Option<&str>) -> RunContext {
        self.context_with(&self.config, step)
    }

    pub fn context_with(&self, config: &AppConfig, step: Option<&str>) -> RunContext {
        RunContext::new(
            RunRequest {
                state: Self::STATE.into(),
                locality: Self::LOCALITY.into(),
                target_srs: Self::TARGET,
                start_step: step.map(String::from),
            },
            config,
        )
        .unwrap()
    }

    pub fn engine(&self) -> SimulatedEngine {
        SimulatedEngine::new().with_grid(&self.config.paths.grids_root, Self::TARGET)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}
