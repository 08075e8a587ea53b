//! Core domain types for contour processing runs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ContourError;

// ---------------------------------------------------------------------------
// SpatialReference
// ---------------------------------------------------------------------------

/// A spatial reference identified by its well-known ID (EPSG/ESRI code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpatialReference(pub u32);

impl SpatialReference {
    /// Geographic WGS 84, used for the public tile index.
    pub const WGS84: Self = Self(4326);

    /// The numeric well-known ID.
    pub fn wkid(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SpatialReference {
    type Err = ContourError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        digits.parse::<u32>().map(Self).map_err(|_| {
            ContourError::configuration(format!(
                "invalid spatial reference `{s}`: expected a numeric well-known ID (e.g. 6570)"
            ))
        })
    }
}

/// Coordinate system as reported by the engine for a raster or dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSystem {
    /// Human-readable name (e.g. "NAD_1983_UTM_Zone_17N").
    pub name: String,
    /// Linear unit name (e.g. "Meter", "Foot_US").
    pub linear_unit: String,
    /// Well-known ID, when the engine knows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wkid: Option<u32>,
}

// ---------------------------------------------------------------------------
// DatasetHandle
// ---------------------------------------------------------------------------

/// Opaque reference to a persistent dataset: a container (geodatabase or
/// folder) plus an optional name inside it.
///
/// A handle without a name refers to the container itself. Nested names use
/// `/` (e.g. `Contour_Tiles/1234`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetHandle {
    pub container: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DatasetHandle {
    /// Handle for a container (geodatabase, folder) itself.
    pub fn container(path: impl Into<PathBuf>) -> Self {
        Self {
            container: path.into(),
            name: None,
        }
    }

    /// Handle for a named dataset inside a container.
    pub fn new(container: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: Some(name.into()),
        }
    }

    /// Handle for a standalone file (shapefile, drawing, GeoJSON).
    pub fn file(path: &Path) -> Self {
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(file)) => {
                Self::new(parent, file.to_string_lossy().into_owned())
            }
            _ => Self::container(path),
        }
    }

    /// Handle for a dataset nested under this one.
    pub fn child(&self, name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        Self {
            container: self.container.clone(),
            name: Some(match &self.name {
                Some(parent) => format!("{parent}/{name}"),
                None => name.to_string(),
            }),
        }
    }

    /// Full filesystem-style path of the dataset.
    pub fn path(&self) -> PathBuf {
        match &self.name {
            Some(name) => name
                .split('/')
                .fold(self.container.clone(), |acc, part| acc.join(part)),
            None => self.container.clone(),
        }
    }

    /// Last component of the name (or the container's file name).
    pub fn leaf_name(&self) -> String {
        match &self.name {
            Some(name) => name.rsplit('/').next().unwrap_or(name).to_string(),
            None => self
                .container
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for DatasetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().display())
    }
}

// ---------------------------------------------------------------------------
// LineType
// ---------------------------------------------------------------------------

/// Cartographic classification of a contour line, derived from its elevation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineType {
    #[serde(rename = "Index-10")]
    Index10,
    #[serde(rename = "Intermediate-2")]
    Intermediate2,
    #[serde(rename = "Intermediate-1")]
    Intermediate1,
}

impl LineType {
    /// Attribute field holding the classification.
    pub const FIELD: &'static str = "Line_Type";

    /// Maximum text length of the field.
    pub const FIELD_LENGTH: u32 = 20;

    /// Ordered `modulus → class` rules; the first matching modulus wins.
    pub const RULES: [(i64, LineType); 2] = [(10, Self::Index10), (2, Self::Intermediate2)];

    /// Class used when no rule matches.
    pub const FALLBACK: LineType = Self::Intermediate1;

    /// Classes retained in the 2-foot deliverable.
    pub const TWO_FOOT: [LineType; 2] = [Self::Index10, Self::Intermediate2];

    /// Classify an elevation value.
    pub fn from_elevation(elevation: i64) -> Self {
        Self::RULES
            .iter()
            .find(|(modulus, _)| elevation.rem_euclid(*modulus) == 0)
            .map(|(_, line_type)| *line_type)
            .unwrap_or(Self::FALLBACK)
    }

    /// Attribute value written to the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index10 => "Index-10",
            Self::Intermediate2 => "Intermediate-2",
            Self::Intermediate1 => "Intermediate-1",
        }
    }

    /// Predicate selecting the 2-foot subset.
    pub fn two_foot_predicate() -> Predicate {
        Predicate::InSet {
            field: Self::FIELD.to_string(),
            values: Self::TWO_FOOT.iter().map(|t| t.as_str().to_string()).collect(),
        }
    }

    /// Field expression the engine evaluates to populate `Line_Type`.
    pub fn classification(source_field: &str) -> FieldExpression {
        FieldExpression::ModuloClassify {
            source: source_field.to_string(),
            rules: Self::RULES
                .iter()
                .map(|(modulus, class)| (*modulus, class.as_str().to_string()))
                .collect(),
            fallback: Self::FALLBACK.as_str().to_string(),
        }
    }
}

impl fmt::Display for LineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tile
// ---------------------------------------------------------------------------

/// One cell of the reference tiling grid, identified by its tile number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tile(pub String);

impl Tile {
    /// Build a tile from a split-field attribute value (string or number).
    pub fn from_attribute(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(Self(s.trim().into())),
            serde_json::Value::Number(n) => Some(Self(match n.as_i64() {
                Some(i) => i.to_string(),
                None => n.to_string(),
            })),
            _ => None,
        }
    }

    /// Tile name used for the per-tile feature class and output files.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Fields and predicates
// ---------------------------------------------------------------------------

/// Attribute field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Long,
    Double,
    Text,
}

/// An attribute field to add to a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
}

impl FieldSpec {
    pub fn long(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Long,
            length: None,
        }
    }

    pub fn text(name: impl Into<String>, length: u32) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Text,
            length: Some(length),
        }
    }
}

/// How the engine computes a field's value per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldExpression {
    /// Copy another field's value.
    CopyField { source: String },
    /// Ordered modulus rules over an integer field; first match wins.
    ModuloClassify {
        source: String,
        rules: Vec<(i64, String)>,
        fallback: String,
    },
}

/// Linear units for length recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LengthUnit {
    FeetUs,
    Meters,
}

/// Typed attribute predicate, rendered to a where-clause for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    LessThan { field: String, value: f64 },
    InSet { field: String, values: Vec<String> },
}

impl Predicate {
    /// SQL-style where-clause understood by the engine.
    pub fn to_where_clause(&self) -> String {
        match self {
            Self::LessThan { field, value } => format!("{field} < {value}"),
            Self::InSet { field, values } => values
                .iter()
                .map(|v| format!("{field} = '{}'", v.replace('\'', "''")))
                .collect::<Vec<_>>()
                .join(" Or "),
        }
    }
}
