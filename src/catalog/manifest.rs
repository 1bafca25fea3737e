//! Model manifest documents and file name derivation
//!
//! A manifest describes one model version: for every backend it lists the
//! scales, the network name templates and the tile sizes (`blocks`) the
//! application may ask for. Each combination is a separate file on the CDN:
//!
//! ```text
//! {shortName}-v{version}-{net with [H] [W] [S] [R] [C] substituted}
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

use super::tensorrt::TensorRtTarget;

/// Description used when a manifest has none
pub const NO_DESCRIPTION: &str = "<no description provided by topaz>";

/// A JSON scalar that manifests use interchangeably as number or string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Integer value
    Int(i64),
    /// Non-integer number
    Float(f64),
    /// String value
    Text(String),
}

impl Scalar {
    /// Integer value, if this scalar holds one (strings are parsed).
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(v) => u64::try_from(*v).ok(),
            Self::Float(_) => None,
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            // Debug keeps the trailing ".0" on whole floats ("1.0", not "1").
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// `gui` section of a manifest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuiInfo {
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Description
    #[serde(default)]
    pub desc: Option<String>,
}

/// Network name templates, given either as a list or as object keys
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Nets {
    /// `["name-fp16-[W]x[H].tz", ...]`
    List(Vec<String>),
    /// `{"name-fp16-[W]x[H].tz": {...}, ...}`
    Map(serde_json::Map<String, serde_json::Value>),
}

impl Default for Nets {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl Nets {
    /// Template names in document order.
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::List(names) => names.iter().map(String::as_str).collect(),
            Self::Map(map) => map.keys().map(String::as_str).collect(),
        }
    }
}

/// One scale of a backend
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScaleSpec {
    /// Network name templates
    #[serde(default)]
    pub nets: Nets,
    /// Flattened `(width, height)` pairs
    #[serde(default)]
    pub blocks: Vec<Scalar>,
}

/// Per-backend section of a manifest
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendSpec {
    /// Flattened `(row, column)` engine capability pairs (TensorRT only)
    #[serde(default)]
    pub capabilities: Vec<Scalar>,
    /// Scales keyed by factor ("1", "2", "4", ...)
    #[serde(default)]
    pub scales: BTreeMap<String, ScaleSpec>,
}

/// A model manifest (one `*.json` document with a `backends` key)
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    /// Model id, e.g. "alq"
    #[serde(rename = "shortName")]
    pub short_name: String,
    /// Model version
    pub version: Scalar,
    /// Fallback display name
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    /// UI metadata
    #[serde(default)]
    pub gui: Option<GuiInfo>,
    /// Backend sections keyed by backend name
    pub backends: BTreeMap<String, BackendSpec>,
}

impl Manifest {
    /// Model key used by `--include`: `<shortName>-<version>`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.short_name, self.version)
    }

    /// Human readable name: `gui.name`, else `displayName`, else the id.
    pub fn name(&self) -> &str {
        let gui_name = self.gui.as_ref().and_then(|g| g.name.as_deref());
        [gui_name, self.display_name.as_deref()]
            .into_iter()
            .flatten()
            .find(|name| !name.is_empty())
            .unwrap_or(&self.short_name)
    }

    /// Description from `gui.desc`.
    pub fn description(&self) -> &str {
        self.gui
            .as_ref()
            .and_then(|g| g.desc.as_deref())
            .unwrap_or(NO_DESCRIPTION)
    }

    /// Whether the manifest has a section for `backend`.
    pub fn supports(&self, backend: &str) -> bool {
        self.backends.contains_key(backend)
    }

    /// Every file this model needs for `backend`, in derivation order.
    ///
    /// With a TensorRT target only capability pairs matching it are kept.
    pub fn files_for(&self, backend: &str, tensorrt: Option<&TensorRtTarget>) -> Vec<String> {
        let Some(spec) = self.backends.get(backend) else {
            return Vec::new();
        };

        let capabilities: Vec<(&Scalar, &Scalar)> = pairs(&spec.capabilities)
            .filter(|(row, column)| tensorrt.map_or(true, |t| t.accepts(row, column)))
            .collect();
        let version = self.version.to_string();

        let mut files = Vec::new();
        for (scale, scale_spec) in &spec.scales {
            for net in scale_spec.nets.names() {
                for (width, height) in pairs(&scale_spec.blocks) {
                    let template = NetTemplate {
                        net,
                        scale,
                        width,
                        height,
                    };
                    if spec.capabilities.is_empty() {
                        files.push(template.filename(&self.short_name, &version, None));
                    } else {
                        for &(row, column) in &capabilities {
                            files.push(template.filename(
                                &self.short_name,
                                &version,
                                Some((row, column)),
                            ));
                        }
                    }
                }
            }
        }
        files
    }
}

struct NetTemplate<'a> {
    net: &'a str,
    scale: &'a str,
    width: &'a Scalar,
    height: &'a Scalar,
}

impl NetTemplate<'_> {
    fn filename(&self, id: &str, version: &str, capability: Option<(&Scalar, &Scalar)>) -> String {
        let (row, column) = match capability {
            Some((row, column)) => (row.to_string(), column.to_string()),
            None => ("0".to_string(), "0".to_string()),
        };
        let suffix = self
            .net
            .replace("[H]", &self.height.to_string())
            .replace("[W]", &self.width.to_string())
            .replace("[S]", self.scale)
            .replace("[R]", &row)
            .replace("[C]", &column);
        format!("{id}-v{version}-{suffix}")
    }
}

/// Consecutive pairs of a flattened list; a trailing odd element is ignored.
fn pairs(values: &[Scalar]) -> impl Iterator<Item = (&Scalar, &Scalar)> {
    values.chunks_exact(2).map(|pair| (&pair[0], &pair[1]))
}
