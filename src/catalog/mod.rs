//! Manifest catalog
//!
//! Loads the model manifests shipped with Topaz Video AI and turns them into
//! backend lists, model lists and the concrete files a backend needs.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub mod manifest;
pub mod tensorrt;

pub use manifest::{Manifest, NO_DESCRIPTION};
pub use tensorrt::{GpuFamily, OsFamily, TensorRtTarget};

/// Base URL every model file is served from
pub const DEFAULT_BASE_URL: &str = "https://veai-models.topazlabs.com/";

/// Catalog errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The manifest directory could not be listed
    #[error("cannot read manifest directory {}: {source}", .path.display())]
    ReadDir {
        /// Directory
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A manifest file could not be read
    #[error("cannot read manifest {}: {source}", .path.display())]
    Read {
        /// Manifest file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A manifest file is not valid JSON or has an unexpected shape
    #[error("malformed manifest {}: {source}", .path.display())]
    Parse {
        /// Manifest file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// The directory contains no model manifests
    #[error("no model manifests found in {}", .path.display())]
    Empty {
        /// Directory
        path: PathBuf,
    },

    /// The requested backend is not listed by any manifest
    #[error("unknown backend '{backend}' (available: {})", .available.join(", "))]
    UnknownBackend {
        /// Requested backend
        backend: String,
        /// Backends found in the manifests
        available: Vec<String>,
    },

    /// `--include` named models the backend does not have
    #[error("unknown model id(s) for backend {backend}: {}", .ids.join(", "))]
    UnknownModels {
        /// Backend
        backend: String,
        /// Ids not found
        ids: Vec<String>,
    },

    /// TensorRT target could not be determined
    #[error("TensorRT: {0}")]
    TensorRt(String),
}

/// A model available for a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    /// Short name, e.g. "alq"
    pub id: String,
    /// Display name
    pub name: String,
    /// Description
    pub desc: String,
    /// Version
    pub version: String,
    /// File names needed for the backend
    pub files: Vec<String>,
}

impl Model {
    /// Key accepted by `--include`: `<id>-<version>`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.id, self.version)
    }
}

/// A file to fetch, before its size is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogFile {
    /// Key of the model the file belongs to
    pub model_key: String,
    /// File name
    pub filename: String,
    /// Download URL
    pub url: String,
}

/// Split a comma separated `--include` value into model keys.
pub fn parse_include(include: &str) -> BTreeSet<String> {
    include
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// All manifests found in a directory
#[derive(Debug, Clone)]
pub struct Catalog {
    manifests: Vec<Manifest>,
    base_url: String,
}

impl Catalog {
    /// Read every `*.json` file in `dir`. Documents without a `backends` key
    /// are not model manifests and are skipped.
    pub fn load(dir: &Path) -> Result<Self, CatalogError> {
        let entries = fs::read_dir(dir).map_err(|source| CatalogError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
            })
            .collect();
        paths.sort();

        let mut manifests = Vec::new();
        for path in paths {
            let text = fs::read_to_string(&path).map_err(|source| CatalogError::Read {
                path: path.clone(),
                source,
            })?;
            if let Some(manifest) = parse_document(&path, &text)? {
                manifests.push(manifest);
            }
        }

        if manifests.is_empty() {
            return Err(CatalogError::Empty {
                path: dir.to_path_buf(),
            });
        }

        debug!(dir = %dir.display(), manifests = manifests.len(), "Catalog loaded");
        Ok(Self::from_manifests(manifests))
    }

    /// Build a catalog from already parsed manifests.
    pub fn from_manifests(manifests: Vec<Manifest>) -> Self {
        Self {
            manifests,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Serve files from another base URL (a mirror, or a local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    /// Loaded manifests.
    pub fn manifests(&self) -> &[Manifest] {
        &self.manifests
    }

    /// Sorted, unique backend names.
    pub fn backends(&self) -> Vec<String> {
        self.manifests
            .iter()
            .flat_map(|m| m.backends.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Fail unless some manifest lists `backend`.
    pub fn ensure_backend(&self, backend: &str) -> Result<(), CatalogError> {
        if self.manifests.iter().any(|m| m.supports(backend)) {
            Ok(())
        } else {
            Err(CatalogError::UnknownBackend {
                backend: backend.to_string(),
                available: self.backends(),
            })
        }
    }

    /// Models with at least one file for `backend`, sorted by key.
    pub fn models(
        &self,
        backend: &str,
        tensorrt: Option<&TensorRtTarget>,
    ) -> Result<Vec<Model>, CatalogError> {
        self.ensure_backend(backend)?;

        let mut models: Vec<Model> = self
            .manifests
            .iter()
            .filter_map(|m| {
                let files = m.files_for(backend, tensorrt);
                (!files.is_empty()).then(|| Model {
                    id: m.short_name.clone(),
                    name: m.name().to_string(),
                    desc: m.description().to_string(),
                    version: m.version.to_string(),
                    files,
                })
            })
            .collect();
        models.sort_by(|a, b| (&a.id, &a.version).cmp(&(&b.id, &b.version)));
        Ok(models)
    }

    /// Files needed for `backend`, optionally restricted to the comma
    /// separated model keys in `include`.
    ///
    /// A file name produced by two models is listed once.
    pub fn files(
        &self,
        backend: &str,
        include: Option<&str>,
        tensorrt: Option<&TensorRtTarget>,
    ) -> Result<Vec<CatalogFile>, CatalogError> {
        self.ensure_backend(backend)?;

        let wanted = include.map(parse_include).unwrap_or_default();
        if !wanted.is_empty() {
            let known: HashSet<String> = self
                .manifests
                .iter()
                .filter(|m| m.supports(backend))
                .map(Manifest::key)
                .collect();
            let unknown: Vec<String> = wanted
                .iter()
                .filter(|id| !known.contains(*id))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(CatalogError::UnknownModels {
                    backend: backend.to_string(),
                    ids: unknown,
                });
            }
        }

        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for manifest in &self.manifests {
            let key = manifest.key();
            if !wanted.is_empty() && !wanted.contains(&key) {
                continue;
            }
            for filename in manifest.files_for(backend, tensorrt) {
                if !seen.insert(filename.clone()) {
                    warn!(filename = %filename, model = %key, "File listed by more than one model");
                    continue;
                }
                files.push(CatalogFile {
                    model_key: key.clone(),
                    url: format!("{}{}", self.base_url, filename),
                    filename,
                });
            }
        }
        Ok(files)
    }
}

/// Parse one JSON document. Returns `None` for documents that are not model
/// manifests (no `backends` key).
pub fn parse_document(path: &Path, text: &str) -> Result<Option<Manifest>, CatalogError> {
    let parse_error = |source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    };
    let value: serde_json::Value = serde_json::from_str(text).map_err(parse_error)?;
    if value.get("backends").is_none() {
        debug!(path = %path.display(), "Skipping document without backends");
        return Ok(None);
    }
    serde_json::from_value(value).map(Some).map_err(parse_error)
}
