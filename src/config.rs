//! Layered configuration
//!
//! Every optional setting resolves through the same layers, first hit wins:
//!
//! 1. the command line flag
//! 2. the environment variable (`TVAI_*`)
//! 3. a platform default (only the manifest directory has one)
//!
//! Anything still unresolved is a [`ConfigError::Missing`], reported before
//! any network activity. The environment lookup is injectable so tests never
//! touch the process environment.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::catalog::GpuFamily;
use crate::downloader::config::{DEFAULT_CONCURRENCY, MAX_ATTEMPTS, MAX_CONCURRENCY};

/// Directory holding the model manifests (`alq-13.json`, ...)
pub const ENV_JSON_DIR: &str = "TVAI_MODEL_DIR";
/// Model data directory files are downloaded into
pub const ENV_MODEL_DIR: &str = "TVAI_MODEL_DATA_DIR";
/// Backend to operate on
pub const ENV_BACKEND: &str = "TVAI_BACKEND";
/// `cf_clearance` cookie value
pub const ENV_COOKIE: &str = "TVAI_COOKIE";

/// A manifest directory candidate is accepted when it contains this file.
pub const MANIFEST_MARKER: &str = "alq-13.json";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required setting was given by no layer
    #[error("{what} is required: pass {flag} or set {env}")]
    Missing {
        /// Setting description
        what: &'static str,
        /// Command line flag
        flag: &'static str,
        /// Environment variable
        env: &'static str,
    },

    /// A directory setting points at something that is not a directory
    #[error("{what} {} does not exist or is not a directory", .path.display())]
    NotADirectory {
        /// Setting description
        what: &'static str,
        /// Offending path
        path: PathBuf,
    },

    /// A setting has an unusable value
    #[error("invalid {what}: {reason}")]
    Invalid {
        /// Setting description
        what: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Which layer produced a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// Command line flag
    Flag,
    /// Environment variable
    Environment,
    /// Built-in platform default
    PlatformDefault,
}

/// A resolved value and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    /// The value
    pub value: T,
    /// Layer that produced it
    pub source: ValueSource,
}

/// Names of one setting across the layers
#[derive(Debug, Clone, Copy)]
pub struct Setting {
    /// Human readable description
    pub what: &'static str,
    /// Command line flag
    pub flag: &'static str,
    /// Environment variable
    pub env: &'static str,
}

/// Manifest directory setting
pub const JSON_DIR: Setting = Setting {
    what: "manifest directory",
    flag: "--json-dir",
    env: ENV_JSON_DIR,
};

/// Model data directory setting
pub const MODEL_DIR: Setting = Setting {
    what: "model data directory",
    flag: "--dir",
    env: ENV_MODEL_DIR,
};

/// Backend setting
pub const BACKEND: Setting = Setting {
    what: "backend",
    flag: "--backend",
    env: ENV_BACKEND,
};

/// Cookie setting
pub const COOKIE: Setting = Setting {
    what: "cf_clearance cookie",
    flag: "--cookie",
    env: ENV_COOKIE,
};

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves settings through flag, environment and platform defaults
pub struct ConfigResolver {
    env: EnvLookup,
    manifest_candidates: Option<Vec<PathBuf>>,
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("manifest_candidates", &self.manifest_candidates)
            .finish_non_exhaustive()
    }
}

impl ConfigResolver {
    /// Resolver reading the real process environment.
    pub fn from_process_env() -> Self {
        Self::with_env(|key| std::env::var(key).ok())
    }

    /// Resolver with a custom environment lookup.
    pub fn with_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            env: Box::new(lookup),
            manifest_candidates: None,
        }
    }

    /// Replace the built-in manifest directory candidates.
    pub fn with_manifest_candidates(mut self, candidates: Vec<PathBuf>) -> Self {
        self.manifest_candidates = Some(candidates);
        self
    }

    fn lookup(&self, key: &str) -> Option<String> {
        (self.env)(key).filter(|v| !v.trim().is_empty())
    }

    /// Resolve a string setting through flag and environment.
    pub fn resolve_string(
        &self,
        flag: Option<&str>,
        setting: &Setting,
    ) -> Result<Resolved<String>, ConfigError> {
        if let Some(value) = flag.filter(|v| !v.trim().is_empty()) {
            return Ok(Resolved {
                value: value.to_string(),
                source: ValueSource::Flag,
            });
        }
        if let Some(value) = self.lookup(setting.env) {
            return Ok(Resolved {
                value,
                source: ValueSource::Environment,
            });
        }
        Err(missing(setting))
    }

    /// Install locations checked when neither flag nor environment names the
    /// manifest directory.
    pub fn manifest_candidates(&self) -> Vec<PathBuf> {
        if let Some(candidates) = &self.manifest_candidates {
            return candidates.clone();
        }

        let mut candidates = Vec::new();
        if let Some(program_data) = self.lookup("PROGRAMDATA") {
            candidates.push(
                Path::new(&program_data)
                    .join("Topaz Labs LLC")
                    .join("Topaz Video AI")
                    .join("models"),
            );
        }
        candidates.push(PathBuf::from(
            "/Applications/Topaz Video AI.app/Contents/Resources/models",
        ));
        candidates.push(PathBuf::from("/opt/TopazVideoAIBETA/models"));
        candidates
    }

    /// First install location that contains [`MANIFEST_MARKER`].
    pub fn find_manifest_dir(&self) -> Option<PathBuf> {
        self.manifest_candidates().into_iter().find(|dir| {
            let found = dir.join(MANIFEST_MARKER).is_file();
            debug!(dir = %dir.display(), found, "Checked manifest directory candidate");
            found
        })
    }

    /// Manifest directory: flag, `TVAI_MODEL_DIR`, then known install locations.
    pub fn json_dir(&self, flag: Option<&Path>) -> Result<Resolved<PathBuf>, ConfigError> {
        let flag = flag.and_then(Path::to_str);
        let resolved = match self.resolve_string(flag, &JSON_DIR) {
            Ok(resolved) => Resolved {
                value: PathBuf::from(resolved.value),
                source: resolved.source,
            },
            Err(err) => match self.find_manifest_dir() {
                Some(dir) => Resolved {
                    value: dir,
                    source: ValueSource::PlatformDefault,
                },
                None => return Err(err),
            },
        };
        require_dir(resolved, JSON_DIR.what)
    }

    /// Model data directory: flag, then `TVAI_MODEL_DATA_DIR`.
    pub fn model_dir(&self, flag: Option<&Path>) -> Result<Resolved<PathBuf>, ConfigError> {
        let resolved = self.resolve_string(flag.and_then(Path::to_str), &MODEL_DIR)?;
        require_dir(
            Resolved {
                value: PathBuf::from(resolved.value),
                source: resolved.source,
            },
            MODEL_DIR.what,
        )
    }

    /// Backend: flag, then `TVAI_BACKEND`.
    pub fn backend(&self, flag: Option<&str>) -> Result<Resolved<String>, ConfigError> {
        self.resolve_string(flag, &BACKEND)
    }

    /// Cookie: flag, then `TVAI_COOKIE`.
    pub fn cookie(&self, flag: Option<&str>) -> Result<Resolved<String>, ConfigError> {
        self.resolve_string(flag, &COOKIE)
    }
}

fn missing(setting: &Setting) -> ConfigError {
    ConfigError::Missing {
        what: setting.what,
        flag: setting.flag,
        env: setting.env,
    }
}

fn require_dir(
    resolved: Resolved<PathBuf>,
    what: &'static str,
) -> Result<Resolved<PathBuf>, ConfigError> {
    if resolved.value.is_dir() {
        Ok(resolved)
    } else {
        Err(ConfigError::NotADirectory {
            what,
            path: resolved.value,
        })
    }
}

/// Everything a download run needs, fully resolved
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Manifest directory
    pub json_dir: PathBuf,
    /// Backend name
    pub backend: String,
    /// Comma separated model keys to restrict to
    pub include: Option<String>,
    /// Directory files are published into
    pub model_dir: PathBuf,
    /// `cf_clearance` cookie value
    pub cookie: String,
    /// Concurrent transfers
    pub threads: usize,
    /// Attempts per file
    pub max_attempts: u32,
    /// TensorRT engine filter
    pub gpu_family: Option<GpuFamily>,
    /// Prometheus listener address
    pub metrics_addr: Option<SocketAddr>,
}

impl DownloadSettings {
    /// Check the numeric bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CONCURRENCY).contains(&self.threads) {
            return Err(ConfigError::Invalid {
                what: "thread count",
                reason: format!("must be between 1 and {MAX_CONCURRENCY}, got {}", self.threads),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                what: "attempt count",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            json_dir: PathBuf::new(),
            backend: String::new(),
            include: None,
            model_dir: PathBuf::new(),
            cookie: String::new(),
            threads: DEFAULT_CONCURRENCY,
            max_attempts: MAX_ATTEMPTS,
            gpu_family: None,
            metrics_addr: None,
        }
    }
}
