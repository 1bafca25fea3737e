//! TensorRT engine selection
//!
//! TensorRT engines are built per operating system and GPU generation. The
//! manifests encode both as numeric `(row, column)` capability pairs; picking a
//! GPU family keeps only the files for that pair instead of every engine ever
//! built.

use std::fmt;
use std::str::FromStr;

use super::manifest::Scalar;
use super::CatalogError;

/// NVIDIA RTX generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuFamily {
    /// RTX 20xx (Turing)
    Rtx20,
    /// RTX 30xx (Ampere)
    Rtx30,
    /// RTX 40xx (Ada)
    Rtx40,
}

impl GpuFamily {
    /// Capability column code for this generation.
    pub fn code(&self) -> u64 {
        match self {
            Self::Rtx20 => 705,
            Self::Rtx30 => 806,
            Self::Rtx40 => 809,
        }
    }
}

impl fmt::Display for GpuFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rtx20 => "RTX20",
            Self::Rtx30 => "RTX30",
            Self::Rtx40 => "RTX40",
        };
        f.write_str(name)
    }
}

impl FromStr for GpuFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "RTX20" => Ok(Self::Rtx20),
            "RTX30" => Ok(Self::Rtx30),
            "RTX40" => Ok(Self::Rtx40),
            _ => Err(format!(
                "unknown GPU family '{s}' (expected RTX20, RTX30 or RTX40)"
            )),
        }
    }
}

/// Operating systems TensorRT engines are published for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    /// Windows
    Windows,
    /// Linux
    Linux,
}

impl OsFamily {
    /// Capability row code for this OS.
    pub fn code(&self) -> u64 {
        match self {
            Self::Windows => 8500,
            Self::Linux => 8517,
        }
    }

    /// The OS this binary was built for, if engines exist for it.
    pub fn current() -> Option<Self> {
        if cfg!(target_os = "windows") {
            Some(Self::Windows)
        } else if cfg!(target_os = "linux") {
            Some(Self::Linux)
        } else {
            None
        }
    }
}

/// The `(os, gpu)` capability pair to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorRtTarget {
    /// Row code (operating system)
    pub os_code: u64,
    /// Column code (GPU generation)
    pub gpu_code: u64,
}

impl TensorRtTarget {
    /// Target for an explicit OS and GPU.
    pub fn new(os: OsFamily, gpu: GpuFamily) -> Self {
        Self {
            os_code: os.code(),
            gpu_code: gpu.code(),
        }
    }

    /// Target for `gpu` on the running OS.
    pub fn for_current_os(gpu: GpuFamily) -> Result<Self, CatalogError> {
        OsFamily::current()
            .map(|os| Self::new(os, gpu))
            .ok_or_else(|| {
                CatalogError::TensorRt(format!(
                    "no TensorRT engines are published for {}",
                    std::env::consts::OS
                ))
            })
    }

    /// Whether the capability pair `(row, column)` belongs to this target.
    pub fn accepts(&self, row: &Scalar, column: &Scalar) -> bool {
        row.as_u64() == Some(self.os_code) && column.as_u64() == Some(self.gpu_code)
    }
}
