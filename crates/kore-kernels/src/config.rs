//! Kernel configuration: which vector backend to run on.

use std::fmt;
use std::str::FromStr;

use kore_core::KoreError;
use serde::{Deserialize, Serialize};

use crate::simd::{SimdBackend, SimdCapability};

/// Requested backend. `Auto` picks the widest one the CPU supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Scalar,
    Portable,
    Avx2,
    Neon,
}

impl BackendPreference {
    /// The concrete backend this names, if any.
    pub fn backend(&self) -> Option<SimdBackend> {
        match self {
            BackendPreference::Auto => None,
            BackendPreference::Scalar => Some(SimdBackend::Scalar),
            BackendPreference::Portable => Some(SimdBackend::Portable),
            BackendPreference::Avx2 => Some(SimdBackend::Avx2),
            BackendPreference::Neon => Some(SimdBackend::Neon),
        }
    }
}

impl FromStr for BackendPreference {
    type Err = KoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(BackendPreference::Auto),
            "scalar" => Ok(BackendPreference::Scalar),
            "portable" => Ok(BackendPreference::Portable),
            "avx2" => Ok(BackendPreference::Avx2),
            "neon" => Ok(BackendPreference::Neon),
            other => Err(KoreError::InvalidConfig(format!(
                "unknown SIMD backend '{other}' (expected auto, scalar, portable, avx2 or neon)"
            ))),
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.backend() {
            Some(b) => write!(f, "{b}"),
            None => f.write_str("auto"),
        }
    }
}

/// Kernel settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub backend: BackendPreference,
}

impl KernelConfig {
    /// Environment variable overriding [`KernelConfig::backend`].
    pub const ENV_VAR: &'static str = "KORE_SIMD";

    /// Default config with the `KORE_SIMD` override applied.
    pub fn from_env() -> Self {
        Self::default().with_override(std::env::var(Self::ENV_VAR).ok().as_deref())
    }

    /// Apply an override value; unparsable values are ignored with a warning.
    pub fn with_override(mut self, value: Option<&str>) -> Self {
        if let Some(raw) = value {
            match raw.parse() {
                Ok(pref) => self.backend = pref,
                Err(e) => tracing::warn!("ignoring {}: {}", Self::ENV_VAR, e),
            }
        }
        self
    }

    /// Concrete backend for these capabilities. An unsupported request falls
    /// back to auto-detection.
    pub fn resolve(&self, cap: &SimdCapability) -> SimdBackend {
        match self.backend.backend() {
            Some(b) if cap.supports(b) => b,
            Some(b) => {
                let fallback = cap.best_backend();
                tracing::warn!("SIMD backend '{}' not supported on this CPU, using '{}'", b, fallback);
                fallback
            }
            None => cap.best_backend(),
        }
    }
}
