//! Runtime SIMD capability detection and backend dispatch.
//!
//! Detects AVX2/FMA, AVX-512 and ARM NEON once per process and picks the
//! [`Simd`] backend kernels run on. `KORE_SIMD` (see [`KernelConfig`])
//! overrides the choice. There is no AVX-512 backend: `avx512f` only shows
//! up in [`SimdCapability::best_tier`] and the selection log.

use std::fmt;
use std::sync::OnceLock;

use kore_core::{KoreError, Result};
use serde::{Deserialize, Serialize};

use crate::config::KernelConfig;
#[cfg(target_arch = "x86_64")]
use crate::vector::Avx2;
#[cfg(target_arch = "aarch64")]
use crate::vector::Neon;
use crate::vector::{Portable, Scalar, Simd};

/// SIMD capabilities detected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimdCapability {
    pub avx2: bool,
    /// Reported only; no backend uses it.
    pub avx512f: bool,
    pub neon: bool,
    pub fma: bool,
}

static DETECTED: OnceLock<SimdCapability> = OnceLock::new();

impl SimdCapability {
    /// Detect SIMD capabilities for the current CPU.
    pub fn detect() -> &'static SimdCapability {
        DETECTED.get_or_init(|| {
            #[cfg(target_arch = "x86_64")]
            {
                SimdCapability {
                    avx2: is_x86_feature_detected!("avx2"),
                    avx512f: is_x86_feature_detected!("avx512f"),
                    fma: is_x86_feature_detected!("fma"),
                    neon: false,
                }
            }

            #[cfg(target_arch = "aarch64")]
            {
                SimdCapability {
                    avx2: false,
                    avx512f: false,
                    fma: true,
                    neon: true, // NEON is mandatory on AArch64
                }
            }

            #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
            {
                SimdCapability {
                    avx2: false,
                    avx512f: false,
                    fma: false,
                    neon: false,
                }
            }
        })
    }

    /// Best available SIMD tier as a human-readable string.
    pub fn best_tier(&self) -> &'static str {
        if self.avx512f {
            "AVX-512"
        } else if self.avx2 {
            "AVX2"
        } else if self.neon {
            "NEON"
        } else {
            "scalar"
        }
    }

    /// Whether any SIMD is available.
    pub fn has_simd(&self) -> bool {
        self.avx2 || self.avx512f || self.neon
    }

    /// Widest backend these capabilities can run.
    pub fn best_backend(&self) -> SimdBackend {
        if self.supports(SimdBackend::Avx2) {
            SimdBackend::Avx2
        } else if self.supports(SimdBackend::Neon) {
            SimdBackend::Neon
        } else {
            SimdBackend::Portable
        }
    }

    /// Whether `backend` can run with these capabilities on this target.
    pub fn supports(&self, backend: SimdBackend) -> bool {
        match backend {
            SimdBackend::Scalar | SimdBackend::Portable => true,
            SimdBackend::Avx2 => cfg!(target_arch = "x86_64") && self.avx2 && self.fma,
            SimdBackend::Neon => cfg!(target_arch = "aarch64") && self.neon,
        }
    }
}

/// A vector backend kernels can be instantiated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimdBackend {
    Scalar,
    Portable,
    Avx2,
    Neon,
}

impl SimdBackend {
    pub const ALL: [SimdBackend; 4] = [
        SimdBackend::Scalar,
        SimdBackend::Portable,
        SimdBackend::Avx2,
        SimdBackend::Neon,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SimdBackend::Scalar => Scalar::NAME,
            SimdBackend::Portable => Portable::NAME,
            SimdBackend::Avx2 => "avx2",
            SimdBackend::Neon => "neon",
        }
    }

    /// f32 lanes per vector.
    pub fn lanes(&self) -> usize {
        match self {
            SimdBackend::Scalar => Scalar::LANES,
            SimdBackend::Portable => Portable::LANES,
            SimdBackend::Avx2 => 8,
            SimdBackend::Neon => 4,
        }
    }

    /// Whether this backend can run on the current CPU.
    pub fn is_available(&self) -> bool {
        SimdCapability::detect().supports(*self)
    }

    /// Backends that can run on the current CPU.
    pub fn available() -> Vec<SimdBackend> {
        Self::ALL.into_iter().filter(|b| b.is_available()).collect()
    }

    /// Run `op` instantiated for this backend.
    pub fn run<Op: WithSimd>(self, op: Op) -> Result<Op::Output> {
        if !self.is_available() {
            return Err(KoreError::InvalidConfig(format!(
                "SIMD backend '{self}' is not supported on this CPU"
            )));
        }
        Ok(match self {
            SimdBackend::Scalar => op.with_simd(Scalar),
            SimdBackend::Portable => op.with_simd(Portable),
            SimdBackend::Avx2 => run_avx2(op),
            SimdBackend::Neon => run_neon(op),
        })
    }
}

impl fmt::Display for SimdBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An operation generic over the vector backend.
///
/// Implementors carry their inputs; [`dispatch`] picks the backend and calls
/// `with_simd` inside the matching `#[target_feature]` context.
pub trait WithSimd {
    type Output;

    fn with_simd<S: Simd>(self, simd: S) -> Self::Output;
}

static SELECTED: OnceLock<SimdBackend> = OnceLock::new();

/// Backend used by [`dispatch`]: `KORE_SIMD` if set and usable, otherwise the
/// best detected one. Resolved once per process.
pub fn selected_backend() -> SimdBackend {
    *SELECTED.get_or_init(|| {
        let cap = SimdCapability::detect();
        let backend = KernelConfig::from_env().resolve(cap);
        tracing::debug!(
            "SIMD backend: {} ({} lanes, cpu tier {})",
            backend,
            backend.lanes(),
            cap.best_tier()
        );
        backend
    })
}

/// Run `op` on the selected backend.
pub fn dispatch<Op: WithSimd>(op: Op) -> Op::Output {
    match selected_backend() {
        SimdBackend::Scalar => op.with_simd(Scalar),
        SimdBackend::Portable => op.with_simd(Portable),
        SimdBackend::Avx2 => run_avx2(op),
        SimdBackend::Neon => run_neon(op),
    }
}

#[cfg(target_arch = "x86_64")]
fn run_avx2<Op: WithSimd>(op: Op) -> Op::Output {
    match Avx2::try_new() {
        // Safety: the token exists only if AVX2+FMA were detected.
        Some(simd) => unsafe { run_avx2_inner(op, simd) },
        None => op.with_simd(Portable),
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn run_avx2_inner<Op: WithSimd>(op: Op, simd: Avx2) -> Op::Output {
    op.with_simd(simd)
}

#[cfg(not(target_arch = "x86_64"))]
fn run_avx2<Op: WithSimd>(op: Op) -> Op::Output {
    op.with_simd(Portable)
}

#[cfg(target_arch = "aarch64")]
fn run_neon<Op: WithSimd>(op: Op) -> Op::Output {
    op.with_simd(Neon)
}

#[cfg(not(target_arch = "aarch64"))]
fn run_neon<Op: WithSimd>(op: Op) -> Op::Output {
    op.with_simd(Portable)
}
