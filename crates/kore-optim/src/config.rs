//! Optimizer configuration.

use kore_core::{DType, KoreError, Result, QK};
use serde::{Deserialize, Serialize};

/// Adam hyperparameters plus the parallel work-unit size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamParams {
    /// Learning rate.
    pub alpha: f32,
    /// First moment decay rate.
    pub beta1: f32,
    /// Second moment decay rate.
    pub beta2: f32,
    /// Added to the denominator. Must be positive.
    pub epsilon: f32,
    /// Elements per parallel task. Must be a multiple of the quantized block
    /// size so chunks never split a block.
    pub chunk_size: usize,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            alpha: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            chunk_size: 4096,
        }
    }
}

impl AdamParams {
    /// Default betas and epsilon with the given learning rate.
    pub fn with_alpha(alpha: f32) -> Self {
        Self {
            alpha,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.alpha.is_finite() {
            return Err(KoreError::InvalidConfig(format!("alpha must be finite, got {}", self.alpha)));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(KoreError::InvalidConfig(format!("{name} must be in [0, 1), got {beta}")));
            }
        }
        // A zero epsilon turns a zero gradient into 0 / 0.
        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(KoreError::InvalidConfig(format!(
                "epsilon must be finite and positive, got {}",
                self.epsilon
            )));
        }
        if self.chunk_size == 0 || self.chunk_size % QK != 0 {
            return Err(KoreError::InvalidConfig(format!(
                "chunk_size must be a positive multiple of {QK}, got {}",
                self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Configuration for the stateful [`Adam`](crate::Adam) optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamConfig {
    #[serde(flatten)]
    pub params: AdamParams,

    /// Storage type of the moment collections.
    pub moment_dtype: DType,

    /// Worker threads for the update pool (None = rayon's default).
    pub num_threads: Option<usize>,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            params: AdamParams::default(),
            moment_dtype: DType::F32,
            num_threads: None,
        }
    }
}

impl AdamConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s).map_err(|e| KoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.num_threads == Some(0) {
            return Err(KoreError::InvalidConfig("num_threads must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let p = AdamParams::default();
        assert_eq!(p.alpha, 1e-3);
        assert_eq!(p.beta1, 0.9);
        assert_eq!(p.beta2, 0.999);
        assert_eq!(p.epsilon, 1e-8);
        assert_eq!(p.chunk_size, 4096);
        assert!(p.validate().is_ok());
        assert_eq!(AdamConfig::default().moment_dtype, DType::F32);
    }

    #[test]
    fn test_from_json_partial() {
        let cfg = AdamConfig::from_json(r#"{"alpha": 0.01, "moment_dtype": "bf16", "num_threads": 2}"#).unwrap();
        assert_eq!(cfg.params.alpha, 0.01);
        assert_eq!(cfg.params.beta1, 0.9);
        assert_eq!(cfg.moment_dtype, DType::BF16);
        assert_eq!(cfg.num_threads, Some(2));
    }

    #[test]
    fn test_invalid_values() {
        assert!(AdamParams { beta1: 1.0, ..Default::default() }.validate().is_err());
        assert!(AdamParams { beta2: -0.1, ..Default::default() }.validate().is_err());
        assert!(AdamParams { epsilon: -1.0, ..Default::default() }.validate().is_err());
        assert!(AdamParams { epsilon: 0.0, ..Default::default() }.validate().is_err());
        assert!(AdamParams { alpha: f32::NAN, ..Default::default() }.validate().is_err());
        assert!(AdamParams { chunk_size: 100, ..Default::default() }.validate().is_err());
        assert!(AdamParams { chunk_size: 0, ..Default::default() }.validate().is_err());
        assert!(matches!(AdamConfig::from_json(r#"{"num_threads": 0}"#), Err(KoreError::InvalidConfig(_))));
        assert!(matches!(AdamConfig::from_json("not json"), Err(KoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_json_roundtrip_keeps_flat_layout() {
        let json = serde_json::to_value(AdamConfig::default()).unwrap();
        assert!(json.get("alpha").is_some());
        assert!(json.get("params").is_none());
    }
}
