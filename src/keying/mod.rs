//! Chroma keying: host parameters, reference math, shaders and the GPU
//! material.

pub mod color;
pub mod material;
pub mod shaders;

pub use material::{ChromaKeyMaterial, KeyingUniforms, SceneUniforms};
pub use shaders::ShaderSet;

use tracing::warn;

/// Smallest smoothing value ever uploaded. Keeps the smoothstep edges apart;
/// coincident edges are undefined in WGSL.
pub const MIN_SMOOTHING: f32 = 1e-4;

/// Host-side keying parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyingParams {
    /// Chroma distance below which a pixel is fully keyed out.
    pub threshold_sensitivity: f32,
    /// Width of the blend ramp above the threshold.
    pub smoothing: f32,
    /// Explicit key color override. `None` samples the reference corner of
    /// the current frame instead.
    pub key_override: Option<[f32; 3]>,
}

impl Default for KeyingParams {
    fn default() -> Self {
        Self {
            threshold_sensitivity: color::DEFAULT_THRESHOLD_SENSITIVITY,
            smoothing: color::DEFAULT_SMOOTHING,
            key_override: None,
        }
    }
}

impl KeyingParams {
    /// Returns a copy that is safe to upload: negative values clamped away
    /// and smoothing held above [`MIN_SMOOTHING`]. Logs when anything had to
    /// change.
    pub fn sanitized(&self) -> Self {
        let sane = Self {
            threshold_sensitivity: self.threshold_sensitivity.max(0.0),
            smoothing: self.smoothing.max(MIN_SMOOTHING),
            key_override: self.key_override,
        };
        if sane != *self {
            warn!(
                "Clamped keying parameters (threshold {:.4} -> {:.4}, smoothing {:.4} -> {:.4})",
                self.threshold_sensitivity,
                sane.threshold_sensitivity,
                self.smoothing,
                sane.smoothing
            );
        }
        sane
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_tuned_values() {
        let params = KeyingParams::default();
        assert_eq!(params.threshold_sensitivity, 0.24);
        assert_eq!(params.smoothing, 0.2);
        assert!(params.key_override.is_none());
    }

    #[test]
    fn sanitized_keeps_good_values() {
        let params = KeyingParams::default().sanitized();
        assert_eq!(params, KeyingParams::default());
    }

    #[test]
    fn sanitized_clamps_degenerate_values() {
        let params = KeyingParams {
            threshold_sensitivity: -0.5,
            smoothing: 0.0,
            key_override: Some([0.0, 1.0, 0.0]),
        };
        let s = params.sanitized();
        assert_eq!(s.threshold_sensitivity, 0.0);
        assert_eq!(s.smoothing, MIN_SMOOTHING);
        assert_eq!(s.key_override, Some([0.0, 1.0, 0.0]));
    }
}
