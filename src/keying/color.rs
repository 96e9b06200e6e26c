//! CPU reference of the chroma keying math.
//!
//! These functions mirror the fragment shader in `shaders.rs` operation for
//! operation. The GPU path is authoritative for rendering; this module exists
//! so the matte math stays testable without a device, and any change here
//! must be made in the WGSL as well.
//!
//! All inputs are non-linear (gamma-encoded) RGB in [0, 1]. The luma weights
//! and chroma scales are deliberately non-standard: the matte was tuned
//! against them, so they are not interchangeable with BT.601/BT.709
//! coefficients.

/// Luma weights for R, G, B.
pub const LUMA_WEIGHTS: [f32; 3] = [0.2989, 0.5866, 0.1145];

/// Scale applied to (R - Y) to form Cr.
pub const CR_SCALE: f32 = 0.7132;

/// Scale applied to (B - Y) to form Cb.
pub const CB_SCALE: f32 = 0.5647;

/// Default keying threshold below which a pixel is fully transparent.
pub const DEFAULT_THRESHOLD_SENSITIVITY: f32 = 0.24;

/// Default width of the blend ramp above the threshold.
pub const DEFAULT_SMOOTHING: f32 = 0.2;

/// Transforms an RGB color to [Y, Cr, Cb].
pub fn ycrcb(rgb: [f32; 3]) -> [f32; 3] {
    let y = LUMA_WEIGHTS[0] * rgb[0] + LUMA_WEIGHTS[1] * rgb[1] + LUMA_WEIGHTS[2] * rgb[2];
    let cr = CR_SCALE * (rgb[0] - y);
    let cb = CB_SCALE * (rgb[2] - y);
    [y, cr, cb]
}

/// Euclidean distance between the chroma (Cr, Cb) of two RGB colors.
///
/// Luma itself is ignored, which buys tolerance to moderate shading on the
/// screen. Chroma still scales with intensity, so deep shadows eventually
/// leave the threshold.
pub fn chroma_distance(sample: [f32; 3], key: [f32; 3]) -> f32 {
    let s = ycrcb(sample);
    let k = ycrcb(key);
    let dcr = k[1] - s[1];
    let dcb = k[2] - s[2];
    (dcr * dcr + dcb * dcb).sqrt()
}

/// Hermite smoothstep, clamped to [0, 1], as specified by GLSL/WGSL.
///
/// `edge0 == edge1` is undefined in the shading languages; callers keep the
/// edges apart (see [`KeyingParams::sanitized`](crate::keying::KeyingParams::sanitized)).
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Blend factor for a sample against a key color.
///
/// 0 inside the threshold (keyed out), 1 beyond threshold + smoothing
/// (opaque), smooth ramp in between.
pub fn key_blend(sample: [f32; 3], key: [f32; 3], threshold: f32, smoothing: f32) -> f32 {
    smoothstep(threshold, threshold + smoothing, chroma_distance(sample, key))
}

/// Full per-pixel keying result: premultiplied RGB plus the blend factor as
/// alpha.
pub fn keyed_rgba(sample: [f32; 3], key: [f32; 3], threshold: f32, smoothing: f32) -> [f32; 4] {
    let blend = key_blend(sample, key, threshold, smoothing);
    [
        sample[0] * blend,
        sample[1] * blend,
        sample[2] * blend,
        blend,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < EPS, "expected {b}, got {a}");
    }

    const GREEN: [f32; 3] = [0.0, 1.0, 0.0];
    const RED: [f32; 3] = [1.0, 0.0, 0.0];

    #[test]
    fn transform_matches_fixed_constants() {
        let [y, cr, cb] = ycrcb(GREEN);
        assert_close(y, 0.5866);
        assert_close(cr, 0.7132 * (0.0 - 0.5866));
        assert_close(cb, 0.5647 * (0.0 - 0.5866));

        let [y, cr, cb] = ycrcb([1.0, 1.0, 1.0]);
        // The weights do not sum to exactly 1.
        assert_close(y, 0.2989 + 0.5866 + 0.1145);
        assert_close(cr, 0.7132 * (1.0 - y));
        assert_close(cb, 0.5647 * (1.0 - y));
    }

    #[test]
    fn transform_and_blend_are_pure() {
        // Bit-identical results on every invocation; the per-pixel reference
        // recomputation in the shader cannot drift.
        let samples = [GREEN, RED, [0.3, 0.7, 0.2], [1.0, 1.0, 1.0]];
        for sample in samples {
            assert_eq!(ycrcb(sample), ycrcb(sample));
            let once = keyed_rgba(sample, GREEN, DEFAULT_THRESHOLD_SENSITIVITY, DEFAULT_SMOOTHING);
            let again = keyed_rgba(sample, GREEN, DEFAULT_THRESHOLD_SENSITIVITY, DEFAULT_SMOOTHING);
            assert_eq!(once, again);
        }
    }

    #[test]
    fn key_color_is_fully_transparent() {
        assert_close(chroma_distance(GREEN, GREEN), 0.0);
        // Holds for any parameters with positive smoothing.
        for (threshold, smoothing) in [(0.24, 0.2), (0.01, 0.01), (0.9, 0.5)] {
            let out = keyed_rgba(GREEN, GREEN, threshold, smoothing);
            assert_eq!(out, [0.0, 0.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn distant_color_passes_through_opaque() {
        let d = chroma_distance(RED, GREEN);
        assert!(d > DEFAULT_THRESHOLD_SENSITIVITY + DEFAULT_SMOOTHING);
        let out = keyed_rgba(RED, GREEN, DEFAULT_THRESHOLD_SENSITIVITY, DEFAULT_SMOOTHING);
        assert_close(out[0], 1.0);
        assert_close(out[1], 0.0);
        assert_close(out[2], 0.0);
        assert_close(out[3], 1.0);
    }

    #[test]
    fn red_on_green_scenario() {
        // Reference (0, 1, 0), sample (1, 0, 0): the chroma distance works
        // out to roughly 0.9327, far past the default ramp.
        let d = chroma_distance(RED, GREEN);
        assert!((d - 0.93266).abs() < 1e-4, "distance was {d}");
    }

    #[test]
    fn midband_is_partially_transparent_and_premultiplied() {
        // Blend green toward white until the distance lands inside the ramp.
        let key = GREEN;
        let mut mid = None;
        for i in 1..100 {
            let t = i as f32 / 100.0;
            let sample = [t, 1.0, t];
            let d = chroma_distance(sample, key);
            if d > DEFAULT_THRESHOLD_SENSITIVITY
                && d < DEFAULT_THRESHOLD_SENSITIVITY + DEFAULT_SMOOTHING
            {
                mid = Some(sample);
                break;
            }
        }
        let sample = mid.expect("no sample in the blend ramp");
        let out = keyed_rgba(sample, key, DEFAULT_THRESHOLD_SENSITIVITY, DEFAULT_SMOOTHING);
        let blend = out[3];
        assert!(blend > 0.0 && blend < 1.0, "blend was {blend}");
        assert_close(out[0], sample[0] * blend);
        assert_close(out[1], sample[1] * blend);
        assert_close(out[2], sample[2] * blend);
    }

    #[test]
    fn blend_is_monotonic_in_distance() {
        // Walk from pure green toward pure red; distance grows, blend must
        // never decrease.
        let key = GREEN;
        let mut last_d = 0.0f32;
        let mut last_blend = 0.0f32;
        for i in 0..=200 {
            let t = i as f32 / 200.0;
            let sample = [t, 1.0 - t, 0.0];
            let d = chroma_distance(sample, key);
            let blend = key_blend(sample, key, DEFAULT_THRESHOLD_SENSITIVITY, DEFAULT_SMOOTHING);
            if d >= last_d {
                assert!(
                    blend >= last_blend - EPS,
                    "blend regressed: d {last_d}->{d}, blend {last_blend}->{blend}"
                );
            }
            last_d = d;
            last_blend = blend;
        }
    }

    #[test]
    fn smoothstep_edges() {
        assert_close(smoothstep(0.2, 0.4, 0.1), 0.0);
        assert_close(smoothstep(0.2, 0.4, 0.2), 0.0);
        assert_close(smoothstep(0.2, 0.4, 0.4), 1.0);
        assert_close(smoothstep(0.2, 0.4, 0.9), 1.0);
        assert_close(smoothstep(0.2, 0.4, 0.3), 0.5);
    }

    #[test]
    fn shaded_key_color_still_keys_out() {
        // A green screen is never uniformly lit; a 20% shadow must stay
        // inside the default threshold.
        let bright = [0.0, 1.0, 0.0];
        let shaded = [0.0, 0.8, 0.0];
        let d = chroma_distance(shaded, bright);
        assert!(d < DEFAULT_THRESHOLD_SENSITIVITY, "distance was {d}");
        let out = keyed_rgba(shaded, bright, DEFAULT_THRESHOLD_SENSITIVITY, DEFAULT_SMOOTHING);
        assert_eq!(out[3], 0.0);
    }
}
