//! Geometry and signal-processing primitives.
//!
//! Stateless functions over point sets and sample buffers. Everything the
//! analyzers compute per frame bottoms out here.

use crate::collector::Landmark;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::f64::consts::TAU;

/// Euclidean distance between two landmarks in the image plane.
pub fn distance(a: &Landmark, b: &Landmark) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Failure to compute a symmetry ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SymmetryError {
    /// Both measures are zero, so the ratio is undefined.
    ZeroMagnitude,
    /// A measure was negative or not finite.
    InvalidMeasure(f64),
}

impl std::fmt::Display for SymmetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymmetryError::ZeroMagnitude => write!(f, "both measures are zero"),
            SymmetryError::InvalidMeasure(v) => write!(f, "invalid measure: {v}"),
        }
    }
}

impl std::error::Error for SymmetryError {}

/// Symmetry of two measures as `min/max * 100`.
///
/// Returns 100 exactly when both measures are equal.
pub fn calculate_symmetry(left: f64, right: f64) -> Result<f64, SymmetryError> {
    for v in [left, right] {
        if !v.is_finite() || v < 0.0 {
            return Err(SymmetryError::InvalidMeasure(v));
        }
    }
    let max = left.max(right);
    if max == 0.0 {
        return Err(SymmetryError::ZeroMagnitude);
    }
    Ok(left.min(right) / max * 100.0)
}

/// Root-mean-square amplitude of an audio buffer.
pub fn rms(buffer: &[f32]) -> f64 {
    if buffer.is_empty() {
        return 0.0;
    }
    buffer.iter().map(|&s| f64::from(s)).quadratic_mean()
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().mean())
    }
}

/// Mean absolute difference between consecutive values.
pub fn mean_abs_delta(values: &[f64]) -> Option<f64> {
    let deltas: Vec<f64> = values.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    mean(&deltas)
}

/// Pitch estimate for one audio frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// Fundamental frequency in Hz; 0 means no reliable pitch.
    pub frequency_hz: f64,
    /// Peak correlation normalized by zero-lag energy (0-1).
    pub clarity: f64,
}

impl PitchEstimate {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_voiced(&self) -> bool {
        self.frequency_hz > 0.0
    }
}

/// Autocorrelation pitch detector tuned for the human vocal range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchDetector {
    /// Buffers quieter than this RMS are treated as silence.
    pub silence_rms: f64,
    /// Decimation factor applied before autocorrelation.
    pub decimation: usize,
    pub min_frequency_hz: f64,
    pub max_frequency_hz: f64,
    /// Minimum unnormalized peak correlation to accept a pitch.
    pub min_correlation: f64,
}

impl Default for PitchDetector {
    fn default() -> Self {
        Self {
            silence_rms: 0.02,
            decimation: 4,
            min_frequency_hz: 60.0,
            max_frequency_hz: 400.0,
            min_correlation: 0.5,
        }
    }
}

impl PitchDetector {
    /// Estimate the fundamental frequency of `buffer`.
    pub fn detect(&self, buffer: &[f32], sample_rate: u32) -> PitchEstimate {
        if sample_rate == 0 || rms(buffer) < self.silence_rms {
            return PitchEstimate::none();
        }

        // Plain decimation; the vocal band sits well below the new Nyquist.
        let step = self.decimation.max(1);
        let decimated: Vec<f64> = buffer.iter().step_by(step).map(|&s| f64::from(s)).collect();
        let rate = f64::from(sample_rate) / step as f64;

        let min_lag = ((rate / self.max_frequency_hz).floor() as usize).max(1);
        let max_lag = ((rate / self.min_frequency_hz).ceil() as usize).min(decimated.len().saturating_sub(1));
        if min_lag > max_lag {
            return PitchEstimate::none();
        }

        let correlate = |lag: usize| -> f64 {
            decimated
                .iter()
                .zip(&decimated[lag..])
                .map(|(a, b)| a * b)
                .sum()
        };

        let mut best_lag = 0;
        let mut best_corr = f64::NEG_INFINITY;
        for lag in min_lag..=max_lag {
            let corr = correlate(lag);
            if corr > best_corr {
                best_corr = corr;
                best_lag = lag;
            }
        }

        if best_lag == 0 || best_corr <= self.min_correlation {
            return PitchEstimate::none();
        }

        let energy = correlate(0);
        let clarity = if energy > 0.0 {
            (best_corr / energy).clamp(0.0, 1.0)
        } else {
            0.0
        };

        PitchEstimate {
            frequency_hz: rate / best_lag as f64,
            clarity,
        }
    }
}

/// Detect pitch with the default detector settings.
pub fn detect_pitch(buffer: &[f32], sample_rate: u32) -> PitchEstimate {
    PitchDetector::default().detect(buffer, sample_rate)
}

/// Radial deviation of a point from the Archimedean spiral `r = b·θ`.
///
/// `(x, y)` is relative to the spiral center. The point's angle is only
/// known modulo 2π, so every winding `n ∈ [0, loops]` is tried and the
/// smallest error wins.
pub fn spiral_radial_error(x: f64, y: f64, b: f64, loops: u32) -> f64 {
    let r = x.hypot(y);
    let mut theta = y.atan2(x);
    if theta < 0.0 {
        theta += TAU;
    }
    (0..=loops)
        .map(|n| (r - b * (theta + TAU * f64::from(n))).abs())
        .fold(f64::INFINITY, f64::min)
}

/// Root-mean-square of a set of errors.
pub fn rmse(errors: &[f64]) -> Option<f64> {
    if errors.is_empty() {
        None
    } else {
        Some(errors.iter().quadratic_mean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f64 / f64::from(sample_rate);
                amplitude * (TAU * freq * t).sin() as f32
            })
            .collect()
    }

    #[test]
    fn test_symmetry_bounds() {
        let pairs = [(1.0, 2.0), (0.3, 0.3), (5.0, 0.1), (0.0, 4.0), (7.5, 7.4)];
        for (l, r) in pairs {
            let s = calculate_symmetry(l, r).unwrap();
            assert!((0.0..=100.0).contains(&s));
            assert_eq!(s == 100.0, l == r);
        }
    }

    #[test]
    fn test_symmetry_is_order_independent() {
        assert_eq!(
            calculate_symmetry(2.0, 3.0).unwrap(),
            calculate_symmetry(3.0, 2.0).unwrap()
        );
    }

    #[test]
    fn test_symmetry_zero_division_is_error() {
        assert_eq!(calculate_symmetry(0.0, 0.0), Err(SymmetryError::ZeroMagnitude));
        assert!(matches!(
            calculate_symmetry(f64::NAN, 1.0),
            Err(SymmetryError::InvalidMeasure(_))
        ));
        assert!(matches!(
            calculate_symmetry(-1.0, 1.0),
            Err(SymmetryError::InvalidMeasure(_))
        ));
    }

    #[test]
    fn test_pitch_silence() {
        for rate in [8_000, 16_000, 44_100, 48_000] {
            let zeros = vec![0.0f32; 2048];
            assert_eq!(detect_pitch(&zeros, rate).frequency_hz, 0.0);

            let quiet = sine(200.0, 0.02, rate, 2048);
            assert!(rms(&quiet) < 0.02);
            assert_eq!(detect_pitch(&quiet, rate).frequency_hz, 0.0);
        }
    }

    #[test]
    fn test_pitch_detects_vowel_tone() {
        let buffer = sine(200.0, 0.5, 44_100, 2048);
        let estimate = detect_pitch(&buffer, 44_100);
        assert!((estimate.frequency_hz - 200.0).abs() < 5.0, "{estimate:?}");
        assert!(estimate.clarity > 0.5);
    }

    #[test]
    fn test_pitch_low_voice() {
        let buffer = sine(110.0, 0.4, 48_000, 4096);
        let estimate = detect_pitch(&buffer, 48_000);
        assert!((estimate.frequency_hz - 110.0).abs() < 3.0, "{estimate:?}");
    }

    #[test]
    fn test_spiral_point_on_curve_has_zero_error() {
        let b = 150.0 / (TAU * 3.0);
        for n in 0..3u32 {
            let theta = 1.3 + TAU * f64::from(n);
            let r = b * theta;
            let err = spiral_radial_error(r * theta.cos(), r * theta.sin(), b, 3);
            assert!(err < 1e-9, "winding {n}: {err}");
        }
    }

    #[test]
    fn test_spiral_offset_error_equals_delta() {
        let b = 150.0 / (TAU * 3.0);
        let theta = PI / 2.0 + TAU;
        for delta in [-4.0, 2.5, 7.0] {
            let r = b * theta + delta;
            let err = spiral_radial_error(r * theta.cos(), r * theta.sin(), b, 3);
            assert!((err - f64::abs(delta)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rmse() {
        assert_eq!(rmse(&[]), None);
        let r = rmse(&[3.0, 4.0, 3.0, 4.0]).unwrap();
        assert!((r - 12.5f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_mean_abs_delta() {
        assert_eq!(mean_abs_delta(&[1.0]), None);
        assert_eq!(mean_abs_delta(&[1.0, 3.0, 2.0]), Some(1.5));
    }
}
