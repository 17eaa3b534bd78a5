//! Spiral tracing test.
//!
//! The user traces an Archimedean spiral `r = b·θ` outward from the
//! center. Every pointer sample is scored by its radial distance to the
//! nearest winding of the ideal curve.

use crate::collector::{PointerEvent, PointerPhase};
use crate::core::dsp::{rmse, spiral_radial_error};
use crate::core::error::AnalysisError;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tracing::{debug, info};

/// Geometry and scoring for the spiral test, in reference-scale pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiralConfig {
    pub max_radius: f64,
    pub loops: u32,
    /// A trace must begin within this distance of the center.
    pub start_zone_radius: f64,
    /// The trace completes once the pointer is this close to `max_radius`.
    pub finish_margin: f64,
    /// Traces with fewer points are capped at `short_trace_cap`.
    pub min_points: usize,
    pub short_trace_cap: u8,
    /// Points deducted per pixel of RMSE.
    pub error_factor: f64,
    /// Spiral score below which a tracing deviation is flagged.
    pub deviation_issue_below: u8,
    /// Share of the touch composite.
    pub composite_weight: f64,
}

impl Default for SpiralConfig {
    fn default() -> Self {
        Self {
            max_radius: 150.0,
            loops: 3,
            start_zone_radius: 35.0,
            finish_margin: 10.0,
            min_points: 30,
            short_trace_cap: 40,
            error_factor: 2.0,
            deviation_issue_below: 60,
            composite_weight: 0.5,
        }
    }
}

impl SpiralConfig {
    /// Growth rate `b` of the ideal curve.
    pub fn growth(&self) -> f64 {
        self.max_radius / (TAU * f64::from(self.loops.max(1)))
    }

    fn finish_radius(&self) -> f64 {
        self.max_radius - self.finish_margin
    }
}

/// Score a completed trace from its per-point radial errors.
pub fn score_trace(errors: &[f64], config: &SpiralConfig) -> Option<(f64, u8)> {
    let rmse = rmse(errors)?;
    let mut score = (100.0 - config.error_factor * rmse).clamp(0.0, 100.0).floor() as u8;
    if errors.len() < config.min_points {
        score = score.min(config.short_trace_cap);
    }
    Some((rmse, score))
}

/// A finished spiral trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpiralResult {
    pub rmse: f64,
    pub points: usize,
    pub score: u8,
}

/// Progress reported after each pointer event.
#[derive(Debug, Clone, PartialEq)]
pub enum SpiralProgress {
    /// No trace is active.
    Idle,
    /// Fraction of the way to the outer edge, 0-1.
    Tracing(f64),
    Complete(SpiralResult),
}

/// Session state for one trace. Discarded on completion or abort.
#[derive(Debug, Default)]
struct SpiralSession {
    points: Vec<(f64, f64)>,
    errors: Vec<f64>,
}

/// Pointer-driven spiral tracer.
pub struct SpiralTracer {
    config: SpiralConfig,
    center: (f64, f64),
    session: Option<SpiralSession>,
    progress: f64,
}

impl SpiralTracer {
    /// Create a tracer for a spiral drawn around `center`.
    pub fn new(config: SpiralConfig, center: (f64, f64)) -> Self {
        Self {
            config,
            center,
            session: None,
            progress: 0.0,
        }
    }

    pub fn is_tracing(&self) -> bool {
        self.session.is_some()
    }

    /// Fraction of the spiral covered by the active trace.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Points recorded in the active trace.
    pub fn point_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.points.len())
    }

    /// Ideal curve as a polyline, for rendering.
    pub fn ideal_path(&self, steps: usize) -> Vec<(f64, f64)> {
        let b = self.config.growth();
        let end = TAU * f64::from(self.config.loops);
        (0..=steps)
            .map(|i| {
                let theta = end * i as f64 / steps.max(1) as f64;
                let r = b * theta;
                (self.center.0 + r * theta.cos(), self.center.1 + r * theta.sin())
            })
            .collect()
    }

    /// Discard the active trace.
    pub fn reset(&mut self) {
        if self.session.take().is_some() {
            debug!("Spiral trace discarded");
        }
        self.progress = 0.0;
    }

    /// Feed one pointer event.
    pub fn process(&mut self, event: &PointerEvent) -> Result<SpiralProgress, AnalysisError> {
        let dx = event.x - self.center.0;
        let dy = event.y - self.center.1;
        let distance = dx.hypot(dy);

        match event.phase {
            PointerPhase::Down => {
                if distance > self.config.start_zone_radius {
                    self.reset();
                    return Err(AnalysisError::ConstraintViolation(
                        "Please start at the center of the spiral".to_string(),
                    ));
                }
                self.session = Some(SpiralSession::default());
                self.progress = 0.0;
                debug!("Spiral trace started");
                self.record(dx, dy);
                Ok(SpiralProgress::Tracing(0.0))
            }
            PointerPhase::Move => {
                if self.session.is_none() {
                    return Ok(SpiralProgress::Idle);
                }
                self.record(dx, dy);
                self.progress = (distance / self.config.finish_radius()).clamp(0.0, 1.0);
                if distance >= self.config.finish_radius() {
                    return self.complete();
                }
                Ok(SpiralProgress::Tracing(self.progress))
            }
            PointerPhase::Up => {
                if self.session.is_none() {
                    return Ok(SpiralProgress::Idle);
                }
                let points = self.point_count();
                self.reset();
                debug!("Pointer lifted after {points} points; trace aborted");
                Err(AnalysisError::Aborted)
            }
        }
    }

    fn record(&mut self, dx: f64, dy: f64) {
        let b = self.config.growth();
        let loops = self.config.loops;
        if let Some(session) = self.session.as_mut() {
            session.points.push((dx, dy));
            session.errors.push(spiral_radial_error(dx, dy, b, loops));
        }
    }

    fn complete(&mut self) -> Result<SpiralProgress, AnalysisError> {
        let session = self.session.take().unwrap_or_default();
        self.progress = 1.0;
        let (rmse, score) =
            score_trace(&session.errors, &self.config).ok_or(AnalysisError::InsufficientSamples {
                what: "spiral points",
                required: 1,
                actual: 0,
            })?;
        let result = SpiralResult {
            rmse,
            points: session.points.len(),
            score,
        };
        info!(
            "Spiral complete: {} points, RMSE {:.2}, score {}",
            result.points, result.rmse, result.score
        );
        Ok(SpiralProgress::Complete(result))
    }

    pub fn config(&self) -> &SpiralConfig {
        &self.config
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::collector::{PointerEvent, PointerPhase};
    use chrono::{DateTime, Duration, Utc};

    /// Pointer events tracing the ideal spiral from `theta_start` to
    /// `theta_end` with alternating ±`noise` radial offsets.
    pub fn noisy_trace(
        start: DateTime<Utc>,
        b: f64,
        theta_start: f64,
        theta_end: f64,
        count: usize,
        noise: f64,
    ) -> Vec<PointerEvent> {
        let mut events = Vec::with_capacity(count + 1);
        events.push(PointerEvent::new(start, PointerPhase::Down, 0.0, 0.0));
        for i in 0..count {
            let theta = theta_start + (theta_end - theta_start) * i as f64 / (count - 1) as f64;
            let offset = if i % 2 == 0 { noise } else { -noise };
            let r = b * theta + offset;
            events.push(PointerEvent::new(
                start + Duration::milliseconds(16 * (i as i64 + 1)),
                PointerPhase::Move,
                r * theta.cos(),
                r * theta.sin(),
            ));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::noisy_trace;
    use super::*;
    use chrono::{Duration, Utc};
    use std::f64::consts::PI;

    fn tracer() -> SpiralTracer {
        SpiralTracer::new(SpiralConfig::default(), (0.0, 0.0))
    }

    #[test]
    fn test_start_outside_zone_rejected() {
        let mut t = tracer();
        let err = t
            .process(&PointerEvent::new(Utc::now(), PointerPhase::Down, 40.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::ConstraintViolation(_)));
        assert!(!t.is_tracing());
        assert_eq!(t.point_count(), 0);
    }

    #[test]
    fn test_moves_without_down_are_ignored() {
        let mut t = tracer();
        let p = t
            .process(&PointerEvent::new(Utc::now(), PointerPhase::Move, 10.0, 10.0))
            .unwrap();
        assert_eq!(p, SpiralProgress::Idle);
    }

    #[test]
    fn test_full_trace_with_noise() {
        let config = SpiralConfig::default();
        let b = config.growth();
        let mut t = SpiralTracer::new(config, (0.0, 0.0));

        let mut result = None;
        for event in noisy_trace(Utc::now(), b, PI, 18.4, 200, 5.0) {
            if let SpiralProgress::Complete(r) = t.process(&event).unwrap() {
                result = Some(r);
                break;
            }
        }

        let result = result.expect("trace should complete at the outer edge");
        assert!((result.rmse - 5.0).abs() < 0.1, "{result:?}");
        assert!((89..=90).contains(&result.score), "{result:?}");
        assert!(!t.is_tracing());
        assert_eq!(t.progress(), 1.0);
    }

    #[test]
    fn test_lift_aborts_and_resets() {
        let config = SpiralConfig::default();
        let b = config.growth();
        let mut t = SpiralTracer::new(config, (0.0, 0.0));

        // Down plus 9 moves, all well inside the finish radius.
        for event in noisy_trace(Utc::now(), b, PI, 3.0 * PI, 9, 0.0) {
            t.process(&event).unwrap();
        }
        assert_eq!(t.point_count(), 10);
        assert!(t.progress() > 0.0);

        let err = t
            .process(&PointerEvent::new(
                Utc::now() + Duration::seconds(1),
                PointerPhase::Up,
                0.0,
                0.0,
            ))
            .unwrap_err();
        assert_eq!(err, AnalysisError::Aborted);
        assert_eq!(t.point_count(), 0);
        assert_eq!(t.progress(), 0.0);
        assert!(!t.is_tracing());
    }

    #[test]
    fn test_short_trace_capped() {
        let config = SpiralConfig::default();
        let errors = vec![0.0; 10];
        let (_, score) = score_trace(&errors, &config).unwrap();
        assert_eq!(score, 40);

        let errors = vec![0.0; 30];
        let (_, score) = score_trace(&errors, &config).unwrap();
        assert_eq!(score, 100);
    }

    #[test]
    fn test_large_error_floors_at_zero() {
        let (_, score) = score_trace(&vec![80.0; 40], &SpiralConfig::default()).unwrap();
        assert_eq!(score, 0);
    }

    #[test]
    fn test_ideal_path_ends_at_max_radius() {
        let t = tracer();
        let path = t.ideal_path(300);
        let (x, y) = path[path.len() - 1];
        assert!((x.hypot(y) - 150.0).abs() < 1e-6);
    }
}
