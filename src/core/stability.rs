//! Arm-stability test: orientation drift and resting tremor.
//!
//! The protocol is a fixed countdown followed by a fixed measurement
//! window. The motion source is only running during measurement.

use crate::collector::{MotionEvent, MotionSource};
use crate::core::dsp::mean;
use crate::core::error::AnalysisError;
use crate::core::result::IssueTag;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Protocol timing and heuristic thresholds for the stability test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    #[serde(with = "crate::config::duration_ms")]
    pub preparation: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub measure: Duration,
    /// Tilt deviation (degrees) beyond which the arm is drifting.
    pub drift_limit_deg: f64,
    /// Points deducted per degree of drift.
    pub drift_factor: f64,
    pub tremor_min_hz: f64,
    pub tremor_max_hz: f64,
    /// RMS of the AC acceleration signal required to flag tremor.
    pub tremor_min_intensity: f64,
    pub penalty_factor: f64,
    pub penalty_cap: f64,
    /// Motion samples needed before tremor detection is attempted.
    pub min_samples: usize,
    /// Share of the touch composite.
    pub composite_weight: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            preparation: Duration::seconds(5),
            measure: Duration::seconds(10),
            drift_limit_deg: 15.0,
            drift_factor: 2.0,
            tremor_min_hz: 3.0,
            tremor_max_hz: 12.0,
            tremor_min_intensity: 0.2,
            penalty_factor: 80.0,
            penalty_cap: 50.0,
            min_samples: 10,
            composite_weight: 0.5,
        }
    }
}

/// Tremor estimate from the acceleration magnitude stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TremorAnalysis {
    pub frequency_hz: f64,
    pub intensity: f64,
    pub detected: bool,
    pub samples: usize,
}

/// Estimate tremor frequency and intensity.
///
/// The signal is mean-removed, intensity is the RMS of the residual and
/// frequency is half the zero-crossing rate.
pub fn analyze_tremor(
    magnitudes: &[f64],
    duration_secs: f64,
    config: &StabilityConfig,
) -> TremorAnalysis {
    let samples = magnitudes.len();
    if samples < config.min_samples || duration_secs <= 0.0 {
        return TremorAnalysis {
            samples,
            ..TremorAnalysis::default()
        };
    }

    let dc = mean(magnitudes).unwrap_or(0.0);
    let ac: Vec<f64> = magnitudes.iter().map(|m| m - dc).collect();
    let intensity = ac.iter().quadratic_mean();
    let crossings = ac
        .windows(2)
        .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
        .count();
    let frequency_hz = crossings as f64 / (2.0 * duration_secs);

    let detected = is_tremor(frequency_hz, intensity, config);

    TremorAnalysis {
        frequency_hz,
        intensity,
        detected,
        samples,
    }
}

/// Band is inclusive at both ends; intensity must exceed the threshold.
pub fn is_tremor(frequency_hz: f64, intensity: f64, config: &StabilityConfig) -> bool {
    (config.tremor_min_hz..=config.tremor_max_hz).contains(&frequency_hz)
        && intensity > config.tremor_min_intensity
}

/// Outcome of a completed stability test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityResult {
    pub max_drift_deg: f64,
    pub drift_score: f64,
    pub tremor: TremorAnalysis,
    pub score: u8,
    pub issues: BTreeSet<IssueTag>,
}

/// Combine drift and tremor into the stability score.
pub fn score_stability(
    max_drift_deg: f64,
    tremor: TremorAnalysis,
    config: &StabilityConfig,
) -> StabilityResult {
    let drift_score = (100.0 - config.drift_factor * max_drift_deg).max(0.0);
    let penalty = if tremor.detected {
        (tremor.intensity * config.penalty_factor).min(config.penalty_cap)
    } else {
        0.0
    };
    let score = (drift_score - penalty).floor().clamp(0.0, 100.0) as u8;

    let mut issues = BTreeSet::new();
    if max_drift_deg > config.drift_limit_deg {
        issues.insert(IssueTag::ArmDrop);
    }
    if tremor.detected {
        issues.insert(IssueTag::RestingTremor);
    }

    StabilityResult {
        max_drift_deg,
        drift_score,
        tremor,
        score,
        issues,
    }
}

/// Measurement buffers. Discarded on completion or abort.
#[derive(Debug)]
struct StabilitySession {
    started: DateTime<Utc>,
    ends: DateTime<Utc>,
    initial_beta: Option<f64>,
    max_drift: f64,
    magnitudes: Vec<f64>,
    first_motion: Option<DateTime<Utc>>,
    last_motion: Option<DateTime<Utc>>,
}

impl StabilitySession {
    fn new(started: DateTime<Utc>, measure: Duration) -> Self {
        Self {
            started,
            ends: started + measure,
            initial_beta: None,
            max_drift: 0.0,
            magnitudes: Vec::new(),
            first_motion: None,
            last_motion: None,
        }
    }

    /// Add one event. Events stamped outside `[started, ends)` are ignored.
    fn ingest(&mut self, event: MotionEvent) -> bool {
        let at = event.timestamp();
        if at < self.started || at >= self.ends {
            return false;
        }
        match event {
            MotionEvent::Orientation(o) => match self.initial_beta {
                None => self.initial_beta = Some(o.beta),
                Some(initial) => self.max_drift = self.max_drift.max((o.beta - initial).abs()),
            },
            MotionEvent::Motion(m) => {
                if let Some(mag) = m.magnitude() {
                    self.magnitudes.push(mag);
                    self.first_motion.get_or_insert(m.timestamp);
                    self.last_motion = Some(m.timestamp);
                }
            }
        }
        true
    }

    fn motion_span_secs(&self, fallback: Duration) -> f64 {
        let span = match (self.first_motion, self.last_motion) {
            (Some(first), Some(last)) if last > first => last - first,
            _ => fallback,
        };
        span.num_milliseconds() as f64 / 1000.0
    }
}

#[derive(Debug)]
enum Phase {
    Idle,
    Preparing { until: DateTime<Utc> },
    Measuring(StabilitySession),
}

/// Progress reported by [`StabilityTest::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum StabilityProgress {
    Idle,
    Preparing { remaining: Duration },
    Measuring { remaining: Duration, samples: usize },
    Complete(StabilityResult),
}

/// Countdown-driven stability test over a motion source.
pub struct StabilityTest<M: MotionSource> {
    config: StabilityConfig,
    source: M,
    phase: Phase,
}

impl<M: MotionSource> StabilityTest<M> {
    pub fn new(config: StabilityConfig, source: M) -> Self {
        Self {
            config,
            source,
            phase: Phase::Idle,
        }
    }

    /// Start the preparation countdown.
    pub fn begin(&mut self, now: DateTime<Utc>) {
        self.abort();
        self.phase = Phase::Preparing {
            until: now + self.config.preparation,
        };
        debug!("Stability test preparing");
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    pub fn is_measuring(&self) -> bool {
        matches!(self.phase, Phase::Measuring(_))
    }

    /// Advance the protocol clock.
    ///
    /// The motion listener is registered on entering measurement and
    /// unregistered as soon as the window closes.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<StabilityProgress, AnalysisError> {
        if let Phase::Preparing { until } = self.phase {
            if now < until {
                return Ok(StabilityProgress::Preparing {
                    remaining: until - now,
                });
            }
            if let Err(e) = self.source.start() {
                self.phase = Phase::Idle;
                warn!("Motion source failed to start: {e}");
                return Err(e.into());
            }
            debug!("Stability measurement started");
            self.phase = Phase::Measuring(StabilitySession::new(until, self.config.measure));
        }

        let Phase::Measuring(session) = &mut self.phase else {
            return Ok(StabilityProgress::Idle);
        };

        let mut outside = 0usize;
        while let Some(event) = self.source.try_recv() {
            if !session.ingest(event) {
                outside += 1;
            }
        }
        if outside > 0 {
            debug!("Ignored {outside} motion events outside the measurement window");
        }

        let ends = session.ends;
        if now < ends {
            return Ok(StabilityProgress::Measuring {
                remaining: ends - now,
                samples: session.magnitudes.len(),
            });
        }

        self.source.stop();
        let Phase::Measuring(session) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return Err(AnalysisError::InvalidState("stability session lost"));
        };
        self.finish(session).map(StabilityProgress::Complete)
    }

    fn finish(&self, session: StabilitySession) -> Result<StabilityResult, AnalysisError> {
        if session.initial_beta.is_none() && session.magnitudes.len() < self.config.min_samples {
            return Err(AnalysisError::InsufficientSamples {
                what: "motion samples",
                required: self.config.min_samples,
                actual: session.magnitudes.len(),
            });
        }

        let duration = session.motion_span_secs(self.config.measure);
        let tremor = analyze_tremor(&session.magnitudes, duration, &self.config);
        let result = score_stability(session.max_drift, tremor, &self.config);
        info!(
            "Stability complete: drift {:.1}°, tremor {:.2} Hz @ {:.3}, score {}",
            result.max_drift_deg, tremor.frequency_hz, tremor.intensity, result.score
        );
        Ok(result)
    }

    /// Cancel the test, unregistering the listener and discarding samples.
    pub fn abort(&mut self) {
        if self.source.is_running() {
            self.source.stop();
        }
        if !self.is_idle() {
            debug!("Stability test aborted");
        }
        self.phase = Phase::Idle;
    }

    pub fn source(&self) -> &M {
        &self.source
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }
}

impl<M: MotionSource> Drop for StabilityTest<M> {
    fn drop(&mut self) {
        if self.source.is_running() {
            self.source.stop();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::collector::{MotionEvent, MotionSample, OrientationSample, Vector3};
    use chrono::{DateTime, Duration, Utc};
    use std::f64::consts::{SQRT_2, TAU};

    /// Raw including-gravity readings oscillating around 1 g.
    ///
    /// The residual after mean removal has RMS `rms`.
    pub fn tremor_stream(
        start: DateTime<Utc>,
        freq_hz: f64,
        rms: f64,
        rate_hz: f64,
        secs: f64,
    ) -> Vec<MotionEvent> {
        let n = (rate_hz * secs) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / rate_hz;
                let z = 9.81 + rms * SQRT_2 * (TAU * freq_hz * t + 0.3).sin();
                MotionEvent::Motion(MotionSample {
                    timestamp: start + Duration::microseconds((t * 1e6) as i64),
                    acceleration: None,
                    acceleration_including_gravity: Some(Vector3::new(0.0, 0.0, z)),
                })
            })
            .collect()
    }

    pub fn orientation(at: DateTime<Utc>, beta: f64) -> MotionEvent {
        MotionEvent::Orientation(OrientationSample {
            timestamp: at,
            beta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::collector::{ChannelSource, SensorSource, SourceError};

    fn magnitudes(events: &[MotionEvent]) -> Vec<f64> {
        events
            .iter()
            .filter_map(|e| match e {
                MotionEvent::Motion(m) => m.magnitude(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_tremor_detected_in_band() {
        let events = tremor_stream(Utc::now(), 5.0, 0.25, 60.0, 10.0);
        let t = analyze_tremor(&magnitudes(&events), 10.0, &StabilityConfig::default());
        assert!((t.intensity - 0.25).abs() < 0.01, "{t:?}");
        assert!((t.frequency_hz - 5.0).abs() < 0.2, "{t:?}");
        assert!(t.detected);
    }

    #[test]
    fn test_slow_sway_not_tremor() {
        let events = tremor_stream(Utc::now(), 1.0, 0.25, 60.0, 10.0);
        let t = analyze_tremor(&magnitudes(&events), 10.0, &StabilityConfig::default());
        assert!((t.frequency_hz - 1.0).abs() < 0.2, "{t:?}");
        assert!(!t.detected);
    }

    #[test]
    fn test_too_few_samples_not_detected() {
        let t = analyze_tremor(&[9.0, 10.0, 9.0], 1.0, &StabilityConfig::default());
        assert!(!t.detected);
        assert_eq!(t.samples, 3);
    }

    #[test]
    fn test_score_combination() {
        let config = StabilityConfig::default();
        let tremor = TremorAnalysis {
            frequency_hz: 6.0,
            intensity: 0.5,
            detected: true,
            samples: 600,
        };
        let r = score_stability(20.0, tremor, &config);
        // drift 60, penalty min(50, 40) = 40
        assert_eq!(r.score, 20);
        assert!(r.issues.contains(&IssueTag::ArmDrop));
        assert!(r.issues.contains(&IssueTag::RestingTremor));

        let strong = TremorAnalysis {
            intensity: 2.0,
            ..tremor
        };
        assert_eq!(score_stability(0.0, strong, &config).score, 50);
        assert_eq!(score_stability(60.0, strong, &config).score, 0);
    }

    #[test]
    fn test_drift_limit_is_exclusive() {
        let config = StabilityConfig::default();
        let at_limit = score_stability(15.0, TremorAnalysis::default(), &config);
        assert!(!at_limit.issues.contains(&IssueTag::ArmDrop));
        assert_eq!(at_limit.score, 70);

        let over = score_stability(15.1, TremorAnalysis::default(), &config);
        assert!(over.issues.contains(&IssueTag::ArmDrop));
        assert_eq!(over.score, 69);
    }

    #[test]
    fn test_tremor_band_edges() {
        let config = StabilityConfig::default();
        assert!(is_tremor(3.0, 0.5, &config));
        assert!(is_tremor(12.0, 0.5, &config));
        assert!(!is_tremor(2.99, 0.5, &config));
        assert!(!is_tremor(12.01, 0.5, &config));

        assert!(!is_tremor(6.0, 0.2, &config));
        assert!(is_tremor(6.0, 0.201, &config));
    }

    /// Square wave with `runs` alternating runs of `run_len` samples.
    fn square_wave(runs: usize, run_len: usize) -> Vec<f64> {
        (0..runs * run_len)
            .map(|i| if (i / run_len) % 2 == 0 { 9.5 } else { 10.5 })
            .collect()
    }

    #[test]
    fn test_zero_crossing_frequency_at_band_edges() {
        let config = StabilityConfig::default();

        // 7 runs give 6 crossings: 3 Hz over one second
        let low = analyze_tremor(&square_wave(7, 2), 1.0, &config);
        assert_eq!(low.frequency_hz, 3.0);
        assert!(low.detected, "{low:?}");

        // 25 runs give 24 crossings: 12 Hz
        let high = analyze_tremor(&square_wave(25, 1), 1.0, &config);
        assert_eq!(high.frequency_hz, 12.0);
        assert!(high.detected, "{high:?}");

        let above = analyze_tremor(&square_wave(27, 1), 1.0, &config);
        assert_eq!(above.frequency_hz, 13.0);
        assert!(!above.detected);
    }

    #[test]
    fn test_events_after_window_are_ignored() {
        let start = Utc::now();
        let source: ChannelSource<MotionEvent> = ChannelSource::default();
        let handle = source.handle();
        let mut test = StabilityTest::new(StabilityConfig::default(), source);

        test.begin(start);
        let measure_start = start + Duration::seconds(5);
        test.tick(measure_start).unwrap();

        handle.push(orientation(measure_start, 0.0));
        for event in tremor_stream(measure_start, 5.0, 0.25, 60.0, 10.0) {
            handle.push(event);
        }
        // Stamped after the window closed but still queued.
        handle.push(orientation(measure_start + Duration::seconds(12), 40.0));
        for event in tremor_stream(measure_start + Duration::seconds(10), 1.0, 3.0, 60.0, 2.0) {
            handle.push(event);
        }

        let result = match test.tick(measure_start + Duration::seconds(13)).unwrap() {
            StabilityProgress::Complete(r) => r,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(result.max_drift_deg, 0.0);
        assert_eq!(result.tremor.samples, 600);
        assert!(result.tremor.detected);
        assert!(!result.issues.contains(&IssueTag::ArmDrop));
    }

    #[test]
    fn test_protocol_runs_countdown_then_measures() {
        let start = Utc::now();
        let source: ChannelSource<MotionEvent> = ChannelSource::default();
        let handle = source.handle();
        let mut test = StabilityTest::new(StabilityConfig::default(), source);

        test.begin(start);
        assert!(matches!(
            test.tick(start + Duration::seconds(2)).unwrap(),
            StabilityProgress::Preparing { .. }
        ));
        assert!(!test.source().is_running());
        // Listener not registered yet, so this is dropped.
        assert!(!handle.push(orientation(start, 0.0)));

        let measure_start = start + Duration::seconds(5);
        assert!(matches!(
            test.tick(measure_start).unwrap(),
            StabilityProgress::Measuring { .. }
        ));
        assert!(test.source().is_running());

        handle.push(orientation(measure_start, 10.0));
        for event in tremor_stream(measure_start, 5.0, 0.25, 60.0, 10.0) {
            handle.push(event);
        }
        handle.push(orientation(measure_start + Duration::seconds(9), 30.0));

        let result = match test.tick(measure_start + Duration::seconds(10)).unwrap() {
            StabilityProgress::Complete(r) => r,
            other => panic!("expected completion, got {other:?}"),
        };
        assert!(!test.source().is_running());
        assert!(test.is_idle());
        assert_eq!(result.max_drift_deg, 20.0);
        assert!(result.tremor.detected);
        assert!(result.issues.contains(&IssueTag::ArmDrop));
        assert!(result.issues.contains(&IssueTag::RestingTremor));
        // drift 60 minus penalty ~20
        assert!((39..=41).contains(&result.score), "{result:?}");
    }

    #[test]
    fn test_abort_unregisters_listener() {
        let start = Utc::now();
        let mut test = StabilityTest::new(StabilityConfig::default(), ChannelSource::<MotionEvent>::default());
        test.begin(start);
        test.tick(start + Duration::seconds(6)).unwrap();
        assert!(test.source().is_running());

        test.abort();
        assert!(!test.source().is_running());
        assert!(test.is_idle());
        assert_eq!(
            test.tick(start + Duration::seconds(20)).unwrap(),
            StabilityProgress::Idle
        );
    }

    #[test]
    fn test_no_samples_is_insufficient() {
        let start = Utc::now();
        let mut test = StabilityTest::new(StabilityConfig::default(), ChannelSource::<MotionEvent>::default());
        test.begin(start);
        test.tick(start + Duration::seconds(5)).unwrap();
        let err = test.tick(start + Duration::seconds(15)).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientSamples { .. }));
        assert!(!test.source().is_running());
    }

    #[test]
    fn test_permission_failure_reported() {
        let start = Utc::now();
        let source: ChannelSource<MotionEvent> =
            ChannelSource::failing(SourceError::PermissionDenied("motion sensors".into()));
        let mut test = StabilityTest::new(StabilityConfig::default(), source);
        test.begin(start);
        let err = test.tick(start + Duration::seconds(5)).unwrap_err();
        assert!(matches!(err, AnalysisError::Source(_)));
        assert!(test.is_idle());
    }
}
