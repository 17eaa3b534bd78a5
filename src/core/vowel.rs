//! Sustained-vowel test: pitch and amplitude stability.
//!
//! The recorder listens for voiced onset, records a fixed window, and
//! reduces the collected (pitch, amplitude) pairs to jitter and shimmer.

use crate::collector::{AudioFrame, AudioSource};
use crate::core::dsp::{mean, mean_abs_delta, rms, PitchDetector};
use crate::core::error::AnalysisError;
use crate::core::result::IssueTag;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Thresholds for the vowel test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VowelConfig {
    pub pitch: PitchDetector,
    /// RMS that marks voiced onset while listening.
    pub onset_rms: f64,
    #[serde(with = "crate::config::duration_ms")]
    pub recording_window: Duration,
    /// Listening gives up after this long without onset.
    #[serde(with = "crate::config::duration_ms")]
    pub listen_timeout: Duration,
    pub min_samples: usize,
    pub jitter_severe: f64,
    pub jitter_mild: f64,
    pub shimmer_severe: f64,
    pub shimmer_mild: f64,
    pub severe_penalty: u8,
    pub mild_penalty: u8,
}

impl Default for VowelConfig {
    fn default() -> Self {
        Self {
            pitch: PitchDetector::default(),
            onset_rms: 0.03,
            recording_window: Duration::milliseconds(3_000),
            listen_timeout: Duration::seconds(10),
            min_samples: 15,
            jitter_severe: 0.025,
            jitter_mild: 0.015,
            shimmer_severe: 0.10,
            shimmer_mild: 0.06,
            severe_penalty: 30,
            mild_penalty: 10,
        }
    }
}

/// Stability metrics for one sustained vowel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VowelMetrics {
    /// Mean |Δpitch| / mean pitch.
    pub jitter: f64,
    /// Mean |Δamplitude| / mean amplitude.
    pub shimmer: f64,
    pub mean_pitch_hz: f64,
    pub mean_amplitude: f64,
    pub samples: usize,
}

/// Score and findings for the vowel test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VowelAssessment {
    pub metrics: VowelMetrics,
    pub score: u8,
    pub issues: BTreeSet<IssueTag>,
}

/// Reduce collected samples to jitter and shimmer.
pub fn reduce_samples(
    pitches: &[f64],
    amplitudes: &[f64],
    min_samples: usize,
) -> Result<VowelMetrics, AnalysisError> {
    let n = pitches.len().min(amplitudes.len());
    if n < min_samples.max(2) {
        return Err(AnalysisError::InsufficientSamples {
            what: "pitch samples",
            required: min_samples,
            actual: n,
        });
    }
    let pitches = &pitches[..n];
    let amplitudes = &amplitudes[..n];

    let mean_pitch = mean(pitches).unwrap_or(0.0);
    let mean_amplitude = mean(amplitudes).unwrap_or(0.0);
    let ratio = |delta: Option<f64>, base: f64| match delta {
        Some(d) if base > 0.0 => d / base,
        _ => 0.0,
    };

    Ok(VowelMetrics {
        jitter: ratio(mean_abs_delta(pitches), mean_pitch),
        shimmer: ratio(mean_abs_delta(amplitudes), mean_amplitude),
        mean_pitch_hz: mean_pitch,
        mean_amplitude,
        samples: n,
    })
}

/// Apply the stepped jitter/shimmer deductions.
pub fn score_vowel(metrics: &VowelMetrics, config: &VowelConfig) -> VowelAssessment {
    let mut score: i32 = 100;
    let mut issues = BTreeSet::new();

    if metrics.jitter > config.jitter_severe {
        score -= i32::from(config.severe_penalty);
        issues.insert(IssueTag::PitchInstability);
    } else if metrics.jitter > config.jitter_mild {
        score -= i32::from(config.mild_penalty);
    }

    if metrics.shimmer > config.shimmer_severe {
        score -= i32::from(config.severe_penalty);
        issues.insert(IssueTag::BreathInstability);
    } else if metrics.shimmer > config.shimmer_mild {
        score -= i32::from(config.mild_penalty);
    }

    VowelAssessment {
        metrics: *metrics,
        score: score.clamp(0, 100) as u8,
        issues,
    }
}

/// Recorder lifecycle.
#[derive(Debug, Clone)]
enum RecorderState {
    Idle,
    Listening {
        since: DateTime<Utc>,
    },
    Recording {
        since: DateTime<Utc>,
        pitches: Vec<f64>,
        amplitudes: Vec<f64>,
    },
}

/// Progress reported after each frame.
#[derive(Debug, Clone, PartialEq)]
pub enum VowelProgress {
    Listening,
    Recording { elapsed: Duration, samples: usize },
    Complete(VowelMetrics),
}

/// Frame-driven recorder for the sustained-vowel test.
pub struct VowelRecorder {
    config: VowelConfig,
    state: RecorderState,
}

impl VowelRecorder {
    pub fn new(config: VowelConfig) -> Self {
        Self {
            config,
            state: RecorderState::Idle,
        }
    }

    /// Begin waiting for voiced onset.
    pub fn start_listening(&mut self, now: DateTime<Utc>) {
        self.state = RecorderState::Listening { since: now };
        debug!("Vowel recorder listening");
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, RecorderState::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecorderState::Recording { .. })
    }

    /// Cancel the test and discard the accumulation buffer.
    pub fn abort(&mut self) {
        if !self.is_idle() {
            debug!("Vowel recorder aborted");
        }
        self.state = RecorderState::Idle;
    }

    /// Feed one audio frame.
    pub fn process(&mut self, frame: &AudioFrame) -> Result<VowelProgress, AnalysisError> {
        let now = frame.timestamp;

        if let RecorderState::Listening { since } = self.state {
            if now - since >= self.config.listen_timeout {
                self.state = RecorderState::Idle;
                warn!("No voiced onset within {}s", self.config.listen_timeout.num_seconds());
                return Err(AnalysisError::Timeout("voiced onset"));
            }
            if rms(&frame.samples) <= self.config.onset_rms {
                return Ok(VowelProgress::Listening);
            }
            debug!("Voiced onset detected");
            self.state = RecorderState::Recording {
                since: now,
                pitches: Vec::new(),
                amplitudes: Vec::new(),
            };
        }

        let RecorderState::Recording {
            since,
            pitches,
            amplitudes,
        } = &mut self.state
        else {
            return Err(AnalysisError::InvalidState("vowel recorder is idle"));
        };

        let elapsed = now - *since;
        if elapsed < self.config.recording_window {
            let estimate = self.config.pitch.detect(&frame.samples, frame.sample_rate);
            if estimate.is_voiced() {
                pitches.push(estimate.frequency_hz);
                amplitudes.push(rms(&frame.samples));
            }
            return Ok(VowelProgress::Recording {
                elapsed,
                samples: pitches.len(),
            });
        }

        let state = std::mem::replace(&mut self.state, RecorderState::Idle);
        let RecorderState::Recording {
            pitches,
            amplitudes,
            ..
        } = state
        else {
            return Err(AnalysisError::InvalidState("vowel recorder lost its buffer"));
        };

        let metrics = reduce_samples(&pitches, &amplitudes, self.config.min_samples)?;
        info!(
            "Vowel recorded: {} samples, jitter {:.4}, shimmer {:.4}",
            metrics.samples, metrics.jitter, metrics.shimmer
        );
        Ok(VowelProgress::Complete(metrics))
    }

    /// Consume queued frames until the test completes or fails.
    ///
    /// Returns `Ok(None)` if the source ran dry first.
    pub fn drain<S: AudioSource>(
        &mut self,
        source: &S,
    ) -> Result<Option<VowelMetrics>, AnalysisError> {
        while let Some(frame) = source.try_recv() {
            if let VowelProgress::Complete(metrics) = self.process(&frame)? {
                return Ok(Some(metrics));
            }
        }
        Ok(None)
    }

    pub fn config(&self) -> &VowelConfig {
        &self.config
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::collector::AudioFrame;
    use chrono::{DateTime, Duration, Utc};
    use std::f64::consts::TAU;

    pub const RATE: u32 = 16_000;
    pub const FRAME_LEN: usize = 1024;

    /// A 64 ms frame of a pure tone.
    pub fn tone(at: DateTime<Utc>, freq: f64, amplitude: f32) -> AudioFrame {
        let samples = (0..FRAME_LEN)
            .map(|i| amplitude * (TAU * freq * i as f64 / f64::from(RATE)).sin() as f32)
            .collect();
        AudioFrame::new(at, RATE, samples)
    }

    pub fn silence(at: DateTime<Utc>) -> AudioFrame {
        AudioFrame::new(at, RATE, vec![0.0; FRAME_LEN])
    }

    /// Frame timestamps spaced 64 ms apart.
    pub fn frame_time(start: DateTime<Utc>, i: i64) -> DateTime<Utc> {
        start + Duration::milliseconds(i * 64)
    }
}
