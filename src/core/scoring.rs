//! Session scorer: sub-test sequencing and domain composites.
//!
//! Each domain runs its sub-tests strictly in order and only one sub-test
//! is active at a time. Completed sub-test outputs are combined into a
//! [`DomainResult`], or into a calibration baseline in calibration mode.

use crate::core::face::{FaceConfig, FaceSummary};
use crate::core::reading::{combine_audio, ReadingConfig, ReadingOutcome};
use crate::core::result::{
    AudioBaseline, Baseline, Domain, DomainResult, IssueTag, TouchBaseline, VisualBaseline,
};
use crate::core::spiral::{SpiralConfig, SpiralResult};
use crate::core::stability::{StabilityConfig, StabilityResult};
use crate::core::vowel::{score_vowel, VowelAssessment, VowelConfig, VowelMetrics};
use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Whether results are scored or captured as a personal baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningMode {
    #[default]
    Test,
    Calibration,
}

/// The individual sub-tests, in their per-domain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTest {
    FaceCapture,
    Vowel,
    Reading,
    Spiral,
    Stability,
}

impl SubTest {
    pub fn domain(&self) -> Domain {
        match self {
            SubTest::FaceCapture => Domain::Visual,
            SubTest::Vowel | SubTest::Reading => Domain::Audio,
            SubTest::Spiral | SubTest::Stability => Domain::Touch,
        }
    }

    /// The sub-test that must complete first, if any.
    pub fn prerequisite(&self) -> Option<SubTest> {
        match self {
            SubTest::Reading => Some(SubTest::Vowel),
            SubTest::Stability => Some(SubTest::Spiral),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubTest::FaceCapture => "face capture",
            SubTest::Vowel => "vowel",
            SubTest::Reading => "reading",
            SubTest::Spiral => "spiral",
            SubTest::Stability => "stability",
        };
        f.write_str(name)
    }
}

/// Sequencing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoringError {
    /// Another sub-test is still running.
    Busy { active: SubTest, requested: SubTest },
    /// The requested sub-test's prerequisite has not completed.
    OutOfOrder { requires: SubTest, requested: SubTest },
    /// A completion was reported for a sub-test that is not active.
    NotActive(SubTest),
}

impl std::fmt::Display for ScoringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringError::Busy { active, requested } => {
                write!(f, "Cannot start {requested} while {active} is running")
            }
            ScoringError::OutOfOrder { requires, requested } => {
                write!(f, "{requested} requires {requires} to complete first")
            }
            ScoringError::NotActive(sub) => write!(f, "{sub} is not running"),
        }
    }
}

impl std::error::Error for ScoringError {}

/// Owns sequencing state and composites for one screening session.
pub struct SessionScorer {
    mode: ScreeningMode,
    face: FaceConfig,
    vowel: VowelConfig,
    reading: ReadingConfig,
    spiral: SpiralConfig,
    stability: StabilityConfig,
    active: Option<SubTest>,
    vowel_done: Option<VowelAssessment>,
    spiral_done: Option<SpiralResult>,
    results: Vec<DomainResult>,
}

impl SessionScorer {
    pub fn new(mode: ScreeningMode, config: &Config) -> Self {
        Self {
            mode,
            face: config.face.clone(),
            vowel: config.vowel.clone(),
            reading: config.reading.clone(),
            spiral: config.spiral.clone(),
            stability: config.stability.clone(),
            active: None,
            vowel_done: None,
            spiral_done: None,
            results: Vec::new(),
        }
    }

    pub fn mode(&self) -> ScreeningMode {
        self.mode
    }

    pub fn active(&self) -> Option<SubTest> {
        self.active
    }

    /// Mark `sub` as running.
    ///
    /// Starting the first sub-test of a domain discards that domain's
    /// earlier partial and final results.
    pub fn begin(&mut self, sub: SubTest) -> Result<(), ScoringError> {
        if let Some(active) = self.active {
            return Err(ScoringError::Busy {
                active,
                requested: sub,
            });
        }
        match sub.prerequisite() {
            Some(SubTest::Vowel) if self.vowel_done.is_none() => {
                return Err(ScoringError::OutOfOrder {
                    requires: SubTest::Vowel,
                    requested: sub,
                })
            }
            Some(SubTest::Spiral) if self.spiral_done.is_none() => {
                return Err(ScoringError::OutOfOrder {
                    requires: SubTest::Spiral,
                    requested: sub,
                })
            }
            _ => {}
        }

        match sub {
            SubTest::Vowel => self.vowel_done = None,
            SubTest::Spiral => self.spiral_done = None,
            _ => {}
        }
        if sub.prerequisite().is_none() {
            self.results.retain(|r| r.domain != sub.domain());
        }

        self.active = Some(sub);
        debug!("Sub-test {sub} started");
        Ok(())
    }

    /// Cancel the active sub-test. Earlier completed sub-tests are kept.
    pub fn abort(&mut self) -> Option<SubTest> {
        let sub = self.active.take()?;
        debug!("Sub-test {sub} aborted");
        Some(sub)
    }

    fn finish(&mut self, sub: SubTest) -> Result<(), ScoringError> {
        if self.active != Some(sub) {
            return Err(ScoringError::NotActive(sub));
        }
        self.active = None;
        Ok(())
    }

    fn push(&mut self, result: DomainResult) -> DomainResult {
        info!(
            "{} domain complete: score {}, issues {:?}",
            result.domain, result.score, result.issues
        );
        self.results.retain(|r| r.domain != result.domain);
        self.results.push(result.clone());
        result
    }

    /// Complete the facial capture and emit the visual result.
    pub fn complete_face(&mut self, summary: &FaceSummary) -> Result<DomainResult, ScoringError> {
        self.finish(SubTest::FaceCapture)?;
        let result = match self.mode {
            ScreeningMode::Calibration => DomainResult::calibration(
                Domain::Visual,
                Baseline::Visual(VisualBaseline {
                    eye: summary.eye,
                    brow: summary.brow,
                    mouth: summary.mouth,
                }),
            ),
            ScreeningMode::Test => {
                let score = summary.score(&self.face);
                let mut issues = BTreeSet::new();
                if score < self.face.asymmetry_issue_below {
                    issues.insert(IssueTag::FacialAsymmetry);
                }
                DomainResult::new(Domain::Visual, score, issues)
            }
        };
        Ok(self.push(result))
    }

    /// Complete the vowel sub-test. The audio result follows the reading.
    pub fn complete_vowel(
        &mut self,
        metrics: &VowelMetrics,
    ) -> Result<VowelAssessment, ScoringError> {
        self.finish(SubTest::Vowel)?;
        let assessment = score_vowel(metrics, &self.vowel);
        self.vowel_done = Some(assessment.clone());
        Ok(assessment)
    }

    /// Complete the reading sub-test and emit the audio result.
    pub fn complete_reading(
        &mut self,
        reading: &ReadingOutcome,
    ) -> Result<DomainResult, ScoringError> {
        self.finish(SubTest::Reading)?;
        let vowel = self.vowel_done.take().ok_or(ScoringError::OutOfOrder {
            requires: SubTest::Vowel,
            requested: SubTest::Reading,
        })?;
        let result = match self.mode {
            ScreeningMode::Calibration => DomainResult::calibration(
                Domain::Audio,
                Baseline::Audio(AudioBaseline {
                    jitter: vowel.metrics.jitter,
                    shimmer: vowel.metrics.shimmer,
                    mean_pitch_hz: vowel.metrics.mean_pitch_hz,
                    coherence: f64::from(reading.coherence),
                }),
            ),
            ScreeningMode::Test => {
                let (score, issues) = combine_audio(&vowel, reading, &self.reading);
                DomainResult::new(Domain::Audio, score, issues)
            }
        };
        Ok(self.push(result))
    }

    /// Complete the spiral sub-test. The touch result follows stability.
    pub fn complete_spiral(&mut self, spiral: &SpiralResult) -> Result<(), ScoringError> {
        self.finish(SubTest::Spiral)?;
        self.spiral_done = Some(spiral.clone());
        Ok(())
    }

    /// Complete the stability sub-test and emit the touch result.
    pub fn complete_stability(
        &mut self,
        stability: &StabilityResult,
    ) -> Result<DomainResult, ScoringError> {
        self.finish(SubTest::Stability)?;
        let spiral = self.spiral_done.take().ok_or(ScoringError::OutOfOrder {
            requires: SubTest::Spiral,
            requested: SubTest::Stability,
        })?;
        let result = match self.mode {
            ScreeningMode::Calibration => DomainResult::calibration(
                Domain::Touch,
                Baseline::Touch(TouchBaseline {
                    spiral_rmse: spiral.rmse,
                    max_drift_deg: stability.max_drift_deg,
                    tremor_frequency_hz: stability.tremor.frequency_hz,
                    tremor_intensity: stability.tremor.intensity,
                }),
            ),
            ScreeningMode::Test => {
                let weighted = self.spiral.composite_weight * f64::from(spiral.score)
                    + self.stability.composite_weight * f64::from(stability.score);
                let mut issues = stability.issues.clone();
                if spiral.score < self.spiral.deviation_issue_below {
                    issues.insert(IssueTag::TracingDeviation);
                }
                DomainResult::new(
                    Domain::Touch,
                    weighted.floor().clamp(0.0, 100.0) as u8,
                    issues,
                )
            }
        };
        Ok(self.push(result))
    }

    /// Results emitted so far, at most one per domain.
    pub fn results(&self) -> &[DomainResult] {
        &self.results
    }

    pub fn result(&self, domain: Domain) -> Option<&DomainResult> {
        self.results.iter().find(|r| r.domain == domain)
    }

    /// Baseline payloads captured in calibration mode.
    pub fn baselines(&self) -> Vec<Baseline> {
        self.results.iter().filter_map(|r| r.raw).collect()
    }
}
