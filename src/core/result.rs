//! Domain results, issue tags and calibration baselines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The three screening domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Domain {
    Visual,
    Audio,
    Touch,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Visual, Domain::Audio, Domain::Touch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Visual => "VISUAL",
            Domain::Audio => "AUDIO",
            Domain::Touch => "TOUCH",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Findings raised by a domain test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueTag {
    FacialAsymmetry,
    PitchInstability,
    BreathInstability,
    TracingDeviation,
    ArmDrop,
    RestingTremor,
}

impl IssueTag {
    /// Human-readable label used in record details.
    pub fn label(&self) -> &'static str {
        match self {
            IssueTag::FacialAsymmetry => "facial asymmetry",
            IssueTag::PitchInstability => "pitch instability",
            IssueTag::BreathInstability => "breath instability",
            IssueTag::TracingDeviation => "tracing deviation",
            IssueTag::ArmDrop => "arm drop",
            IssueTag::RestingTremor => "resting tremor",
        }
    }
}

/// Raw facial calibration metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisualBaseline {
    pub eye: f64,
    pub brow: f64,
    pub mouth: f64,
}

/// Raw voice calibration metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioBaseline {
    pub jitter: f64,
    pub shimmer: f64,
    pub mean_pitch_hz: f64,
    pub coherence: f64,
}

/// Raw motor calibration metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchBaseline {
    pub spiral_rmse: f64,
    pub max_drift_deg: f64,
    pub tremor_frequency_hz: f64,
    pub tremor_intensity: f64,
}

/// Calibration payload, keyed by domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Baseline {
    Visual(VisualBaseline),
    Audio(AudioBaseline),
    Touch(TouchBaseline),
}

impl Baseline {
    pub fn domain(&self) -> Domain {
        match self {
            Baseline::Visual(_) => Domain::Visual,
            Baseline::Audio(_) => Domain::Audio,
            Baseline::Touch(_) => Domain::Touch,
        }
    }
}

/// A user's personal reference measurements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual: Option<VisualBaseline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioBaseline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touch: Option<TouchBaseline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
}

impl BaselineProfile {
    /// Merge one domain's payload into the profile.
    pub fn apply(&mut self, baseline: Baseline, at: DateTime<Utc>) {
        match baseline {
            Baseline::Visual(b) => self.visual = Some(b),
            Baseline::Audio(b) => self.audio = Some(b),
            Baseline::Touch(b) => self.touch = Some(b),
        }
        self.captured_at = Some(at);
    }

    pub fn is_empty(&self) -> bool {
        self.visual.is_none() && self.audio.is_none() && self.touch.is_none()
    }
}

/// Outcome of one domain's test sequence. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainResult {
    pub domain: Domain,
    /// Normalized score, 0-100.
    pub score: u8,
    pub issues: BTreeSet<IssueTag>,
    /// Calibration payload; only present in calibration mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Baseline>,
    pub completed_at: DateTime<Utc>,
}

impl DomainResult {
    pub fn new(domain: Domain, score: u8, issues: BTreeSet<IssueTag>) -> Self {
        Self {
            domain,
            score: score.min(100),
            issues,
            raw: None,
            completed_at: Utc::now(),
        }
    }

    pub fn calibration(domain: Domain, raw: Baseline) -> Self {
        Self {
            domain,
            score: 100,
            issues: BTreeSet::new(),
            raw: Some(raw),
            completed_at: Utc::now(),
        }
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_tagging() {
        let b = Baseline::Touch(TouchBaseline {
            spiral_rmse: 4.0,
            max_drift_deg: 3.0,
            tremor_frequency_hz: 0.0,
            tremor_intensity: 0.05,
        });
        let json = serde_json::to_value(b).unwrap();
        assert_eq!(json["domain"], "TOUCH");
        let back: Baseline = serde_json::from_value(json).unwrap();
        assert_eq!(back.domain(), Domain::Touch);
    }

    #[test]
    fn test_profile_apply() {
        let mut profile = BaselineProfile::default();
        assert!(profile.is_empty());
        profile.apply(
            Baseline::Visual(VisualBaseline {
                eye: 95.0,
                brow: 97.0,
                mouth: 93.0,
            }),
            Utc::now(),
        );
        assert!(!profile.is_empty());
        assert!(profile.visual.is_some());
        assert!(profile.captured_at.is_some());
    }

    #[test]
    fn test_result_score_clamped() {
        let r = DomainResult::new(Domain::Audio, 150, BTreeSet::new());
        assert_eq!(r.score, 100);
    }
}
