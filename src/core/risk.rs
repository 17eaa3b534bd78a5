//! Risk aggregation across domains and narrative reconciliation.
//!
//! Overall status follows the weakest-link rule: one critically low
//! domain forces DANGER no matter how the others score. An external
//! narrative may describe the session, but never downgrade DANGER.

use crate::core::result::{BaselineProfile, Domain, DomainResult};
use crate::services::NarrativeGenerator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Status cut-offs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Any domain below this forces DANGER.
    pub danger_below: u8,
    /// An average below this (and no DANGER) gives CAUTION.
    pub caution_below: u8,
    /// Days of stored history averaged for narrative context.
    pub history_days: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            danger_below: 60,
            caution_below: 80,
            history_days: 7,
        }
    }
}

/// Computed overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Normal,
    Caution,
    Danger,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OverallStatus::Normal => "NORMAL",
            OverallStatus::Caution => "CAUTION",
            OverallStatus::Danger => "DANGER",
        };
        f.write_str(s)
    }
}

/// Aggregate over the domains that actually ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub lowest_score: u8,
    pub average_score: f64,
    pub status: OverallStatus,
    pub scores: BTreeMap<Domain, u8>,
}

/// Classify a set of domain scores. Missing domains are excluded.
pub fn assess_scores(scores: &BTreeMap<Domain, u8>, config: &RiskConfig) -> RiskAssessment {
    if scores.is_empty() {
        return RiskAssessment {
            lowest_score: 100,
            average_score: 100.0,
            status: OverallStatus::Normal,
            scores: BTreeMap::new(),
        };
    }

    let lowest_score = scores.values().copied().min().unwrap_or(100);
    let average_score =
        scores.values().map(|&s| f64::from(s)).sum::<f64>() / scores.len() as f64;

    let status = if lowest_score < config.danger_below {
        OverallStatus::Danger
    } else if average_score < f64::from(config.caution_below) {
        OverallStatus::Caution
    } else {
        OverallStatus::Normal
    };

    RiskAssessment {
        lowest_score,
        average_score,
        status,
        scores: scores.clone(),
    }
}

/// Classify a session's domain results.
pub fn assess(results: &[DomainResult], config: &RiskConfig) -> RiskAssessment {
    let scores = results.iter().map(|r| (r.domain, r.score)).collect();
    assess_scores(&scores, config)
}

/// Weather-style status used by narratives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NarrativeStatus {
    Sunny,
    Cloudy,
    Storm,
}

impl From<OverallStatus> for NarrativeStatus {
    fn from(status: OverallStatus) -> Self {
        match status {
            OverallStatus::Normal => NarrativeStatus::Sunny,
            OverallStatus::Caution => NarrativeStatus::Cloudy,
            OverallStatus::Danger => NarrativeStatus::Storm,
        }
    }
}

/// A short human-readable summary of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub status: NarrativeStatus,
    pub message: String,
}

/// Context handed to a narrative generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeRequest {
    pub scores: BTreeMap<Domain, u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<BaselineProfile>,
    pub history_average: BTreeMap<Domain, f64>,
    pub status: OverallStatus,
}

impl NarrativeRequest {
    pub fn new(
        assessment: &RiskAssessment,
        baseline: Option<BaselineProfile>,
        history_average: BTreeMap<Domain, f64>,
    ) -> Self {
        Self {
            scores: assessment.scores.clone(),
            baseline,
            history_average,
            status: assessment.status,
        }
    }

    /// Plain-text prompt for text-generation services.
    pub fn prompt(&self) -> String {
        let mut prompt = String::from("Neurological screening results (0-100, higher is better).\n");
        for (domain, score) in &self.scores {
            prompt.push_str(&format!("{domain}: {score}"));
            if let Some(avg) = self.history_average.get(domain) {
                prompt.push_str(&format!(" (recent average {avg:.0})"));
            }
            prompt.push('\n');
        }
        if self.baseline.as_ref().is_some_and(|b| !b.is_empty()) {
            prompt.push_str("A personal baseline is on file.\n");
        }
        prompt.push_str(&format!("Computed status: {}.\n", self.status));
        prompt.push_str("Reply with a status (SUNNY, CLOUDY or STORM) and one short sentence.");
        prompt
    }
}

/// Deterministic narrative derived from the computed status.
pub fn fallback_narrative(assessment: &RiskAssessment) -> Narrative {
    let message = match assessment.status {
        OverallStatus::Normal => "Your results look steady today.",
        OverallStatus::Caution => {
            "Some results are lower than usual. Consider repeating the check later."
        }
        OverallStatus::Danger => {
            "One or more results are significantly low. If you notice sudden symptoms, seek medical help immediately."
        }
    };
    Narrative {
        status: assessment.status.into(),
        message: message.to_string(),
    }
}

/// Apply the safety net: a computed DANGER always yields STORM.
pub fn reconcile(narrative: Narrative, assessment: &RiskAssessment) -> Narrative {
    if assessment.status == OverallStatus::Danger && narrative.status != NarrativeStatus::Storm {
        warn!(
            "Narrative status {:?} overridden by weakest-link rule (lowest score {})",
            narrative.status, assessment.lowest_score
        );
        return fallback_narrative(assessment);
    }
    narrative
}

/// Ask `generator` for a narrative, falling back locally on failure.
pub fn narrate(
    request: &NarrativeRequest,
    assessment: &RiskAssessment,
    generator: &dyn NarrativeGenerator,
) -> Narrative {
    let narrative = match generator.generate(request) {
        Ok(n) => n,
        Err(e) => {
            warn!("Narrative service failed, using fallback: {e}");
            let mut n = fallback_narrative(assessment);
            n.message = format!("{} (Narrative service unavailable.)", n.message);
            n
        }
    };
    let narrative = reconcile(narrative, assessment);
    info!("Narrative status {:?}", narrative.status);
    narrative
}
