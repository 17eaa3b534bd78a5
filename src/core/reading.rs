//! Read-aloud test: transcript settling, pace and semantic coherence.
//!
//! Speech-to-text and the coherence judgement itself are external. This
//! module decides when a transcript is final, measures reading pace, and
//! combines the coherence score with the vowel result.

use crate::core::error::AnalysisError;
use crate::core::result::IssueTag;
use crate::core::vowel::VowelAssessment;
use crate::services::{CoherenceScorer, LocalCoherence};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Settings for the reading test and the audio composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingConfig {
    /// Quiet period after which the transcript is considered final.
    #[serde(with = "crate::config::duration_ms")]
    pub settle_after: Duration,
    pub min_chars: usize,
    pub vowel_weight: f64,
    pub reading_weight: f64,
    /// Composite ceiling when the vowel test raised any issue.
    pub vowel_issue_cap: u8,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            settle_after: Duration::milliseconds(2_500),
            min_chars: 3,
            vowel_weight: 0.4,
            reading_weight: 0.6,
            vowel_issue_cap: 65,
        }
    }
}

/// A transcript that has stopped changing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalTranscript {
    pub text: String,
    pub first_text_at: DateTime<Utc>,
    pub last_text_at: DateTime<Utc>,
}

impl FinalTranscript {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Words per minute between the first and last recognized text.
    pub fn words_per_minute(&self) -> Option<f64> {
        let secs = (self.last_text_at - self.first_text_at).num_milliseconds() as f64 / 1000.0;
        if secs <= 0.0 {
            return None;
        }
        Some(self.word_count() as f64 * 60.0 / secs)
    }
}

/// Watches interim recognition results and finalizes the transcript.
#[derive(Debug, Clone)]
pub struct TranscriptSettler {
    settle_after: Duration,
    min_chars: usize,
    text: String,
    first_text_at: Option<DateTime<Utc>>,
    last_text_at: Option<DateTime<Utc>>,
}

impl TranscriptSettler {
    pub fn new(config: &ReadingConfig) -> Self {
        Self {
            settle_after: config.settle_after,
            min_chars: config.min_chars,
            text: String::new(),
            first_text_at: None,
            last_text_at: None,
        }
    }

    /// Record the recognizer's current transcript.
    pub fn update(&mut self, text: &str, at: DateTime<Utc>) {
        let text = text.trim();
        if text == self.text {
            return;
        }
        if self.first_text_at.is_none() && !text.is_empty() {
            self.first_text_at = Some(at);
        }
        self.text = text.to_string();
        self.last_text_at = Some(at);
    }

    /// Returns the final transcript once speech has settled.
    pub fn poll(&self, now: DateTime<Utc>) -> Option<FinalTranscript> {
        let last = self.last_text_at?;
        let first = self.first_text_at?;
        if self.text.chars().count() < self.min_chars || now - last < self.settle_after {
            return None;
        }
        Some(FinalTranscript {
            text: self.text.clone(),
            first_text_at: first,
            last_text_at: last,
        })
    }

    pub fn reset(&mut self) {
        self.text.clear();
        self.first_text_at = None;
        self.last_text_at = None;
    }
}

/// Result of the reading sub-test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingOutcome {
    /// Semantic coherence, 0-100.
    pub coherence: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words_per_minute: Option<f64>,
    /// Set when the coherence service failed and the local fallback was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_message: Option<String>,
}

/// Score a final transcript against the prompt.
///
/// Service failures fall back to local prompt-word recall.
pub fn assess_reading(
    transcript: &FinalTranscript,
    prompt: &str,
    scorer: &dyn CoherenceScorer,
) -> Result<ReadingOutcome, AnalysisError> {
    if transcript.text.trim().is_empty() {
        return Err(AnalysisError::InsufficientSamples {
            what: "transcript characters",
            required: 1,
            actual: 0,
        });
    }

    let (coherence, fallback_message) = match scorer.score(&transcript.text, prompt) {
        Ok(score) => (score.min(100), None),
        Err(e) => {
            warn!("Coherence service failed, using local fallback: {e}");
            let score = LocalCoherence.score(&transcript.text, prompt).unwrap_or(0);
            (
                score,
                Some("Coherence service unavailable; local estimate used".to_string()),
            )
        }
    };

    let outcome = ReadingOutcome {
        coherence,
        words_per_minute: transcript.words_per_minute(),
        fallback_message,
    };
    info!(
        "Reading assessed: coherence {}, pace {:?} wpm",
        outcome.coherence, outcome.words_per_minute
    );
    Ok(outcome)
}

/// Combine vowel and reading into the audio composite.
///
/// Any vowel finding caps the composite regardless of reading fluency.
pub fn combine_audio(
    vowel: &VowelAssessment,
    reading: &ReadingOutcome,
    config: &ReadingConfig,
) -> (u8, BTreeSet<IssueTag>) {
    let weighted = config.vowel_weight * f64::from(vowel.score)
        + config.reading_weight * f64::from(reading.coherence);
    let mut score = weighted.floor().clamp(0.0, 100.0) as u8;
    if !vowel.issues.is_empty() {
        score = score.min(config.vowel_issue_cap);
    }
    (score, vowel.issues.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vowel::VowelMetrics;
    use crate::services::ServiceError;

    struct FixedScorer(u8);

    impl CoherenceScorer for FixedScorer {
        fn score(&self, _transcript: &str, _prompt: &str) -> Result<u8, ServiceError> {
            Ok(self.0)
        }
    }

    struct DownScorer;

    impl CoherenceScorer for DownScorer {
        fn score(&self, _transcript: &str, _prompt: &str) -> Result<u8, ServiceError> {
            Err(ServiceError::Network("connection refused".into()))
        }
    }

    fn vowel(score: u8, issues: &[IssueTag]) -> VowelAssessment {
        VowelAssessment {
            metrics: VowelMetrics {
                jitter: 0.0,
                shimmer: 0.0,
                mean_pitch_hz: 150.0,
                mean_amplitude: 0.2,
                samples: 30,
            },
            score,
            issues: issues.iter().copied().collect(),
        }
    }

    fn transcript(text: &str, secs: i64) -> FinalTranscript {
        let start = Utc::now();
        FinalTranscript {
            text: text.to_string(),
            first_text_at: start,
            last_text_at: start + Duration::seconds(secs),
        }
    }

    #[test]
    fn test_settler_waits_for_quiet_period() {
        let config = ReadingConfig::default();
        let mut settler = TranscriptSettler::new(&config);
        let t0 = Utc::now();

        settler.update("the", t0);
        settler.update("the quick brown fox", t0 + Duration::seconds(2));
        assert!(settler.poll(t0 + Duration::seconds(4)).is_none());

        let done = settler.poll(t0 + Duration::milliseconds(4_500)).unwrap();
        assert_eq!(done.text, "the quick brown fox");
        assert_eq!(done.first_text_at, t0);
    }

    #[test]
    fn test_settler_requires_min_chars() {
        let mut settler = TranscriptSettler::new(&ReadingConfig::default());
        let t0 = Utc::now();
        settler.update("a", t0);
        assert!(settler.poll(t0 + Duration::seconds(10)).is_none());
    }

    #[test]
    fn test_words_per_minute() {
        let t = transcript("one two three four five six", 3);
        assert_eq!(t.words_per_minute(), Some(120.0));
        assert_eq!(transcript("one", 0).words_per_minute(), None);
    }

    #[test]
    fn test_weighted_combination() {
        let reading = ReadingOutcome {
            coherence: 80,
            words_per_minute: None,
            fallback_message: None,
        };
        let (score, issues) = combine_audio(&vowel(90, &[]), &reading, &ReadingConfig::default());
        // 0.4 * 90 + 0.6 * 80
        assert_eq!(score, 84);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_vowel_issue_caps_composite() {
        let reading = ReadingOutcome {
            coherence: 100,
            words_per_minute: None,
            fallback_message: None,
        };
        let (score, issues) = combine_audio(
            &vowel(70, &[IssueTag::PitchInstability]),
            &reading,
            &ReadingConfig::default(),
        );
        assert!(score <= 65);
        assert!(issues.contains(&IssueTag::PitchInstability));
    }

    #[test]
    fn test_service_score_used() {
        let outcome = assess_reading(&transcript("hello there", 2), "hello there", &FixedScorer(93))
            .unwrap();
        assert_eq!(outcome.coherence, 93);
        assert!(outcome.fallback_message.is_none());
    }

    #[test]
    fn test_service_failure_falls_back() {
        let outcome = assess_reading(
            &transcript("the sun is shining today", 3),
            "The sun is shining today",
            &DownScorer,
        )
        .unwrap();
        assert_eq!(outcome.coherence, 100);
        assert!(outcome.fallback_message.is_some());
    }

    #[test]
    fn test_empty_transcript_rejected() {
        assert!(assess_reading(&transcript("  ", 1), "prompt", &FixedScorer(50)).is_err());
    }
}
