//! Headless replay of recorded sessions.
//!
//! A [`RecordedSession`] holds the timestamped event streams of one
//! screening. Replay pushes each stream through a [`ChannelSource`] into
//! the matching analyzer, exactly as a live capture collaborator would.

use crate::collector::{
    AudioFrame, ChannelSource, LandmarkFrame, MotionEvent, PointerEvent, SensorEvent, SensorSource,
};
use crate::config::Config;
use crate::core::error::AnalysisError;
use crate::core::face::FacialSymmetryAnalyzer;
use crate::core::reading::{assess_reading, ReadingOutcome, TranscriptSettler};
use crate::core::result::DomainResult;
use crate::core::risk::{assess, RiskAssessment};
use crate::core::scoring::{ScreeningMode, SessionScorer, SubTest};
use crate::core::spiral::{SpiralProgress, SpiralTracer};
use crate::core::stability::{StabilityProgress, StabilityTest};
use crate::core::vowel::VowelRecorder;
use crate::services::CoherenceScorer;
use crate::transparency::TransparencyLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Replay errors.
#[derive(Debug)]
pub enum ReplayError {
    Io(String),
    Parse(String),
    /// The session holds no event streams at all.
    Empty,
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::Io(e) => write!(f, "IO error: {e}"),
            ReplayError::Parse(e) => write!(f, "Parse error: {e}"),
            ReplayError::Empty => write!(f, "Session contains no events"),
        }
    }
}

impl std::error::Error for ReplayError {}

/// One interim speech-recognition result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptUpdate {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Reading sub-test input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedReading {
    pub prompt: String,
    pub updates: Vec<TranscriptUpdate>,
}

/// Spiral sub-test input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedSpiral {
    /// Spiral center in the same coordinates as the events
    pub center: [f64; 2],
    pub events: Vec<PointerEvent>,
}

/// Stability sub-test input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedStability {
    /// When the preparation countdown began
    pub started_at: DateTime<Utc>,
    pub events: Vec<MotionEvent>,
}

/// Event streams of one screening session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordedSession {
    pub mode: ScreeningMode,
    pub face: Vec<LandmarkFrame>,
    pub vowel: Vec<AudioFrame>,
    pub reading: Option<RecordedReading>,
    pub spiral: Option<RecordedSpiral>,
    pub stability: Option<RecordedStability>,
    /// Opaque image attached to the visual record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

impl RecordedSession {
    pub fn from_json(json: &str) -> Result<Self, ReplayError> {
        let session: Self =
            serde_json::from_str(json).map_err(|e| ReplayError::Parse(e.to_string()))?;
        if session.is_empty() {
            return Err(ReplayError::Empty);
        }
        Ok(session)
    }

    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ReplayError::Io(e.to_string()))?;
        Self::from_json(&content)
    }

    pub fn is_empty(&self) -> bool {
        self.face.is_empty()
            && self.vowel.is_empty()
            && self.reading.is_none()
            && self.spiral.is_none()
            && self.stability.is_none()
    }

    /// Group a live event stream by source.
    ///
    /// Pointer events are traced around `spiral_center`. The stability
    /// countdown is assumed to start one preparation period before the
    /// first motion event.
    pub fn from_events(
        events: impl IntoIterator<Item = SensorEvent>,
        spiral_center: [f64; 2],
        config: &Config,
    ) -> Self {
        let mut session = Self::default();
        let mut pointer = Vec::new();
        let mut motion = Vec::new();
        for event in events {
            match event {
                SensorEvent::Face(f) => session.face.push(f),
                SensorEvent::Audio(a) => session.vowel.push(a),
                SensorEvent::Pointer(p) => pointer.push(p),
                SensorEvent::Motion(m) => motion.push(m),
            }
        }
        if !pointer.is_empty() {
            session.spiral = Some(RecordedSpiral {
                center: spiral_center,
                events: pointer,
            });
        }
        if let Some(first) = motion.first() {
            session.stability = Some(RecordedStability {
                started_at: first.timestamp() - config.stability.preparation,
                events: motion,
            });
        }
        session
    }
}

/// A sub-test that failed softly during replay.
#[derive(Debug, Clone, Serialize)]
pub struct SubTestFailure {
    pub sub_test: SubTest,
    pub error: String,
    /// User-facing retry prompt
    pub prompt: String,
}

/// Everything a replay produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub mode: ScreeningMode,
    pub results: Vec<DomainResult>,
    pub risk: RiskAssessment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading: Option<ReadingOutcome>,
    pub failures: Vec<SubTestFailure>,
}

/// Drives the analyzers over a recorded session.
pub struct Replayer<'a> {
    config: &'a Config,
    coherence: &'a dyn CoherenceScorer,
    log: &'a TransparencyLog,
}

impl<'a> Replayer<'a> {
    pub fn new(
        config: &'a Config,
        coherence: &'a dyn CoherenceScorer,
        log: &'a TransparencyLog,
    ) -> Self {
        Self {
            config,
            coherence,
            log,
        }
    }

    pub fn run(&self, session: &RecordedSession) -> ReplayOutcome {
        let mut scorer = SessionScorer::new(session.mode, self.config);
        let mut failures = Vec::new();
        let mut reading = None;

        if !session.face.is_empty() {
            let outcome = self.run_face(&mut scorer, &session.face);
            self.settle(&mut scorer, SubTest::FaceCapture, outcome, &mut failures);
        }

        if !session.vowel.is_empty() {
            let outcome = self.run_vowel(&mut scorer, &session.vowel);
            self.settle(&mut scorer, SubTest::Vowel, outcome, &mut failures);
        }
        // Without a completed vowel the scorer refuses to begin, which is
        // reported like any other failure.
        if let Some(recorded) = session.reading.as_ref() {
            let outcome = self.run_reading(&mut scorer, recorded).map(|r| {
                reading = Some(r);
            });
            self.settle(&mut scorer, SubTest::Reading, outcome, &mut failures);
        }

        if let Some(spiral) = session.spiral.as_ref() {
            let outcome = self.run_spiral(&mut scorer, spiral, &mut failures);
            self.settle(&mut scorer, SubTest::Spiral, outcome, &mut failures);
        }
        if let Some(stability) = session.stability.as_ref() {
            let outcome = self.run_stability(&mut scorer, stability);
            self.settle(&mut scorer, SubTest::Stability, outcome, &mut failures);
        }

        let results = scorer.results().to_vec();
        let risk = assess(&results, &self.config.risk);
        info!(
            "Replay finished: {} domains, status {}, {} failures",
            results.len(),
            risk.status,
            failures.len()
        );
        ReplayOutcome {
            mode: session.mode,
            results,
            risk,
            reading,
            failures,
        }
    }

    fn settle(
        &self,
        scorer: &mut SessionScorer,
        sub_test: SubTest,
        outcome: Result<(), AnalysisError>,
        failures: &mut Vec<SubTestFailure>,
    ) {
        match outcome {
            Ok(()) => self.log.record_subtest_completed(),
            Err(e) => {
                scorer.abort();
                self.log.record_subtest_aborted();
                warn!("{sub_test} failed: {e}");
                failures.push(SubTestFailure {
                    sub_test,
                    error: e.to_string(),
                    prompt: e.prompt(),
                });
            }
        }
    }

    fn begin(scorer: &mut SessionScorer, sub: SubTest) -> Result<(), AnalysisError> {
        scorer
            .begin(sub)
            .map_err(|e| AnalysisError::ConstraintViolation(e.to_string()))
    }

    fn run_face(
        &self,
        scorer: &mut SessionScorer,
        frames: &[LandmarkFrame],
    ) -> Result<(), AnalysisError> {
        Self::begin(scorer, SubTest::FaceCapture)?;
        let mut source: ChannelSource<LandmarkFrame> = ChannelSource::new(frames.len().max(1));
        source.start()?;
        let handle = source.handle();
        for frame in frames {
            handle.push(frame.clone());
        }

        let mut analyzer = FacialSymmetryAnalyzer::new(self.config.face.clone());
        analyzer.start_capture();
        analyzer.drain(&source);
        source.stop();

        let throttled = analyzer.throttled();
        self.log.record_frames_throttled(throttled);
        self.log
            .record_frames_processed((frames.len() as u64).saturating_sub(throttled));
        self.log.record_frames_rejected(analyzer.rejected());

        let summary = analyzer.finish()?;
        scorer
            .complete_face(&summary)
            .map_err(|e| AnalysisError::ConstraintViolation(e.to_string()))?;
        Ok(())
    }

    fn run_vowel(
        &self,
        scorer: &mut SessionScorer,
        frames: &[AudioFrame],
    ) -> Result<(), AnalysisError> {
        Self::begin(scorer, SubTest::Vowel)?;
        let mut source: ChannelSource<AudioFrame> = ChannelSource::new(frames.len().max(1));
        source.start()?;
        let handle = source.handle();
        for frame in frames {
            handle.push(frame.clone());
        }

        let mut recorder = VowelRecorder::new(self.config.vowel.clone());
        if let Some(first) = frames.first() {
            recorder.start_listening(first.timestamp);
        }
        let drained = recorder.drain(&source);
        source.stop();
        self.log.record_frames_processed(frames.len() as u64);

        let metrics = match drained? {
            Some(m) => m,
            None => {
                recorder.abort();
                return Err(AnalysisError::Aborted);
            }
        };
        scorer
            .complete_vowel(&metrics)
            .map_err(|e| AnalysisError::ConstraintViolation(e.to_string()))?;
        Ok(())
    }

    fn run_reading(
        &self,
        scorer: &mut SessionScorer,
        recorded: &RecordedReading,
    ) -> Result<ReadingOutcome, AnalysisError> {
        Self::begin(scorer, SubTest::Reading)?;
        let mut settler = TranscriptSettler::new(&self.config.reading);
        for update in &recorded.updates {
            settler.update(&update.text, update.timestamp);
        }
        let settle_at = recorded
            .updates
            .last()
            .map(|u| u.timestamp + self.config.reading.settle_after)
            .unwrap_or_else(Utc::now);
        let transcript = settler.poll(settle_at).ok_or(AnalysisError::InsufficientSamples {
            what: "transcript characters",
            required: self.config.reading.min_chars,
            actual: recorded
                .updates
                .last()
                .map_or(0, |u| u.text.trim().chars().count()),
        })?;

        let outcome = assess_reading(&transcript, &recorded.prompt, self.coherence)?;
        scorer
            .complete_reading(&outcome)
            .map_err(|e| AnalysisError::ConstraintViolation(e.to_string()))?;
        Ok(outcome)
    }

    fn run_spiral(
        &self,
        scorer: &mut SessionScorer,
        recorded: &RecordedSpiral,
        failures: &mut Vec<SubTestFailure>,
    ) -> Result<(), AnalysisError> {
        Self::begin(scorer, SubTest::Spiral)?;
        let mut tracer = SpiralTracer::new(
            self.config.spiral.clone(),
            (recorded.center[0], recorded.center[1]),
        );

        for event in &recorded.events {
            match tracer.process(event) {
                Ok(SpiralProgress::Complete(result)) => {
                    scorer
                        .complete_spiral(&result)
                        .map_err(|e| AnalysisError::ConstraintViolation(e.to_string()))?;
                    return Ok(());
                }
                Ok(_) => {}
                // A refused start or a lifted pointer resets the trace; the
                // user may try again within the same sub-test.
                Err(e @ (AnalysisError::ConstraintViolation(_) | AnalysisError::Aborted)) => {
                    self.log.record_subtest_aborted();
                    failures.push(SubTestFailure {
                        sub_test: SubTest::Spiral,
                        error: e.to_string(),
                        prompt: e.prompt(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        tracer.reset();
        Err(AnalysisError::InsufficientSamples {
            what: "completed spiral traces",
            required: 1,
            actual: 0,
        })
    }

    fn run_stability(
        &self,
        scorer: &mut SessionScorer,
        recorded: &RecordedStability,
    ) -> Result<(), AnalysisError> {
        Self::begin(scorer, SubTest::Stability)?;
        let source: ChannelSource<MotionEvent> =
            ChannelSource::new(recorded.events.len().max(1));
        let handle = source.handle();
        let mut test = StabilityTest::new(self.config.stability.clone(), source);

        let measure_start = recorded.started_at + self.config.stability.preparation;
        let measure_end = measure_start + self.config.stability.measure;

        test.begin(recorded.started_at);
        test.tick(measure_start)?;
        for event in &recorded.events {
            handle.push(event.clone());
        }

        let result = match test.tick(measure_end)? {
            StabilityProgress::Complete(result) => result,
            _ => {
                test.abort();
                return Err(AnalysisError::InvalidState("stability window did not close"));
            }
        };
        scorer
            .complete_stability(&result)
            .map_err(|e| AnalysisError::ConstraintViolation(e.to_string()))?;
        Ok(())
    }
}
