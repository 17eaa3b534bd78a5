//! Signal analysis and scoring engine.
//!
//! This module contains:
//! - Geometry and DSP primitives (symmetry, pitch, spiral error)
//! - Per-domain analyzers for face, voice, spiral and stability tests
//! - Session scoring, risk aggregation and storage records

pub mod dsp;
pub mod error;
pub mod face;
pub mod reading;
pub mod report;
pub mod result;
pub mod risk;
pub mod scoring;
pub mod spiral;
pub mod stability;
pub mod vowel;

// Re-export commonly used types
pub use dsp::{calculate_symmetry, detect_pitch, spiral_radial_error, PitchDetector, PitchEstimate, SymmetryError};
pub use error::AnalysisError;
pub use face::{FaceConfig, FaceSummary, FacialSymmetryAnalyzer, FrameMetrics, PoseValidity};
pub use reading::{
    assess_reading, combine_audio, FinalTranscript, ReadingConfig, ReadingOutcome, TranscriptSettler,
};
pub use report::{BaselineRecord, RecordBuilder, TestRecord};
pub use result::{
    AudioBaseline, Baseline, BaselineProfile, Domain, DomainResult, IssueTag, TouchBaseline,
    VisualBaseline,
};
pub use risk::{
    assess, assess_scores, Narrative, NarrativeRequest, NarrativeStatus, OverallStatus,
    RiskAssessment, RiskConfig,
};
pub use scoring::{ScoringError, ScreeningMode, SessionScorer, SubTest};
pub use spiral::{SpiralConfig, SpiralProgress, SpiralResult, SpiralTracer};
pub use stability::{StabilityConfig, StabilityProgress, StabilityResult, StabilityTest, TremorAnalysis};
pub use vowel::{VowelAssessment, VowelConfig, VowelMetrics, VowelProgress, VowelRecorder};
