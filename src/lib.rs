//! Neuro Screen - self-administered neurological screening engine.
//!
//! This library turns timestamped sensor streams into per-domain scores
//! and an overall risk status. It never diagnoses anything.
//!
//! # Domains
//!
//! - **VISUAL**: facial symmetry from face-mesh landmarks
//! - **AUDIO**: sustained vowel acoustics combined with a reading test
//! - **TOUCH**: spiral tracing combined with an arm stability test
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Neuro Screen                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Collector  │──▶│  Analyzers  │──▶│   Session   │       │
//! │  │  (sources)  │   │ (per test)  │   │   Scorer    │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         │                                    │              │
//! │         ▼                                    ▼              │
//! │  ┌─────────────┐                     ┌─────────────┐       │
//! │  │Transparency │                     │    Risk     │       │
//! │  │    Log      │                     │ Aggregator  │       │
//! │  └─────────────┘                     └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use neuro_screen::{replay::RecordedSession, services::LocalCoherence};
//! use neuro_screen::{Config, Replayer, TransparencyLog};
//! use std::path::Path;
//!
//! let config = Config::default();
//! let session = RecordedSession::load(Path::new("session.json")).expect("valid session");
//! let log = TransparencyLog::new();
//! let outcome = Replayer::new(&config, &LocalCoherence, &log).run(&session);
//! println!("{}", outcome.risk.status);
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod replay;
pub mod services;
pub mod store;
pub mod transparency;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use collector::{ChannelSource, SensorEvent, SensorSource, SourceError};
pub use config::{Config, ConfigError};
pub use core::{
    AnalysisError, Domain, DomainResult, IssueTag, OverallStatus, RiskAssessment, ScreeningMode,
    SessionScorer, SubTest,
};
pub use replay::{RecordedSession, ReplayOutcome, Replayer};
pub use services::{CoherenceScorer, LocalCoherence, LocalNarrative, NarrativeGenerator, ServiceError};
pub use store::{JsonFileStore, MemoryStore, RecordStore, StoreError};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

#[cfg(feature = "remote")]
pub use services::{BlockingServiceClient, ServiceClient, ServiceConfig};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Disclaimer shown before any screening result.
pub const SCREENING_DISCLAIMER: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║                 NEURO SCREEN - IMPORTANT NOTICE                  ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This tool is a self-check aid. It is NOT a medical device and   ║
║  does NOT provide a diagnosis.                                   ║
║                                                                  ║
║  ✓ WHAT IT MEASURES:                                             ║
║    • Facial symmetry from camera landmarks                       ║
║    • Voice steadiness and reading coherence                      ║
║    • Spiral tracing accuracy and arm stability                   ║
║                                                                  ║
║  ✗ WHAT IT NEVER DOES:                                           ║
║    • Diagnose a stroke or any other condition                    ║
║    • Replace emergency services or a clinician                   ║
║    • Store raw camera frames or audio                            ║
║                                                                  ║
║  If you notice sudden face drooping, arm weakness or speech      ║
║  difficulty, call your local emergency number immediately.       ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
