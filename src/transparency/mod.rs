//! Transparency module for the screening engine.
//!
//! Tracks what the engine processed and discarded during a session.

pub mod log;

pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
