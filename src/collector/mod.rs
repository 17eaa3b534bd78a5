//! Capture boundary for the screening engine.
//!
//! The capture collaborator (camera, microphone, touch screen, motion
//! sensors) pushes timestamped events through the source traits defined
//! here. Platform bindings live outside this crate.

pub mod source;
pub mod throttle;
pub mod types;

// Re-export commonly used types
pub use source::{
    AudioSource, ChannelSource, FrameSource, MotionSource, SensorSource, SourceError,
    SourceHandle,
};
pub use throttle::FrameThrottle;
pub use types::{
    AudioFrame, Landmark, LandmarkFrame, MotionEvent, MotionSample, OrientationSample,
    PointerEvent, PointerPhase, SensorEvent, Vector3,
};
