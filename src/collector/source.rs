//! Capability interfaces for sensor sources.
//!
//! Analyzers depend only on these traits, never on a concrete platform
//! binding. `ChannelSource` is the crossbeam-backed implementation used
//! for replay and headless tests.

use crate::collector::types::{AudioFrame, LandmarkFrame, MotionEvent};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Errors raised by a sensor source (device or permission failures).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    AlreadyRunning,
    PermissionDenied(String),
    Unavailable(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::AlreadyRunning => write!(f, "Source is already running"),
            SourceError::PermissionDenied(what) => write!(f, "Permission denied: {what}"),
            SourceError::Unavailable(what) => write!(f, "Sensor unavailable: {what}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// A push-style event source with an explicit start/stop lifecycle.
pub trait SensorSource {
    type Event;

    /// Register the underlying listener.
    fn start(&mut self) -> Result<(), SourceError>;

    /// Unregister the listener. Must be idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Take the next pending event without blocking.
    fn try_recv(&self) -> Option<Self::Event>;
}

/// Source of face-mesh frames.
pub trait FrameSource: SensorSource<Event = LandmarkFrame> {}
impl<T: SensorSource<Event = LandmarkFrame>> FrameSource for T {}

/// Source of microphone frames.
pub trait AudioSource: SensorSource<Event = AudioFrame> {}
impl<T: SensorSource<Event = AudioFrame>> AudioSource for T {}

/// Source of device motion and orientation readings.
pub trait MotionSource: SensorSource<Event = MotionEvent> {}
impl<T: SensorSource<Event = MotionEvent>> MotionSource for T {}

/// Producer handle for a [`ChannelSource`].
///
/// Events pushed while the source is stopped are discarded.
#[derive(Clone)]
pub struct SourceHandle<E> {
    sender: Sender<E>,
    running: Arc<AtomicBool>,
}

impl<E> SourceHandle<E> {
    /// Push an event. Returns false if it was dropped.
    pub fn push(&self, event: E) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.sender.try_send(event).is_ok()
    }
}

/// Channel-backed sensor source.
pub struct ChannelSource<E> {
    sender: Sender<E>,
    receiver: Receiver<E>,
    running: Arc<AtomicBool>,
    /// Simulated device failure reported by `start`.
    failure: Option<SourceError>,
}

impl<E> ChannelSource<E> {
    /// Create a new source with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            failure: None,
        }
    }

    /// A source whose `start` always fails with `error`.
    pub fn failing(error: SourceError) -> Self {
        let mut source = Self::new(1);
        source.failure = Some(error);
        source
    }

    /// Get a producer handle.
    pub fn handle(&self) -> SourceHandle<E> {
        SourceHandle {
            sender: self.sender.clone(),
            running: Arc::clone(&self.running),
        }
    }

    /// Number of events waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl<E> Default for ChannelSource<E> {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl<E> SensorSource for ChannelSource<E> {
    type Event = E;

    fn start(&mut self) -> Result<(), SourceError> {
        if let Some(ref err) = self.failure {
            return Err(err.clone());
        }
        if self.running.load(Ordering::SeqCst) {
            return Err(SourceError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Queued events belong to the session being torn down.
        while self.receiver.try_recv().is_ok() {}
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn try_recv(&self) -> Option<E> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_dropped_while_stopped() {
        let mut source: ChannelSource<u32> = ChannelSource::new(8);
        let handle = source.handle();

        assert!(!handle.push(1));
        source.start().unwrap();
        assert!(handle.push(2));
        assert_eq!(source.try_recv(), Some(2));
        assert_eq!(source.try_recv(), None);
    }

    #[test]
    fn test_stop_discards_pending() {
        let mut source: ChannelSource<u32> = ChannelSource::new(8);
        let handle = source.handle();
        source.start().unwrap();
        handle.push(1);
        handle.push(2);
        source.stop();
        assert_eq!(source.pending(), 0);
        assert!(!source.is_running());
    }

    #[test]
    fn test_double_start_rejected() {
        let mut source: ChannelSource<u32> = ChannelSource::new(8);
        source.start().unwrap();
        assert_eq!(source.start(), Err(SourceError::AlreadyRunning));
    }

    #[test]
    fn test_failing_source() {
        let mut source: ChannelSource<u32> =
            ChannelSource::failing(SourceError::PermissionDenied("motion".into()));
        assert!(matches!(source.start(), Err(SourceError::PermissionDenied(_))));
        assert!(!source.is_running());
    }
}
