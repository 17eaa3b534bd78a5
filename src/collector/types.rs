//! Sensor event types delivered by the capture collaborator.
//!
//! Every event is timestamped at capture time. The engine never polls a
//! device; it is pushed these events and reduces each one before the next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single face-mesh landmark in normalized image coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    /// Relative depth; zero when the tracker only reports 2D points.
    #[serde(default)]
    pub z: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// One video frame worth of face-mesh landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandmarkFrame {
    pub timestamp: DateTime<Utc>,
    pub landmarks: Vec<Landmark>,
}

impl LandmarkFrame {
    pub fn new(timestamp: DateTime<Utc>, landmarks: Vec<Landmark>) -> Self {
        Self {
            timestamp,
            landmarks,
        }
    }

    /// Look up a landmark by mesh index.
    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.landmarks.get(index)
    }
}

/// A fixed-length buffer of microphone samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFrame {
    pub timestamp: DateTime<Utc>,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(timestamp: DateTime<Utc>, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            timestamp,
            sample_rate,
            samples,
        }
    }
}

/// Pointer phase for the spiral-tracing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerPhase {
    Down,
    Move,
    Up,
}

/// A pointer event with coordinates relative to the spiral center.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerEvent {
    pub timestamp: DateTime<Utc>,
    pub phase: PointerPhase,
    pub x: f64,
    pub y: f64,
}

impl PointerEvent {
    pub fn new(timestamp: DateTime<Utc>, phase: PointerPhase, x: f64, y: f64) -> Self {
        Self {
            timestamp,
            phase,
            x,
            y,
        }
    }
}

/// Triaxial acceleration vector in m/s².
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// A device-motion reading.
///
/// Platforms differ in whether they report gravity-compensated
/// acceleration, so both channels are optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionSample {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<Vector3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration_including_gravity: Option<Vector3>,
}

impl MotionSample {
    /// Acceleration magnitude, preferring the gravity-compensated channel.
    pub fn magnitude(&self) -> Option<f64> {
        self.acceleration
            .or(self.acceleration_including_gravity)
            .map(|v| v.magnitude())
    }
}

/// A device-orientation reading (front-to-back tilt, degrees).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrientationSample {
    pub timestamp: DateTime<Utc>,
    pub beta: f64,
}

/// Events delivered by a motion source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MotionEvent {
    Motion(MotionSample),
    Orientation(OrientationSample),
}

impl MotionEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MotionEvent::Motion(s) => s.timestamp,
            MotionEvent::Orientation(s) => s.timestamp,
        }
    }
}

/// Unified event type for the capture boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SensorEvent {
    Face(LandmarkFrame),
    Audio(AudioFrame),
    Pointer(PointerEvent),
    Motion(MotionEvent),
}

impl SensorEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SensorEvent::Face(e) => e.timestamp,
            SensorEvent::Audio(e) => e.timestamp,
            SensorEvent::Pointer(e) => e.timestamp,
            SensorEvent::Motion(e) => e.timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_magnitude() {
        let v = Vector3::new(3.0, 4.0, 0.0);
        assert!((v.magnitude() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_motion_prefers_gravity_compensated() {
        let sample = MotionSample {
            timestamp: Utc::now(),
            acceleration: Some(Vector3::new(0.0, 0.0, 1.0)),
            acceleration_including_gravity: Some(Vector3::new(0.0, 0.0, 9.81)),
        };
        assert_eq!(sample.magnitude(), Some(1.0));

        let fallback = MotionSample {
            timestamp: Utc::now(),
            acceleration: None,
            acceleration_including_gravity: Some(Vector3::new(0.0, 0.0, 9.81)),
        };
        assert_eq!(fallback.magnitude(), Some(9.81));
    }

    #[test]
    fn test_sensor_event_json_tagging() {
        let event = SensorEvent::Motion(MotionEvent::Orientation(OrientationSample {
            timestamp: Utc::now(),
            beta: 12.5,
        }));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["source"], "motion");
        assert_eq!(json["kind"], "orientation");
    }
}
