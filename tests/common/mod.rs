//! Synthetic sensor streams shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use neuro_screen::collector::{
    AudioFrame, Landmark, LandmarkFrame, MotionEvent, MotionSample, OrientationSample,
    PointerEvent, PointerPhase, Vector3,
};
use neuro_screen::core::face::indices::*;
use std::f64::consts::TAU;

pub const RATE: u32 = 16_000;
pub const FRAME_LEN: usize = 1024;

/// Face mesh with the given left/right eye, brow and mouth extents.
pub fn face_frame(
    timestamp: DateTime<Utc>,
    eye: (f64, f64),
    brow: (f64, f64),
    mouth: (f64, f64),
) -> LandmarkFrame {
    let mut landmarks = vec![Landmark::new(0.5, 0.5, 0.0); 468];
    landmarks[LEFT_CHEEK] = Landmark::new(0.3, 0.5, 0.0);
    landmarks[RIGHT_CHEEK] = Landmark::new(0.7, 0.5, 0.0);
    landmarks[NOSE_TOP] = Landmark::new(0.5, 0.4, 0.0);
    landmarks[NOSE_BOTTOM] = Landmark::new(0.5, 0.55, 0.0);

    for (i, &idx) in LEFT_EYE.iter().enumerate() {
        landmarks[idx] = Landmark::new(0.4, 0.4 + eye.0 * i as f64 / 5.0, 0.0);
    }
    for (i, &idx) in RIGHT_EYE.iter().enumerate() {
        landmarks[idx] = Landmark::new(0.6, 0.4 + eye.1 * i as f64 / 5.0, 0.0);
    }
    for (i, &idx) in LEFT_BROW.iter().enumerate() {
        landmarks[idx] = Landmark::new(0.4, 0.3 + brow.0 * i as f64 / 4.0, 0.0);
    }
    for (i, &idx) in RIGHT_BROW.iter().enumerate() {
        landmarks[idx] = Landmark::new(0.6, 0.3 + brow.1 * i as f64 / 4.0, 0.0);
    }

    landmarks[MOUTH_CENTER] = Landmark::new(0.5, 0.65, 0.0);
    landmarks[MOUTH_LEFT] = Landmark::new(0.5 - mouth.0, 0.65, 0.0);
    landmarks[MOUTH_RIGHT] = Landmark::new(0.5 + mouth.1, 0.65, 0.0);

    LandmarkFrame::new(timestamp, landmarks)
}

/// `count` frames 100 ms apart.
pub fn face_frames(
    start: DateTime<Utc>,
    count: i64,
    eye: (f64, f64),
    mouth: (f64, f64),
) -> Vec<LandmarkFrame> {
    (0..count)
        .map(|i| face_frame(start + Duration::milliseconds(i * 100), eye, (0.03, 0.03), mouth))
        .collect()
}

/// One silent frame followed by a steady tone long enough to finish the
/// recording window.
pub fn steady_vowel(start: DateTime<Utc>, freq: f64) -> Vec<AudioFrame> {
    (0..80)
        .map(|i| {
            let at = start + Duration::milliseconds(i * 64);
            let amplitude = if i == 0 { 0.0 } else { 0.3 };
            let samples = (0..FRAME_LEN)
                .map(|n| amplitude * (TAU * freq * n as f64 / f64::from(RATE)).sin() as f32)
                .collect();
            AudioFrame::new(at, RATE, samples)
        })
        .collect()
}

/// Trace of the ideal spiral with alternating ±`noise` radial offsets,
/// starting with a pointer down at the center.
pub fn spiral_trace(
    start: DateTime<Utc>,
    b: f64,
    theta_end: f64,
    count: usize,
    noise: f64,
) -> Vec<PointerEvent> {
    let theta_start = std::f64::consts::PI;
    let mut events = vec![PointerEvent::new(start, PointerPhase::Down, 0.0, 0.0)];
    for i in 0..count {
        let theta = theta_start + (theta_end - theta_start) * i as f64 / (count - 1) as f64;
        let offset = if i % 2 == 0 { noise } else { -noise };
        let r = b * theta + offset;
        events.push(PointerEvent::new(
            start + Duration::milliseconds(16 * (i as i64 + 1)),
            PointerPhase::Move,
            r * theta.cos(),
            r * theta.sin(),
        ));
    }
    events
}

/// Motion readings at 60 Hz for `secs`, oscillating at `freq_hz` with
/// residual RMS `rms` (zero for a perfectly still arm).
pub fn motion_stream(start: DateTime<Utc>, freq_hz: f64, rms: f64, secs: f64) -> Vec<MotionEvent> {
    let rate_hz = 60.0;
    let n = (rate_hz * secs) as usize;
    (0..n)
        .map(|i| {
            let t = i as f64 / rate_hz;
            let z = 9.81 + rms * std::f64::consts::SQRT_2 * (TAU * freq_hz * t + 0.3).sin();
            MotionEvent::Motion(MotionSample {
                timestamp: start + Duration::microseconds((t * 1e6) as i64),
                acceleration: None,
                acceleration_including_gravity: Some(Vector3::new(0.0, 0.0, z)),
            })
        })
        .collect()
}

pub fn orientation(at: DateTime<Utc>, beta: f64) -> MotionEvent {
    MotionEvent::Orientation(OrientationSample {
        timestamp: at,
        beta,
    })
}
