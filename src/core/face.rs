//! Facial symmetry analysis from face-mesh landmarks.
//!
//! Each admitted frame is reduced to eye, brow and mouth symmetry ratios.
//! Frames are only accumulated while a capture is active and the head
//! pose is valid; everything else is dropped, never zero-filled.

use crate::collector::{FrameSource, FrameThrottle, Landmark, LandmarkFrame};
use crate::core::dsp::{calculate_symmetry, distance, mean};
use crate::core::error::AnalysisError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// MediaPipe face-mesh indices used by the analyzer.
pub mod indices {
    pub const LEFT_CHEEK: usize = 234;
    pub const RIGHT_CHEEK: usize = 454;
    pub const NOSE_TOP: usize = 168;
    pub const NOSE_BOTTOM: usize = 2;

    pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
    pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];
    pub const LEFT_BROW: [usize; 5] = [70, 63, 105, 66, 107];
    pub const RIGHT_BROW: [usize; 5] = [336, 296, 334, 293, 300];

    pub const MOUTH_LEFT: usize = 61;
    pub const MOUTH_RIGHT: usize = 291;
    pub const MOUTH_CENTER: usize = 13;

    /// Smallest mesh that contains every index above.
    pub const MIN_LANDMARKS: usize = 455;
}

/// Thresholds for the facial analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceConfig {
    /// Inter-cheek distance below this means the face is too far away.
    pub min_face_width: f64,
    /// Inter-cheek distance above this means the face is too close.
    pub max_face_width: f64,
    /// Maximum horizontal offset between nose top and bottom.
    pub max_tilt: f64,
    /// Maximum cheek depth difference (yaw proxy).
    pub max_depth_asymmetry: f64,
    /// Upper bound on processed frames per second.
    pub max_rate_hz: f64,
    pub eye_weight: f64,
    pub mouth_weight: f64,
    pub brow_weight: f64,
    /// Composite score below which facial asymmetry is flagged.
    pub asymmetry_issue_below: u8,
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            min_face_width: 0.25,
            max_face_width: 0.8,
            max_tilt: 0.08,
            max_depth_asymmetry: 0.05,
            max_rate_hz: 15.0,
            eye_weight: 0.4,
            mouth_weight: 0.4,
            brow_weight: 0.2,
            asymmetry_issue_below: 80,
        }
    }
}

/// Head-pose gate for admitting a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseValidity {
    Ok,
    TooFar,
    TooClose,
    HeadTilted,
    HeadTurned,
}

impl PoseValidity {
    pub fn is_ok(&self) -> bool {
        matches!(self, PoseValidity::Ok)
    }

    /// Guidance shown to the user.
    pub fn reason(&self) -> &'static str {
        match self {
            PoseValidity::Ok => "Hold still",
            PoseValidity::TooFar => "Please move closer to the camera",
            PoseValidity::TooClose => "Please move back from the camera",
            PoseValidity::HeadTilted => "Please keep your head level",
            PoseValidity::HeadTurned => "Please face the camera directly",
        }
    }
}

/// Per-frame symmetry ratios, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymmetrySample {
    pub eye: f64,
    pub brow: f64,
    pub mouth: f64,
}

/// Everything extracted from one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub face_width: f64,
    pub tilt: f64,
    pub depth_asymmetry: f64,
    pub pose: PoseValidity,
    pub symmetry: SymmetrySample,
    /// Whether the sample entered the scoring window.
    pub admitted: bool,
}

/// Mean symmetry over a completed capture window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceSummary {
    pub eye: f64,
    pub brow: f64,
    pub mouth: f64,
    pub samples: usize,
}

impl FaceSummary {
    /// Weighted composite, floored to an integer score.
    pub fn score(&self, config: &FaceConfig) -> u8 {
        let raw = config.eye_weight * self.eye
            + config.mouth_weight * self.mouth
            + config.brow_weight * self.brow;
        raw.floor().clamp(0.0, 100.0) as u8
    }
}

fn landmark(frame: &LandmarkFrame, index: usize) -> Result<&Landmark, AnalysisError> {
    frame
        .get(index)
        .ok_or_else(|| AnalysisError::InvalidFrame(format!("missing landmark {index}")))
}

/// Vertical extent of a landmark cluster.
fn cluster_height(frame: &LandmarkFrame, cluster: &[usize]) -> Result<f64, AnalysisError> {
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for &i in cluster {
        let y = landmark(frame, i)?.y;
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }
    Ok(max_y - min_y)
}

fn symmetry(left: f64, right: f64, feature: &str) -> Result<f64, AnalysisError> {
    calculate_symmetry(left, right)
        .map_err(|e| AnalysisError::InvalidFrame(format!("{feature} symmetry: {e}")))
}

/// Classify head pose, first matching rule wins.
pub fn classify_pose(
    face_width: f64,
    tilt: f64,
    depth_asymmetry: f64,
    config: &FaceConfig,
) -> PoseValidity {
    if face_width < config.min_face_width {
        PoseValidity::TooFar
    } else if face_width > config.max_face_width {
        PoseValidity::TooClose
    } else if tilt > config.max_tilt {
        PoseValidity::HeadTilted
    } else if depth_asymmetry > config.max_depth_asymmetry {
        PoseValidity::HeadTurned
    } else {
        PoseValidity::Ok
    }
}

/// Extract pose and symmetry metrics from a single frame.
pub fn measure_frame(
    frame: &LandmarkFrame,
    config: &FaceConfig,
) -> Result<(f64, f64, f64, PoseValidity, SymmetrySample), AnalysisError> {
    use indices::*;

    if frame.landmarks.len() < MIN_LANDMARKS {
        return Err(AnalysisError::InvalidFrame(format!(
            "expected at least {MIN_LANDMARKS} landmarks, got {}",
            frame.landmarks.len()
        )));
    }

    let left_cheek = landmark(frame, LEFT_CHEEK)?;
    let right_cheek = landmark(frame, RIGHT_CHEEK)?;
    let face_width = distance(left_cheek, right_cheek);
    let tilt = (landmark(frame, NOSE_TOP)?.x - landmark(frame, NOSE_BOTTOM)?.x).abs();
    let depth_asymmetry = (left_cheek.z - right_cheek.z).abs();
    let pose = classify_pose(face_width, tilt, depth_asymmetry, config);

    let eye = symmetry(
        cluster_height(frame, &LEFT_EYE)?,
        cluster_height(frame, &RIGHT_EYE)?,
        "eye",
    )?;
    let brow = symmetry(
        cluster_height(frame, &LEFT_BROW)?,
        cluster_height(frame, &RIGHT_BROW)?,
        "brow",
    )?;

    let center = landmark(frame, MOUTH_CENTER)?;
    let mouth = symmetry(
        distance(landmark(frame, MOUTH_LEFT)?, center),
        distance(landmark(frame, MOUTH_RIGHT)?, center),
        "mouth",
    )?;

    Ok((
        face_width,
        tilt,
        depth_asymmetry,
        pose,
        SymmetrySample { eye, brow, mouth },
    ))
}

/// Stateful facial analyzer owning the active capture window.
pub struct FacialSymmetryAnalyzer {
    config: FaceConfig,
    throttle: FrameThrottle,
    capturing: bool,
    window: Vec<SymmetrySample>,
    last_pose: Option<PoseValidity>,
    rejected: u64,
}

impl FacialSymmetryAnalyzer {
    pub fn new(config: FaceConfig) -> Self {
        let throttle = FrameThrottle::new(config.max_rate_hz);
        Self {
            config,
            throttle,
            capturing: false,
            window: Vec::new(),
            last_pose: None,
            rejected: 0,
        }
    }

    /// Begin a capture, clearing any previous samples.
    pub fn start_capture(&mut self) {
        self.window.clear();
        self.throttle.reset();
        self.rejected = 0;
        self.capturing = true;
        debug!("Facial capture started");
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Process one frame.
    ///
    /// Returns `Ok(None)` when the throttle dropped the frame.
    pub fn tick(&mut self, frame: &LandmarkFrame) -> Result<Option<FrameMetrics>, AnalysisError> {
        if !self.throttle.admit(frame.timestamp) {
            return Ok(None);
        }

        let (face_width, tilt, depth_asymmetry, pose, sample) =
            match measure_frame(frame, &self.config) {
                Ok(m) => m,
                Err(e) => {
                    self.rejected += 1;
                    debug!("Dropping frame: {e}");
                    return Err(e);
                }
            };

        if self.last_pose != Some(pose) {
            debug!("Pose changed to {:?}", pose);
            self.last_pose = Some(pose);
        }

        let admitted = self.capturing && pose.is_ok();
        if admitted {
            self.window.push(sample);
        } else if self.capturing {
            self.rejected += 1;
        }

        Ok(Some(FrameMetrics {
            face_width,
            tilt,
            depth_asymmetry,
            pose,
            symmetry: sample,
            admitted,
        }))
    }

    /// Process every frame currently queued on `source`.
    ///
    /// Returns the number of frames admitted into the window.
    pub fn drain<S: FrameSource>(&mut self, source: &S) -> usize {
        let mut admitted = 0;
        while let Some(frame) = source.try_recv() {
            if let Ok(Some(metrics)) = self.tick(&frame) {
                if metrics.admitted {
                    admitted += 1;
                }
            }
        }
        admitted
    }

    /// Number of samples in the active window.
    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    /// Frames dropped by the throttle since capture start.
    pub fn throttled(&self) -> u64 {
        self.throttle.dropped()
    }

    /// Frames rejected for pose or invalid geometry since capture start.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Cancel the capture and discard samples.
    pub fn abort(&mut self) {
        self.window.clear();
        self.capturing = false;
        debug!("Facial capture aborted");
    }

    /// Close the window and reduce it to mean symmetry values.
    pub fn finish(&mut self) -> Result<FaceSummary, AnalysisError> {
        self.capturing = false;
        let window = std::mem::take(&mut self.window);
        if window.is_empty() {
            return Err(AnalysisError::InsufficientSamples {
                what: "symmetry samples",
                required: 1,
                actual: 0,
            });
        }

        let eyes: Vec<f64> = window.iter().map(|s| s.eye).collect();
        let brows: Vec<f64> = window.iter().map(|s| s.brow).collect();
        let mouths: Vec<f64> = window.iter().map(|s| s.mouth).collect();

        let summary = FaceSummary {
            eye: mean(&eyes).unwrap_or(0.0),
            brow: mean(&brows).unwrap_or(0.0),
            mouth: mean(&mouths).unwrap_or(0.0),
            samples: window.len(),
        };
        info!(
            "Facial capture finished: {} samples, eye {:.1}, brow {:.1}, mouth {:.1}",
            summary.samples, summary.eye, summary.brow, summary.mouth
        );
        Ok(summary)
    }

    pub fn config(&self) -> &FaceConfig {
        &self.config
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::indices::*;
    use crate::collector::{Landmark, LandmarkFrame};
    use chrono::{DateTime, Utc};

    /// Build a synthetic mesh with the given feature heights.
    pub fn synthetic_frame(
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
}
