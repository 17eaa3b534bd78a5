//! Demonstration of the screening engine driven by synthetic sensors.
//!
//! This example shows how to:
//! 1. Push landmark frames through a channel-backed frame source
//! 2. Run the facial symmetry analyzer on the queued frames
//! 3. Trace a spiral with pointer events
//! 4. Combine sub-test results with the session scorer
//! 5. Aggregate domain results into a risk status
//!
//! Run with: cargo run --example screening_demo

use chrono::{Duration, Utc};
use neuro_screen::{
    collector::{ChannelSource, Landmark, LandmarkFrame, PointerEvent, PointerPhase, SensorSource},
    core::face::{indices, FacialSymmetryAnalyzer},
    core::risk::assess,
    core::scoring::{ScreeningMode, SessionScorer, SubTest},
    core::spiral::{SpiralProgress, SpiralTracer},
    transparency::TransparencyLog,
    Config, SCREENING_DISCLAIMER,
};

/// A face mesh whose mouth corners sit `left` and `right` from the center.
fn mesh(at: chrono::DateTime<Utc>, left: f64, right: f64) -> LandmarkFrame {
    let mut points = vec![Landmark::new(0.5, 0.5, 0.0); indices::MIN_LANDMARKS];
    points[indices::LEFT_CHEEK] = Landmark::new(0.3, 0.5, 0.0);
    points[indices::RIGHT_CHEEK] = Landmark::new(0.7, 0.5, 0.0);
    points[indices::NOSE_TOP] = Landmark::new(0.5, 0.4, 0.0);
    points[indices::NOSE_BOTTOM] = Landmark::new(0.5, 0.55, 0.0);
    for (i, (&l, &r)) in indices::LEFT_EYE.iter().zip(&indices::RIGHT_EYE).enumerate() {
        let y = 0.4 + 0.01 * i as f64;
        points[l] = Landmark::new(0.4, y, 0.0);
        points[r] = Landmark::new(0.6, y, 0.0);
    }
    for (i, (&l, &r)) in indices::LEFT_BROW.iter().zip(&indices::RIGHT_BROW).enumerate() {
        let y = 0.3 + 0.008 * i as f64;
        points[l] = Landmark::new(0.4, y, 0.0);
        points[r] = Landmark::new(0.6, y, 0.0);
    }
    points[indices::MOUTH_CENTER] = Landmark::new(0.5, 0.65, 0.0);
    points[indices::MOUTH_LEFT] = Landmark::new(0.5 - left, 0.65, 0.0);
    points[indices::MOUTH_RIGHT] = Landmark::new(0.5 + right, 0.65, 0.0);
    LandmarkFrame::new(at, points)
}

fn main() {
    println!("Neuro Screen - Screening Demo");
    println!("=============================");
    println!("{SCREENING_DISCLAIMER}");

    let config = Config::default();
    let log = TransparencyLog::new();
    let mut scorer = SessionScorer::new(ScreeningMode::Test, &config);
    let start = Utc::now();

    // Visual: 60 frames at 30 fps with a slight mouth droop.
    if let Err(e) = scorer.begin(SubTest::FaceCapture) {
        eprintln!("Cannot start face capture: {e}");
        return;
    }
    let mut frames: ChannelSource<LandmarkFrame> = ChannelSource::default();
    if let Err(e) = frames.start() {
        eprintln!("Camera unavailable: {e}");
        return;
    }
    let camera = frames.handle();
    for i in 0..60 {
        camera.push(mesh(start + Duration::milliseconds(i * 33), 0.10, 0.085));
    }

    let mut analyzer = FacialSymmetryAnalyzer::new(config.face.clone());
    analyzer.start_capture();
    let admitted = analyzer.drain(&frames);
    frames.stop();
    log.record_frames_processed(admitted as u64);
    log.record_frames_throttled(analyzer.throttled());
    println!("Face capture: {admitted} frames admitted, {} throttled", analyzer.throttled());

    match analyzer.finish().map(|summary| scorer.complete_face(&summary)) {
        Ok(Ok(result)) => {
            log.record_subtest_completed();
            println!("  VISUAL score {}", result.score);
        }
        Ok(Err(e)) => eprintln!("  Sequencing error: {e}"),
        Err(e) => {
            scorer.abort();
            log.record_subtest_aborted();
            println!("  {}", e.prompt());
        }
    }

    // Touch: trace the spiral with a little hand wobble.
    if let Err(e) = scorer.begin(SubTest::Spiral) {
        eprintln!("Cannot start spiral: {e}");
        return;
    }
    let mut tracer = SpiralTracer::new(config.spiral.clone(), (200.0, 200.0));
    let b = config.spiral.growth();
    let at = start + Duration::seconds(30);
    let mut events = vec![PointerEvent::new(at, PointerPhase::Down, 200.0, 200.0)];
    for i in 0..240 {
        let theta = 0.3 + i as f64 * 0.08;
        let r = b * theta + 3.0 * (i as f64 * 0.7).sin();
        events.push(PointerEvent::new(
            at + Duration::milliseconds(16 * (i + 1)),
            PointerPhase::Move,
            200.0 + r * theta.cos(),
            200.0 + r * theta.sin(),
        ));
    }
    for event in &events {
        match tracer.process(event) {
            Ok(SpiralProgress::Complete(result)) => {
                println!(
                    "Spiral: {} points, RMSE {:.2}, score {}",
                    result.points, result.rmse, result.score
                );
                if let Err(e) = scorer.complete_spiral(&result) {
                    eprintln!("  Sequencing error: {e}");
                }
                log.record_subtest_completed();
                break;
            }
            Ok(_) => {}
            Err(e) => println!("  {}", e.prompt()),
        }
    }
    if scorer.active() == Some(SubTest::Spiral) {
        scorer.abort();
        log.record_subtest_aborted();
    }

    // The stability sub-test needs a motion sensor, so TOUCH stays open here.
    let risk = assess(scorer.results(), &config.risk);
    println!();
    println!(
        "Overall: {} (lowest {}, average {:.1})",
        risk.status, risk.lowest_score, risk.average_score
    );
    println!();
    println!("{}", log.summary());
}
