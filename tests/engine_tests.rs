//! Integration tests for the export session state machine
//!
//! The session is exercised with scripted strategies and fixed-size space
//! probes, so every transition, cleanup rule and preflight decision is
//! testable without FFmpeg or a real volume.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use lapse_cli::domain::model::{ExportJob, ExportSettings, SourceAsset};
use lapse_cli::domain::rules::{resolve_plan, ExportPlan, StrategyKind, StrategyPolicy};
use lapse_cli::engine::progress::{ExportPhase, ProgressTracker};
use lapse_cli::engine::{StrategyReport, TimelapseStrategy};
use lapse_cli::error::{LapseError, LapseResult};
use lapse_cli::session::{estimated_output_bytes, ExportSession, ExportState, DISK_SAFETY_MARGIN};
use lapse_cli::utils::disk::SpaceProbe;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// Test utilities

fn test_asset(dir: &Path) -> SourceAsset {
    SourceAsset {
        path: dir.join("input.mp4"),
        duration: 100.0,
        width: 1920,
        height: 1080,
        rotation: 0.0,
        frame_rate: 30.0,
        video_codec: "h264".to_string(),
        has_audio: false,
        file_size: 10_000_000,
    }
}

fn test_plan(dir: &Path, speed: f64) -> ExportPlan {
    let settings = ExportSettings {
        include_audio: false,
        ..ExportSettings::default()
    };
    let job = ExportJob::new(
        test_asset(dir),
        speed,
        settings,
        dir.join("out.mp4"),
        None,
        None,
    )
    .unwrap();
    resolve_plan(job, None, StrategyPolicy::default())
}

/// Fixed available-space figure, regardless of directory.
struct FixedSpace(u64);

impl SpaceProbe for FixedSpace {
    fn available_space(&self, _dir: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// A space query that always fails, as on an unsupported filesystem.
struct BrokenSpace;

impl SpaceProbe for BrokenSpace {
    fn available_space(&self, _dir: &Path) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "space query unsupported",
        ))
    }
}

/// Writes `payload` to the destination and succeeds.
struct CompletingStrategy {
    payload: &'static [u8],
    runs: Arc<AtomicUsize>,
}

impl CompletingStrategy {
    fn new(payload: &'static [u8]) -> (Box<Self>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Self {
                payload,
                runs: Arc::clone(&runs),
            }),
            runs,
        )
    }
}

impl TimelapseStrategy for CompletingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Passthrough
    }

    fn run(&self, plan: &ExportPlan, tracker: &ProgressTracker) -> LapseResult<StrategyReport> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tracker.set_phase(ExportPhase::Exporting);
        tracker.set_total(1);
        std::fs::write(&plan.dest, self.payload)?;
        tracker.finish();
        Ok(StrategyReport {
            frames_written: 1,
            output_duration: 1.0 / 30.0,
            bytes_written: self.payload.len() as u64,
            warnings: Vec::new(),
        })
    }
}

/// Leaves a partial file behind and reports a write failure.
struct FailingStrategy;

impl TimelapseStrategy for FailingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Passthrough
    }

    fn run(&self, plan: &ExportPlan, _tracker: &ProgressTracker) -> LapseResult<StrategyReport> {
        std::fs::write(&plan.dest, b"partial")?;
        Err(LapseError::EncodeOrWrite {
            message: "writer rejected a sample".to_string(),
        })
    }
}

/// Writes a partial file, then spins until cancelled.
struct HangingStrategy;

impl TimelapseStrategy for HangingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Passthrough
    }

    fn run(&self, plan: &ExportPlan, tracker: &ProgressTracker) -> LapseResult<StrategyReport> {
        std::fs::write(&plan.dest, b"partial")?;
        tracker.set_total(100);
        tracker.advance(5);
        // bail out eventually so a buggy test cannot hang the suite
        for _ in 0..2500 {
            if tracker.is_cancelled() {
                return Err(LapseError::Cancelled);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        Err(LapseError::EncodeOrWrite {
            message: "test strategy was never cancelled".to_string(),
        })
    }
}

/// Receive events until a terminal one arrives, returning the whole sequence.
fn collect_until_terminal(session: &ExportSession) -> Vec<ExportState> {
    let events = session.events();
    let mut seen = Vec::new();
    loop {
        let state = events.recv_timeout(RECV_TIMEOUT).expect("event");
        let terminal = state.is_terminal();
        seen.push(state);
        if terminal {
            return seen;
        }
    }
}

// Completion

#[test]
fn test_completed_export_reports_path_and_leaves_output() {
    let dir = TempDir::new().unwrap();
    let plan = test_plan(dir.path(), 10.0);
    let dest = plan.dest.clone();

    let (strategy, runs) = CompletingStrategy::new(b"timelapse");
    let session = ExportSession::new(plan).with_strategy(strategy);
    session.start().unwrap();

    match session.wait() {
        ExportState::Completed { path } => assert_eq!(path, dest),
        other => panic!("expected Completed, got {other:?}"),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read(&dest).unwrap(), b"timelapse");
    assert!((session.fraction_complete() - 1.0).abs() < 1e-9);
}

#[test]
fn test_events_arrive_in_order() {
    let dir = TempDir::new().unwrap();
    let plan = test_plan(dir.path(), 10.0);

    let (strategy, _) = CompletingStrategy::new(b"x");
    let session = ExportSession::new(plan).with_strategy(strategy);
    session.start().unwrap();

    let events = collect_until_terminal(&session);
    session.wait();

    assert!(matches!(events[0], ExportState::Preparing));
    assert!(matches!(events[1], ExportState::Exporting { .. }));
    assert!(matches!(events.last(), Some(ExportState::Completed { .. })));
}

// Disk preflight

#[test]
fn test_disk_gate_blocks_without_invoking_strategy() {
    let dir = TempDir::new().unwrap();
    let plan = test_plan(dir.path(), 10.0);
    let dest = plan.dest.clone();

    let (strategy, runs) = CompletingStrategy::new(b"x");
    let session = ExportSession::new(plan)
        .with_space_probe(Arc::new(FixedSpace(1)))
        .with_strategy(strategy);
    session.start().unwrap();

    match session.wait() {
        ExportState::Failed { reason } => {
            assert!(reason.contains("Insufficient disk space"), "{reason}");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(!dest.exists());
}

#[test]
fn test_disk_gate_margin_boundary() {
    let dir = TempDir::new().unwrap();
    let plan = test_plan(dir.path(), 10.0);
    let required = (estimated_output_bytes(&plan) as f64 * DISK_SAFETY_MARGIN).ceil() as u64;

    // exactly the required headroom passes
    let (strategy, _) = CompletingStrategy::new(b"x");
    let session = ExportSession::new(test_plan(dir.path(), 10.0))
        .with_space_probe(Arc::new(FixedSpace(required)))
        .with_strategy(strategy);
    session.start().unwrap();
    assert!(matches!(session.wait(), ExportState::Completed { .. }));

    // one byte short blocks
    let (strategy, runs) = CompletingStrategy::new(b"x");
    let session = ExportSession::new(test_plan(dir.path(), 10.0))
        .with_space_probe(Arc::new(FixedSpace(required - 1)))
        .with_strategy(strategy);
    session.start().unwrap();
    assert!(matches!(session.wait(), ExportState::Failed { .. }));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_failing_space_query_proceeds_with_export() {
    let dir = TempDir::new().unwrap();
    let plan = test_plan(dir.path(), 10.0);

    let (strategy, runs) = CompletingStrategy::new(b"x");
    let session = ExportSession::new(plan)
        .with_space_probe(Arc::new(BrokenSpace))
        .with_strategy(strategy);
    session.start().unwrap();

    assert!(matches!(session.wait(), ExportState::Completed { .. }));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

// Cancellation and failure cleanup

#[test]
fn test_cancellation_removes_partial_output() {
    let dir = TempDir::new().unwrap();
    let plan = test_plan(dir.path(), 10.0);
    let dest = plan.dest.clone();

    let session = ExportSession::new(plan).with_strategy(Box::new(HangingStrategy));
    let events = session.events();
    session.start().unwrap();

    // cancel only once the strategy is actually running
    loop {
        match events.recv_timeout(RECV_TIMEOUT).expect("event") {
            ExportState::Exporting { .. } => break,
            state if state.is_terminal() => panic!("terminal before exporting: {state:?}"),
            _ => {}
        }
    }
    session.cancel();

    assert_eq!(session.wait(), ExportState::Cancelled);
    assert!(!dest.exists());
}

#[test]
fn test_failure_removes_partial_output_and_carries_reason() {
    let dir = TempDir::new().unwrap();
    let plan = test_plan(dir.path(), 10.0);
    let dest = plan.dest.clone();

    let session = ExportSession::new(plan).with_strategy(Box::new(FailingStrategy));
    session.start().unwrap();

    match session.wait() {
        ExportState::Failed { reason } => {
            assert!(reason.contains("writer rejected a sample"), "{reason}");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(!dest.exists());
}

#[test]
fn test_missing_keyframes_surfaces_as_failure() {
    struct NoKeyframes;
    impl TimelapseStrategy for NoKeyframes {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Passthrough
        }
        fn run(&self, _: &ExportPlan, _: &ProgressTracker) -> LapseResult<StrategyReport> {
            Err(LapseError::MissingKeyframes)
        }
    }

    let dir = TempDir::new().unwrap();
    let session =
        ExportSession::new(test_plan(dir.path(), 20.0)).with_strategy(Box::new(NoKeyframes));
    session.start().unwrap();

    match session.wait() {
        ExportState::Failed { reason } => assert!(reason.contains("keyframes"), "{reason}"),
        other => panic!("expected Failed, got {other:?}"),
    }
}

// Session lifecycle rules

#[test]
fn test_session_is_single_use() {
    let dir = TempDir::new().unwrap();
    let (strategy, _) = CompletingStrategy::new(b"x");
    let session = ExportSession::new(test_plan(dir.path(), 10.0)).with_strategy(strategy);

    session.start().unwrap();
    let err = session.start().unwrap_err();
    assert!(matches!(err, LapseError::AlreadyStarted));

    session.wait();
    let err = session.start().unwrap_err();
    assert!(matches!(err, LapseError::AlreadyStarted));
}

#[test]
fn test_cancel_after_terminal_state_is_noop() {
    let dir = TempDir::new().unwrap();
    let plan = test_plan(dir.path(), 10.0);
    let dest = plan.dest.clone();

    let (strategy, _) = CompletingStrategy::new(b"final");
    let session = ExportSession::new(plan).with_strategy(strategy);
    session.start().unwrap();
    assert!(matches!(session.wait(), ExportState::Completed { .. }));

    session.cancel();
    session.cancel();
    assert!(matches!(session.state(), ExportState::Completed { .. }));
    // completed output is never cleaned up by a late cancel
    assert_eq!(std::fs::read(&dest).unwrap(), b"final");
}

#[test]
fn test_re_export_replaces_previous_output() {
    let dir = TempDir::new().unwrap();
    let plan = test_plan(dir.path(), 10.0);
    let dest = plan.dest.clone();

    // stale data from an unrelated earlier run
    std::fs::write(&dest, b"stale").unwrap();

    let (strategy, _) = CompletingStrategy::new(b"first");
    let session = ExportSession::new(test_plan(dir.path(), 10.0)).with_strategy(strategy);
    session.start().unwrap();
    assert!(matches!(session.wait(), ExportState::Completed { .. }));
    assert_eq!(std::fs::read(&dest).unwrap(), b"first");

    let (strategy, _) = CompletingStrategy::new(b"second");
    let session = ExportSession::new(test_plan(dir.path(), 10.0)).with_strategy(strategy);
    session.start().unwrap();
    assert!(matches!(session.wait(), ExportState::Completed { .. }));
    assert_eq!(std::fs::read(&dest).unwrap(), b"second");
}
