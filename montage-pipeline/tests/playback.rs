//! End-to-end playback: timeline edits flowing through commit into the
//! track compositions, driven by the pipeline state machine.

use std::sync::Arc;

use montage_compose::NodeState;
use montage_core::ClockTime;
use montage_pipeline::{Pipeline, PipelineState};
use montage_timeline::{Asset, TrackKind, Timeline};

fn seconds(s: u64) -> ClockTime {
    ClockTime::from_seconds(s)
}

/// Route engine logs through the test harness capture. Idempotent.
fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn make_asset() -> Arc<Asset> {
    Asset::new("media", seconds(3600), [TrackKind::Video, TrackKind::Audio])
}

fn make_timeline() -> Timeline {
    let mut tl = Timeline::new("session");
    tl.add_track(TrackKind::Video);
    tl.add_track(TrackKind::Audio);
    tl.append_layer("l0");
    tl
}

// ==== state machine =====================================================

#[test]
fn test_pause_prerolls_every_track() {
    let mut tl = make_timeline();
    let asset = make_asset();
    tl.add_clip(0, &asset, seconds(0), seconds(0), seconds(10)).unwrap();

    let mut pipeline = Pipeline::new(tl);
    assert_eq!(pipeline.state(), PipelineState::Created);

    pipeline.pause().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Paused);
    for track in pipeline.timeline().tracks() {
        assert_eq!(track.composition().state(), NodeState::Paused);
        assert_eq!(track.composition().current_stack().len(), 1);
    }
    assert_eq!(pipeline.position(), seconds(0));
}

#[test]
fn test_play_commits_pending_edits_first() {
    let mut pipeline = Pipeline::new(make_timeline());
    let asset = make_asset();
    pipeline.prepare().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Ready);

    // Edit after prepare; play must pick it up.
    pipeline
        .timeline_mut()
        .add_clip(0, &asset, seconds(0), seconds(0), seconds(10))
        .unwrap();
    pipeline.play().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Playing);
    for track in pipeline.timeline().tracks() {
        assert_eq!(track.composition().object_count(), 1);
        assert_eq!(track.composition().state(), NodeState::Playing);
    }
}

#[test]
fn test_stop_returns_to_ready() {
    let mut pipeline = Pipeline::new(make_timeline());
    let asset = make_asset();
    pipeline
        .timeline_mut()
        .add_clip(0, &asset, seconds(0), seconds(0), seconds(10))
        .unwrap();

    pipeline.play().unwrap();
    pipeline.stop().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Ready);
    for track in pipeline.timeline().tracks() {
        assert_eq!(track.composition().state(), NodeState::Stopped);
    }

    // And it can roll again.
    pipeline.play().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Playing);
}

#[test]
fn test_prepare_without_tracks_fails() {
    let mut pipeline = Pipeline::new(Timeline::new("empty"));
    assert!(pipeline.prepare().is_err());
}

// ==== seeking ===========================================================

#[test]
fn test_seek_requires_a_prepared_pipeline() {
    let mut pipeline = Pipeline::new(make_timeline());
    assert!(pipeline
        .seek(1.0, seconds(1), ClockTime::NONE)
        .is_err());
}

#[test]
fn test_seek_fans_out_to_all_tracks() {
    let mut pipeline = Pipeline::new(make_timeline());
    let asset = make_asset();
    pipeline
        .timeline_mut()
        .add_clip(0, &asset, seconds(0), seconds(0), seconds(10))
        .unwrap();
    pipeline.pause().unwrap();

    pipeline.seek(1.0, seconds(4), ClockTime::NONE).unwrap();
    for track in pipeline.timeline().tracks() {
        assert_eq!(track.composition().position(), seconds(4));
    }
}

// ==== editing while live ================================================

#[test]
fn test_commit_while_playing_updates_the_graph() {
    init_logging();
    let mut pipeline = Pipeline::new(make_timeline());
    let asset = make_asset();
    let a = pipeline
        .timeline_mut()
        .add_clip(0, &asset, seconds(0), seconds(0), seconds(10))
        .unwrap();
    pipeline.play().unwrap();

    // Append a second clip and commit without touching the state machine.
    pipeline
        .timeline_mut()
        .add_clip(0, &asset, seconds(10), seconds(0), seconds(10))
        .unwrap();
    assert!(pipeline.commit().unwrap());
    assert_eq!(pipeline.duration(), seconds(20));
    for track in pipeline.timeline().tracks() {
        assert_eq!(track.composition().object_count(), 2);
        assert_eq!(track.composition().bounds().stop, seconds(20));
    }

    // The clip under the playhead is still the one on air.
    let id = pipeline.timeline().clip(a).unwrap().children()[0]
        .object_id()
        .unwrap();
    assert!(pipeline.timeline().tracks()[0]
        .composition()
        .current_stack()
        .contains(&id));
}
