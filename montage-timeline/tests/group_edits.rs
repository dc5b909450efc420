//! Group editing behaviour: moving, resizing and trimming a group and how
//! those edits cascade into its children.

use std::sync::Arc;

use montage_core::ClockTime;
use montage_timeline::{Asset, ClipId, ElementRef, TrackKind, Timeline};

fn seconds(s: u64) -> ClockTime {
    ClockTime::from_seconds(s)
}

fn make_asset() -> Arc<Asset> {
    Asset::new("media", seconds(3600), [TrackKind::Video, TrackKind::Audio])
}

fn check(timeline: &Timeline, id: ClipId, start: u64, inpoint: u64, duration: u64) {
    let clip = timeline.clip(id).unwrap();
    assert_eq!(
        (clip.start(), clip.inpoint(), clip.duration()),
        (seconds(start), seconds(inpoint), seconds(duration)),
        "unexpected geometry for {id}"
    );
}

// ==== grouping ==========================================================

#[test]
fn test_group_envelope_spans_children() {
    let mut tl = Timeline::new("envelope");
    tl.add_track(TrackKind::Video);
    tl.append_layer("l0");
    tl.append_layer("l1");
    let asset = make_asset();
    let a = tl.add_clip(0, &asset, seconds(0), seconds(0), seconds(10)).unwrap();
    let b = tl.add_clip(1, &asset, seconds(50), seconds(0), seconds(60)).unwrap();

    let gid = tl.group_elements(&[a.into(), b.into()]).unwrap();
    let group = tl.group(gid).unwrap();
    assert_eq!(group.start(), seconds(0));
    assert_eq!(group.duration(), seconds(110));
    assert_eq!(group.priority(), 0);
    assert_eq!(group.height(), 2);
}

#[test]
fn test_grouping_twice_is_rejected() {
    let mut tl = Timeline::new("twice");
    tl.add_track(TrackKind::Video);
    tl.append_layer("l0");
    let asset = make_asset();
    let a = tl.add_clip(0, &asset, seconds(0), seconds(0), seconds(10)).unwrap();
    let b = tl.add_clip(0, &asset, seconds(20), seconds(0), seconds(10)).unwrap();

    tl.group_elements(&[a.into()]).unwrap();
    assert!(tl.group_elements(&[a.into(), b.into()]).is_err());
}

#[test]
fn test_ungroup_nested_group_is_rejected() {
    let mut tl = Timeline::new("nested");
    tl.add_track(TrackKind::Video);
    tl.append_layer("l0");
    let asset = make_asset();
    let a = tl.add_clip(0, &asset, seconds(0), seconds(0), seconds(10)).unwrap();
    let b = tl.add_clip(0, &asset, seconds(20), seconds(0), seconds(10)).unwrap();

    let inner = tl.group_elements(&[a.into()]).unwrap();
    let outer = tl.group_elements(&[inner.into(), b.into()]).unwrap();
    assert!(tl.ungroup(inner).is_err());

    let freed = tl.ungroup(outer).unwrap();
    assert_eq!(freed.len(), 2);
    assert!(tl.ungroup(inner).is_ok());
}

// ==== the full move / resize / trim cascade =============================

#[test]
fn test_move_and_trim_group_cascades_into_children() {
    let mut tl = Timeline::new("cascade");
    tl.add_track(TrackKind::Video);
    tl.append_layer("l0");
    tl.append_layer("l1");
    let asset = make_asset();
    let a = tl.add_clip(0, &asset, seconds(0), seconds(0), seconds(10)).unwrap();
    let b = tl.add_clip(1, &asset, seconds(10), seconds(0), seconds(10)).unwrap();
    let c = tl.add_clip(1, &asset, seconds(50), seconds(0), seconds(60)).unwrap();
    let gid = tl.group_elements(&[a.into(), b.into(), c.into()]).unwrap();
    let group: ElementRef = gid.into();
    assert_eq!(tl.group(gid).unwrap().duration(), seconds(110));

    // Moving one child drags the whole group along.
    tl.set_start(a.into(), seconds(10)).unwrap();
    check(&tl, a, 10, 0, 10);
    check(&tl, b, 20, 0, 10);
    check(&tl, c, 60, 0, 60);
    assert_eq!(tl.group(gid).unwrap().start(), seconds(10));
    assert_eq!(tl.group(gid).unwrap().duration(), seconds(110));

    // Shrinking a child in the middle leaves the envelope alone.
    tl.set_duration(a.into(), seconds(5)).unwrap();
    check(&tl, a, 10, 0, 5);
    assert_eq!(tl.group(gid).unwrap().duration(), seconds(110));

    // Shrinking the last child pulls the envelope in.
    tl.set_duration(c.into(), seconds(50)).unwrap();
    check(&tl, c, 60, 0, 50);
    assert_eq!(tl.group(gid).unwrap().duration(), seconds(100));

    tl.set_inpoint(b, seconds(5)).unwrap();
    check(&tl, b, 20, 5, 10);

    // Trim forward: clips fully behind the new edge collapse to zero.
    tl.trim_start(group, seconds(20)).unwrap();
    check(&tl, a, 15, 5, 0);
    check(&tl, b, 20, 5, 10);
    assert_eq!(tl.group(gid).unwrap().start(), seconds(20));
    assert_eq!(tl.group(gid).unwrap().duration(), seconds(90));

    // Trim forward again: a zero-length clip stays put, clips spanning the
    // edge lose their head.
    tl.trim_start(group, seconds(25)).unwrap();
    check(&tl, a, 15, 5, 0);
    check(&tl, b, 25, 10, 5);
    assert_eq!(tl.group(gid).unwrap().start(), seconds(25));
    assert_eq!(tl.group(gid).unwrap().duration(), seconds(85));

    // Trim backward: every clip touching the old edge grows back, with the
    // in-point clamped at the media origin.
    tl.trim_start(group, seconds(10)).unwrap();
    check(&tl, a, 10, 0, 5);
    check(&tl, b, 10, 0, 20);
    check(&tl, c, 60, 0, 50);
    assert_eq!(tl.group(gid).unwrap().start(), seconds(10));
    assert_eq!(tl.group(gid).unwrap().duration(), seconds(100));

    tl.trim_start(group, seconds(25)).unwrap();
    check(&tl, a, 15, 5, 0);
    check(&tl, b, 25, 15, 5);
    check(&tl, c, 60, 0, 50);
    assert_eq!(tl.group(gid).unwrap().start(), seconds(25));
    assert_eq!(tl.group(gid).unwrap().duration(), seconds(85));

    // Shrinking the group truncates children past the new end; the final
    // duration is re-derived from what actually remains.
    tl.set_duration(group, seconds(10)).unwrap();
    check(&tl, a, 15, 5, 0);
    check(&tl, b, 25, 15, 5);
    check(&tl, c, 60, 0, 0);
    assert_eq!(tl.group(gid).unwrap().duration(), seconds(5));

    // Expanding stretches the children that formed the old end.
    tl.set_duration(group, seconds(100)).unwrap();
    check(&tl, a, 15, 5, 0);
    check(&tl, b, 25, 15, 100);
    check(&tl, c, 60, 0, 65);
    assert_eq!(tl.group(gid).unwrap().duration(), seconds(100));

    // Moving the group back leaves children entirely before both spans
    // where they are.
    tl.set_start(group, seconds(20)).unwrap();
    check(&tl, a, 15, 5, 0);
    check(&tl, b, 20, 15, 100);
    check(&tl, c, 55, 0, 65);
    assert_eq!(tl.group(gid).unwrap().start(), seconds(20));
    assert_eq!(tl.group(gid).unwrap().duration(), seconds(100));

    tl.trim_start(group, seconds(10)).unwrap();
    check(&tl, a, 10, 0, 5);
    check(&tl, b, 10, 5, 110);
    check(&tl, c, 55, 0, 65);
    assert_eq!(tl.group(gid).unwrap().start(), seconds(10));
    assert_eq!(tl.group(gid).unwrap().duration(), seconds(110));
}

// ==== layer moves =======================================================

#[test]
fn test_group_layer_move_shifts_all_children() {
    let mut tl = Timeline::new("bands");
    tl.add_track(TrackKind::Video);
    for i in 0..4 {
        tl.append_layer(format!("l{i}"));
    }
    let asset = make_asset();
    let a = tl.add_clip(0, &asset, seconds(0), seconds(0), seconds(10)).unwrap();
    let b = tl.add_clip(1, &asset, seconds(10), seconds(0), seconds(10)).unwrap();
    let gid = tl.group_elements(&[a.into(), b.into()]).unwrap();

    tl.set_group_layer(gid, 2).unwrap();
    assert_eq!(tl.clip(a).unwrap().layer(), 2);
    assert_eq!(tl.clip(b).unwrap().layer(), 3);
    assert_eq!(tl.group(gid).unwrap().priority(), 2);

    // Spanning two layers from layer 3 would poke out of the 4 layers.
    assert!(tl.set_group_layer(gid, 3).is_err());
    assert_eq!(tl.clip(a).unwrap().layer(), 2);
}

#[test]
fn test_move_before_origin_is_rejected() {
    let mut tl = Timeline::new("origin");
    tl.add_track(TrackKind::Video);
    tl.append_layer("l0");
    let asset = make_asset();
    let a = tl.add_clip(0, &asset, seconds(2), seconds(0), seconds(10)).unwrap();
    let b = tl.add_clip(0, &asset, seconds(20), seconds(0), seconds(10)).unwrap();
    tl.group_elements(&[a.into(), b.into()]).unwrap();

    // Dragging b back by 15s would push the group 13s before zero.
    assert!(tl.set_start(b.into(), seconds(5)).is_err());
    check(&tl, a, 2, 0, 10);
    check(&tl, b, 20, 0, 10);
}
