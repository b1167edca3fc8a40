//! Unit tests for the timestamp query ring and result decoding

use super::*;
use crate::error::Error;
use crate::graphics_device::{ResourceId, next_resource_id};

struct TestPool(ResourceId);

impl QueryPool for TestPool {
    fn id(&self) -> ResourceId {
        self.0
    }

    fn query_count(&self) -> u32 {
        query_count(4)
    }
}

fn ring(len: usize) -> QueryRing {
    QueryRing::new((0..len).map(|_| Arc::new(TestPool(next_resource_id())) as Arc<dyn QueryPool>).collect())
}

// ============================================================================
// Layout helpers
// ============================================================================

#[test]
fn test_query_layout() {
    assert_eq!(query_count(0), 2);
    assert_eq!(query_count(64), 130);
    assert_eq!(pipeline_queries(0), (2, 3));
    assert_eq!(pipeline_queries(5), (12, 13));
}

#[test]
fn test_ticks_to_ms() {
    assert!((ticks_to_ms(1_000_000, 1.0) - 1.0).abs() < 1e-6);
    assert!((ticks_to_ms(2_500, 52.08) - 0.1302).abs() < 1e-4);
}

// ============================================================================
// Slot state machine
// ============================================================================

#[test]
fn test_frames_map_onto_slots() {
    let r = ring(2);
    assert_eq!(r.slot_index(0), 0);
    assert_eq!(r.slot_index(1), 1);
    assert_eq!(r.slot_index(2), 0);

    let r3 = ring(3);
    assert_eq!(r3.slot_index(7), 1);
}

#[test]
fn test_write_then_ready() {
    let mut r = ring(2);
    let index = r.begin_write(4).unwrap();
    assert_eq!(r.state(index), QuerySlotState::Writing);

    r.finish_write(index, vec![0, 2]).unwrap();
    assert_eq!(r.state(index), QuerySlotState::ReadyToRead);
    assert_eq!(r.slot(index).frame, 4);
    assert_eq!(r.slot(index).timed, vec![0, 2]);
}

#[test]
fn test_writing_slot_cannot_be_reopened() {
    let mut r = ring(2);
    r.begin_write(0).unwrap();
    assert!(matches!(r.begin_write(2), Err(Error::ValidationError(_))));
}

#[test]
fn test_ready_slot_must_be_consumed_before_rewrite() {
    let mut r = ring(2);
    let index = r.begin_write(0).unwrap();
    r.finish_write(index, Vec::new()).unwrap();

    assert!(r.begin_write(2).is_err());
    r.consume(index);
    assert_eq!(r.begin_write(2).unwrap(), index);
}

#[test]
fn test_finish_requires_writing() {
    let mut r = ring(2);
    assert!(r.finish_write(1, Vec::new()).is_err());
}

#[test]
fn test_pending_oldest_first_excluding_current() {
    let mut r = ring(3);
    for frame in 3..6 {
        let index = r.begin_write(frame).unwrap();
        r.finish_write(index, Vec::new()).unwrap();
    }
    // frames 3,4,5 live in slots 0,1,2
    assert_eq!(r.pending(None), vec![0, 1, 2]);
    assert_eq!(r.pending(Some(2)), vec![0, 1]);

    r.consume(0);
    assert_eq!(r.pending(Some(2)), vec![1]);
}

#[test]
fn test_forget_removes_timing_slot() {
    let mut r = ring(2);
    let index = r.begin_write(0).unwrap();
    r.finish_write(index, vec![1, 3]).unwrap();

    r.forget(1);
    assert_eq!(r.slot(index).timed, vec![3]);
}

// ============================================================================
// Result decoding
// ============================================================================

#[test]
fn test_resolve_timings() {
    // frame start 100, frame end 900, slot 0: 150..350, slot 1: 400..800
    let mut results = vec![None; query_count(2) as usize];
    results[0] = Some(100);
    results[1] = Some(900);
    results[2] = Some(150);
    results[3] = Some(350);
    results[4] = Some(400);
    results[5] = Some(800);

    let timings = resolve_timings(7, &results, &[0, 1], 1000.0).unwrap();
    assert_eq!(timings.frame, 7);
    assert!((timings.frame_time - 0.8).abs() < 1e-6);
    assert!((timings.pre_execution_time.unwrap() - 0.05).abs() < 1e-6);
    assert_eq!(timings.pipelines.len(), 2);
    assert!((timings.pipelines[0].1 - 0.2).abs() < 1e-6);
    assert!((timings.pipelines[1].1 - 0.4).abs() < 1e-6);
}

#[test]
fn test_resolve_requires_every_expected_query() {
    let mut results = vec![Some(10); query_count(1) as usize];
    results[3] = None;
    assert!(resolve_timings(0, &results, &[0], 1.0).is_none());

    // Untimed pipelines' queries are not expected
    assert!(resolve_timings(0, &results, &[], 1.0).is_some());
}

#[test]
fn test_resolve_without_frame_markers_is_unavailable() {
    let results = vec![None, Some(5), Some(6), Some(7)];
    assert!(resolve_timings(0, &results, &[0], 1.0).is_none());
}

#[test]
fn test_resolve_no_pipelines_has_no_pre_execution() {
    let results = vec![Some(0), Some(40)];
    let timings = resolve_timings(1, &results, &[], 1.0).unwrap();
    assert!(timings.pre_execution_time.is_none());
    assert!(timings.pipelines.is_empty());
}
