/// Timestamp query ring
///
/// One query pool per frame in flight, indexed by `frame % len`. Each slot
/// is tagged with a single-writer/single-reader state:
///
/// - `Idle`: nothing pending, may be reset and written
/// - `Writing`: the frame being recorded writes into it
/// - `ReadyToRead`: frame recorded; results are read back once available
///
/// Query layout inside every pool:
///
/// | query        | written by                       |
/// |--------------|----------------------------------|
/// | 0            | frame start (`begin_frame`)      |
/// | 1            | frame end (`end_frame`)          |
/// | 2 + 2k       | start of the pipeline in slot k  |
/// | 3 + 2k       | end of the pipeline in slot k    |

use std::sync::Arc;
use crate::error::Result;
use crate::graphics_device::QueryPool;
use crate::engine_validation;

/// Query holding the frame-start timestamp
pub const FRAME_START_QUERY: u32 = 0;

/// Query holding the frame-end timestamp
pub const FRAME_END_QUERY: u32 = 1;

/// Queries needed for `max_pipelines` pipelines
pub fn query_count(max_pipelines: u32) -> u32 {
    2 + 2 * max_pipelines
}

/// (start, end) queries of the pipeline owning `timing_slot`
pub fn pipeline_queries(timing_slot: u32) -> (u32, u32) {
    (2 + 2 * timing_slot, 3 + 2 * timing_slot)
}

/// Convert a tick delta to milliseconds
pub fn ticks_to_ms(ticks: u64, period_ns: f32) -> f32 {
    (ticks as f64 * period_ns as f64 / 1_000_000.0) as f32
}

// ============================================================================
// Slot state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySlotState {
    Idle,
    Writing,
    ReadyToRead,
}

pub struct QuerySlot {
    pub pool: Arc<dyn QueryPool>,
    pub state: QuerySlotState,
    /// Frame last written into this slot
    pub frame: u64,
    /// Timing slots of the pipelines that recorded a start/end pair this frame
    pub timed: Vec<u32>,
}

pub struct QueryRing {
    slots: Vec<QuerySlot>,
}

impl QueryRing {
    pub fn new(pools: Vec<Arc<dyn QueryPool>>) -> Self {
        Self {
            slots: pools
                .into_iter()
                .map(|pool| QuerySlot {
                    pool,
                    state: QuerySlotState::Idle,
                    frame: 0,
                    timed: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot written by `frame`
    pub fn slot_index(&self, frame: u64) -> usize {
        (frame % self.slots.len() as u64) as usize
    }

    pub fn slot(&self, index: usize) -> &QuerySlot {
        &self.slots[index]
    }

    pub fn state(&self, index: usize) -> QuerySlotState {
        self.slots[index].state
    }

    /// Open the slot of `frame` for writing
    ///
    /// The slot must not be `Writing`, and a `ReadyToRead` slot must have been
    /// consumed (or dropped) by the caller first.
    pub fn begin_write(&mut self, frame: u64) -> Result<usize> {
        let index = self.slot_index(frame);
        let slot = &mut self.slots[index];
        if slot.state != QuerySlotState::Idle {
            return Err(engine_validation!("milg::QueryRing",
                "Query slot {} is {:?}, cannot write frame {}", index, slot.state, frame));
        }
        slot.state = QuerySlotState::Writing;
        slot.frame = frame;
        slot.timed.clear();
        Ok(index)
    }

    /// Close the slot being written, recording which pipelines timed themselves
    pub fn finish_write(&mut self, index: usize, timed: Vec<u32>) -> Result<()> {
        let slot = &mut self.slots[index];
        if slot.state != QuerySlotState::Writing {
            return Err(engine_validation!("milg::QueryRing",
                "Query slot {} is {:?}, expected Writing", index, slot.state));
        }
        slot.state = QuerySlotState::ReadyToRead;
        slot.timed = timed;
        Ok(())
    }

    /// `ReadyToRead` slots other than `exclude`, oldest frame first
    pub fn pending(&self, exclude: Option<usize>) -> Vec<usize> {
        let mut pending: Vec<usize> = (0..self.slots.len())
            .filter(|&i| Some(i) != exclude && self.slots[i].state == QuerySlotState::ReadyToRead)
            .collect();
        pending.sort_by_key(|&i| self.slots[i].frame);
        pending
    }

    /// Mark a slot's results as consumed (or abandoned)
    pub fn consume(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.state = QuerySlotState::Idle;
        slot.timed.clear();
    }

    /// Stop expecting results for `timing_slot` in every pending slot
    pub fn forget(&mut self, timing_slot: u32) {
        for slot in &mut self.slots {
            slot.timed.retain(|&t| t != timing_slot);
        }
    }
}

// ============================================================================
// Result resolution
// ============================================================================

/// Timings decoded from one frame's queries
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTimings {
    pub frame: u64,
    /// Frame start to frame end
    pub frame_time: f32,
    /// Frame start to the earliest pipeline start (None when no pipeline ran)
    pub pre_execution_time: Option<f32>,
    /// (timing slot, execution time in ms)
    pub pipelines: Vec<(u32, f32)>,
}

/// Decode raw query values, or `None` if any expected value is not available
///
/// `results` starts at query 0.
pub fn resolve_timings(frame: u64, results: &[Option<u64>], timed: &[u32], period_ns: f32) -> Option<FrameTimings> {
    let value = |query: u32| results.get(query as usize).copied().flatten();

    let frame_start = value(FRAME_START_QUERY)?;
    let frame_end = value(FRAME_END_QUERY)?;

    let mut pipelines = Vec::with_capacity(timed.len());
    let mut first_start: Option<u64> = None;
    for &slot in timed {
        let (start_query, end_query) = pipeline_queries(slot);
        let start = value(start_query)?;
        let end = value(end_query)?;
        first_start = Some(first_start.map_or(start, |s| s.min(start)));
        if let Some(delta) = end.checked_sub(start) {
            pipelines.push((slot, ticks_to_ms(delta, period_ns)));
        }
    }

    Some(FrameTimings {
        frame,
        frame_time: ticks_to_ms(frame_end.saturating_sub(frame_start), period_ns),
        pre_execution_time: first_start.map(|s| ticks_to_ms(s.saturating_sub(frame_start), period_ns)),
        pipelines,
    })
}

#[cfg(test)]
#[path = "query_ring_tests.rs"]
mod tests;
