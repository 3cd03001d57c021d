use crate::automation::state::AutomationState;
use crate::event::{AccurateEvent, BlockEvent};
use crate::param::ParamValue;
use crate::topology::{GlobalParamId, ParamDirection, Topology};

/*
Automation Curve Building
=========================

Hosts hand us sparse, irregularly timed parameter changes. Modules want
dense per-frame values. This is the translation layer, run once at the
top of every block:

  1. Block-rate parameters snapshot their stored value into a scalar.
  2. Accurate-rate parameters pre-fill their curve row with the
     NORMALIZED stored value. Interpolation happens in normalized space
     even for log-scaled parameters - interpolating raw log values
     produces audible discontinuities at block boundaries.
  3. Block events apply, at most one per parameter per block (later
     duplicates are silently discarded). They overwrite the stored
     value and the scalar.
  4. Accurate events apply in arrival order. Each event (frame F,
     value V) ramps the row linearly from the last-written frame up to
     F, then the tail of the row holds V. No extrapolation: a change
     only continues into the next block if the host supplies a knot at
     this block's final frame.
  5. The whole row converts normalized -> plain through the domain law.

Everything here is sized once at activation (accurate instance count x
maximum block length, one flat arena) and rewritten in place each block.
Nothing resizes on the audio thread.
*/

pub struct CurveBank {
    max_frames: usize,
    /// Frame count of the block currently being built.
    frames: usize,
    /// One plain scalar per parameter instance.
    scalars: Vec<ParamValue>,
    /// Flat arena: accurate slot * max_frames.
    rows: Vec<f32>,
    /// Last frame written by an accurate event, per accurate slot.
    last_frame: Vec<usize>,
    /// Block-event dedup flags, per parameter instance.
    block_applied: Vec<bool>,
}

impl CurveBank {
    /// Allocates worst-case storage for `max_frames`-long blocks.
    pub fn new(topology: &Topology, max_frames: usize) -> Self {
        let map = topology.map();
        Self {
            max_frames,
            frames: 0,
            scalars: vec![ParamValue::Real(0.0); map.param_count()],
            rows: vec![0.0; map.accurate_count() * max_frames],
            last_frame: vec![0; map.accurate_count()],
            block_applied: vec![false; map.param_count()],
        }
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    fn row(&self, slot: usize) -> &[f32] {
        let start = slot * self.max_frames;
        &self.rows[start..start + self.frames]
    }

    #[inline]
    fn row_mut(&mut self, slot: usize) -> &mut [f32] {
        let start = slot * self.max_frames;
        &mut self.rows[start..start + self.frames]
    }

    /// Step 1 + 2: snapshot scalars and pre-fill accurate rows with the
    /// normalized stored value.
    pub fn begin_block(&mut self, topology: &Topology, state: &AutomationState, frames: usize) {
        debug_assert!(frames <= self.max_frames);
        self.frames = frames.min(self.max_frames);
        self.block_applied.fill(false);

        let map = topology.map();
        for id in map.ids() {
            self.scalars[id.index()] = state.value(id);
            if let Some(slot) = map.accurate_slot(id) {
                let normalized = map.domain(id).to_normalized(state.value(id));
                self.last_frame[slot] = 0;
                self.row_mut(slot).fill(normalized);
            }
        }
    }

    /// Step 3. First event per parameter wins; unknown ids and
    /// output-direction parameters are ignored.
    pub fn apply_block_event(
        &mut self,
        topology: &Topology,
        state: &mut AutomationState,
        event: &BlockEvent,
    ) {
        let map = topology.map();
        if !map.contains(event.param) || map.direction(event.param) == ParamDirection::Out {
            return;
        }
        if self.block_applied[event.param.index()] {
            return;
        }
        self.block_applied[event.param.index()] = true;

        let normalized = event.normalized.clamp(0.0, 1.0);
        state.set_normalized(topology, event.param, normalized);
        self.scalars[event.param.index()] = state.value(event.param);
        if let Some(slot) = map.accurate_slot(event.param) {
            self.last_frame[slot] = 0;
            self.row_mut(slot).fill(normalized);
        }
    }

    /// Step 4. Ramps from the last-written frame to the event frame in
    /// normalized space, then holds. Two events on the same frame: the
    /// later one wins outright, with no zero-length-ramp division.
    pub fn apply_accurate_event(
        &mut self,
        topology: &Topology,
        state: &mut AutomationState,
        event: &AccurateEvent,
    ) {
        let map = topology.map();
        if !map.contains(event.param)
            || map.direction(event.param) == ParamDirection::Out
            || self.frames == 0
        {
            return;
        }
        let normalized = event.normalized.clamp(0.0, 1.0);

        let Some(slot) = map.accurate_slot(event.param) else {
            // Accurate event aimed at a block-rate parameter: degrade
            // to a plain overwrite, last value wins.
            state.set_normalized(topology, event.param, normalized);
            self.scalars[event.param.index()] = state.value(event.param);
            return;
        };

        let frame = event.frame.min(self.frames - 1);
        let from = self.last_frame[slot];
        let row = self.row_mut(slot);

        if frame <= from {
            // Same frame (last wins) or out-of-order host data: step
            // there and hold.
            for v in &mut row[frame..] {
                *v = normalized;
            }
        } else {
            let prev = row[from];
            let span = (frame - from) as f32;
            for (i, v) in row[from..=frame].iter_mut().enumerate() {
                *v = prev + (normalized - prev) * (i as f32 / span);
            }
            for v in &mut row[frame + 1..] {
                *v = normalized;
            }
        }
        self.last_frame[slot] = frame;
        state.set_normalized(topology, event.param, normalized);
    }

    /// Step 5: convert every accurate row to plain units in place.
    pub fn finish_block(&mut self, topology: &Topology) {
        let map = topology.map();
        for id in map.ids() {
            if let Some(slot) = map.accurate_slot(id) {
                let domain = map.domain(id);
                let start = slot * self.max_frames;
                for v in &mut self.rows[start..start + self.frames] {
                    *v = domain.from_normalized(*v).real();
                }
            }
        }
    }

    /// The block scalar for any parameter instance.
    #[inline]
    pub fn scalar(&self, id: GlobalParamId) -> ParamValue {
        self.scalars[id.index()]
    }

    /// The dense plain-valued curve for an accurate-rate instance, or
    /// `None` for block-rate ones. Only meaningful after
    /// [`finish_block`](Self::finish_block).
    #[inline]
    pub fn curve(&self, topology: &Topology, id: GlobalParamId) -> Option<&[f32]> {
        topology.map().accurate_slot(id).map(|slot| self.row(slot))
    }
}
