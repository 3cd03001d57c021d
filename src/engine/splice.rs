use crate::event::{AccurateEvent, Event};
use crate::io::{AudioOutput, BlockInput};
use crate::topology::{GlobalParamId, ParamDirection};

use super::Engine;

/*
Splice Loop
===========

Curve rows, scratch and output arenas are all sized to the configured
block bound. When the host hands us more frames than that, the block is
partitioned into sub-blocks of at most half the bound, with any
remainder folded into the final sub-block (so the final piece is still
under the bound). The inner engine runs once per sub-block with every
event remapped into sub-block-local frame numbering and routed only to
the sub-block its offset falls in.

Automation state, voice state and module state all carry over between
engine calls, but the curve builder never extrapolates past a block's
last knot. A sub-block whose parameter ramps toward a knot in a LATER
sub-block would therefore hold its stored value flat and leave the
whole climb to the later piece. So routing synthesizes knots for every
ramp that crosses a sub-block boundary, interpolated linearly between
the surrounding host knots in normalized space: an exit knot on the
earlier sub-block's final frame, and an entry knot on the later
sub-block's first frame. The pair is needed because a knot's value
doubles as the hold value for its own frame and the ramp origin for
the frame after it, and on a crossing ramp those two frames differ by
one slope step. Both synthesized points lie on the host's line, which
keeps every rendered frame of the concatenated output on the same line
as the single-call output.

Block events route to the first sub-block only; they apply "for the
rest of the block", and the stored-value carry-over propagates them
into the later sub-blocks for free.

Output-direction events are accumulated across ALL sub-blocks and then
deduplicated last-value-wins per parameter by the caller. Copying only
the final sub-block's events would silently drop anything reported by
an earlier sub-block whose parameter stays quiet afterwards.
*/

impl Engine {
    pub(super) fn process_spliced(&mut self, input: &BlockInput, output: &mut AudioOutput) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let sub_len = (active.bound / 2).max(1);
        let total = input.frames;
        let count = total / sub_len;
        let remainder = total % sub_len;
        debug_assert!(count >= 2, "splice entered for an in-bound block");

        // Reuse the routing scratch across sub-blocks; taken out of
        // the engine so process_span can borrow self freely.
        let mut scratch = std::mem::take(&mut active.event_scratch);
        let mut knots = std::mem::take(&mut active.knot_scratch);
        let mut starts = std::mem::take(&mut active.start_scratch);
        knots.clear();
        starts.clear();
        self.collect_knots(&input.events, total, &mut knots, &mut starts);

        let mut offset = 0;
        for k in 0..count {
            let len = if k == count - 1 {
                sub_len + remainder
            } else {
                sub_len
            };

            scratch.clear();
            if k > 0 {
                synthesize_entry_knots(&knots, &starts, offset, &mut scratch);
            }
            for event in &input.events {
                match event {
                    Event::Block(_) => {
                        if k == 0 {
                            scratch.push(*event);
                        }
                    }
                    _ => {
                        let frame = event.frame();
                        let in_span = frame >= offset && frame < offset + len;
                        // Frames past the block end are host bugs;
                        // clamp them into the final sub-block.
                        let overshoot = k == count - 1 && frame >= offset;
                        if in_span || overshoot {
                            scratch.push(remap(event, offset, len));
                        }
                    }
                }
            }
            if k < count - 1 {
                synthesize_boundary_knots(&knots, &starts, offset, len, &mut scratch);
            }

            let mut transport = input.transport;
            transport.stream_time += offset as u64;
            self.process_span(offset, len, &transport, &scratch, &input.audio, output);
            offset += len;
        }

        if let Some(active) = self.active.as_mut() {
            active.event_scratch = scratch;
            active.knot_scratch = knots;
            active.start_scratch = starts;
        }
    }

    /// Every accurate-rate knot in the block (mapped MIDI controllers
    /// included), plus each touched parameter's value going into the
    /// block: the first block event where one exists, the stored state
    /// otherwise.
    fn collect_knots(
        &self,
        events: &[Event],
        total: usize,
        knots: &mut Vec<(GlobalParamId, f32, usize)>,
        starts: &mut Vec<(GlobalParamId, f32)>,
    ) {
        let map = self.topology.map();
        let curve_bound = |param: GlobalParamId| {
            map.contains(param)
                && map.accurate_slot(param).is_some()
                && map.direction(param) != ParamDirection::Out
        };

        // Block events apply before any ramp, so where one exists it
        // is the value the first ramp climbs from.
        for event in events {
            if let Event::Block(e) = event {
                if curve_bound(e.param) && !starts.iter().any(|(p, _)| *p == e.param) {
                    starts.push((e.param, e.normalized.clamp(0.0, 1.0)));
                }
            }
        }

        for event in events {
            let (param, normalized, frame) = match event {
                Event::Accurate(e) => (e.param, e.normalized, e.frame),
                Event::MidiCc(e) => match self.topology.controller_target(e.controller) {
                    Some(param) => (param, e.normalized, e.frame),
                    None => continue,
                },
                _ => continue,
            };
            if !curve_bound(param) {
                continue;
            }
            if !starts.iter().any(|(p, _)| *p == param) {
                let stored = map.domain(param).to_normalized(self.state.value(param));
                starts.push((param, stored));
            }
            // Overshooting frames land on the final frame, the same
            // clamp a single call would apply.
            knots.push((param, normalized.clamp(0.0, 1.0), frame.min(total - 1)));
        }
    }
}

/// The value of `param`'s curve at the absolute frame `at`, read off
/// the line between the host knots surrounding it.
fn line_value(
    knots: &[(GlobalParamId, f32, usize)],
    param: GlobalParamId,
    start_value: f32,
    at: usize,
) -> Option<f32> {
    let next = knots.iter().find(|(p, _, f)| *p == param && *f >= at);
    let &(_, next_value, next_frame) = next?;
    let (prev_value, prev_frame) = knots
        .iter()
        .rev()
        .find(|(p, _, f)| *p == param && *f < at)
        .map(|&(_, v, f)| (v, f))
        .unwrap_or((start_value, 0));
    if next_frame == prev_frame {
        return Some(next_value);
    }
    let t = (at - prev_frame) as f32 / (next_frame - prev_frame) as f32;
    Some(prev_value + (next_value - prev_value) * t)
}

/// For every parameter whose ramp crosses the end of this sub-block
/// (some knot beyond the final frame), push one interpolated knot on
/// the final frame so this sub-block renders its share of the climb.
fn synthesize_boundary_knots(
    knots: &[(GlobalParamId, f32, usize)],
    starts: &[(GlobalParamId, f32)],
    offset: usize,
    len: usize,
    scratch: &mut Vec<Event>,
) {
    let boundary = offset + len - 1;
    for &(param, start_value) in starts {
        if knots
            .iter()
            .any(|(p, _, f)| *p == param && *f == boundary)
        {
            // A host knot already sits on the final frame.
            continue;
        }
        let Some(normalized) = line_value(knots, param, start_value, boundary) else {
            continue;
        };
        scratch.push(Event::Accurate(AccurateEvent {
            param,
            normalized,
            frame: len - 1,
        }));
    }
}

/// For every parameter whose ramp crosses into this sub-block, push a
/// knot on its first frame so the ramp restarts one slope step past
/// where the previous sub-block left it. Pushed before the host's own
/// events, so a real knot on the same frame still wins.
fn synthesize_entry_knots(
    knots: &[(GlobalParamId, f32, usize)],
    starts: &[(GlobalParamId, f32)],
    offset: usize,
    scratch: &mut Vec<Event>,
) {
    for &(param, start_value) in starts {
        let Some(normalized) = line_value(knots, param, start_value, offset) else {
            continue;
        };
        scratch.push(Event::Accurate(AccurateEvent {
            param,
            normalized,
            frame: 0,
        }));
    }
}

fn remap(event: &Event, offset: usize, len: usize) -> Event {
    let local = |frame: usize| frame.saturating_sub(offset).min(len - 1);
    match *event {
        Event::Note(mut e) => {
            e.frame = local(e.frame);
            Event::Note(e)
        }
        Event::Accurate(mut e) => {
            e.frame = local(e.frame);
            Event::Accurate(e)
        }
        Event::MidiCc(mut e) => {
            e.frame = local(e.frame);
            Event::MidiCc(e)
        }
        Event::Block(e) => Event::Block(e),
    }
}
