// Purpose: host-facing event shapes for one processing block
// All frame offsets are relative to the current block's first frame

use crate::topology::GlobalParamId;

/// Identifies one sounding note across its lifetime. The handle is the
/// host's note id (or a synthesized one); key and channel ride along so
/// duplicate pitches on separate voices still route unambiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteId {
    pub handle: i32,
    pub key: u8,
    pub channel: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteAction {
    On,
    Off,
    /// Immediate cut, bypassing the release stage.
    Choke,
}

#[derive(Debug, Clone, Copy)]
pub struct NoteEvent {
    pub action: NoteAction,
    pub frame: usize,
    pub note: NoteId,
    /// 0.0 ..= 1.0
    pub velocity: f32,
}

/// A block-rate parameter change: applies from the start of the block
/// and holds for the rest of it. At most one per parameter per block is
/// honored; later duplicates are discarded.
#[derive(Debug, Clone, Copy)]
pub struct BlockEvent {
    pub param: GlobalParamId,
    pub normalized: f32,
}

/// One knot of a piecewise-linear sample-accurate automation curve.
/// The curve ramps from its previous value up to `normalized` at
/// `frame`, then holds until the next knot (or block end).
#[derive(Debug, Clone, Copy)]
pub struct AccurateEvent {
    pub param: GlobalParamId,
    pub normalized: f32,
    pub frame: usize,
}

/// A MIDI continuous controller change, already scaled to [0, 1].
/// Routed through the topology's controller map; unmapped controllers
/// are ignored.
#[derive(Debug, Clone, Copy)]
pub struct MidiCcEvent {
    pub controller: u8,
    pub normalized: f32,
    pub frame: usize,
}

/// An engine-computed value for a read-only (output-direction)
/// parameter, reported back to the host after the block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputEvent {
    pub param: GlobalParamId,
    pub normalized: f32,
}

/// One entry of the ordered per-block event list the host hands us.
#[derive(Debug, Clone, Copy)]
pub enum Event {
    Note(NoteEvent),
    Block(BlockEvent),
    Accurate(AccurateEvent),
    MidiCc(MidiCcEvent),
}

impl Event {
    /// Frame offset the event applies at. Block events apply from the
    /// start of the block.
    pub fn frame(&self) -> usize {
        match self {
            Event::Note(e) => e.frame,
            Event::Block(_) => 0,
            Event::Accurate(e) => e.frame,
            Event::MidiCc(e) => e.frame,
        }
    }
}

/// Informational transport data for one block.
#[derive(Debug, Clone, Copy)]
pub struct Transport {
    pub bpm: f64,
    /// Running frame count since the stream started.
    pub stream_time: u64,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            stream_time: 0,
        }
    }
}
