use std::ops::Range;

use crate::automation::CurveBank;
use crate::event::{OutputEvent, Transport};
use crate::param::ParamValue;
use crate::topology::{GlobalParamId, Topology};
use crate::voice::VoiceState;

use super::VoiceLane;

/// The capability interface every signal module implements: one
/// oscillator bank, one filter, one envelope, one mixdown. Engines are
/// resolved once per (module, slot) at activation and invoked through
/// this one signature every block; the pipeline owns all buffers.
pub trait ModuleEngine: Send {
    /// Called once at activation, before any block.
    fn reset(&mut self, _sample_rate: f32) {}

    fn process(&mut self, args: &mut ProcessArgs<'_>) -> ModuleReport;
}

/// What a module tells the pipeline after one invocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModuleReport {
    /// Per-voice stage only: this voice has gone silent and its slot
    /// can be recycled (e.g. the amplitude envelope reached zero).
    pub finished: bool,
}

impl ModuleReport {
    pub fn finished() -> Self {
        Self { finished: true }
    }
}

/// Everything one module invocation may touch. Mutable access is
/// strictly private (own output, own scratch, the event sink); all
/// other data is read-only by construction.
pub struct ProcessArgs<'a> {
    pub sample_rate: f32,
    pub frames: usize,
    pub transport: &'a Transport,
    /// This module instance's own parameters, already raw-converted.
    pub curves: ParamCurves<'a>,
    /// Outputs of the global-before stage (empty while that stage is
    /// itself running its first step).
    pub before: StageTaps<'a>,
    /// Outputs of earlier steps within the current stage - earlier
    /// per-voice modules of this same voice, or earlier global-after
    /// modules. Never the reverse: the ordering is fixed at topology
    /// declaration time.
    pub prior: StageTaps<'a>,
    /// Per-voice outputs of every lane; populated for the global-after
    /// stage only (this is where a mixdown reads from).
    pub voices: VoiceOutputs<'a>,
    /// The voice being rendered; `None` in the global stages.
    pub voice: Option<&'a VoiceState>,
    /// Host input audio for this block's span.
    pub audio_in: HostAudio<'a>,
    pub scratch: &'a mut [f32],
    pub output: &'a mut [f32],
    /// Sink for output-direction parameter events (meters etc).
    pub out_events: &'a mut Vec<OutputEvent>,
}

/// A module instance's view of the automation curves, addressed by the
/// instance's local parameter offset (declaration order, then slot).
#[derive(Clone, Copy)]
pub struct ParamCurves<'a> {
    bank: &'a CurveBank,
    topology: &'a Topology,
    start: usize,
    count: usize,
}

impl<'a> ParamCurves<'a> {
    pub(super) fn new(bank: &'a CurveBank, topology: &'a Topology, range: Range<usize>) -> Self {
        Self {
            bank,
            topology,
            start: range.start,
            count: range.len(),
        }
    }

    #[inline]
    fn id(&self, local: usize) -> GlobalParamId {
        debug_assert!(local < self.count);
        GlobalParamId((self.start + local) as u32)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn global_id(&self, local: usize) -> GlobalParamId {
        self.id(local)
    }

    /// The block scalar, in plain units.
    #[inline]
    pub fn scalar(&self, local: usize) -> ParamValue {
        self.bank.scalar(self.id(local))
    }

    /// The dense per-frame curve for an accurate-rate parameter, in
    /// plain units; `None` for block-rate parameters.
    #[inline]
    pub fn curve(&self, local: usize) -> Option<&'a [f32]> {
        self.bank.curve(self.topology, self.id(local))
    }
}

/// Read-only taps into the output rows of already-executed steps.
#[derive(Clone, Copy)]
pub struct StageTaps<'a> {
    rows: &'a [f32],
    count: usize,
    stride: usize,
    frames: usize,
}

impl<'a> StageTaps<'a> {
    pub(super) fn new(rows: &'a [f32], count: usize, stride: usize, frames: usize) -> Self {
        Self { rows, count, stride, frames }
    }

    pub(super) fn empty() -> Self {
        Self { rows: &[], count: 0, stride: 0, frames: 0 }
    }

    /// Number of readable steps.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The output row of an earlier step.
    #[inline]
    pub fn output(&self, step: usize) -> &'a [f32] {
        debug_assert!(step < self.count);
        let start = step * self.stride;
        &self.rows[start..start + self.frames]
    }
}

/// Read-only access to every voice lane's outputs, for the
/// global-after stage.
#[derive(Clone, Copy)]
pub struct VoiceOutputs<'a> {
    lanes: &'a [VoiceLane],
    states: &'a [VoiceState],
    step_count: usize,
    stride: usize,
    frames: usize,
}

impl<'a> VoiceOutputs<'a> {
    pub(super) fn new(
        lanes: &'a [VoiceLane],
        states: &'a [VoiceState],
        step_count: usize,
        stride: usize,
        frames: usize,
    ) -> Self {
        Self { lanes, states, step_count, stride, frames }
    }

    pub(super) fn empty() -> Self {
        Self { lanes: &[], states: &[], step_count: 0, stride: 0, frames: 0 }
    }

    /// Number of voice lanes (== pool size).
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Per-voice steps available per lane.
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn state(&self, lane: usize) -> &'a VoiceState {
        &self.states[lane]
    }

    /// The output row one per-voice step produced for one lane.
    /// Lanes whose voice rendered nothing this block hold stale data;
    /// check [`VoiceState::renders`] first.
    #[inline]
    pub fn output(&self, lane: usize, step: usize) -> &'a [f32] {
        debug_assert!(step < self.step_count);
        let start = step * self.stride;
        &self.lanes[lane].outputs[start..start + self.frames]
    }

    /// Lanes that rendered audio this block, with their states. This
    /// includes voices that went silent partway through the block;
    /// their frame windows say which part of the row is live.
    pub fn audible(&self) -> impl Iterator<Item = (usize, &'a VoiceState)> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.renders())
            .map(|(i, s)| (i, s))
    }
}

/// Host input audio, sliced to the current (sub-)block span.
#[derive(Clone, Copy)]
pub struct HostAudio<'a> {
    buffers: &'a [Vec<f32>],
    offset: usize,
    frames: usize,
}

impl<'a> HostAudio<'a> {
    pub(super) fn new(buffers: &'a [Vec<f32>], offset: usize, frames: usize) -> Self {
        Self { buffers, offset, frames }
    }

    pub fn channels(&self) -> usize {
        self.buffers.len()
    }

    /// One channel's samples for this span; `None` when the host sent
    /// no (or too little) input audio.
    pub fn channel(&self, ch: usize) -> Option<&'a [f32]> {
        let buf = self.buffers.get(ch)?;
        buf.get(self.offset..self.offset + self.frames)
    }
}

/// Creates module engines for the pipeline at activation time - the
/// "instrument design" seam. A closure `(module, slot) -> engine`
/// works directly.
pub trait ModuleFactory {
    fn create(
        &self,
        module: &crate::topology::ModuleDecl,
        slot: u16,
    ) -> Box<dyn ModuleEngine>;
}

impl<F> ModuleFactory for F
where
    F: Fn(&crate::topology::ModuleDecl, u16) -> Box<dyn ModuleEngine>,
{
    fn create(
        &self,
        module: &crate::topology::ModuleDecl,
        slot: u16,
    ) -> Box<dyn ModuleEngine> {
        self(module, slot)
    }
}
