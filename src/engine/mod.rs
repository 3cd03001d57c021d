// Purpose: the per-block execution core
// Event routing, curve building, voice dispatch, staged module
// execution, and the splice loop for oversized host blocks

pub mod mixdown;
pub mod module;
mod splice;

pub use mixdown::Mixdown;
pub use module::{
    HostAudio, ModuleEngine, ModuleFactory, ModuleReport, ParamCurves, ProcessArgs, StageTaps,
    VoiceOutputs,
};

use crate::automation::{AutomationState, CurveBank, RestoreWarning, StateSnapshot};
use crate::event::{AccurateEvent, Event, NoteAction, OutputEvent, Transport};
use crate::io::{AudioInput, AudioOutput, BlockInput, ControlMessage, MessageReceiver};
use crate::topology::{GlobalParamId, Stage, Topology};
use crate::voice::{VoicePool, VoiceState};
use crate::MAX_BLOCK_SIZE;

/*
Block Execution
===============

Every host block runs the same fixed sequence:

  drain control channel
  recycle finished voices, reset per-block voice offsets
  build automation curves from this block's events
  route note events into the voice pool
  run global-before modules        (sequential, in topology order)
  run per-voice modules            (per sounding voice; partitioned
                                    state, parallelizable)
  merge per-voice output events    (single-threaded, deterministic)
  run global-after modules         (mixdown and friends)
  copy the final output row to the host buffers

Each module invocation gets its own output row, private scratch, and
read-only taps on everything produced before it - never after it. The
ordering was fixed when the topology was declared, so there is nothing
to discover at run time.

All arenas are allocated at activation for the worst case (block bound
x voice count x step count) and sliced per block. The audio path does
not allocate; the documented exceptions are host output buffers that
arrive under-sized and output-event queues growing past their reserved
capacity, both of which degrade to an allocation instead of dropping
data.
*/

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Size of the polyphonic voice pool.
    pub max_voices: usize,
    /// Internal block bound; larger host blocks are spliced.
    pub max_block: usize,
    /// Output channel count (the final row is copied to each).
    pub channels: usize,
    /// Sub-voices spawned per note-on (unison).
    pub unison: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_voices: 16,
            max_block: MAX_BLOCK_SIZE,
            channels: 2,
            unison: 1,
        }
    }
}

/// One executable pipeline entry: a (module, slot) instance.
#[derive(Debug, Clone, Copy)]
struct Step {
    module_idx: usize,
    slot: u16,
}

/// Per-voice execution lane: engines plus fully partitioned buffers.
/// Nothing in a lane is shared with any other lane, which is what
/// makes the per-voice stage safe to run on worker threads.
pub(crate) struct VoiceLane {
    engines: Vec<Box<dyn ModuleEngine>>,
    pub(crate) outputs: Vec<f32>,
    scratch: Vec<f32>,
    events: Vec<OutputEvent>,
    finished: bool,
}

impl VoiceLane {
    #[cfg(test)]
    pub(crate) fn for_test(outputs: Vec<f32>) -> Self {
        Self {
            engines: Vec::new(),
            outputs,
            scratch: Vec::new(),
            events: Vec::new(),
            finished: false,
        }
    }
}

/// Buffers and resolved engines that exist only between activate and
/// deactivate.
struct ActiveBuffers {
    sample_rate: f32,
    bound: usize,
    curves: CurveBank,
    pool: VoicePool,
    before_steps: Vec<Step>,
    before_engines: Vec<Box<dyn ModuleEngine>>,
    before_outputs: Vec<f32>,
    before_scratch: Vec<f32>,
    voice_steps: Vec<Step>,
    lanes: Vec<VoiceLane>,
    after_steps: Vec<Step>,
    after_engines: Vec<Box<dyn ModuleEngine>>,
    after_outputs: Vec<f32>,
    after_scratch: Vec<f32>,
    out_events: Vec<OutputEvent>,
    event_scratch: Vec<Event>,
    /// Splice-loop scratch: accurate knots as (param, value, frame).
    knot_scratch: Vec<(GlobalParamId, f32, usize)>,
    /// Splice-loop scratch: per-parameter value entering the block.
    start_scratch: Vec<(GlobalParamId, f32)>,
    voice_snapshot: Vec<VoiceState>,
}

pub struct Engine {
    topology: Topology,
    config: EngineConfig,
    state: AutomationState,
    control: Option<Box<dyn MessageReceiver + Send>>,
    active: Option<ActiveBuffers>,
}

impl Engine {
    pub fn new(topology: Topology, config: EngineConfig) -> Self {
        let state = AutomationState::new(&topology);
        Self {
            topology,
            config,
            state,
            control: None,
            active: None,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The persistent automation state ("the patch"). Survives
    /// activate/deactivate cycles.
    pub fn automation(&self) -> &AutomationState {
        &self.state
    }

    pub fn automation_mut(&mut self) -> &mut AutomationState {
        &mut self.state
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot(&self.topology)
    }

    pub fn restore(&mut self, snapshot: &StateSnapshot) -> Vec<RestoreWarning> {
        self.state.restore(&self.topology, snapshot)
    }

    /// Attach the out-of-band control channel, drained at block start.
    pub fn set_control_channel(&mut self, rx: Box<dyn MessageReceiver + Send>) {
        self.control = Some(rx);
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Read-only view of the voice pool, for hosts and tests. Empty
    /// while deactivated.
    pub fn voices(&self) -> &[VoiceState] {
        self.active
            .as_ref()
            .map(|a| a.pool.voices())
            .unwrap_or(&[])
    }

    /// Output-direction parameter events produced by the last block.
    pub fn output_events(&self) -> &[OutputEvent] {
        self.active
            .as_ref()
            .map(|a| a.out_events.as_slice())
            .unwrap_or(&[])
    }

    /// Allocate every per-block buffer and resolve module engines.
    /// Called off the audio thread before processing starts.
    pub fn activate(&mut self, sample_rate: f32, factory: &dyn ModuleFactory) {
        let bound = self.config.max_block.max(2);
        let max_voices = self.config.max_voices.max(1);
        let modules = self.topology.modules();

        let collect_steps = |stage: Stage| -> Vec<Step> {
            self.topology
                .execution_order(stage)
                .flat_map(|module_idx| {
                    (0..modules[module_idx].slots).map(move |slot| Step { module_idx, slot })
                })
                .collect()
        };
        let make_engines = |steps: &[Step]| -> Vec<Box<dyn ModuleEngine>> {
            steps
                .iter()
                .map(|s| {
                    let mut engine = factory.create(&modules[s.module_idx], s.slot);
                    engine.reset(sample_rate);
                    engine
                })
                .collect()
        };

        let before_steps = collect_steps(Stage::GlobalBefore);
        let voice_steps = collect_steps(Stage::PerVoice);
        let after_steps = collect_steps(Stage::GlobalAfter);

        let before_engines = make_engines(&before_steps);
        let after_engines = make_engines(&after_steps);
        let lanes: Vec<VoiceLane> = (0..max_voices)
            .map(|_| VoiceLane {
                engines: make_engines(&voice_steps),
                outputs: vec![0.0; voice_steps.len() * bound],
                scratch: vec![0.0; voice_steps.len() * bound],
                events: Vec::with_capacity(16),
                finished: false,
            })
            .collect();

        log::info!(
            "engine activated: {} Hz, block bound {}, {} voices, steps {}/{}/{}",
            sample_rate,
            bound,
            max_voices,
            before_steps.len(),
            voice_steps.len(),
            after_steps.len()
        );

        self.active = Some(ActiveBuffers {
            sample_rate,
            bound,
            curves: CurveBank::new(&self.topology, bound),
            pool: VoicePool::new(max_voices),
            before_outputs: vec![0.0; before_steps.len() * bound],
            before_scratch: vec![0.0; before_steps.len() * bound],
            after_outputs: vec![0.0; after_steps.len() * bound],
            after_scratch: vec![0.0; after_steps.len() * bound],
            before_steps,
            before_engines,
            voice_steps,
            lanes,
            after_steps,
            after_engines,
            out_events: Vec::with_capacity(self.topology.param_count().max(32)),
            event_scratch: Vec::with_capacity(256),
            knot_scratch: Vec::with_capacity(64),
            start_scratch: Vec::with_capacity(16),
            voice_snapshot: Vec::with_capacity(max_voices),
        });
    }

    /// Release everything activate allocated. The automation state
    /// stays; it is the patch, not a per-session buffer.
    pub fn deactivate(&mut self) {
        if self.active.take().is_some() {
            log::info!("engine deactivated");
        }
    }

    /// Process one host block. Oversized blocks are spliced into
    /// bounded sub-blocks with per-sample results preserved.
    pub fn process_block(&mut self, input: &BlockInput, output: &mut AudioOutput) {
        self.prepare_output(output, input.frames);
        let Some(bound) = self.active.as_ref().map(|a| a.bound) else {
            return;
        };
        if input.frames == 0 {
            return;
        }

        self.drain_control();
        if let Some(active) = self.active.as_mut() {
            active.out_events.clear();
        }

        if input.frames <= bound {
            self.process_span(
                0,
                input.frames,
                &input.transport,
                &input.events,
                &input.audio,
                output,
            );
        } else {
            self.process_spliced(input, output);
        }

        self.dedupe_output_events();
    }

    /// Ensure host output buffers cover the block, zero-filled. A host
    /// that pre-sizes them keeps this allocation-free.
    fn prepare_output(&self, output: &mut AudioOutput, frames: usize) {
        while output.buffers.len() < self.config.channels {
            output.buffers.push(vec![0.0; frames]);
        }
        for buf in &mut output.buffers {
            if buf.len() < frames {
                buf.resize(frames, 0.0);
            }
            buf[..frames].fill(0.0);
        }
    }

    fn drain_control(&mut self) {
        let Some(rx) = self.control.as_mut() else {
            return;
        };
        let Some(active) = self.active.as_mut() else {
            return;
        };
        while let Some(msg) = rx.pop() {
            match msg {
                ControlMessage::AllNotesOff => active.pool.all_notes_off(0),
                ControlMessage::Panic => active.pool.panic(),
            }
        }
    }

    /// Run one bounded span of frames: the whole host block, or one
    /// splice sub-block. `offset` locates the span in the host
    /// buffers; all event frames are already span-relative.
    fn process_span(
        &mut self,
        offset: usize,
        frames: usize,
        transport: &Transport,
        events: &[Event],
        audio: &AudioInput,
        output: &mut AudioOutput,
    ) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let topology = &self.topology;
        let bound = active.bound;

        active.pool.begin_block(frames);
        active.curves.begin_block(topology, &self.state, frames);

        // Block events apply first regardless of list position: they
        // set the baseline the accurate ramps climb from, and a ramp
        // already written must not be wiped by a later block event.
        for event in events {
            if let Event::Block(e) = event {
                active.curves.apply_block_event(topology, &mut self.state, e);
            }
        }
        for event in events {
            match event {
                Event::Note(note) => match note.action {
                    NoteAction::On => {
                        let count = self.config.unison.max(1);
                        for sub in 0..count {
                            active
                                .pool
                                .note_on(note.note, note.velocity, note.frame, sub, count);
                        }
                    }
                    NoteAction::Off => active.pool.note_off(note.note, note.frame),
                    NoteAction::Choke => active.pool.choke(note.note, note.frame),
                },
                Event::Block(_) => {}
                Event::Accurate(e) => {
                    active
                        .curves
                        .apply_accurate_event(topology, &mut self.state, e)
                }
                Event::MidiCc(e) => {
                    // Unmapped controllers are silently ignored.
                    if let Some(param) = topology.controller_target(e.controller) {
                        let lowered = AccurateEvent {
                            param,
                            normalized: e.normalized,
                            frame: e.frame,
                        };
                        active
                            .curves
                            .apply_accurate_event(topology, &mut self.state, &lowered);
                    }
                }
            }
        }
        active.curves.finish_block(topology);

        // Global-before stage.
        for i in 0..active.before_steps.len() {
            let step = active.before_steps[i];
            let range = topology.map().instance_range(step.module_idx, step.slot);
            let (done, rest) = active.before_outputs.split_at_mut(i * bound);
            let mut args = ProcessArgs {
                sample_rate: active.sample_rate,
                frames,
                transport,
                curves: ParamCurves::new(&active.curves, topology, range),
                before: StageTaps::empty(),
                prior: StageTaps::new(done, i, bound, frames),
                voices: VoiceOutputs::empty(),
                voice: None,
                audio_in: HostAudio::new(&audio.buffers, offset, frames),
                scratch: &mut active.before_scratch[i * bound..i * bound + frames],
                output: &mut rest[..frames],
                out_events: &mut active.out_events,
            };
            active.before_engines[i].process(&mut args);
        }

        // Per-voice stage over every sounding lane. Lanes are fully
        // partitioned; everything shared is read-only from here on.
        active.voice_snapshot.clear();
        active.voice_snapshot.extend_from_slice(active.pool.voices());
        let shared = LaneShared {
            topology,
            curves: &active.curves,
            steps: &active.voice_steps,
            before_rows: &active.before_outputs,
            before_count: active.before_steps.len(),
            bound,
            frames,
            sample_rate: active.sample_rate,
            transport,
            audio: &audio.buffers,
            offset,
        };

        #[cfg(not(feature = "parallel"))]
        for (lane, voice) in active.lanes.iter_mut().zip(&active.voice_snapshot) {
            if voice.renders() {
                run_lane(&shared, lane, voice);
            }
        }

        #[cfg(feature = "parallel")]
        std::thread::scope(|scope| {
            for (lane, voice) in active.lanes.iter_mut().zip(&active.voice_snapshot) {
                if voice.renders() {
                    let shared = &shared;
                    scope.spawn(move || run_lane(shared, lane, voice));
                }
            }
            // The scope's implicit join is the barrier: nothing below
            // runs until every per-voice task has completed.
        });

        for slot in 0..active.lanes.len() {
            if active.voice_snapshot[slot].is_sounding() && active.lanes[slot].finished {
                active.pool.finish(slot);
            }
        }
        // Merge per-lane output events in lane order, single-threaded,
        // so the result does not depend on worker scheduling.
        for lane in &mut active.lanes {
            active.out_events.append(&mut lane.events);
        }

        // Global-after stage, with read access to all voice outputs.
        for i in 0..active.after_steps.len() {
            let step = active.after_steps[i];
            let range = topology.map().instance_range(step.module_idx, step.slot);
            let (done, rest) = active.after_outputs.split_at_mut(i * bound);
            let mut args = ProcessArgs {
                sample_rate: active.sample_rate,
                frames,
                transport,
                curves: ParamCurves::new(&active.curves, topology, range),
                before: StageTaps::new(
                    &active.before_outputs,
                    active.before_steps.len(),
                    bound,
                    frames,
                ),
                prior: StageTaps::new(done, i, bound, frames),
                voices: VoiceOutputs::new(
                    &active.lanes,
                    active.pool.voices(),
                    active.voice_steps.len(),
                    bound,
                    frames,
                ),
                voice: None,
                audio_in: HostAudio::new(&audio.buffers, offset, frames),
                scratch: &mut active.after_scratch[i * bound..i * bound + frames],
                output: &mut rest[..frames],
                out_events: &mut active.out_events,
            };
            active.after_engines[i].process(&mut args);
        }

        // The final global-after row is the block's audio. With no
        // global-after stage declared, fall back to summing the last
        // per-voice step across sounding lanes.
        let after_count = active.after_steps.len();
        let vstep_count = active.voice_steps.len();
        for buf in &mut output.buffers {
            let region = &mut buf[offset..offset + frames];
            if after_count > 0 {
                let start = (after_count - 1) * bound;
                region.copy_from_slice(&active.after_outputs[start..start + frames]);
            } else if vstep_count > 0 {
                region.fill(0.0);
                for (slot, voice) in active.voice_snapshot.iter().enumerate() {
                    if !voice.renders() {
                        continue;
                    }
                    let start = (vstep_count - 1) * bound;
                    let row = &active.lanes[slot].outputs[start..start + frames];
                    for (o, v) in region.iter_mut().zip(row) {
                        *o += v;
                    }
                }
            } else {
                region.fill(0.0);
            }
        }
    }

    /// Output events keep their arrival order, but only the last value
    /// reported for each parameter survives. The quadratic scan is
    /// fine here: meters report a handful of events per block.
    fn dedupe_output_events(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let events = &mut active.out_events;
        let mut i = 0;
        while i < events.len() {
            let param = events[i].param;
            if events[i + 1..].iter().any(|e| e.param == param) {
                events.remove(i);
            } else {
                i += 1;
            }
        }
    }
}

/// Shared read-only inputs for one lane's step loop.
struct LaneShared<'a> {
    topology: &'a Topology,
    curves: &'a CurveBank,
    steps: &'a [Step],
    before_rows: &'a [f32],
    before_count: usize,
    bound: usize,
    frames: usize,
    sample_rate: f32,
    transport: &'a Transport,
    audio: &'a [Vec<f32>],
    offset: usize,
}

/// Run every per-voice step for one lane. Called sequentially or from
/// a scoped worker thread; either way the lane is exclusively ours and
/// everything in `shared` is immutable.
fn run_lane(shared: &LaneShared<'_>, lane: &mut VoiceLane, voice: &VoiceState) {
    lane.finished = false;
    lane.events.clear();
    let bound = shared.bound;
    let frames = shared.frames;

    for i in 0..shared.steps.len() {
        let step = shared.steps[i];
        let range = shared
            .topology
            .map()
            .instance_range(step.module_idx, step.slot);
        let (done, rest) = lane.outputs.split_at_mut(i * bound);
        let mut args = ProcessArgs {
            sample_rate: shared.sample_rate,
            frames,
            transport: shared.transport,
            curves: ParamCurves::new(shared.curves, shared.topology, range),
            before: StageTaps::new(shared.before_rows, shared.before_count, bound, frames),
            prior: StageTaps::new(done, i, bound, frames),
            voices: VoiceOutputs::empty(),
            voice: Some(voice),
            audio_in: HostAudio::new(shared.audio, shared.offset, frames),
            scratch: &mut lane.scratch[i * bound..i * bound + frames],
            output: &mut rest[..frames],
            out_events: &mut lane.events,
        };
        let report = lane.engines[i].process(&mut args);
        if report.finished {
            lane.finished = true;
        }
    }
}
