//! End-to-end block-processing scenarios: note lifecycle, automation
//! curves, splice equivalence, and output-event reporting, driven
//! through the public engine API with small deterministic modules.

use strata_dsp::engine::{
    Engine, EngineConfig, Mixdown, ModuleEngine, ModuleReport, ProcessArgs,
};
use strata_dsp::event::{
    AccurateEvent, BlockEvent, Event, MidiCcEvent, NoteAction, NoteEvent, NoteId, OutputEvent,
    Transport,
};
use strata_dsp::io::{AudioOutput, BlockInput};
use strata_dsp::param::domain::ParamDomain;
use strata_dsp::param::ParamValue;
use strata_dsp::topology::{
    GlobalParamId, ModuleDecl, ModuleKindId, ParamDecl, ParamKey, ParamKindId, Stage, Topology,
    TopologySpec,
};
use strata_dsp::voice::VoiceStage;

const OSC: u32 = 1;
const MIX: u32 = 2;
const METER: u32 = 3;

/// Frames the test oscillator takes to fade out after release.
const RELEASE_FRAMES: u32 = 32;

/// Deterministic per-voice source: a running counter scaled by the
/// gain curve and velocity, with a linear fade after release. Counter
/// state carries across blocks, which is exactly what the splice
/// equivalence tests need to exercise.
struct CountOsc {
    counter: f32,
    released: u32,
}

impl CountOsc {
    fn new() -> Self {
        Self { counter: 0.0, released: 0 }
    }
}

impl ModuleEngine for CountOsc {
    fn reset(&mut self, _sample_rate: f32) {
        self.counter = 0.0;
        self.released = 0;
    }

    fn process(&mut self, args: &mut ProcessArgs<'_>) -> ModuleReport {
        let voice = *args.voice.expect("per-voice module");
        if voice.triggered {
            self.counter = 0.0;
            self.released = 0;
        }
        let gain = args.curves.curve(0).expect("gain is accurate-rate");

        args.output.fill(0.0);
        let lo = voice.start_frame.min(args.frames);
        let hi = voice.end_frame.min(args.frames);
        let mut finished = false;
        for i in lo..hi {
            self.counter += 1.0;
            let mut fade = 1.0;
            if i >= voice.release_frame {
                self.released += 1;
                fade = 1.0 - self.released as f32 / RELEASE_FRAMES as f32;
                if fade <= 0.0 {
                    fade = 0.0;
                    finished = true;
                }
            }
            args.output[i] = self.counter * 1e-4 * gain[i] * voice.velocity * fade;
        }

        ModuleReport { finished }
    }
}

/// Pass-through peak meter: copies its input onward and reports the
/// peak through an output-direction parameter when there is signal.
struct Meter;

impl ModuleEngine for Meter {
    fn process(&mut self, args: &mut ProcessArgs<'_>) -> ModuleReport {
        if args.prior.is_empty() {
            args.output.fill(0.0);
            return ModuleReport::default();
        }
        let src = args.prior.output(args.prior.len() - 1);
        args.output.copy_from_slice(src);

        let peak = src.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        if peak > 1e-3 {
            args.out_events.push(OutputEvent {
                param: args.curves.global_id(0),
                normalized: peak.min(1.0),
            });
        }
        ModuleReport::default()
    }
}

fn topology() -> Topology {
    TopologySpec::new()
        .module(
            ModuleDecl::new(OSC, "osc", Stage::PerVoice).param(
                ParamDecl::new(
                    0,
                    "gain",
                    ParamDomain::linear(0.0, 1.0).with_default(ParamValue::Real(1.0)),
                )
                .accurate(),
            ),
        )
        .module(
            ModuleDecl::new(MIX, "mix", Stage::GlobalAfter).param(ParamDecl::new(
                0,
                "level",
                ParamDomain::linear(0.0, 1.0).with_default(ParamValue::Real(1.0)),
            )),
        )
        .module(
            ModuleDecl::new(METER, "meter", Stage::GlobalAfter)
                .param(ParamDecl::new(0, "peak", ParamDomain::linear(0.0, 1.0)).output()),
        )
        .controller(74, gain_key())
        .build()
        .expect("valid test topology")
}

fn gain_key() -> ParamKey {
    ParamKey {
        module: ModuleKindId(OSC),
        module_slot: 0,
        param: ParamKindId(0),
        param_slot: 0,
    }
}

fn factory(decl: &ModuleDecl, _slot: u16) -> Box<dyn ModuleEngine> {
    match decl.id.0 {
        OSC => Box::new(CountOsc::new()),
        MIX => Box::new(Mixdown::new(0)),
        METER => Box::new(Meter),
        other => unreachable!("unknown module kind {}", other),
    }
}

fn engine(max_voices: usize, max_block: usize) -> Engine {
    let mut engine = Engine::new(
        topology(),
        EngineConfig {
            max_voices,
            max_block,
            channels: 1,
            unison: 1,
        },
    );
    engine.activate(48_000.0, &factory);
    engine
}

fn gain_id(engine: &Engine) -> GlobalParamId {
    engine
        .topology()
        .map()
        .global_index(&gain_key())
        .expect("gain exists")
}

fn note_on(frame: usize, handle: i32, key: u8) -> Event {
    Event::Note(NoteEvent {
        action: NoteAction::On,
        frame,
        note: NoteId { handle, key, channel: 0 },
        velocity: 1.0,
    })
}

fn note_off(frame: usize, handle: i32, key: u8) -> Event {
    Event::Note(NoteEvent {
        action: NoteAction::Off,
        frame,
        note: NoteId { handle, key, channel: 0 },
        velocity: 0.0,
    })
}

fn block(frames: usize, events: Vec<Event>) -> BlockInput {
    BlockInput {
        frames,
        transport: Transport::default(),
        audio: Default::default(),
        events,
    }
}

#[test]
fn end_to_end_two_voice_lifecycle() {
    let mut engine = engine(2, 128);
    let mut output = AudioOutput::default();

    let input = block(
        64,
        vec![
            note_on(0, 1, 60),
            note_on(10, 2, 64),
            note_off(50, 1, 60),
        ],
    );
    engine.process_block(&input, &mut output);

    let voices = engine.voices();
    assert_eq!(voices.len(), 2, "no third voice may be allocated");

    assert_eq!(voices[0].stage, VoiceStage::Releasing);
    assert_eq!(voices[0].start_frame, 0);
    assert_eq!(voices[0].release_frame, 50);
    assert_eq!(voices[0].note.key, 60);

    assert_eq!(voices[1].stage, VoiceStage::Active);
    assert_eq!(voices[1].start_frame, 10);
    assert_eq!(voices[1].release_frame, 64, "voice 1 is held to block end");

    let samples = &output.buffers[0];
    assert_eq!(samples.len(), 64);
    assert!(samples[..10].iter().all(|&s| s != 0.0), "voice 0 sounds alone first");
    assert!(samples[11..50].iter().all(|&s| s != 0.0));
}

#[test]
fn voice_stealing_with_pool_of_one() {
    let mut engine = engine(1, 128);
    let mut output = AudioOutput::default();

    let input = block(64, vec![note_on(0, 1, 60), note_on(10, 2, 72)]);
    engine.process_block(&input, &mut output);

    let voices = engine.voices();
    assert_eq!(voices.len(), 1);
    assert_eq!(voices[0].note.key, 72, "new note must steal the only voice");
    assert_eq!(voices[0].note.handle, 2);

    // Note-off for the stolen note routes by id and finds nothing.
    let input = block(64, vec![note_off(5, 1, 60)]);
    engine.process_block(&input, &mut output);
    assert_eq!(engine.voices()[0].stage, VoiceStage::Active);
}

#[test]
fn block_event_dedup_first_wins() {
    let mut engine = engine(1, 128);
    let mut output = AudioOutput::default();
    let gain = gain_id(&engine);

    let input = block(
        32,
        vec![
            Event::Block(BlockEvent { param: gain, normalized: 0.25 }),
            Event::Block(BlockEvent { param: gain, normalized: 0.75 }),
        ],
    );
    engine.process_block(&input, &mut output);

    let stored = engine.automation().value(gain).real();
    assert!((stored - 0.25).abs() < 1e-6, "second block event must be discarded");
}

#[test]
fn midi_cc_routes_through_controller_map() {
    let mut engine = engine(1, 128);
    let mut output = AudioOutput::default();
    let gain = gain_id(&engine);

    let input = block(
        32,
        vec![
            Event::MidiCc(MidiCcEvent { controller: 74, normalized: 0.5, frame: 0 }),
            // Unmapped controller: ignored.
            Event::MidiCc(MidiCcEvent { controller: 11, normalized: 0.9, frame: 0 }),
        ],
    );
    engine.process_block(&input, &mut output);

    assert!((engine.automation().value(gain).real() - 0.5).abs() < 1e-6);
}

#[test]
fn splice_equivalence_300_frames() {
    // Same topology, same modules, same events: once through a bound
    // large enough for a single call, once spliced into sub-blocks of
    // 128 and 172 frames. The automation ramp settles before the first
    // boundary, so every sub-block repeats the exact same arithmetic
    // and the outputs match bit for bit.
    let mut whole = engine(2, 512);
    let mut spliced = engine(2, 256);

    let gain = gain_id(&whole);
    let events = vec![
        note_on(0, 1, 60),
        note_on(200, 2, 64),
        Event::Accurate(AccurateEvent { param: gain, normalized: 0.5, frame: 0 }),
        Event::Accurate(AccurateEvent { param: gain, normalized: 1.0, frame: 10 }),
        note_off(280, 1, 60),
    ];

    let mut out_whole = AudioOutput::default();
    let mut out_spliced = AudioOutput::default();
    whole.process_block(&block(300, events.clone()), &mut out_whole);
    spliced.process_block(&block(300, events), &mut out_spliced);

    assert_eq!(
        out_whole.buffers, out_spliced.buffers,
        "spliced output must be bit-identical to the whole-block call"
    );
    assert_eq!(
        whole.snapshot().entries,
        spliced.snapshot().entries,
        "final automation state must match"
    );
}

#[test]
fn splice_carries_ramps_across_sub_block_boundaries() {
    // The ramp's closing knot lands in the second sub-block, so the
    // splice loop has to put an interpolated knot on the first
    // sub-block's final frame; holding flat there would leave the
    // whole climb to the later piece.
    let mut whole = engine(1, 512);
    let mut spliced = engine(1, 256); // 300 frames split 128 + 172

    let gain = gain_id(&whole);
    let events = vec![
        note_on(0, 1, 60),
        Event::Accurate(AccurateEvent { param: gain, normalized: 0.0, frame: 0 }),
        Event::Accurate(AccurateEvent { param: gain, normalized: 1.0, frame: 250 }),
    ];

    let mut out_whole = AudioOutput::default();
    let mut out_spliced = AudioOutput::default();
    whole.process_block(&block(300, events.clone()), &mut out_whole);
    spliced.process_block(&block(300, events), &mut out_spliced);

    // The first sub-block must render its share of the climb.
    assert!(
        out_spliced.buffers[0][100] > 0.0,
        "gain must already be ramping inside the first sub-block"
    );
    for (i, (w, s)) in out_whole.buffers[0]
        .iter()
        .zip(&out_spliced.buffers[0])
        .enumerate()
    {
        assert!(
            (w - s).abs() < 1e-5,
            "frame {}: whole {} vs spliced {}",
            i,
            w,
            s
        );
    }
    assert_eq!(
        whole.snapshot().entries,
        spliced.snapshot().entries,
        "final automation state must match"
    );
}

#[test]
fn splice_accumulates_output_events_across_sub_blocks() {
    // A short note that dies inside the first sub-block: only that
    // sub-block has signal, so only it reports a peak. The event must
    // survive to the end of the spliced call.
    let mut engine = engine(1, 256); // 300 frames split 128 + 172
    let mut output = AudioOutput::default();

    let input = block(
        300,
        vec![
            note_on(0, 1, 60),
            note_off(40, 1, 60), // fade ends at frame 72, well inside sub-block one
        ],
    );
    engine.process_block(&input, &mut output);

    let events = engine.output_events();
    assert_eq!(
        events.len(),
        1,
        "the first sub-block's meter event must not be dropped"
    );
    assert!(events[0].normalized > 0.0);
}

#[test]
fn output_events_dedupe_keeps_last_value_per_param() {
    // Signal across both sub-blocks: the meter reports twice, and only
    // the later value survives.
    let mut engine = engine(1, 256); // 300 frames split 128 + 172
    let mut output = AudioOutput::default();

    let input = block(300, vec![note_on(0, 1, 60)]);
    engine.process_block(&input, &mut output);

    let events = engine.output_events();
    assert_eq!(events.len(), 1, "duplicate meter reports must collapse");
    // The counter keeps rising, so the later sub-block's peak is the
    // larger one; last-wins must have kept it.
    let peak_first_sub = output.buffers[0][..128]
        .iter()
        .fold(0.0f32, |a, v| a.max(v.abs()));
    assert!(events[0].normalized > peak_first_sub);
}

#[test]
fn voice_finishes_after_release_fade_and_recycles() {
    let mut engine = engine(1, 128);
    let mut output = AudioOutput::default();

    let input = block(
        128,
        vec![note_on(0, 1, 60), note_off(20, 1, 60)],
    );
    engine.process_block(&input, &mut output);
    // Fade completed inside the block: the voice is parked finishing.
    assert_eq!(engine.voices()[0].stage, VoiceStage::Finishing);

    // Next block recycles it.
    engine.process_block(&block(64, vec![]), &mut output);
    assert_eq!(engine.voices()[0].stage, VoiceStage::Unused);
}

#[test]
fn choke_cuts_immediately_without_fade() {
    let mut engine = engine(1, 128);
    let mut output = AudioOutput::default();

    let input = block(
        64,
        vec![
            note_on(0, 1, 60),
            Event::Note(NoteEvent {
                action: NoteAction::Choke,
                frame: 30,
                note: NoteId { handle: 1, key: 60, channel: 0 },
                velocity: 0.0,
            }),
        ],
    );
    engine.process_block(&input, &mut output);

    assert_eq!(engine.voices()[0].stage, VoiceStage::Finishing);
    assert!(
        output.buffers[0][..30].iter().all(|&s| s != 0.0),
        "frames before the choke still sound"
    );
    assert!(
        output.buffers[0][30..].iter().all(|&s| s == 0.0),
        "no signal may leak past the choke frame"
    );
}

#[test]
fn choke_stamped_before_the_note_on_stays_silent() {
    // Out-of-order host data: the note starts at frame 50 but the
    // choke carries frame 30. The voice's window collapses to empty
    // and the block renders without touching a reversed slice.
    let mut engine = engine(1, 128);
    let mut output = AudioOutput::default();

    let input = block(
        64,
        vec![
            note_on(50, 1, 60),
            Event::Note(NoteEvent {
                action: NoteAction::Choke,
                frame: 30,
                note: NoteId { handle: 1, key: 60, channel: 0 },
                velocity: 0.0,
            }),
        ],
    );
    engine.process_block(&input, &mut output);

    assert_eq!(engine.voices()[0].stage, VoiceStage::Finishing);
    assert!(
        output.buffers[0].iter().all(|&s| s == 0.0),
        "a note choked before it starts contributes nothing"
    );
}

#[test]
fn block_events_apply_before_accurate_ramps() {
    // List order is accurate first, block second; application order is
    // block first. The block event sets the baseline and the ramp
    // climbs from it, instead of the block event wiping the ramp.
    let mut engine = engine(1, 128);
    let gain = gain_id(&engine);
    let mut output = AudioOutput::default();

    let input = block(
        64,
        vec![
            note_on(0, 1, 60),
            Event::Accurate(AccurateEvent { param: gain, normalized: 0.5, frame: 63 }),
            Event::Block(BlockEvent { param: gain, normalized: 0.0 }),
        ],
    );
    engine.process_block(&input, &mut output);

    let samples = &output.buffers[0];
    assert_eq!(samples[0], 0.0, "ramp starts at the block event's zero");
    assert!(
        samples[63] != 0.0,
        "the ramp must survive a later-listed block event"
    );
    assert!((engine.automation().value(gain).real() - 0.5).abs() < 1e-6);
}

#[test]
fn deactivate_keeps_the_patch() {
    let mut engine = engine(1, 128);
    let gain = gain_id(&engine);
    let mut output = AudioOutput::default();

    let input = block(
        32,
        vec![Event::Block(BlockEvent { param: gain, normalized: 0.3 })],
    );
    engine.process_block(&input, &mut output);
    engine.deactivate();
    assert!(!engine.is_active());

    // State survived; processing while inactive yields silence.
    assert!((engine.automation().value(gain).real() - 0.3).abs() < 1e-6);
    let mut out2 = AudioOutput::default();
    engine.process_block(&block(16, vec![]), &mut out2);
    assert!(out2.buffers.iter().all(|b| b.iter().all(|&s| s == 0.0)));

    engine.activate(48_000.0, &factory);
    assert!((engine.automation().value(gain).real() - 0.3).abs() < 1e-6);
}

#[test]
fn oversized_block_with_odd_remainder_renders_every_frame() {
    // 313 frames against a bound of 100: sub-blocks of 50 with the
    // remainder folded into the final one.
    let mut engine = engine(1, 100);
    let mut output = AudioOutput::default();

    let input = block(313, vec![note_on(0, 1, 60)]);
    engine.process_block(&input, &mut output);

    assert_eq!(output.buffers[0].len(), 313);
    assert!(output.buffers[0].iter().all(|&s| s != 0.0));
}
