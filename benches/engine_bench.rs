//! Benchmarks for the block-processing core.
//!
//! Run with: cargo bench
//!
//! These measure whole-block cost through the public engine API to
//! ensure processing completes well within real-time audio deadlines.
//!
//! Reference timing at 48kHz sample rate:
//!   - 64 samples  = 1.33ms deadline
//!   - 128 samples = 2.67ms deadline
//!   - 256 samples = 5.33ms deadline
//!   - 512 samples = 10.67ms deadline

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use strata_dsp::engine::{
    Engine, EngineConfig, Mixdown, ModuleEngine, ModuleReport, ProcessArgs,
};
use strata_dsp::event::{AccurateEvent, Event, NoteAction, NoteEvent, NoteId, Transport};
use strata_dsp::io::{AudioOutput, BlockInput};
use strata_dsp::param::domain::ParamDomain;
use strata_dsp::param::ParamValue;
use strata_dsp::topology::{GlobalParamId, ModuleDecl, ParamDecl, Stage, Topology, TopologySpec};

/// Common buffer sizes used in audio applications.
const BLOCK_SIZES: &[usize] = &[64, 128, 256, 512];

/// Naive sawtooth with a sample-accurate gain parameter; enough work
/// per frame to make the per-voice stage cost visible.
struct Saw {
    phase: f32,
    step: f32,
}

impl ModuleEngine for Saw {
    fn reset(&mut self, sample_rate: f32) {
        self.phase = 0.0;
        self.step = 110.0 / sample_rate;
    }

    fn process(&mut self, args: &mut ProcessArgs<'_>) -> ModuleReport {
        let voice = *args.voice.expect("per-voice module");
        let gain = args.curves.curve(0).expect("accurate gain");
        args.output.fill(0.0);
        let lo = voice.start_frame.min(args.frames);
        let hi = voice.end_frame.min(args.frames);
        for i in lo..hi {
            self.phase += self.step;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
            args.output[i] = (self.phase * 2.0 - 1.0) * gain[i] * voice.velocity;
        }
        ModuleReport::default()
    }
}

fn topology() -> Topology {
    TopologySpec::new()
        .module(
            ModuleDecl::new(1, "saw", Stage::PerVoice).param(
                ParamDecl::new(
                    0,
                    "gain",
                    ParamDomain::linear(0.0, 1.0).with_default(ParamValue::Real(0.8)),
                )
                .accurate(),
            ),
        )
        .module(
            ModuleDecl::new(2, "mix", Stage::GlobalAfter).param(ParamDecl::new(
                0,
                "level",
                ParamDomain::linear(0.0, 1.0).with_default(ParamValue::Real(1.0)),
            )),
        )
        .build()
        .expect("valid bench topology")
}

fn build_engine(max_voices: usize, max_block: usize) -> Engine {
    let mut engine = Engine::new(
        topology(),
        EngineConfig {
            max_voices,
            max_block,
            channels: 2,
            unison: 1,
        },
    );
    engine.activate(48_000.0, &|decl: &ModuleDecl, _slot: u16| -> Box<dyn ModuleEngine> {
        match decl.id.0 {
            1 => Box::new(Saw { phase: 0.0, step: 0.0 }),
            _ => Box::new(Mixdown::new(0)),
        }
    });
    engine
}

fn note_on(frame: usize, handle: i32, key: u8) -> Event {
    Event::Note(NoteEvent {
        action: NoteAction::On,
        frame,
        note: NoteId { handle, key, channel: 0 },
        velocity: 0.9,
    })
}

fn bench_process_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/process_block");

    for &size in BLOCK_SIZES {
        // Eight held voices, a typical sustained chord.
        let mut engine = build_engine(16, 512);
        let mut output = AudioOutput::default();
        let warmup = BlockInput {
            frames: size,
            transport: Transport::default(),
            audio: Default::default(),
            events: (0..8).map(|i| note_on(0, i, 48 + i as u8 * 3)).collect(),
        };
        engine.process_block(&warmup, &mut output);

        let steady = BlockInput {
            frames: size,
            transport: Transport::default(),
            audio: Default::default(),
            events: Vec::new(),
        };
        group.bench_with_input(BenchmarkId::new("8_voices", size), &size, |b, _| {
            b.iter(|| {
                engine.process_block(black_box(&steady), black_box(&mut output));
            })
        });
    }

    group.finish();
}

fn bench_automation(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/automation");

    for &size in BLOCK_SIZES {
        let mut engine = build_engine(16, 512);
        let mut output = AudioOutput::default();
        let warmup = BlockInput {
            frames: size,
            transport: Transport::default(),
            audio: Default::default(),
            events: vec![note_on(0, 1, 60)],
        };
        engine.process_block(&warmup, &mut output);

        // A dense automation gesture: a knot every 8 frames.
        let gain = GlobalParamId(0);
        let events: Vec<Event> = (0..size)
            .step_by(8)
            .map(|frame| {
                Event::Accurate(AccurateEvent {
                    param: gain,
                    normalized: (frame % 64) as f32 / 64.0,
                    frame,
                })
            })
            .collect();
        let input = BlockInput {
            frames: size,
            transport: Transport::default(),
            audio: Default::default(),
            events,
        };
        group.bench_with_input(BenchmarkId::new("dense_knots", size), &size, |b, _| {
            b.iter(|| {
                engine.process_block(black_box(&input), black_box(&mut output));
            })
        });
    }

    group.finish();
}

fn bench_spliced(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/spliced");

    // A 2048-frame host block against a 256-frame bound: the splice
    // loop runs sixteen 128-frame sub-blocks.
    let mut engine = build_engine(16, 256);
    let mut output = AudioOutput::default();
    let warmup = BlockInput {
        frames: 128,
        transport: Transport::default(),
        audio: Default::default(),
        events: (0..4).map(|i| note_on(0, i, 52 + i as u8 * 4)).collect(),
    };
    engine.process_block(&warmup, &mut output);

    let input = BlockInput {
        frames: 2048,
        transport: Transport::default(),
        audio: Default::default(),
        events: Vec::new(),
    };
    group.bench_function("2048_frames_256_bound", |b| {
        b.iter(|| {
            engine.process_block(black_box(&input), black_box(&mut output));
        })
    });

    group.finish();
}

criterion_group!(benches, bench_process_block, bench_automation, bench_spliced);
criterion_main!(benches);
