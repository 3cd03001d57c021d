use crate::engine::module::{ModuleEngine, ModuleReport, ProcessArgs};
use crate::param::ParamValue;

/// The built-in global-after module that combines private per-voice
/// outputs into one signal. Until a mixdown runs, voice outputs stay
/// invisible to the rest of the graph.
///
/// Sums the designated per-voice step across every voice that rendered
/// this block, honoring each voice's start/end frame window, then
/// applies its level parameter (local parameter 0) if the topology
/// declares one.
pub struct Mixdown {
    source_step: usize,
}

impl Mixdown {
    /// `source_step` indexes the per-voice pipeline steps in topology
    /// order; usually the last one.
    pub fn new(source_step: usize) -> Self {
        Self { source_step }
    }
}

impl ModuleEngine for Mixdown {
    fn process(&mut self, args: &mut ProcessArgs<'_>) -> ModuleReport {
        let voices = args.voices;
        args.output.fill(0.0);

        if self.source_step < voices.step_count() {
            for (lane, voice) in voices.audible() {
                let row = voices.output(lane, self.source_step);
                let lo = voice.start_frame.min(args.frames);
                // A cut stamped before the start leaves an empty
                // window, never a reversed one.
                let hi = voice.end_frame.min(args.frames).max(lo);
                for (o, v) in args.output[lo..hi].iter_mut().zip(&row[lo..hi]) {
                    *o += v;
                }
            }
        }

        if !args.curves.is_empty() {
            match args.curves.curve(0) {
                Some(level) => {
                    for (o, g) in args.output.iter_mut().zip(level) {
                        *o *= g;
                    }
                }
                None => {
                    if let ParamValue::Real(g) = args.curves.scalar(0) {
                        for o in args.output.iter_mut() {
                            *o *= g;
                        }
                    }
                }
            }
        }

        ModuleReport::default()
    }
}
