// Purpose: polyphonic voice lifecycle over a fixed-size pool
// Allocation, stealing and release bookkeeping - no DSP lives here

use crate::event::NoteId;

/*
Voice Lifecycle
===============

    unused ──note_on──→ active ──note_off──→ releasing
       ↑                  │                      │
       │                  └──────choke───────────┤
       │                                    module reports
       │                                      finished
       └────────── next block start ←──── finishing

A voice is claimed by a note-on, sounds while active, decays while
releasing, and parks in `finishing` once a module (typically the
amplitude envelope) reports it silent. Finishing voices recycle to
unused at the next block start so the block that silenced them can
still read their state.

Stealing, when the pool is exhausted, prefers voices in this order:
finishing, oldest releasing, oldest active. Oldest-first keeps the most
recently triggered notes alive, which is what a player expects.

Each slot carries its own NoteId, so two voices holding the same pitch
still route a later note-off to the right one.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStage {
    Unused,
    Active,
    Releasing,
    Finishing,
}

/// Bookkeeping for one pool slot. Owned exclusively by the pool;
/// module engines see a read-only view.
#[derive(Debug, Clone, Copy)]
pub struct VoiceState {
    pub note: NoteId,
    pub stage: VoiceStage,
    /// 0.0 ..= 1.0
    pub velocity: f32,
    /// Frame within the current block the voice started at, 0 if it
    /// started in an earlier block.
    pub start_frame: usize,
    /// Frame within the current block the release began at; equals the
    /// block length while the voice is still held, 0 if the release
    /// began in an earlier block.
    pub release_frame: usize,
    /// Frame within the current block the voice goes silent at.
    pub end_frame: usize,
    /// Unison position of this voice within its note.
    pub sub_voice: u16,
    pub sub_voice_count: u16,
    /// Key of the previous note, for portamento.
    pub prev_key: Option<u8>,
    /// True if the note-on landed in the current block.
    pub triggered: bool,
    /// Monotonic claim order, used for oldest-first stealing.
    age: u64,
}

impl VoiceState {
    fn idle() -> Self {
        Self {
            note: NoteId { handle: -1, key: 0, channel: 0 },
            stage: VoiceStage::Unused,
            velocity: 0.0,
            start_frame: 0,
            release_frame: 0,
            end_frame: 0,
            sub_voice: 0,
            sub_voice_count: 1,
            prev_key: None,
            triggered: false,
            age: 0,
        }
    }

    /// Active or releasing - the stages the per-voice pipeline renders.
    #[inline]
    pub fn is_sounding(&self) -> bool {
        matches!(self.stage, VoiceStage::Active | VoiceStage::Releasing)
    }

    /// True if the voice contributes audio to the current block: it is
    /// sounding, or it went silent partway through the block (choke, or
    /// a module reporting it finished) and still owns the frames up to
    /// its end frame.
    #[inline]
    pub fn renders(&self) -> bool {
        self.is_sounding() || (self.stage == VoiceStage::Finishing && self.end_frame > 0)
    }
}

pub struct VoicePool {
    voices: Vec<VoiceState>,
    age_counter: u64,
    last_key: Option<u8>,
    frames: usize,
}

impl VoicePool {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "voice pool must hold at least one voice");
        Self {
            voices: vec![VoiceState::idle(); size],
            age_counter: 0,
            last_key: None,
            frames: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn voices(&self) -> &[VoiceState] {
        &self.voices
    }

    pub fn voice(&self, slot: usize) -> &VoiceState {
        &self.voices[slot]
    }

    /// Start-of-block bookkeeping: recycle finishing voices and reset
    /// every per-block frame offset to cover the new block.
    pub fn begin_block(&mut self, frames: usize) {
        self.frames = frames;
        for voice in &mut self.voices {
            if voice.stage == VoiceStage::Finishing {
                voice.stage = VoiceStage::Unused;
            }
            voice.triggered = false;
            voice.start_frame = 0;
            voice.end_frame = frames;
            voice.release_frame = match voice.stage {
                VoiceStage::Releasing => 0,
                _ => frames,
            };
        }
    }

    /// Claim a slot for a note-on, stealing if the pool is exhausted.
    /// Returns the slot index; with a non-empty pool this never fails.
    pub fn note_on(
        &mut self,
        note: NoteId,
        velocity: f32,
        frame: usize,
        sub_voice: u16,
        sub_voice_count: u16,
    ) -> usize {
        let slot = self.claim_slot();
        let prev_key = self.last_key;
        if sub_voice == 0 {
            self.last_key = Some(note.key);
        }
        let frames = self.frames;
        let age = self.age_counter;
        self.age_counter += 1;

        let voice = &mut self.voices[slot];
        voice.note = note;
        voice.stage = VoiceStage::Active;
        voice.velocity = velocity.clamp(0.0, 1.0);
        voice.start_frame = frame;
        voice.release_frame = frames;
        voice.end_frame = frames;
        voice.sub_voice = sub_voice;
        voice.sub_voice_count = sub_voice_count.max(1);
        voice.prev_key = prev_key;
        voice.triggered = true;
        voice.age = age;
        slot
    }

    fn claim_slot(&mut self) -> usize {
        if let Some(i) = self
            .voices
            .iter()
            .position(|v| matches!(v.stage, VoiceStage::Unused | VoiceStage::Finishing))
        {
            return i;
        }
        if let Some(i) = self.oldest_in(VoiceStage::Releasing) {
            return i;
        }
        self.oldest_in(VoiceStage::Active)
            .expect("non-empty pool always has an active voice to steal")
    }

    fn oldest_in(&self, stage: VoiceStage) -> Option<usize> {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.stage == stage)
            .min_by_key(|(_, v)| v.age)
            .map(|(i, _)| i)
    }

    /// Move every active voice matching the note id (all unison
    /// sub-voices) into its release stage at `frame`. Unmatched ids -
    /// a note stolen earlier, or host confusion - are a no-op.
    pub fn note_off(&mut self, note: NoteId, frame: usize) {
        for voice in &mut self.voices {
            if voice.stage == VoiceStage::Active && voice.note == note {
                voice.stage = VoiceStage::Releasing;
                voice.release_frame = frame;
            }
        }
    }

    /// Immediate cut: matching voices go silent at `frame` with no
    /// release stage. A choke stamped before the voice's start frame
    /// (out-of-order host data) collapses the window to empty instead
    /// of running it backwards.
    pub fn choke(&mut self, note: NoteId, frame: usize) {
        for voice in &mut self.voices {
            if voice.is_sounding() && voice.note == note {
                voice.stage = VoiceStage::Finishing;
                voice.end_frame = frame.max(voice.start_frame);
            }
        }
    }

    /// A module reported this voice silent (envelope hit zero). The
    /// slot recycles at the next block start.
    pub fn finish(&mut self, slot: usize) {
        let voice = &mut self.voices[slot];
        if voice.is_sounding() {
            voice.stage = VoiceStage::Finishing;
        }
    }

    /// Hard stop: every sounding voice is cut at the top of the block
    /// and recycles at the next block start.
    pub fn panic(&mut self) {
        for voice in &mut self.voices {
            if voice.is_sounding() {
                voice.stage = VoiceStage::Finishing;
                voice.end_frame = 0;
            }
        }
    }

    /// Release everything at once (control-channel panic).
    pub fn all_notes_off(&mut self, frame: usize) {
        for voice in &mut self.voices {
            if voice.stage == VoiceStage::Active {
                voice.stage = VoiceStage::Releasing;
                voice.release_frame = frame;
            }
        }
    }

    pub fn sounding_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_sounding()).count()
    }
}
