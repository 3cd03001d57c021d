// Purpose: external interfaces - per-block buffer shapes and the
// out-of-band control channel

use crate::event::{Event, Transport};

#[cfg(feature = "rtrb")]
use rtrb::Consumer;

/// Host-owned input audio for one block, one buffer per channel.
#[derive(Debug, Default)]
pub struct AudioInput {
    pub buffers: Vec<Vec<f32>>,
}

/// Host-owned output audio for one block, one buffer per channel. The
/// engine fills `buffers[..][..frames]`; a host that pre-sizes the
/// buffers keeps the audio path allocation-free.
#[derive(Debug, Default)]
pub struct AudioOutput {
    pub buffers: Vec<Vec<f32>>,
}

/// Everything the host supplies for one processing call. Valid only
/// for the duration of that call.
#[derive(Debug, Default)]
pub struct BlockInput {
    pub frames: usize,
    pub transport: Transport,
    pub audio: AudioInput,
    /// Ordered event list, frames relative to this block's start.
    pub events: Vec<Event>,
}

/// Out-of-band control messages from a non-audio thread (UI panic
/// button, host suspend). Drained at the top of each block.
#[derive(Debug, Copy, Clone)]
pub enum ControlMessage {
    /// Release every active voice through its normal release stage.
    AllNotesOff,
    /// Cut every voice immediately.
    Panic,
}

pub trait MessageReceiver {
    fn pop(&mut self) -> Option<ControlMessage>;
}

#[cfg(feature = "rtrb")]
impl MessageReceiver for Consumer<ControlMessage> {
    fn pop(&mut self) -> Option<ControlMessage> {
        Consumer::pop(self).ok()
    }
}

/// Receiver for engines without a control channel.
pub struct NoMessages;

impl MessageReceiver for NoMessages {
    fn pop(&mut self) -> Option<ControlMessage> {
        None
    }
}
