pub mod automation; // Parameter store and per-block curve building
pub mod engine; // Module pipeline, splice loop, block lifecycle
pub mod event; // Host-facing event shapes
pub mod io; // Block buffers and the control message channel
pub mod param; // Conversion laws between plain, normalized and text
pub mod topology; // Static plugin shape, compiled to flat indices
pub mod voice; // Polyphonic voice pool and lifecycle

/// Default upper bound on the number of frames the inner engine renders
/// at once. Hosts may hand us more; `engine::splice` cuts oversized
/// blocks down to this bound.
pub const MAX_BLOCK_SIZE: usize = 2048;
