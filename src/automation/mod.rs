// Purpose: parameter automation - the persistent value store and the
// per-block machinery that turns sparse host events into dense curves

pub mod curves;
pub mod state;

pub use curves::CurveBank;
pub use state::{AutomationState, RestoreWarning, StateSnapshot};
