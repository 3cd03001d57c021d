// Purpose: parameter value representation and conversion laws
// This is the leaf layer everything else converts through

pub mod domain;

pub use domain::{DomainLaw, ParamDomain};

/// A parameter's plain value in its natural typed unit.
///
/// Which arm is active is decided by the parameter's domain, never by
/// the value itself. A `Real` carried into a stepped domain (or vice
/// versa) is a caller bug; the accessors coerce rather than panic so
/// the audio thread stays total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Real(f32),
    Step(i32),
}

impl ParamValue {
    /// The value as a float, rounding through if the step arm is active.
    #[inline]
    pub fn real(self) -> f32 {
        match self {
            ParamValue::Real(v) => v,
            ParamValue::Step(s) => s as f32,
        }
    }

    /// The value as an integer step, truncating if the real arm is active.
    #[inline]
    pub fn step(self) -> i32 {
        match self {
            ParamValue::Real(v) => v as i32,
            ParamValue::Step(s) => s,
        }
    }
}
