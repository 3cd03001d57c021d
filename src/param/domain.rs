use crate::param::ParamValue;

/*
Parameter Conversion Laws
=========================

Every automatable parameter owns an immutable ParamDomain describing how
its plain value (Hz, dB, a filter-type index, ...) maps to the [0, 1]
normalized range the automation protocol speaks, and how it renders as
text for displays and preset files.

The laws:

  Linear    normalized = (plain - min) / (max - min)

  Log       exponent = log((mid - min) / (max - min)) / log(0.5)
            normalized = ((plain - min) / (max - min)) ^ (1 / exponent)

            The exponent is derived once from a configured midpoint, so
            normalized 0.5 always maps back to exactly that midpoint.
            A filter cutoff of min=20, max=20000, mid=1000 puts 1 kHz
            under the center of the knob, where your ear expects it.

  Stepped   normalized = (step - min) / (max - min)
            step       = min + floor(min(range, normalized * (range + 1)))

            The inverse is deliberately NOT the literal fraction: the
            floor-scaled form divides [0, 1] into (range + 1) equal
            buckets so the top step is as easy to hit from a knob as
            every other step. Toggles and enumerations are stepped
            domains with ranges 1 and (variant count - 1).

Round-trip law: from_normalized(to_normalized(x)) == x, exact for the
integer laws and within float tolerance for the real ones.
*/

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which conversion law a parameter follows. Immutable after construction.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub enum DomainLaw {
    Linear { min: f32, max: f32 },
    Log { min: f32, max: f32, exponent: f32 },
    Stepped { min: i32, max: i32 },
    Toggle,
    Enumerated { labels: Vec<String> },
}

/// Immutable descriptor for one parameter kind: law, unit, display
/// precision and default. Owned by the topology; shared read-only.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct ParamDomain {
    law: DomainLaw,
    unit: String,
    precision: usize,
    default: f32,
}

impl ParamDomain {
    pub fn linear(min: f32, max: f32) -> Self {
        debug_assert!(max > min);
        Self {
            law: DomainLaw::Linear { min, max },
            unit: String::new(),
            precision: 2,
            default: min,
        }
    }

    /// Log-scaled real domain. `midpoint` is the plain value that
    /// normalized 0.5 must map to; the exponent is derived from it here,
    /// once, off the audio thread.
    pub fn log(min: f32, max: f32, midpoint: f32) -> Self {
        debug_assert!(max > min && midpoint > min && midpoint < max);
        let exponent = ((midpoint - min) / (max - min)).ln() / 0.5f32.ln();
        Self {
            law: DomainLaw::Log { min, max, exponent },
            unit: String::new(),
            precision: 2,
            default: min,
        }
    }

    pub fn stepped(min: i32, max: i32) -> Self {
        debug_assert!(max > min);
        Self {
            law: DomainLaw::Stepped { min, max },
            unit: String::new(),
            precision: 0,
            default: min as f32,
        }
    }

    pub fn toggle() -> Self {
        Self {
            law: DomainLaw::Toggle,
            unit: String::new(),
            precision: 0,
            default: 0.0,
        }
    }

    pub fn enumerated<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        debug_assert!(labels.len() >= 2);
        Self {
            law: DomainLaw::Enumerated { labels },
            unit: String::new(),
            precision: 0,
            default: 0.0,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_default(mut self, default: ParamValue) -> Self {
        self.default = default.real();
        self
    }

    pub fn law(&self) -> &DomainLaw {
        &self.law
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// The default as a plain value, typed per the law.
    pub fn default_value(&self) -> ParamValue {
        match self.law {
            DomainLaw::Linear { .. } | DomainLaw::Log { .. } => ParamValue::Real(self.default),
            _ => ParamValue::Step(self.default as i32),
        }
    }

    pub fn default_normalized(&self) -> f32 {
        self.to_normalized(self.default_value())
    }

    /// True if the law produces integer steps.
    pub fn is_stepped(&self) -> bool {
        !matches!(self.law, DomainLaw::Linear { .. } | DomainLaw::Log { .. })
    }

    /// Inclusive integer range for the stepped laws, (0, 0) for real ones.
    fn step_bounds(&self) -> (i32, i32) {
        match &self.law {
            DomainLaw::Stepped { min, max } => (*min, *max),
            DomainLaw::Toggle => (0, 1),
            DomainLaw::Enumerated { labels } => (0, labels.len() as i32 - 1),
            _ => (0, 0),
        }
    }

    /// Plain → normalized [0, 1]. Out-of-range plain values clamp.
    pub fn to_normalized(&self, value: ParamValue) -> f32 {
        match &self.law {
            DomainLaw::Linear { min, max } => ((value.real() - min) / (max - min)).clamp(0.0, 1.0),
            DomainLaw::Log { min, max, exponent } => {
                let frac = ((value.real() - min) / (max - min)).clamp(0.0, 1.0);
                frac.powf(1.0 / exponent)
            }
            _ => {
                let (min, max) = self.step_bounds();
                let step = value.step().clamp(min, max);
                (step - min) as f32 / (max - min) as f32
            }
        }
    }

    /// Normalized [0, 1] → plain. Out-of-range normalized values clamp.
    pub fn from_normalized(&self, normalized: f32) -> ParamValue {
        let normalized = normalized.clamp(0.0, 1.0);
        match &self.law {
            DomainLaw::Linear { min, max } => ParamValue::Real(min + normalized * (max - min)),
            DomainLaw::Log { min, max, exponent } => {
                ParamValue::Real(min + normalized.powf(*exponent) * (max - min))
            }
            _ => {
                let (min, max) = self.step_bounds();
                let range = (max - min) as f32;
                // Floor-scaled inverse: (range + 1) equal-width buckets,
                // top bucket included.
                let step = (normalized * (range + 1.0)).floor().min(range);
                ParamValue::Step(min + step as i32)
            }
        }
    }

    /// Render a plain value for display.
    pub fn to_text(&self, value: ParamValue) -> String {
        match &self.law {
            DomainLaw::Linear { .. } | DomainLaw::Log { .. } => {
                let v = value.real();
                if self.unit.is_empty() {
                    format!("{:.*}", self.precision, v)
                } else {
                    format!("{:.*} {}", self.precision, v, self.unit)
                }
            }
            DomainLaw::Stepped { .. } => format!("{}", value.step()),
            DomainLaw::Toggle => {
                if value.step() != 0 { "on" } else { "off" }.to_string()
            }
            DomainLaw::Enumerated { labels } => {
                let idx = value.step().clamp(0, labels.len() as i32 - 1) as usize;
                labels[idx].clone()
            }
        }
    }

    /// Parse a displayed value back into a plain value. Returns `None`
    /// for input that does not parse under this law; never panics.
    pub fn from_text(&self, text: &str) -> Option<ParamValue> {
        let text = text.trim();
        match &self.law {
            DomainLaw::Linear { min, max } | DomainLaw::Log { min, max, .. } => {
                let body = text.strip_suffix(self.unit.as_str()).unwrap_or(text).trim();
                let v: f32 = body.parse().ok()?;
                Some(ParamValue::Real(v.clamp(*min, *max)))
            }
            DomainLaw::Stepped { min, max } => {
                let v: i32 = text.parse().ok()?;
                Some(ParamValue::Step(v.clamp(*min, *max)))
            }
            DomainLaw::Toggle => match text {
                "on" | "1" | "true" => Some(ParamValue::Step(1)),
                "off" | "0" | "false" => Some(ParamValue::Step(0)),
                _ => None,
            },
            DomainLaw::Enumerated { labels } => {
                if let Some(idx) = labels.iter().position(|l| l == text) {
                    return Some(ParamValue::Step(idx as i32));
                }
                // Bare index as a fallback for hosts that display numbers
                let v: i32 = text.parse().ok()?;
                if (0..labels.len() as i32).contains(&v) {
                    Some(ParamValue::Step(v))
                } else {
                    None
                }
            }
        }
    }
}
