// Purpose: static declaration of a plugin's shape
// Declared once, validated exhaustively off the audio thread, then
// compiled into flat index maps the audio thread reads without hashing
// a single string or chasing a single pointer chain.

pub mod map;

pub use map::{GlobalParamId, ParamIndexMap, ParamKey};

use crate::param::domain::ParamDomain;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable identifier for a module kind (oscillator, filter, ...).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleKindId(pub u32);

/// Stable identifier for a parameter kind within its module.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamKindId(pub u32);

/// Which dependency stage a module executes in. The order here is the
/// execution order; it is fixed at declaration time, never discovered
/// at run time.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Runs once per block, before any voice (e.g. a global LFO).
    GlobalBefore,
    /// Runs once per active voice.
    PerVoice,
    /// Runs once per block after all voices (mixdown, master effects).
    GlobalAfter,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRate {
    /// Changes at most once per block; modules read one scalar.
    Block,
    /// May change at any frame; modules read a dense per-frame curve.
    Accurate,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDirection {
    /// Host-automatable input.
    In,
    /// Engine-computed, read-only to the host (meters and the like).
    Out,
}

/// Declaration of one parameter kind: identity, sub-slot count, rate,
/// direction and conversion domain.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub id: ParamKindId,
    pub name: String,
    pub slots: u16,
    pub rate: ParamRate,
    pub direction: ParamDirection,
    pub domain: ParamDomain,
}

impl ParamDecl {
    pub fn new(id: u32, name: impl Into<String>, domain: ParamDomain) -> Self {
        Self {
            id: ParamKindId(id),
            name: name.into(),
            slots: 1,
            rate: ParamRate::Block,
            direction: ParamDirection::In,
            domain,
        }
    }

    pub fn accurate(mut self) -> Self {
        self.rate = ParamRate::Accurate;
        self
    }

    pub fn output(mut self) -> Self {
        self.direction = ParamDirection::Out;
        self
    }

    pub fn slots(mut self, slots: u16) -> Self {
        self.slots = slots;
        self
    }
}

/// Declaration of one module kind: identity, instance slot count,
/// stage, and its parameters.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct ModuleDecl {
    pub id: ModuleKindId,
    pub name: String,
    pub slots: u16,
    pub stage: Stage,
    pub params: Vec<ParamDecl>,
}

impl ModuleDecl {
    pub fn new(id: u32, name: impl Into<String>, stage: Stage) -> Self {
        Self {
            id: ModuleKindId(id),
            name: name.into(),
            slots: 1,
            stage,
            params: Vec::new(),
        }
    }

    pub fn slots(mut self, slots: u16) -> Self {
        self.slots = slots;
        self
    }

    pub fn param(mut self, param: ParamDecl) -> Self {
        self.params.push(param);
        self
    }
}

/// Everything that can go wrong compiling a topology. All of these are
/// plugin-author bugs, caught once at construction, never on the audio
/// thread.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("topology declares no modules")]
    Empty,
    #[error("duplicate module kind id {0}")]
    DuplicateModule(u32),
    #[error("module {module} declares duplicate parameter kind id {param}")]
    DuplicateParam { module: u32, param: u32 },
    #[error("module {0} declares zero instance slots")]
    ZeroModuleSlots(u32),
    #[error("module {module} parameter {param} declares zero slots")]
    ZeroParamSlots { module: u32, param: u32 },
    #[error("controller {0} is mapped twice")]
    DuplicateController(u8),
    #[error("controller {0} is outside the MIDI range 0..=127")]
    ControllerOutOfRange(u8),
    #[error("controller {controller} maps to unknown parameter {key:?}")]
    UnknownControllerTarget { controller: u8, key: ParamKey },
}

/// Mutable builder for a [`Topology`]. Declaration order is execution
/// order within each stage.
#[derive(Debug, Default)]
pub struct TopologySpec {
    modules: Vec<ModuleDecl>,
    controllers: Vec<(u8, ParamKey)>,
}

impl TopologySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, decl: ModuleDecl) -> Self {
        self.modules.push(decl);
        self
    }

    /// Route a MIDI continuous controller to a parameter instance.
    pub fn controller(mut self, controller: u8, key: ParamKey) -> Self {
        self.controllers.push((controller, key));
        self
    }

    pub fn build(self) -> Result<Topology, TopologyError> {
        Topology::build(self)
    }
}

/// The compiled, immutable topology: validated declarations plus the
/// flat parameter index map and controller routing table.
pub struct Topology {
    modules: Vec<ModuleDecl>,
    map: ParamIndexMap,
    controllers: [Option<GlobalParamId>; 128],
}

impl Topology {
    fn build(spec: TopologySpec) -> Result<Self, TopologyError> {
        if spec.modules.is_empty() {
            return Err(TopologyError::Empty);
        }
        for (i, module) in spec.modules.iter().enumerate() {
            if module.slots == 0 {
                return Err(TopologyError::ZeroModuleSlots(module.id.0));
            }
            if spec.modules[..i].iter().any(|m| m.id == module.id) {
                return Err(TopologyError::DuplicateModule(module.id.0));
            }
            for (j, param) in module.params.iter().enumerate() {
                if param.slots == 0 {
                    return Err(TopologyError::ZeroParamSlots {
                        module: module.id.0,
                        param: param.id.0,
                    });
                }
                if module.params[..j].iter().any(|p| p.id == param.id) {
                    return Err(TopologyError::DuplicateParam {
                        module: module.id.0,
                        param: param.id.0,
                    });
                }
            }
        }

        let map = ParamIndexMap::compile(&spec.modules);

        let mut controllers = [None; 128];
        for &(cc, key) in &spec.controllers {
            let slot = controllers
                .get_mut(cc as usize)
                .ok_or(TopologyError::ControllerOutOfRange(cc))?;
            if slot.is_some() {
                return Err(TopologyError::DuplicateController(cc));
            }
            let target = map
                .global_index(&key)
                .ok_or(TopologyError::UnknownControllerTarget {
                    controller: cc,
                    key,
                })?;
            *slot = Some(target);
        }

        log::debug!(
            "compiled topology: {} modules, {} parameter instances ({} accurate)",
            spec.modules.len(),
            map.param_count(),
            map.accurate_count()
        );

        Ok(Self {
            modules: spec.modules,
            map,
            controllers,
        })
    }

    pub fn modules(&self) -> &[ModuleDecl] {
        &self.modules
    }

    pub fn map(&self) -> &ParamIndexMap {
        &self.map
    }

    pub fn param_count(&self) -> usize {
        self.map.param_count()
    }

    /// The parameter a MIDI controller is routed to, if any.
    #[inline]
    pub fn controller_target(&self, controller: u8) -> Option<GlobalParamId> {
        self.controllers
            .get(controller as usize)
            .copied()
            .flatten()
    }

    /// Module declaration indices in execution order: GlobalBefore
    /// first, then PerVoice, then GlobalAfter, declaration order within
    /// each stage.
    pub fn execution_order(&self, stage: Stage) -> impl Iterator<Item = usize> + '_ {
        self.modules
            .iter()
            .enumerate()
            .filter(move |(_, m)| m.stage == stage)
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::domain::ParamDomain;

    fn sample_spec() -> TopologySpec {
        TopologySpec::new()
            .module(
                ModuleDecl::new(1, "lfo", Stage::GlobalBefore).param(ParamDecl::new(
                    0,
                    "rate",
                    ParamDomain::log(0.01, 40.0, 2.0),
                )),
            )
            .module(
                ModuleDecl::new(2, "osc", Stage::PerVoice)
                    .slots(2)
                    .param(
                        ParamDecl::new(0, "pitch", ParamDomain::linear(-24.0, 24.0))
                            .accurate()
                            .slots(4),
                    )
                    .param(ParamDecl::new(1, "wave", ParamDomain::enumerated(["sine", "saw"]))),
            )
            .module(
                ModuleDecl::new(3, "mix", Stage::GlobalAfter).param(
                    ParamDecl::new(0, "level", ParamDomain::linear(0.0, 1.0)).accurate(),
                ),
            )
    }

    #[test]
    fn compiles_and_counts_instances() {
        let topo = sample_spec().build().expect("valid spec");
        // lfo: 1, osc: 2 slots x (4 + 1), mix: 1
        assert_eq!(topo.param_count(), 1 + 2 * 5 + 1);
    }

    #[test]
    fn rejects_duplicate_module_ids() {
        let spec = TopologySpec::new()
            .module(ModuleDecl::new(7, "a", Stage::PerVoice))
            .module(ModuleDecl::new(7, "b", Stage::PerVoice));
        assert!(matches!(
            spec.build(),
            Err(TopologyError::DuplicateModule(7))
        ));
    }

    #[test]
    fn rejects_duplicate_param_ids() {
        let spec = TopologySpec::new().module(
            ModuleDecl::new(1, "osc", Stage::PerVoice)
                .param(ParamDecl::new(4, "a", ParamDomain::linear(0.0, 1.0)))
                .param(ParamDecl::new(4, "b", ParamDomain::linear(0.0, 1.0))),
        );
        assert!(matches!(
            spec.build(),
            Err(TopologyError::DuplicateParam { module: 1, param: 4 })
        ));
    }

    #[test]
    fn rejects_zero_slot_counts() {
        let spec = TopologySpec::new().module(ModuleDecl::new(1, "osc", Stage::PerVoice).slots(0));
        assert!(matches!(
            spec.build(),
            Err(TopologyError::ZeroModuleSlots(1))
        ));
    }

    #[test]
    fn controller_routing_resolves_at_build_time() {
        let key = ParamKey {
            module: ModuleKindId(2),
            module_slot: 0,
            param: ParamKindId(0),
            param_slot: 0,
        };
        let topo = sample_spec().controller(74, key).build().expect("valid");
        let target = topo.controller_target(74).expect("mapped");
        assert_eq!(topo.map().key_of(target), key);
        assert_eq!(topo.controller_target(75), None);
    }

    #[test]
    fn rejects_controller_to_unknown_param() {
        let key = ParamKey {
            module: ModuleKindId(99),
            module_slot: 0,
            param: ParamKindId(0),
            param_slot: 0,
        };
        assert!(matches!(
            sample_spec().controller(1, key).build(),
            Err(TopologyError::UnknownControllerTarget { controller: 1, .. })
        ));
    }

    #[test]
    fn execution_order_follows_stages() {
        let topo = sample_spec().build().expect("valid");
        let before: Vec<usize> = topo.execution_order(Stage::GlobalBefore).collect();
        let voice: Vec<usize> = topo.execution_order(Stage::PerVoice).collect();
        let after: Vec<usize> = topo.execution_order(Stage::GlobalAfter).collect();
        assert_eq!((before, voice, after), (vec![0], vec![1], vec![2]));
    }
}
