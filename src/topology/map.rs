use std::collections::HashMap;

use crate::param::domain::ParamDomain;
use crate::topology::{ModuleDecl, ModuleKindId, ParamDirection, ParamKindId, ParamRate};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Flat Parameter Index Map
========================

The declared topology is a three-level nesting: module kind, module
slot, parameter kind, parameter slot. Walking that nesting on the audio
thread would mean pointer chasing through jagged arrays, so compilation
flattens every parameter *instance* into one contiguous index space:

  global index = module base
               + module_slot * params_per_slot
               + param offset
               + param_slot

Layout is module declaration order, then module slot, then parameter
declaration order, then parameter slot. Everything the audio thread
needs per instance (domain, rate, direction, accurate-curve slot) lives
in arrays parallel to that index.

Invariant, checked by construction: every (module, slot, param, subslot)
tuple maps to exactly one global index, and the reverse map is total and
unique.
*/

/// Index of one parameter instance in the flat automation arrays.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalParamId(pub u32);

impl GlobalParamId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Fully qualified address of one parameter instance in the declared
/// topology. This is the stable, persistence-friendly form; the flat
/// [`GlobalParamId`] is the runtime form.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamKey {
    pub module: ModuleKindId,
    pub module_slot: u16,
    pub param: ParamKindId,
    pub param_slot: u16,
}

struct ModuleEntry {
    /// Global index of this module's first parameter instance.
    base: u32,
    /// Parameter instances per module slot.
    params_per_slot: u32,
}

pub struct ParamIndexMap {
    forward: HashMap<ParamKey, GlobalParamId>,
    keys: Vec<ParamKey>,
    domains: Vec<ParamDomain>,
    rates: Vec<ParamRate>,
    directions: Vec<ParamDirection>,
    /// Dense index into the accurate-curve arena, `None` for block-rate.
    accurate: Vec<Option<u32>>,
    accurate_count: usize,
    modules: Vec<ModuleEntry>,
}

impl ParamIndexMap {
    pub(super) fn compile(modules: &[ModuleDecl]) -> Self {
        let mut forward = HashMap::new();
        let mut keys = Vec::new();
        let mut domains = Vec::new();
        let mut rates = Vec::new();
        let mut directions = Vec::new();
        let mut accurate = Vec::new();
        let mut accurate_count = 0u32;
        let mut entries = Vec::with_capacity(modules.len());

        for module in modules {
            let params_per_slot: u32 = module.params.iter().map(|p| p.slots as u32).sum();
            entries.push(ModuleEntry {
                base: keys.len() as u32,
                params_per_slot,
            });
            for module_slot in 0..module.slots {
                for param in &module.params {
                    for param_slot in 0..param.slots {
                        let key = ParamKey {
                            module: module.id,
                            module_slot,
                            param: param.id,
                            param_slot,
                        };
                        let id = GlobalParamId(keys.len() as u32);
                        let prev = forward.insert(key, id);
                        debug_assert!(prev.is_none(), "duplicate key escaped validation");
                        keys.push(key);
                        domains.push(param.domain.clone());
                        rates.push(param.rate);
                        directions.push(param.direction);
                        accurate.push(match param.rate {
                            ParamRate::Accurate => {
                                let slot = accurate_count;
                                accurate_count += 1;
                                Some(slot)
                            }
                            ParamRate::Block => None,
                        });
                    }
                }
            }
        }

        Self {
            forward,
            keys,
            domains,
            rates,
            directions,
            accurate,
            accurate_count: accurate_count as usize,
            modules: entries,
        }
    }

    /// Total number of parameter instances.
    #[inline]
    pub fn param_count(&self) -> usize {
        self.keys.len()
    }

    /// Number of accurate-rate instances (size of the curve arena).
    #[inline]
    pub fn accurate_count(&self) -> usize {
        self.accurate_count
    }

    /// O(1) forward lookup; `None` for tuples the topology never
    /// declared (unknown host ids are ignored, per the host contract).
    #[inline]
    pub fn global_index(&self, key: &ParamKey) -> Option<GlobalParamId> {
        self.forward.get(key).copied()
    }

    /// Total, unique reverse map.
    #[inline]
    pub fn key_of(&self, id: GlobalParamId) -> ParamKey {
        self.keys[id.index()]
    }

    #[inline]
    pub fn domain(&self, id: GlobalParamId) -> &ParamDomain {
        &self.domains[id.index()]
    }

    #[inline]
    pub fn rate(&self, id: GlobalParamId) -> ParamRate {
        self.rates[id.index()]
    }

    #[inline]
    pub fn direction(&self, id: GlobalParamId) -> ParamDirection {
        self.directions[id.index()]
    }

    /// Dense curve-arena slot for an accurate-rate instance.
    #[inline]
    pub fn accurate_slot(&self, id: GlobalParamId) -> Option<usize> {
        self.accurate[id.index()].map(|s| s as usize)
    }

    /// True if the id is within the declared instance space.
    #[inline]
    pub fn contains(&self, id: GlobalParamId) -> bool {
        id.index() < self.keys.len()
    }

    /// The contiguous global-index range covering one module instance
    /// (module declaration index + module slot).
    pub fn instance_range(&self, module_idx: usize, module_slot: u16) -> std::ops::Range<usize> {
        let entry = &self.modules[module_idx];
        let start = entry.base + module_slot as u32 * entry.params_per_slot;
        start as usize..(start + entry.params_per_slot) as usize
    }

    /// Parameter instances per slot of the given module.
    pub fn params_per_slot(&self, module_idx: usize) -> usize {
        self.modules[module_idx].params_per_slot as usize
    }

    pub fn ids(&self) -> impl Iterator<Item = GlobalParamId> {
        (0..self.keys.len() as u32).map(GlobalParamId)
    }
}
