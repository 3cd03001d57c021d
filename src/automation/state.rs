use crate::param::ParamValue;
use crate::topology::{GlobalParamId, ParamKey, Topology};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The current plain value of every parameter instance - "the patch".
///
/// Persists across activate/deactivate. Mutated only by event
/// application (see [`crate::automation::curves`]) and by snapshot
/// restore; modules never write it.
pub struct AutomationState {
    values: Vec<ParamValue>,
}

impl AutomationState {
    /// Every parameter starts at its domain default.
    pub fn new(topology: &Topology) -> Self {
        let values = topology
            .map()
            .ids()
            .map(|id| topology.map().domain(id).default_value())
            .collect();
        Self { values }
    }

    #[inline]
    pub fn value(&self, id: GlobalParamId) -> ParamValue {
        self.values[id.index()]
    }

    #[inline]
    pub fn set(&mut self, id: GlobalParamId, value: ParamValue) {
        self.values[id.index()] = value;
    }

    /// Store a normalized value, converting through the domain law.
    /// Out-of-range input clamps; unknown ids are ignored.
    pub fn set_normalized(&mut self, topology: &Topology, id: GlobalParamId, normalized: f32) {
        if !topology.map().contains(id) {
            return;
        }
        let plain = topology.map().domain(id).from_normalized(normalized);
        self.values[id.index()] = plain;
    }

    pub fn normalized(&self, topology: &Topology, id: GlobalParamId) -> f32 {
        topology.map().domain(id).to_normalized(self.value(id))
    }

    /// Key-addressed snapshot in normalized units, for the persistence
    /// collaborator. Normalized survives domain-range tweaks between
    /// plugin versions better than plain values do.
    pub fn snapshot(&self, topology: &Topology) -> StateSnapshot {
        let entries = topology
            .map()
            .ids()
            .map(|id| (topology.map().key_of(id), self.normalized(topology, id)))
            .collect();
        StateSnapshot { entries }
    }

    /// Restore from a snapshot. Entries whose key the current topology
    /// does not declare are skipped and reported as warnings rather
    /// than failing the whole load.
    pub fn restore(&mut self, topology: &Topology, snapshot: &StateSnapshot) -> Vec<RestoreWarning> {
        let mut warnings = Vec::new();
        for &(key, normalized) in &snapshot.entries {
            match topology.map().global_index(&key) {
                Some(id) => self.set_normalized(topology, id, normalized),
                None => {
                    log::warn!("snapshot entry for unknown parameter {:?} skipped", key);
                    warnings.push(RestoreWarning::UnknownParam(key));
                }
            }
        }
        warnings
    }
}

/// Serialized form of the automation state.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub entries: Vec<(ParamKey, f32)>,
}

/// Non-fatal problems encountered while restoring a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreWarning {
    UnknownParam(ParamKey),
}
