//! Effect parameter surface and state save/restore
//!
//! Audiobus saves and restores the effect through a flat dictionary of
//! parameter values keyed by decimal id strings. The state machine never
//! interprets the values; it only moves them between that dictionary and the
//! effect's parameter surface.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

pub type ParameterId = u32;

/// Full parameter set, by id
pub type ParameterSnapshot = BTreeMap<ParameterId, f32>;

/// Audiobus state dictionary: decimal id string -> value
pub type StateDictionary = BTreeMap<String, f32>;

/// Static description of one parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterInfo {
    pub id: ParameterId,
    pub name: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl ParameterInfo {
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// The effect's parameter list as seen by the host wrapper
pub trait ParameterSurface: Send + Sync {
    fn parameters(&self) -> &[ParameterInfo];

    fn get(&self, id: ParameterId) -> Option<f32>;

    /// Write a value; returns false if the id is unknown or the value rejected
    fn set(&self, id: ParameterId, value: f32) -> bool;

    /// Read every declared parameter
    fn export_snapshot(&self) -> ParameterSnapshot {
        self.parameters()
            .iter()
            .filter_map(|info| self.get(info.id).map(|value| (info.id, value)))
            .collect()
    }

    /// Write every value in `snapshot`; unknown ids are skipped
    ///
    /// Returns the number of parameters written.
    fn import_snapshot(&self, snapshot: &ParameterSnapshot) -> usize {
        let mut applied = 0;
        for (&id, &value) in snapshot {
            if self.set(id, value) {
                applied += 1;
            } else {
                debug!(id, value, "parameter not applied");
            }
        }
        applied
    }
}

/// Parameters of the chorus effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ChorusParameter {
    Mix = 0,
    Rate = 1,
    Depth = 2,
    Feedback = 3,
    Delay = 4,
}

impl ChorusParameter {
    pub const ALL: [ChorusParameter; 5] = [
        ChorusParameter::Mix,
        ChorusParameter::Rate,
        ChorusParameter::Depth,
        ChorusParameter::Feedback,
        ChorusParameter::Delay,
    ];

    pub fn id(self) -> ParameterId {
        self as ParameterId
    }

    pub fn name(self) -> &'static str {
        match self {
            ChorusParameter::Mix => "Mix",
            ChorusParameter::Rate => "Rate",
            ChorusParameter::Depth => "Depth",
            ChorusParameter::Feedback => "Feedback",
            ChorusParameter::Delay => "Delay",
        }
    }

    fn info(self) -> ParameterInfo {
        ParameterInfo {
            id: self.id(),
            name: self.name(),
            min: 0.0,
            max: 1.0,
            default: 0.0,
        }
    }
}

/// Lock-free store for the chorus parameters
///
/// Values are kept as `f32` bits so the audio thread can read them without
/// locking.
pub struct ChorusParameters {
    infos: Vec<ParameterInfo>,
    values: Vec<AtomicU32>,
}

impl ChorusParameters {
    pub fn new() -> Self {
        let infos: Vec<ParameterInfo> = ChorusParameter::ALL.iter().map(|p| p.info()).collect();
        let values = infos
            .iter()
            .map(|info| AtomicU32::new(info.default.to_bits()))
            .collect();
        Self { infos, values }
    }

    fn index_of(&self, id: ParameterId) -> Option<usize> {
        self.infos.iter().position(|info| info.id == id)
    }
}

impl Default for ChorusParameters {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterSurface for ChorusParameters {
    fn parameters(&self) -> &[ParameterInfo] {
        &self.infos
    }

    fn get(&self, id: ParameterId) -> Option<f32> {
        let index = self.index_of(id)?;
        Some(f32::from_bits(self.values[index].load(Ordering::Relaxed)))
    }

    fn set(&self, id: ParameterId, value: f32) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };

        if !value.is_finite() {
            warn!(id, value, "ignoring non-finite parameter value");
            return false;
        }

        let clamped = self.infos[index].clamp(value);
        self.values[index].store(clamped.to_bits(), Ordering::Relaxed);
        true
    }
}

/// Convert a snapshot to the Audiobus dictionary form
pub fn to_state_dictionary(snapshot: &ParameterSnapshot) -> StateDictionary {
    snapshot
        .iter()
        .map(|(id, value)| (id.to_string(), *value))
        .collect()
}

/// Parse an Audiobus dictionary; keys that are not parameter ids are skipped
pub fn from_state_dictionary(dictionary: &StateDictionary) -> ParameterSnapshot {
    dictionary
        .iter()
        .filter_map(|(key, value)| match key.parse::<ParameterId>() {
            Ok(id) => Some((id, *value)),
            Err(_) => {
                debug!(key, "skipping non-parameter state key");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_parameters() {
        let params = ChorusParameters::new();
        let ids: Vec<_> = params.parameters().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(params.get(ChorusParameter::Depth.id()), Some(0.0));
        assert_eq!(params.get(99), None);
    }

    #[test]
    fn test_set_clamps_to_range() {
        let params = ChorusParameters::new();
        assert!(params.set(ChorusParameter::Mix.id(), 1.7));
        assert_eq!(params.get(ChorusParameter::Mix.id()), Some(1.0));

        assert!(params.set(ChorusParameter::Rate.id(), -0.2));
        assert_eq!(params.get(ChorusParameter::Rate.id()), Some(0.0));
    }

    #[test]
    fn test_set_rejects_unknown_and_nan() {
        let params = ChorusParameters::new();
        assert!(!params.set(42, 0.5));
        assert!(!params.set(ChorusParameter::Mix.id(), f32::NAN));
        assert_eq!(params.get(ChorusParameter::Mix.id()), Some(0.0));
    }

    #[test]
    fn test_export_import_leaves_values_unchanged() {
        let params = ChorusParameters::new();
        let values = [0.0, 0.123_456_79, 0.5, 0.999_999_94, 1.0];
        for (param, value) in ChorusParameter::ALL.iter().zip(values) {
            params.set(param.id(), value);
        }

        let exported = params.export_snapshot();
        assert_eq!(params.import_snapshot(&exported), 5);
        assert_eq!(params.export_snapshot(), exported);

        for (param, value) in ChorusParameter::ALL.iter().zip(values) {
            assert_eq!(params.get(param.id()), Some(value));
        }
    }

    #[test]
    fn test_import_into_fresh_surface_restores_state() {
        let source = ChorusParameters::new();
        source.set(ChorusParameter::Feedback.id(), 1.0);
        source.set(ChorusParameter::Depth.id(), 0.37);

        let target = ChorusParameters::new();
        target.import_snapshot(&source.export_snapshot());
        assert_eq!(target.export_snapshot(), source.export_snapshot());
    }

    #[test]
    fn test_state_dictionary_keys() {
        let mut snapshot = ParameterSnapshot::new();
        snapshot.insert(0, 0.25);
        snapshot.insert(4, 1.0);

        let dictionary = to_state_dictionary(&snapshot);
        assert_eq!(dictionary.get("0"), Some(&0.25));
        assert_eq!(dictionary.get("4"), Some(&1.0));

        assert_eq!(from_state_dictionary(&dictionary), snapshot);
    }

    #[test]
    fn test_state_dictionary_skips_bad_keys() {
        let mut dictionary = StateDictionary::new();
        dictionary.insert("2".to_string(), 0.5);
        dictionary.insert("preset".to_string(), 3.0);
        dictionary.insert("-1".to_string(), 0.1);

        let snapshot = from_state_dictionary(&dictionary);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(&2), Some(&0.5));
    }
}
