use crate::error::StateError;
use crate::params::{FilterType, ParamId, ParameterStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const STATE_VERSION: u32 = 1;

// =============================================================================
// PERSISTED STATE
// =============================================================================

/// Everything needed to bring a session back: the four parameter values and
/// the file the impulse response was loaded from.
///
/// The host framework persists the parameters itself; this struct is the
/// format used outside a host (offline renderer, saved settings files).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginState {
    pub version: u32,
    pub mix: f32,
    pub cutoff: f32,
    pub resonance: f32,
    pub filter_type: FilterType,
    #[serde(default)]
    pub ir_path: Option<PathBuf>,
}

impl Default for PluginState {
    fn default() -> Self {
        Self::capture(&ParameterStore::new(), None)
    }
}

impl PluginState {
    pub fn capture(store: &ParameterStore, ir_path: Option<PathBuf>) -> Self {
        let snap = store.snapshot();
        Self {
            version: STATE_VERSION,
            mix: snap.mix,
            cutoff: snap.cutoff,
            resonance: snap.resonance,
            filter_type: snap.filter_type,
            ir_path,
        }
    }

    /// Writes the values back through the store, which clamps anything a
    /// hand-edited file got wrong.
    pub fn apply(&self, store: &ParameterStore) {
        store.set(ParamId::Mix, self.mix);
        store.set(ParamId::Cutoff, self.cutoff);
        store.set(ParamId::Resonance, self.resonance);
        store.set_filter_type(self.filter_type);
    }

    pub fn to_json(&self) -> Result<String, StateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StateError> {
        let state: PluginState = serde_json::from_str(json)?;
        if state.version > STATE_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: state.version,
                supported: STATE_VERSION,
            });
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_and_apply() {
        let source = ParameterStore::new();
        source.set(ParamId::Mix, 0.8);
        source.set(ParamId::Cutoff, 500.0);
        source.set_filter_type(FilterType::LowPass);

        let state = PluginState::capture(&source, Some(PathBuf::from("/irs/hall.wav")));
        let json = state.to_json().unwrap();
        let restored = PluginState::from_json(&json).unwrap();
        assert_eq!(restored, state);

        let target = ParameterStore::new();
        restored.apply(&target);
        assert_eq!(target.snapshot(), source.snapshot());
    }

    #[test]
    fn test_apply_clamps_bad_values() {
        let state = PluginState {
            mix: 3.0,
            resonance: 0.0,
            ..PluginState::default()
        };
        let store = ParameterStore::new();
        state.apply(&store);
        assert_eq!(store.mix(), 1.0);
        assert_eq!(store.resonance(), 1.0);
    }

    #[test]
    fn test_missing_ir_path_defaults_to_none() {
        let json = r#"{"version":1,"mix":0.5,"cutoff":1000.0,"resonance":1.0,"filter_type":"High Pass"}"#;
        let state = PluginState::from_json(json).unwrap();
        assert_eq!(state.filter_type, FilterType::HighPass);
        assert!(state.ir_path.is_none());
    }

    #[test]
    fn test_rejects_future_version() {
        let json = r#"{"version":99,"mix":0.5,"cutoff":1000.0,"resonance":1.0,"filter_type":"No Filter"}"#;
        assert!(matches!(
            PluginState::from_json(json),
            Err(StateError::UnsupportedVersion { found: 99, .. })
        ));
    }
}
