use crate::config::EntityBinding;
use filpilote_lib::{EntityRef, EntityState, StateSource};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Last known state of every bound entity, fed from MQTT.
#[derive(Debug, Default)]
pub struct StateStore {
    states: HashMap<EntityRef, EntityState>,
    bindings: HashMap<String, Vec<(EntityRef, EntityBinding)>>,
}

impl StateStore {
    pub fn new(entities: &BTreeMap<EntityRef, EntityBinding>) -> Self {
        let mut bindings: HashMap<String, Vec<(EntityRef, EntityBinding)>> = HashMap::new();
        for (entity, binding) in entities {
            bindings
                .entry(binding.topic.clone())
                .or_default()
                .push((entity.clone(), binding.clone()));
        }
        Self {
            states: HashMap::new(),
            bindings,
        }
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Stores the payload for every entity bound to `topic` and returns the
    /// ones whose state changed.
    pub fn ingest(&mut self, topic: &str, payload: &[u8]) -> Vec<EntityRef> {
        let Some(bound) = self.bindings.get(topic) else {
            return Vec::new();
        };
        let mut changed = Vec::new();
        for (entity, binding) in bound {
            let state = decode(payload, binding);
            if self.states.get(entity) != Some(&state) {
                tracing::debug!("{} <- {:?}", entity, state);
                self.states.insert(entity.clone(), state);
                changed.push(entity.clone());
            }
        }
        changed
    }
}

impl StateSource for StateStore {
    fn state(&self, entity: &EntityRef) -> EntityState {
        self.states.get(entity).cloned().unwrap_or_default()
    }
}

fn decode(payload: &[u8], binding: &EntityBinding) -> EntityState {
    let state = match (serde_json::from_slice::<Value>(payload), &binding.pointer) {
        (Ok(value), Some(pointer)) => value
            .pointer(pointer)
            .map_or(EntityState::Unknown, from_json),
        (Ok(value), None) => from_json(&value),
        (Err(_), Some(_)) => EntityState::Unknown,
        (Err(_), None) => EntityState::parse(&String::from_utf8_lossy(payload)),
    };
    match state {
        EntityState::On if binding.invert => EntityState::Off,
        EntityState::Off if binding.invert => EntityState::On,
        state => state,
    }
}

fn from_json(value: &Value) -> EntityState {
    match value {
        Value::Null => EntityState::Unknown,
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => n.as_f64().map_or(EntityState::Unknown, EntityState::Numeric),
        Value::String(s) => EntityState::parse(s),
        other => EntityState::Text(other.to_string()),
    }
}
