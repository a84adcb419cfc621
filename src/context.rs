//! Per-stimulation context store with SCC-aware cleanup (C6).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Per-stimulation keyed state: `neuron_name -> value`.
///
/// Created at stimulation start, mutated through neuron-scoped
/// [`ContextHandle`]s, and torn down with the stimulation. Two overlapping
/// stimulations never share a `ContextStore` (P7) — each `Stimulation` owns
/// its own `Arc<ContextStore>`.
#[derive(Debug, Default)]
pub struct ContextStore {
    slots: DashMap<String, serde_json::Value>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload a store from a prior stimulation's `get_all()` snapshot, as
    /// handed to `activate(...)` to resume work.
    pub fn from_snapshot(values: HashMap<String, serde_json::Value>) -> Self {
        let slots = DashMap::new();
        for (k, v) in values {
            slots.insert(k, v);
        }
        Self { slots }
    }

    pub fn get(&self, neuron_name: &str) -> Option<serde_json::Value> {
        self.slots.get(neuron_name).map(|entry| entry.value().clone())
    }

    pub fn set(&self, neuron_name: &str, value: serde_json::Value) {
        self.slots.insert(neuron_name.to_string(), value);
    }

    pub fn delete(&self, neuron_name: &str) {
        self.slots.remove(neuron_name);
    }

    /// A plain mapping snapshot, suitable for handing to `activate(...)`.
    pub fn get_all(&self) -> HashMap<String, serde_json::Value> {
        self.slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// A handle scoped to the currently executing neuron's context slot.
///
/// Reactions receive one of these per invocation; `get`/`set`/`delete`
/// always route to `self.neuron_name`'s slot, never a sibling's.
#[derive(Clone)]
pub struct ContextHandle {
    neuron_name: String,
    store: Arc<ContextStore>,
}

impl ContextHandle {
    pub fn new(neuron_name: impl Into<String>, store: Arc<ContextStore>) -> Self {
        Self {
            neuron_name: neuron_name.into(),
            store,
        }
    }

    pub fn neuron_name(&self) -> &str {
        &self.neuron_name
    }

    pub fn get<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.store.get(&self.neuron_name) {
            Some(value) => {
                let typed = serde_json::from_value(value).map_err(|source| Error::InvalidPayload {
                    collateral: self.neuron_name.clone(),
                    message: source.to_string(),
                })?;
                Ok(Some(typed))
            }
            None => Ok(None),
        }
    }

    pub fn get_raw(&self) -> Option<serde_json::Value> {
        self.store.get(&self.neuron_name)
    }

    pub fn set<T: Serialize>(&self, value: T) -> Result<()> {
        let encoded = serde_json::to_value(value).map_err(|source| Error::InvalidPayload {
            collateral: self.neuron_name.clone(),
            message: source.to_string(),
        })?;
        self.store.set(&self.neuron_name, encoded);
        Ok(())
    }

    pub fn delete(&self) {
        self.store.delete(&self.neuron_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_typed_values() {
        let store = Arc::new(ContextStore::new());
        let handle = ContextHandle::new("n1", Arc::clone(&store));
        handle.set(42i64).unwrap();
        let value: Option<i64> = handle.get().unwrap();
        assert_eq!(value, Some(42));
    }

    #[test]
    fn handles_are_isolated_per_neuron() {
        let store = Arc::new(ContextStore::new());
        let a = ContextHandle::new("a", Arc::clone(&store));
        let b = ContextHandle::new("b", Arc::clone(&store));
        a.set("a-state").unwrap();
        assert_eq!(b.get::<String>().unwrap(), None);
    }

    #[test]
    fn snapshot_round_trips_through_get_all() {
        let store = ContextStore::new();
        store.set("n1", serde_json::json!({"count": 3}));
        let snapshot = store.get_all();
        let restored = ContextStore::from_snapshot(snapshot);
        assert_eq!(restored.get("n1"), Some(serde_json::json!({"count": 3})));
    }

    #[test]
    fn delete_clears_the_slot() {
        let store = ContextStore::new();
        store.set("n1", serde_json::json!(1));
        store.delete("n1");
        assert_eq!(store.get("n1"), None);
    }
}
