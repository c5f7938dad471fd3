use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use ciborium::value::Value;

/// The agent's shared memory: named cells holding arbitrary CBOR values.
/// Modules read and write their state here; the exchange evaluator exposes
/// it to the controller.
#[derive(Clone, Default)]
pub struct CellStore {
    cells: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl CellStore {
    /// Write a cell. Returns whether a cell of that name already existed.
    pub fn set(&self, name: impl Into<String>, value: Value) -> bool {
        self.cells.lock().unwrap().insert(name.into(), value).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.cells.lock().unwrap().get(name).cloned()
    }

    pub fn dump(&self) -> BTreeMap<String, Value> {
        self.cells.lock().unwrap().clone()
    }

    /// Drop cells holding null. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut cells = self.cells.lock().unwrap();
        let before = cells.len();
        cells.retain(|_, v| !matches!(v, Value::Null));
        before - cells.len()
    }

    pub fn len(&self) -> usize {
        self.cells.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_hold_values() {
        let store = CellStore::default();
        assert!(store.is_empty());

        assert!(!store.set("w.strain", Value::Text("a".into())));
        assert!(store.set("w.strain", Value::Text("b".into())));

        assert_eq!(store.get("w.strain"), Some(Value::Text("b".into())));
        assert_eq!(store.get("w.missing"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn prune_drops_null_cells() {
        let store = CellStore::default();
        store.set("keep", Value::Integer(1.into()));
        store.set("drop", Value::Null);

        assert_eq!(store.prune(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("keep").is_some());
    }
}
