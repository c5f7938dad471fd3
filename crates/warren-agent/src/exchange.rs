//! The default payload evaluator: executes cell-store exchange commands
//! against the agent's shared memory.

use warren_proto::{ExchangeRequest, ExchangeResponse};

use crate::{agent::Evaluator, shm::CellStore};

pub struct ExchangeEvaluator {
    store: CellStore,
}

impl ExchangeEvaluator {
    pub fn new(store: CellStore) -> Self {
        Self { store }
    }

    fn apply(&self, request: ExchangeRequest) -> ExchangeResponse {
        let mut response = ExchangeResponse::default();

        for (name, value) in request.set {
            self.store.set(name.clone(), value);
            response.set.push(name);
        }

        for name in request.get {
            if let Some(value) = self.store.get(&name) {
                response.get.insert(name, value);
            }
        }

        if request.dump {
            response.dump = Some(self.store.dump());
        }

        if request.prune {
            response.pruned = self.store.prune() as u64;
        }

        response
    }
}

impl Evaluator for ExchangeEvaluator {
    fn evaluate(&self, payload: &[u8]) -> Vec<u8> {
        let request = match ExchangeRequest::from_bytes(payload) {
            Ok(request) => request,
            Err(e) => return format!("could not decode exchange request: {e}").into_bytes(),
        };

        let response = self.apply(request);

        match response.to_bytes() {
            Ok(out) => out,
            Err(e) => format!("could not encode exchange response: {e}").into_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ciborium::value::Value;
    use std::collections::BTreeMap;

    fn evaluate(evaluator: &ExchangeEvaluator, request: &ExchangeRequest) -> ExchangeResponse {
        ExchangeResponse::from_bytes(&evaluator.evaluate(&request.to_bytes().unwrap())).unwrap()
    }

    #[test]
    fn set_then_get() {
        let store = CellStore::default();
        let evaluator = ExchangeEvaluator::new(store.clone());

        let request = ExchangeRequest {
            set: BTreeMap::from([("w.level".to_string(), Value::Integer(3.into()))]),
            get: vec!["w.level".into(), "w.missing".into()],
            ..ExchangeRequest::default()
        };
        let response = evaluate(&evaluator, &request);

        assert_eq!(response.set, vec!["w.level"]);
        assert_eq!(response.get.get("w.level"), Some(&Value::Integer(3.into())));
        assert!(!response.get.contains_key("w.missing"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn dump_and_prune() {
        let store = CellStore::default();
        store.set("keep", Value::Bool(true));
        store.set("drop", Value::Null);
        let evaluator = ExchangeEvaluator::new(store.clone());

        let request = ExchangeRequest {
            dump: true,
            prune: true,
            ..ExchangeRequest::default()
        };
        let response = evaluate(&evaluator, &request);

        // Dump reflects the store before the prune ran.
        assert_eq!(response.dump.as_ref().map(|d| d.len()), Some(2));
        assert_eq!(response.pruned, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn garbage_input_reports_an_error() {
        let evaluator = ExchangeEvaluator::new(CellStore::default());
        let out = evaluator.evaluate(b"\xff\xff\xff");
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("could not decode"));
    }
}
