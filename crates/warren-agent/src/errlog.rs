use std::sync::{Arc, Mutex};

/// The agent's in-memory error record. Handler failures land here and the
/// running count is reported in every heartbeat.
#[derive(Clone, Default)]
pub struct ErrorLog {
    inner: Arc<Mutex<Vec<String>>>,
}

impl ErrorLog {
    pub fn record(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!("Agent error recorded: {message}");
        self.inner.lock().unwrap().push(message);
    }

    pub fn count(&self) -> u32 {
        self.inner.lock().unwrap().len() as u32
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate() {
        let log = ErrorLog::default();
        assert_eq!(log.count(), 0);

        log.record("first");
        log.record("second".to_string());

        assert_eq!(log.count(), 2);
        assert_eq!(log.snapshot(), vec!["first", "second"]);
    }
}
