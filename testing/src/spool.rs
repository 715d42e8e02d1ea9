//! In-memory retry spool.

use questline_core::spool::{SpoolError, SpoolStore, SpooledEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct SpoolState {
    entries: HashMap<String, Vec<SpooledEvent>>,
    failing: bool,
    closed: bool,
}

/// In-memory [`SpoolStore`], with a failure toggle so tests can exercise the
/// path where even the spool is unavailable.
#[derive(Clone, Default)]
pub struct InMemorySpool {
    state: Arc<Mutex<SpoolState>>,
}

impl InMemorySpool {
    /// Create an empty spool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SpoolState>, SpoolError> {
        self.state
            .lock()
            .map_err(|_| SpoolError::Storage("spool state lock poisoned".to_string()))
    }

    /// While set, every spool operation fails.
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    /// The entries currently spooled under a key, for assertions.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn entries(&self, routing_key: &str) -> Vec<SpooledEvent> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(routing_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether nothing is spooled at all.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn is_empty(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .entries
            .values()
            .all(Vec::is_empty)
    }

    /// Whether [`close`](SpoolStore::close) was called.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait::async_trait]
impl SpoolStore for InMemorySpool {
    async fn append(&self, routing_key: &str, entry: SpooledEvent) -> Result<(), SpoolError> {
        let mut state = self.lock()?;
        if state.failing {
            return Err(SpoolError::Storage("simulated spool failure".to_string()));
        }
        state
            .entries
            .entry(routing_key.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn read_all(&self, routing_key: &str) -> Result<Vec<SpooledEvent>, SpoolError> {
        let state = self.lock()?;
        if state.failing {
            return Err(SpoolError::Storage("simulated spool failure".to_string()));
        }
        Ok(state.entries.get(routing_key).cloned().unwrap_or_default())
    }

    async fn delete_key(&self, routing_key: &str) -> Result<(), SpoolError> {
        let mut state = self.lock()?;
        if state.failing {
            return Err(SpoolError::Storage("simulated spool failure".to_string()));
        }
        state.entries.remove(routing_key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, SpoolError> {
        let state = self.lock()?;
        if state.failing {
            return Err(SpoolError::Storage("simulated spool failure".to_string()));
        }
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn close(&self) -> Result<(), SpoolError> {
        let mut state = self.lock()?;
        state.closed = true;
        Ok(())
    }
}
