//! Registry of named dispatchers.
//!
//! Front-ends that name the same pool share one dispatcher. The registry is an
//! ordinary value owned by the application: create it at startup, hand it to
//! whoever builds front-ends, and call [`shutdown_all`](DispatcherRegistry::shutdown_all)
//! when tearing down.

use crate::application::dispatcher::{DispatcherConfig, PooledDispatcher};
use crate::application::error::{BuildError, SinkError};
use crate::application::ports::Clock;
use crate::infrastructure::clock::SystemClock;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Named dispatchers with create-if-absent, start-once semantics.
#[derive(Debug, Clone)]
pub struct DispatcherRegistry {
    pools: Arc<DashMap<String, PooledDispatcher>>,
    clock: Arc<dyn Clock>,
}

impl DispatcherRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty registry whose dispatchers read time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            pools: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Return the started dispatcher named `config.name`, creating it first if
    /// there is none.
    ///
    /// An existing pool keeps its original settings; `config` only applies
    /// when a pool is created. A pool that was shut down is replaced.
    ///
    /// # Errors
    /// Returns a `BuildError` if the config is invalid or the threads cannot
    /// be started.
    pub fn get_or_start(&self, config: DispatcherConfig) -> Result<PooledDispatcher, BuildError> {
        let dispatcher = match self.pools.entry(config.name.clone()) {
            Entry::Occupied(mut entry) if entry.get().is_shut_down() => {
                let fresh = PooledDispatcher::with_clock(config, Arc::clone(&self.clock))?;
                entry.insert(fresh.clone());
                fresh
            }
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let fresh = PooledDispatcher::with_clock(config, Arc::clone(&self.clock))?;
                entry.insert(fresh.clone());
                fresh
            }
        };

        dispatcher.start().map_err(BuildError::Start)?;
        Ok(dispatcher)
    }

    /// Look up a dispatcher by name.
    pub fn get(&self, name: &str) -> Option<PooledDispatcher> {
        self.pools.get(name).map(|entry| entry.value().clone())
    }

    /// Forget a dispatcher without stopping it.
    pub fn remove(&self, name: &str) -> Option<PooledDispatcher> {
        self.pools.remove(name).map(|(_, dispatcher)| dispatcher)
    }

    /// Names of every registered dispatcher.
    pub fn names(&self) -> Vec<String> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Shut every dispatcher down and empty the registry.
    pub fn shutdown_all(&self, reason: Option<&SinkError>) {
        let names = self.names();
        for name in names {
            if let Some(dispatcher) = self.remove(&name) {
                dispatcher.shutdown(reason);
            }
        }
    }

    /// Number of registered dispatchers.
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

impl Default for DispatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}
