//! Concurrent session registry keyed by connection identifier.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::{AppError, Result};

/// Thread-safe map of live sessions.
///
/// Insertions and removals are atomic with respect to lookups; callers
/// never need external locking. The registry only holds lookup
/// references, the session owns its process and streams.
#[derive(Debug)]
pub struct SessionRegistry<T> {
    sessions: DashMap<String, Arc<T>>,
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }
}

impl<T> SessionRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session` under `id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::DuplicateSession` if `id` is already registered.
    pub fn put(&self, id: &str, session: Arc<T>) -> Result<()> {
        match self.sessions.entry(id.to_owned()) {
            Entry::Occupied(_) => Err(AppError::DuplicateSession(format!(
                "session {id} already registered"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Look up the session registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no session is registered.
    pub fn get(&self, id: &str) -> Result<Arc<T>> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))
    }

    /// Remove and return the session under `id`; absent ids are a no-op.
    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Remove the entry under `id` only if it is `session` itself.
    pub fn remove_if_same(&self, id: &str, session: &Arc<T>) -> Option<Arc<T>> {
        self.sessions
            .remove_if(id, |_, current| Arc::ptr_eq(current, session))
            .map(|(_, removed)| removed)
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of all registered sessions in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
