//! Session registry
//!
//! The registry is the single source of truth for which sessions exist.
//! Create-or-get runs under the map's per-key entry lock, so concurrent
//! starts for one id always resolve to the same controller.

use crate::controller::SessionController;
use crate::error::{LinkError, Result};
use crate::types::SessionInfo;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// In-memory map of session id to controller
///
/// Nothing here is persisted: a process restart forgets every live session
/// while their credential files stay on disk.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionController>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session, failing if the id is taken
    pub fn create<F>(&self, session_id: &str, make: F) -> Result<Arc<SessionController>>
    where
        F: FnOnce() -> Arc<SessionController>,
    {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(LinkError::AlreadyExists(session_id.to_string())),
            Entry::Vacant(slot) => {
                let session = make();
                slot.insert(session.clone());
                Ok(session)
            }
        }
    }

    /// Return the registered session, creating it if absent
    ///
    /// The flag is true when this call created the session.
    pub fn get_or_create<F>(&self, session_id: &str, make: F) -> (Arc<SessionController>, bool)
    where
        F: FnOnce() -> Arc<SessionController>,
    {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                let session = make();
                slot.insert(session.clone());
                (session, true)
            }
        }
    }

    /// Look up a session
    pub fn get(&self, session_id: &str) -> Result<Arc<SessionController>> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LinkError::SessionNotFound(session_id.to_string()))
    }

    /// Whether `session` is the instance currently registered under its id
    pub fn is_current(&self, session_id: &str, session: &Arc<SessionController>) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), session))
    }

    /// Remove a session unconditionally
    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionController>> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    /// Remove a session only if it is the given instance
    pub fn remove_if_same(&self, session_id: &str, session: &Arc<SessionController>) -> bool {
        self.sessions
            .remove_if(session_id, |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Snapshot of all sessions, ordered by id
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|entry| entry.value().info()).collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    /// Remove and return every session
    pub fn drain(&self) -> Vec<Arc<SessionController>> {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRouter;
    use crate::config::TimeoutsConfig;
    use crate::controller::SessionDeps;
    use crate::provider::memory::MemoryProvider;
    use crate::reconnect::ReconnectPolicy;
    use crate::store::MemoryCredentialStore;
    use crate::types::{ConnectionState, DEFAULT_ADDRESS_DOMAIN};
    use std::sync::Weak;

    fn deps() -> Arc<SessionDeps> {
        Arc::new(SessionDeps {
            provider: Arc::new(MemoryProvider::default()),
            store: Arc::new(MemoryCredentialStore::default()),
            router: Arc::new(CommandRouter::new("!", DEFAULT_ADDRESS_DOMAIN)),
            policy: ReconnectPolicy::immediate(1),
            timeouts: TimeoutsConfig::default(),
        })
    }

    fn controller(id: &str) -> Arc<SessionController> {
        SessionController::new(id, deps(), Weak::new())
    }

    #[test]
    fn test_create_rejects_duplicates() {
        let registry = SessionRegistry::new();
        registry.create("a", || controller("a")).unwrap();

        let err = registry.create("a", || controller("a")).err().unwrap();
        assert!(matches!(err, LinkError::AlreadyExists(id) if id == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = SessionRegistry::new();
        let (first, created) = registry.get_or_create("a", || controller("a"));
        assert!(created);

        let (second, created) =
            registry.get_or_create("a", || panic!("must not construct twice"));
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_get_missing() {
        let registry = SessionRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(LinkError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_remove_if_same_ignores_stale_instance() {
        let registry = SessionRegistry::new();
        let stale = controller("a");
        let (current, _) = registry.get_or_create("a", || controller("a"));

        assert!(!registry.remove_if_same("a", &stale));
        assert!(registry.is_current("a", &current));

        assert!(registry.remove_if_same("a", &current));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_is_sorted() {
        let registry = SessionRegistry::new();
        for id in ["c", "a", "b"] {
            registry.create(id, || controller(id)).unwrap();
        }

        let list = registry.list();
        let ids: Vec<&str> = list.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(list
            .iter()
            .all(|s| s.connection_state == ConnectionState::Initializing && !s.is_connected));
    }

    #[test]
    fn test_drain() {
        let registry = SessionRegistry::new();
        registry.create("a", || controller("a")).unwrap();
        registry.create("b", || controller("b")).unwrap();

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_get_or_create() {
        let registry = Arc::new(SessionRegistry::new());
        let built = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let built = built.clone();
                std::thread::spawn(move || {
                    registry.get_or_create("a", || {
                        built.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        controller("a")
                    })
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(built.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }
}
