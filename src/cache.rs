//! Variable handle cache
//!
//! Maps `(class, index)` to a resolved remote handle. How long a handle lives
//! is decided by the [`CachePolicy`]; callers use the same `get`/`set`/
//! `invalidate` calls regardless of which policy is active.

use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::session::RemoteSession;
use crate::transport::RemoteHandle;
use crate::variable::{Value, VariableClass};
use crate::{RC8Error, Result};

/// Handle lifetime strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Resolve once per key, keep for the life of the session
    Persistent,
    /// Resolve on first use, keep until invalidated
    #[default]
    Lazy,
    /// Resolve, use once, release
    OnDemand,
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CachePolicy::Persistent => "persistent",
            CachePolicy::Lazy => "lazy",
            CachePolicy::OnDemand => "on_demand",
        };
        f.write_str(name)
    }
}

type Key = (VariableClass, u16);
type Entries = RefCell<HashMap<Key, RemoteHandle>>;

pub struct HandleCache {
    session: Arc<RemoteSession>,
    policy: CachePolicy,
    /// Held across the whole check-resolve-store-use sequence
    entries: ReentrantMutex<Entries>,
}

impl HandleCache {
    pub fn new(session: Arc<RemoteSession>, policy: CachePolicy) -> Self {
        Self {
            session,
            policy,
            entries: ReentrantMutex::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Number of live cached handles
    pub fn len(&self) -> usize {
        self.entries.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, class: VariableClass, index: i64) -> Result<Value> {
        let index = class.check_index(index)?;
        self.session.controller()?;

        let value = self.with_handle(class, index, |handle| self.session.get_value(handle))?;
        info!("{}{} read: {}", class, index, value);
        Ok(value)
    }

    pub fn set(&self, class: VariableClass, index: i64, value: Value) -> Result<()> {
        let index = class.check_index(index)?;
        let value = class.coerce(value)?;
        self.session.controller()?;

        self.with_handle(class, index, |handle| self.session.put_value(handle, &value))?;
        info!("{}{} set to: {}", class, index, value);
        Ok(())
    }

    /// Drop cached handles for one class, or all of them.
    ///
    /// Only the lazy policy actually evicts; for the other policies this is a
    /// logged no-op so callers never need to know which policy is active.
    pub fn invalidate(&self, class: Option<VariableClass>) {
        match self.policy {
            CachePolicy::OnDemand => {
                debug!("Variable cache invalidation ignored: on-demand policy holds no handles");
            }
            CachePolicy::Persistent => {
                debug!("Variable cache invalidation ignored: persistent handles live for the session");
            }
            CachePolicy::Lazy => {
                let released = self.evict(|key| class.map_or(true, |c| key.0 == c));
                match class {
                    Some(class) => info!("Invalidated {} cached {} handles", released, class),
                    None => info!("Invalidated {} cached variable handles", released),
                }
            }
        }
    }

    /// Release every cached handle regardless of policy
    pub fn clear(&self) -> usize {
        let released = self.evict(|_| true);
        if released > 0 {
            info!("Released {} variable handles", released);
        }
        released
    }

    /// Resolve every variable of every class up front. Only the persistent
    /// policy preloads; the others resolve on use.
    pub fn preload(&self) -> Result<usize> {
        if self.policy != CachePolicy::Persistent {
            debug!("Preload skipped: {} policy resolves handles on use", self.policy);
            return Ok(0);
        }
        self.session.controller()?;

        let guard = self.entries.lock();
        let mut loaded = 0;
        for class in VariableClass::ALL {
            for index in 0..=class.max_index() {
                self.resolve(&guard, (class, index))?;
            }
            loaded += class.capacity();
            info!("{} {} variables loaded", class.capacity(), class);
        }
        Ok(loaded)
    }

    fn with_handle<T>(
        &self,
        class: VariableClass,
        index: u16,
        op: impl FnOnce(RemoteHandle) -> Result<T>,
    ) -> Result<T> {
        let key = (class, index);

        if self.policy == CachePolicy::OnDemand {
            let handle = self.session.open_named_variable(&class.variable_name(index))?;
            let result = op(handle);
            if let Err(e) = self.session.release_handle(handle) {
                warn!("Failed to release {}{} handle {}: {}", class, index, handle, e);
            }
            return result;
        }

        let guard = self.entries.lock();
        let handle = self.resolve(&guard, key)?;
        let result = op(handle);

        if self.policy == CachePolicy::Lazy {
            if let Err(RC8Error::RemoteProtocol { code, .. }) = &result {
                warn!("{}{} failed with {:#010x}, evicting cached handle {}", class, index, code, handle);
                guard.borrow_mut().remove(&key);
                self.session.release_best_effort(handle, "stale variable");
            }
        }
        result
    }

    /// Cached handle for `key`, resolving and storing it on a miss.
    /// Must be called with the entries lock held.
    fn resolve(&self, entries: &Entries, key: Key) -> Result<RemoteHandle> {
        let cached = entries.borrow().get(&key).copied();
        if let Some(handle) = cached {
            debug!("Handle cache hit for {}{}", key.0, key.1);
            return Ok(handle);
        }

        let handle = self.session.open_named_variable(&key.0.variable_name(key.1))?;
        debug!("Resolved {}{} to handle {}", key.0, key.1, handle);
        entries.borrow_mut().insert(key, handle);
        Ok(handle)
    }

    fn evict(&self, matches: impl Fn(&Key) -> bool) -> usize {
        let guard = self.entries.lock();
        let evicted: Vec<RemoteHandle> = {
            let mut entries = guard.borrow_mut();
            let keys: Vec<Key> = entries.keys().filter(|k| matches(k)).copied().collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };
        for handle in &evicted {
            self.session.release_best_effort(*handle, "variable");
        }
        evicted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{Operation, SimulatedController, E_INVALID_HANDLE};

    fn cache(policy: CachePolicy) -> (Arc<SimulatedController>, HandleCache) {
        let sim = Arc::new(SimulatedController::new());
        let session = Arc::new(RemoteSession::new(sim.clone()));
        session.configure("127.0.0.1", 5007, 2000);
        session.start().unwrap();
        sim.clear_calls();
        (sim, HandleCache::new(session, policy))
    }

    #[test]
    fn test_lazy_cache_hit_skips_resolution() {
        let (sim, cache) = cache(CachePolicy::Lazy);
        cache.set(VariableClass::S, 10, Value::Text("hello".into())).unwrap();
        assert_eq!(cache.get(VariableClass::S, 10).unwrap(), Value::Text("hello".into()));
        assert_eq!(cache.get(VariableClass::S, 10).unwrap(), Value::Text("hello".into()));

        assert_eq!(sim.call_count_for(Operation::OpenVariable, "S10"), 1);
        assert_eq!(sim.call_count(Operation::ReleaseHandle), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_on_demand_releases_every_time() {
        let (sim, cache) = cache(CachePolicy::OnDemand);
        for _ in 0..3 {
            cache.get(VariableClass::I, 4).unwrap();
        }
        cache.set(VariableClass::I, 4, Value::Integer(9)).unwrap();

        assert_eq!(sim.call_count(Operation::OpenVariable), 4);
        assert_eq!(sim.call_count(Operation::ReleaseHandle), 4);
        assert!(cache.is_empty());
        assert_eq!(sim.open_handles(), 1);
    }

    #[test]
    fn test_on_demand_releases_after_failed_put() {
        let (sim, cache) = cache(CachePolicy::OnDemand);
        sim.inject_fault(Operation::PutValue, -9);

        assert!(cache.set(VariableClass::I, 1, Value::Integer(1)).is_err());
        // Only the controller handle is left open
        assert_eq!(sim.open_handles(), 1);
    }

    #[test]
    fn test_index_checked_before_remote_call() {
        let (sim, cache) = cache(CachePolicy::Lazy);
        assert!(matches!(
            cache.get(VariableClass::IO, 500),
            Err(RC8Error::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            cache.get(VariableClass::IO, -1),
            Err(RC8Error::IndexOutOfRange { .. })
        ));
        assert!(sim.calls().is_empty());
        assert!(cache.get(VariableClass::IO, 0).is_ok());
        assert!(cache.get(VariableClass::IO, 499).is_ok());
    }

    #[test]
    fn test_value_shape_checked_before_remote_call() {
        let (sim, cache) = cache(CachePolicy::Lazy);
        assert!(matches!(
            cache.set(VariableClass::P, 1, Value::Text("nope".into())),
            Err(RC8Error::ValueMismatch { .. })
        ));
        assert!(sim.calls().is_empty());
    }

    #[test]
    fn test_not_connected() {
        let sim = Arc::new(SimulatedController::new());
        let session = Arc::new(RemoteSession::new(sim.clone()));
        let cache = HandleCache::new(session, CachePolicy::Lazy);
        assert!(matches!(cache.get(VariableClass::S, 1), Err(RC8Error::NotConnected)));
    }

    #[test]
    fn test_lazy_invalidate_by_class() {
        let (sim, cache) = cache(CachePolicy::Lazy);
        cache.get(VariableClass::S, 1).unwrap();
        cache.get(VariableClass::S, 2).unwrap();
        cache.get(VariableClass::F, 1).unwrap();

        cache.invalidate(Some(VariableClass::S));
        assert_eq!(cache.len(), 1);
        assert_eq!(sim.call_count(Operation::ReleaseHandle), 2);

        cache.get(VariableClass::S, 1).unwrap();
        assert_eq!(sim.call_count_for(Operation::OpenVariable, "S1"), 2);

        cache.invalidate(None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_persistent_invalidate_keeps_handles() {
        let (sim, cache) = cache(CachePolicy::Persistent);
        cache.get(VariableClass::V, 3).unwrap();
        cache.invalidate(None);
        cache.get(VariableClass::V, 3).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(sim.call_count_for(Operation::OpenVariable, "V3"), 1);
        assert_eq!(sim.call_count(Operation::ReleaseHandle), 0);
    }

    #[test]
    fn test_on_demand_invalidate_is_noop() {
        let (_sim, cache) = cache(CachePolicy::OnDemand);
        cache.invalidate(Some(VariableClass::IO));
        cache.invalidate(None);
    }

    #[test]
    fn test_lazy_evicts_stale_handle_on_failure() {
        let (sim, cache) = cache(CachePolicy::Lazy);
        cache.get(VariableClass::F, 5).unwrap();
        sim.inject_fault(Operation::GetValue, E_INVALID_HANDLE);

        let err = cache.get(VariableClass::F, 5).unwrap_err();
        assert_eq!(err.code(), Some(E_INVALID_HANDLE));
        assert!(cache.is_empty());

        cache.get(VariableClass::F, 5).unwrap();
        assert_eq!(sim.call_count_for(Operation::OpenVariable, "F5"), 2);
    }

    #[test]
    fn test_preload_resolves_every_variable() {
        let (sim, cache) = cache(CachePolicy::Persistent);
        let loaded = cache.preload().unwrap();

        assert_eq!(loaded, 500 + 48 * 2 + 98 * 4);
        assert_eq!(cache.len(), loaded);
        cache.get(VariableClass::J, 97).unwrap();
        assert_eq!(sim.call_count_for(Operation::OpenVariable, "J97"), 1);
    }

    #[test]
    fn test_preload_only_under_persistent() {
        for policy in [CachePolicy::Lazy, CachePolicy::OnDemand] {
            let (sim, cache) = cache(policy);
            assert_eq!(cache.preload().unwrap(), 0);
            assert!(cache.is_empty());
            assert_eq!(sim.call_count(Operation::OpenVariable), 0);
        }
    }

    #[test]
    fn test_clear_releases_all() {
        let (sim, cache) = cache(CachePolicy::Persistent);
        cache.get(VariableClass::IO, 1).unwrap();
        cache.get(VariableClass::IO, 2).unwrap();

        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
        assert_eq!(sim.open_handles(), 1);
    }
}
