//! # Token Registry
//!
//! Ref-counted mapping between callback handlers and compact tokens,
//! partitioned by [`CallbackCategory`].
//!
//! ## Key Features
//!
//! - **Idempotent registration**: registering a handler that is already known
//!   in a category bumps its reference count and returns the same token
//! - **Atomic check-and-allocate**: each category is guarded by its own mutex,
//!   so concurrent registrations of the same handler never allocate twice
//! - **Monotonic tokens**: tokens are never reused within a category; running
//!   out of tokens is reported as [`CacheError::CategoryExhausted`]
//! - **Lock-free dispatch**: [`TokenRegistry::resolve`] clones the handler out
//!   of the table so callers invoke it without holding the category lock

use super::category::{CallbackCategory, CallbackToken, RegistryHandler};
use super::token_table::{RegistryEntry, TokenTable};
use crate::error::{CacheError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Number of distinct tokens a category can hand out
pub const MAX_TOKENS_PER_CATEGORY: u32 = 1 << 16;

/// Which categories a bulk release applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Category(CallbackCategory),
    All,
}

struct CategoryState<H> {
    table: TokenTable<H>,
    next_token: u32,
}

impl<H> CategoryState<H> {
    fn new() -> Self {
        Self {
            table: TokenTable::new(),
            next_token: 0,
        }
    }
}

/// Registry of callback handlers keyed by category
pub struct TokenRegistry<H> {
    categories: Vec<Mutex<CategoryState<H>>>,
    token_limit: u32,
}

impl<H: RegistryHandler> TokenRegistry<H> {
    /// Create a registry where every category can issue the full 16-bit range
    pub fn new() -> Self {
        Self::with_token_limit(MAX_TOKENS_PER_CATEGORY)
    }

    /// Create a registry that issues at most `limit` tokens per category
    pub fn with_token_limit(limit: u32) -> Self {
        let token_limit = limit.clamp(1, MAX_TOKENS_PER_CATEGORY);
        Self {
            categories: CallbackCategory::ALL
                .iter()
                .map(|_| Mutex::new(CategoryState::new()))
                .collect(),
            token_limit,
        }
    }

    fn state(&self, category: CallbackCategory) -> &Mutex<CategoryState<H>> {
        &self.categories[category.index()]
    }

    /// Register a handler, returning its token within `category`
    pub fn register(&self, category: CallbackCategory, handler: &H) -> Result<CallbackToken> {
        let handler_id = handler.handler_id();
        let mut state = self.state(category).lock();

        if let Some(entry) = state.table.get_by_handler_mut(handler_id) {
            entry.ref_count += 1;
            debug!(
                category = %category,
                token = %entry.token,
                ref_count = entry.ref_count,
                "Handler already registered, reference count incremented"
            );
            return Ok(entry.token);
        }

        if state.next_token >= self.token_limit {
            warn!(category = %category, limit = self.token_limit, "Callback category exhausted");
            return Err(CacheError::CategoryExhausted { category });
        }

        let token = CallbackToken::new(state.next_token as u16);
        state.next_token += 1;
        state.table.insert(RegistryEntry {
            handler: handler.clone(),
            handler_id,
            token,
            ref_count: 1,
        });

        debug!(category = %category, token = %token, "Registered callback handler");
        Ok(token)
    }

    /// Drop one reference to `handler`.
    ///
    /// Returns the freed token once the last reference is gone, `None` while
    /// references remain or when the handler was never registered.
    pub fn unregister(&self, category: CallbackCategory, handler: &H) -> Option<CallbackToken> {
        let handler_id = handler.handler_id();
        let mut state = self.state(category).lock();

        let entry = state.table.get_by_handler_mut(handler_id)?;
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            debug!(
                category = %category,
                token = %entry.token,
                ref_count = entry.ref_count,
                "Handler reference released"
            );
            return None;
        }

        let removed = state.table.remove_by_handler(handler_id)?;
        debug!(category = %category, token = %removed.token, "Unregistered callback handler");
        Some(removed.token)
    }

    /// Look up the handler that owns `token`, if it is still registered
    pub fn resolve(&self, category: CallbackCategory, token: CallbackToken) -> Option<H> {
        let state = self.state(category).lock();
        state.table.get(token).map(|entry| entry.handler.clone())
    }

    /// Token currently assigned to `handler`, without touching its reference count
    pub fn token_of(&self, category: CallbackCategory, handler: &H) -> Option<CallbackToken> {
        self.state(category).lock().table.token_of(handler.handler_id())
    }

    /// Current reference count of `handler`
    pub fn ref_count(&self, category: CallbackCategory, handler: &H) -> Option<u32> {
        let state = self.state(category).lock();
        let token = state.table.token_of(handler.handler_id())?;
        state.table.get(token).map(|entry| entry.ref_count)
    }

    /// Number of live entries in `category`
    pub fn live_entries(&self, category: CallbackCategory) -> usize {
        self.state(category).lock().table.len()
    }

    /// Release every entry in scope regardless of reference counts.
    ///
    /// Token counters are left untouched so revoked tokens are never handed
    /// out again while the engine might still deliver to them.
    pub fn clear(&self, scope: ClearScope) -> Vec<(CallbackCategory, CallbackToken)> {
        let categories: Vec<CallbackCategory> = match scope {
            ClearScope::Category(category) => vec![category],
            ClearScope::All => CallbackCategory::ALL.to_vec(),
        };

        let mut released = Vec::new();
        for category in categories {
            let entries = self.state(category).lock().table.drain();
            released.extend(entries.into_iter().map(|entry| (category, entry.token)));
        }

        if !released.is_empty() {
            debug!(released = released.len(), ?scope, "Cleared callback registrations");
        }
        released
    }

    /// Snapshot of live entries per category
    pub fn stats(&self) -> RegistryStats {
        let mut live_entries = HashMap::new();
        for category in CallbackCategory::ALL {
            let count = self.live_entries(category);
            if count > 0 {
                live_entries.insert(category, count);
            }
        }
        RegistryStats {
            total_entries: live_entries.values().sum(),
            live_entries,
        }
    }
}

impl<H: RegistryHandler> Default for TokenRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the registry contents
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub total_entries: usize,
    pub live_entries: HashMap<CallbackCategory, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::category::HandlerId;
    use std::sync::Arc;

    #[derive(Clone)]
    struct TestHandler(Arc<String>);

    impl TestHandler {
        fn new(name: &str) -> Self {
            Self(Arc::new(name.to_string()))
        }
    }

    impl RegistryHandler for TestHandler {
        fn handler_id(&self) -> HandlerId {
            HandlerId::of(&self.0)
        }
    }

    #[test]
    fn test_same_handler_twice_shares_token() {
        let registry = TokenRegistry::new();
        let handler = TestHandler::new("on_update");

        let first = registry.register(CallbackCategory::ItemUpdated, &handler).unwrap();
        let second = registry
            .register(CallbackCategory::ItemUpdated, &handler.clone())
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.live_entries(CallbackCategory::ItemUpdated), 1);
        assert_eq!(
            registry.ref_count(CallbackCategory::ItemUpdated, &handler),
            Some(2)
        );
    }

    #[test]
    fn test_unregister_returns_token_on_last_reference_only() {
        let registry = TokenRegistry::new();
        let handler = TestHandler::new("on_remove");
        let token = registry.register(CallbackCategory::ItemRemoved, &handler).unwrap();
        registry.register(CallbackCategory::ItemRemoved, &handler).unwrap();

        assert_eq!(registry.unregister(CallbackCategory::ItemRemoved, &handler), None);
        assert_eq!(
            registry.unregister(CallbackCategory::ItemRemoved, &handler),
            Some(token)
        );
        assert_eq!(registry.live_entries(CallbackCategory::ItemRemoved), 0);
        assert!(registry.resolve(CallbackCategory::ItemRemoved, token).is_none());

        // Double unregister is a no-op
        assert_eq!(registry.unregister(CallbackCategory::ItemRemoved, &handler), None);
    }

    #[test]
    fn test_tokens_are_monotonic_and_never_reused() {
        let registry = TokenRegistry::new();
        let a = TestHandler::new("a");
        let b = TestHandler::new("b");
        let c = TestHandler::new("c");

        let ta = registry.register(CallbackCategory::GeneralEvent, &a).unwrap();
        let tb = registry.register(CallbackCategory::GeneralEvent, &b).unwrap();
        registry.unregister(CallbackCategory::GeneralEvent, &a);
        let tc = registry.register(CallbackCategory::GeneralEvent, &c).unwrap();

        assert!(ta < tb);
        assert!(tb < tc);
        assert_ne!(ta, tc);
    }

    #[test]
    fn test_categories_are_independent() {
        let registry = TokenRegistry::new();
        let handler = TestHandler::new("shared");

        let update = registry.register(CallbackCategory::ItemUpdated, &handler).unwrap();
        let remove = registry.register(CallbackCategory::ItemRemoved, &handler).unwrap();

        assert_eq!(update.value(), 0);
        assert_eq!(remove.value(), 0);
        registry.unregister(CallbackCategory::ItemUpdated, &handler);
        assert!(registry.resolve(CallbackCategory::ItemRemoved, remove).is_some());
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let registry = TokenRegistry::with_token_limit(2);
        let handlers: Vec<_> = (0..3).map(|i| TestHandler::new(&i.to_string())).collect();

        registry.register(CallbackCategory::Polling, &handlers[0]).unwrap();
        registry.register(CallbackCategory::Polling, &handlers[1]).unwrap();
        let err = registry
            .register(CallbackCategory::Polling, &handlers[2])
            .unwrap_err();
        assert_eq!(
            err,
            CacheError::CategoryExhausted {
                category: CallbackCategory::Polling
            }
        );

        // Existing handlers can still take more references
        registry.register(CallbackCategory::Polling, &handlers[0]).unwrap();
        // Other categories are unaffected
        registry.register(CallbackCategory::AsyncAdd, &handlers[2]).unwrap();
    }

    #[test]
    fn test_resolve_unknown_token() {
        let registry: TokenRegistry<TestHandler> = TokenRegistry::new();
        assert!(registry
            .resolve(CallbackCategory::CustomEvent, CallbackToken::new(42))
            .is_none());
    }

    #[test]
    fn test_concurrent_registration_of_same_handler() {
        let registry = TokenRegistry::new();
        let handler = TestHandler::new("concurrent");

        let tokens: Vec<CallbackToken> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let registry = &registry;
                    let handler = handler.clone();
                    scope.spawn(move || {
                        (0..50)
                            .map(|_| {
                                registry
                                    .register(CallbackCategory::ItemAdded, &handler)
                                    .unwrap()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| worker.join().unwrap())
                .collect()
        });

        assert!(tokens.iter().all(|token| *token == tokens[0]));
        assert_eq!(registry.live_entries(CallbackCategory::ItemAdded), 1);
        assert_eq!(
            registry.ref_count(CallbackCategory::ItemAdded, &handler),
            Some(400)
        );
    }

    #[test]
    fn test_clear_scopes() {
        let registry = TokenRegistry::new();
        let handler = TestHandler::new("h");
        registry.register(CallbackCategory::ItemUpdated, &handler).unwrap();
        registry.register(CallbackCategory::ItemUpdated, &handler).unwrap();
        registry.register(CallbackCategory::AsyncClear, &handler).unwrap();

        let released = registry.clear(ClearScope::Category(CallbackCategory::ItemUpdated));
        assert_eq!(
            released,
            vec![(CallbackCategory::ItemUpdated, CallbackToken::new(0))]
        );
        assert_eq!(registry.stats().total_entries, 1);

        registry.clear(ClearScope::All);
        assert_eq!(registry.stats().total_entries, 0);

        // Counter keeps advancing after a clear
        let next = registry.register(CallbackCategory::ItemUpdated, &handler).unwrap();
        assert_eq!(next.value(), 1);
    }
}
