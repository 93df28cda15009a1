//! Bidirectional handler/token table for a single category.
//!
//! Both directions live behind one set of methods so an entry is always
//! inserted into and removed from both indexes together.

use super::category::{CallbackToken, HandlerId};
use std::collections::HashMap;

/// A registered handler together with its token and reference count
#[derive(Debug, Clone)]
pub struct RegistryEntry<H> {
    pub handler: H,
    pub handler_id: HandlerId,
    pub token: CallbackToken,
    pub ref_count: u32,
}

#[derive(Debug)]
pub(crate) struct TokenTable<H> {
    by_handler: HashMap<HandlerId, CallbackToken>,
    by_token: HashMap<CallbackToken, RegistryEntry<H>>,
}

impl<H> TokenTable<H> {
    pub(crate) fn new() -> Self {
        Self {
            by_handler: HashMap::new(),
            by_token: HashMap::new(),
        }
    }

    pub(crate) fn token_of(&self, handler_id: HandlerId) -> Option<CallbackToken> {
        self.by_handler.get(&handler_id).copied()
    }

    pub(crate) fn get(&self, token: CallbackToken) -> Option<&RegistryEntry<H>> {
        self.by_token.get(&token)
    }

    pub(crate) fn get_by_handler_mut(
        &mut self,
        handler_id: HandlerId,
    ) -> Option<&mut RegistryEntry<H>> {
        let token = self.by_handler.get(&handler_id)?;
        self.by_token.get_mut(token)
    }

    pub(crate) fn insert(&mut self, entry: RegistryEntry<H>) {
        debug_assert!(!self.by_token.contains_key(&entry.token));
        self.by_handler.insert(entry.handler_id, entry.token);
        self.by_token.insert(entry.token, entry);
    }

    pub(crate) fn remove_by_handler(&mut self, handler_id: HandlerId) -> Option<RegistryEntry<H>> {
        let token = self.by_handler.remove(&handler_id)?;
        self.by_token.remove(&token)
    }

    pub(crate) fn drain(&mut self) -> Vec<RegistryEntry<H>> {
        self.by_handler.clear();
        let mut entries: Vec<_> = self.by_token.drain().map(|(_, entry)| entry).collect();
        entries.sort_by_key(|entry| entry.token);
        entries
    }

    pub(crate) fn len(&self) -> usize {
        debug_assert_eq!(self.by_handler.len(), self.by_token.len());
        self.by_token.len()
    }
}
