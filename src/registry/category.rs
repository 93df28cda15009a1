//! Callback categories and the compact tokens allocated within them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Independent token spaces, one per callback kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallbackCategory {
    ItemAdded,
    ItemUpdated,
    ItemRemoved,
    CustomEvent,
    AsyncAdd,
    AsyncUpdate,
    AsyncRemove,
    AsyncClear,
    DataSourceItemsAdded,
    DataSourceItemsUpdated,
    DataSourceItemsRemoved,
    DataSourceCleared,
    GeneralEvent,
    Polling,
    MapReduceResult,
}

impl CallbackCategory {
    pub const ALL: [CallbackCategory; 15] = [
        CallbackCategory::ItemAdded,
        CallbackCategory::ItemUpdated,
        CallbackCategory::ItemRemoved,
        CallbackCategory::CustomEvent,
        CallbackCategory::AsyncAdd,
        CallbackCategory::AsyncUpdate,
        CallbackCategory::AsyncRemove,
        CallbackCategory::AsyncClear,
        CallbackCategory::DataSourceItemsAdded,
        CallbackCategory::DataSourceItemsUpdated,
        CallbackCategory::DataSourceItemsRemoved,
        CallbackCategory::DataSourceCleared,
        CallbackCategory::GeneralEvent,
        CallbackCategory::Polling,
        CallbackCategory::MapReduceResult,
    ];

    /// Position of the category in [`CallbackCategory::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallbackCategory::ItemAdded => "item-added",
            CallbackCategory::ItemUpdated => "item-updated",
            CallbackCategory::ItemRemoved => "item-removed",
            CallbackCategory::CustomEvent => "custom-event",
            CallbackCategory::AsyncAdd => "async-add",
            CallbackCategory::AsyncUpdate => "async-update",
            CallbackCategory::AsyncRemove => "async-remove",
            CallbackCategory::AsyncClear => "async-clear",
            CallbackCategory::DataSourceItemsAdded => "data-source-items-added",
            CallbackCategory::DataSourceItemsUpdated => "data-source-items-updated",
            CallbackCategory::DataSourceItemsRemoved => "data-source-items-removed",
            CallbackCategory::DataSourceCleared => "data-source-cleared",
            CallbackCategory::GeneralEvent => "general-event",
            CallbackCategory::Polling => "polling",
            CallbackCategory::MapReduceResult => "map-reduce-result",
        }
    }

    /// Categories whose registrations are bound to individual keys
    pub fn is_key_scoped(self) -> bool {
        matches!(
            self,
            CallbackCategory::ItemUpdated | CallbackCategory::ItemRemoved
        )
    }
}

impl fmt::Display for CallbackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compact identifier of a callback handler across the client/engine boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallbackToken(u16);

impl CallbackToken {
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a registered handler.
///
/// Two handlers are the same registration when they share the same
/// allocation, i.e. one is a clone of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(usize);

impl HandlerId {
    pub fn of<T: ?Sized>(handler: &Arc<T>) -> Self {
        Self(Arc::as_ptr(handler) as *const () as usize)
    }
}

/// Anything that can be stored in a [`TokenRegistry`](super::TokenRegistry)
pub trait RegistryHandler: Clone + Send + Sync {
    fn handler_id(&self) -> HandlerId;
}
