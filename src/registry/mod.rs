//! # Callback Token Registry
//!
//! Translates application callback handlers into compact tokens that travel
//! to the remote engine, and back again when the engine delivers a
//! notification.
//!
//! ## Architecture
//!
//! ```text
//! TokenRegistry
//! ├── one Mutex<CategoryState> per CallbackCategory
//! │   ├── TokenTable   (handler <-> token, ref-counted)
//! │   └── next_token   (monotonic counter)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use cache_session::events::EventCallback;
//! use cache_session::registry::{CallbackCategory, TokenRegistry};
//!
//! let registry = TokenRegistry::new();
//! let callback = EventCallback::new(|event| println!("{:?}", event.event_type));
//!
//! let token = registry.register(CallbackCategory::ItemUpdated, &callback).unwrap();
//! assert!(registry.resolve(CallbackCategory::ItemUpdated, token).is_some());
//! assert_eq!(registry.unregister(CallbackCategory::ItemUpdated, &callback), Some(token));
//! ```

pub mod category;
pub mod token_registry;
mod token_table;

pub use category::{CallbackCategory, CallbackToken, HandlerId, RegistryHandler};
pub use token_registry::{ClearScope, RegistryStats, TokenRegistry, MAX_TOKENS_PER_CATEGORY};
pub use token_table::RegistryEntry;
