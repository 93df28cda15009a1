//! # Access-Mode Protocol
//!
//! Pessimistic locking and optimistic versioning layered over otherwise
//! stateless engine calls.
//!
//! Lock state is owned by the engine; the client only ever holds the opaque
//! [`LockHandle`] it was given. Validation here is pure and needs no
//! synchronization.

pub mod expiration;
pub mod lock_handle;
pub mod mode;

pub use expiration::{Expiration, ItemPriority};
pub use lock_handle::{ItemVersion, LockHandle};
pub use mode::{AccessMode, AccessRequest, FieldRule, Operation};
