//! In-memory versioned store, snapshot records and waiter registry.

/// Immutable versioned snapshot type.
pub mod record;
/// Authoritative contact store engine.
pub mod store;
/// Pending long-poll registrations.
pub mod waiters;
