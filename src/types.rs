//! Shared primitive aliases.

/// Monotonic snapshot version.
pub type Version = i64;
/// Identifier of a pending long-poll registration.
pub type WaiterId = u64;

/// Version assigned to the record produced at load time.
pub const INITIAL_VERSION: Version = 1;
