//! Versioned, file-backed contact store with long-poll change notification.
//!
//! # Examples
//!
//! In-memory usage with [`core::store::ContactStore`]:
//! ```
//! use contactlog::{contact::Contact, core::store::ContactStore};
//!
//! let mut store = ContactStore::empty().expect("empty store");
//! assert_eq!(store.version(), 1);
//!
//! let commit = store.append(Contact::new("Al", "a@x.com", "hi")).expect("append");
//! assert_eq!(commit.record.version(), 2);
//! assert_eq!(
//!     commit.record.json(),
//!     r#"[{"name":"Al","email":"a@x.com","message":"hi"}]"#
//! );
//! ```
//!
//! Runtime usage with a JSON file sink and a long-poll:
//! ```no_run
//! use std::time::Duration;
//!
//! use contactlog::{
//!     contact::Contact,
//!     persist::{ContactSink, json_file::JsonFileSink},
//!     runtime::handle::{spawn_contact_store, RuntimeConfig},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = JsonFileSink::open("contacts.json").expect("sink");
//! let store = sink.load_store().expect("load");
//! let handle = spawn_contact_store(store, Some(Box::new(sink)), RuntimeConfig::default());
//!
//! let since = handle.version();
//! let waiter = handle.clone();
//! let poll = tokio::spawn(async move {
//!     waiter
//!         .wait_for_changes(since, Duration::from_secs(5), &CancellationToken::new())
//!         .await
//! });
//!
//! handle.store_contact(Contact::new("Al", "a@x.com", "hi")).await.expect("store");
//! let outcome = poll.await.expect("join").expect("wait");
//! assert_eq!(outcome.version, since + 1);
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Service settings.
pub mod config;
/// Contact record type.
pub mod contact;
/// Core in-memory store, snapshots and waiter registry.
pub mod core;
/// Crate-level error type.
pub mod error;
/// warp routes for the browser client.
pub mod http;
/// Persistence abstraction and JSON file implementation.
pub mod persist;
/// Single-writer runtime handle, long-poll waits and events.
pub mod runtime;
/// Shared primitive aliases.
pub mod types;
/// External change detection for the backing file.
pub mod watch;

pub use error::{Error, Result};
