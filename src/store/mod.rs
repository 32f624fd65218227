//! Durable, partitioned local storage.
//!
//! Every piece of offline state lives here:
//! - keyed partitions (catalog snapshot, cart and wishlist mirrors, blobs)
//! - the append/delete-only pending action log
//! - cached network responses
//!
//! The store is opened once through [`StoreOpener`] and injected into the
//! components that need it.

mod durable;
mod schema;
mod traits;

pub use durable::{DurableStore, StoreLocation, StoreOpener, Tx};
pub use traits::{ActionRow, Blob, CacheEntry, Partition, Record, Stored};
