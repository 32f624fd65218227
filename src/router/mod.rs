//! Per-route caching policy at the network boundary.
//!
//! Route classes and their policies:
//! - static assets: cache-first
//! - allow-listed read APIs: network-first, cached fallback
//! - other read APIs: network-only
//! - navigations: network-first, offline document fallback
//! - other resources: cache-first, placeholder for images
//!
//! Mutating requests are not routed; they go straight to the network.

mod fallback;
mod layer;
mod policy;

pub use layer::CacheRouter;
pub use policy::{RouteClass, RoutePolicy};
