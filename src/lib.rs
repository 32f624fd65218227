//! Offline-first resilience layer for a storefront client.
//!
//! A [`router::CacheRouter`] applies per-route cache policy at the network
//! boundary, and a durable [`queue::PendingActionLog`] keeps mutations made
//! while offline until the [`reconcile::Reconciler`] replays them.

pub mod app;
pub mod applier;
pub mod catalog;
pub mod config;
pub mod connectivity;
pub mod logging;
pub mod net;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod router;
pub mod store;
