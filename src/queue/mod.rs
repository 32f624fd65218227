//! Pending action log and the offline cart/wishlist mirrors.

mod action;
mod log;
mod mirror;
mod recorder;

pub use action::{CartLine, PendingAction, ProductRef, QuantityChange, QueuedAction};
pub use log::PendingActionLog;
pub use mirror::{OfflineCartEntry, OfflineWishlistEntry};
pub use recorder::{ActionOutcome, ActionRecorder};
