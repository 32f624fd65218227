//! Online-first execution of user mutations with offline recording.

use tracing::{info, warn};

use crate::applier::{apply, ActionApplier};

use super::action::PendingAction;
use super::log::PendingActionLog;

/// What happened to a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
  /// Confirmed by the remote system right away
  Applied,
  /// Recorded locally with this log id; replayed on reconnect
  Queued(i64),
  /// Neither confirmed nor recorded (offline features unavailable)
  Unavailable,
}

/// Runs a mutation against the remote system and, if that fails, records
/// it in the mirrors and the pending log as one unit of work.
pub struct ActionRecorder<A: ActionApplier> {
  applier: A,
  /// `None` in online-only mode
  log: Option<PendingActionLog>,
}

impl<A: ActionApplier> ActionRecorder<A> {
  pub fn new(applier: A, log: Option<PendingActionLog>) -> Self {
    Self { applier, log }
  }

  pub async fn perform(&self, action: PendingAction) -> ActionOutcome {
    let error = match apply(&self.applier, &action).await {
      Ok(()) => return ActionOutcome::Applied,
      Err(e) => e,
    };

    let Some(log) = &self.log else {
      warn!(
        product_id = action.product_id(),
        "remote call failed and offline features are unavailable: {}", error
      );
      return ActionOutcome::Unavailable;
    };

    info!(
      product_id = action.product_id(),
      "remote call failed, recording offline: {}", error
    );
    match log.record_offline(&action).await {
      Ok(id) => ActionOutcome::Queued(id),
      Err(e) => {
        warn!(product_id = action.product_id(), "failed to record offline action: {}", e);
        ActionOutcome::Unavailable
      }
    }
  }
}
