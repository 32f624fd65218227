//! Online/offline tracking and the reconnect trigger.
//!
//! The monitor turns raw reachability signals into debounced transitions.
//! Its status is informational only: routing and queueing decisions are
//! made from actual fetch results, since the flag can be stale (captive
//! portals, flaky links).

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

use crate::net::{Fetcher, Request};

/// Broadcast on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
  pub is_online: bool,
}

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Callbacks {
  next_id: u64,
  entries: BTreeMap<u64, Callback>,
}

pub struct ConnectivityMonitor {
  status: watch::Sender<Status>,
  callbacks: Arc<Mutex<Callbacks>>,
}

impl ConnectivityMonitor {
  pub fn new(initially_online: bool) -> Self {
    let (status, _) = watch::channel(Status {
      is_online: initially_online,
    });
    Self {
      status,
      callbacks: Arc::new(Mutex::new(Callbacks::default())),
    }
  }

  pub fn is_online(&self) -> bool {
    self.status.borrow().is_online
  }

  /// Status channel for UI badges.
  pub fn subscribe(&self) -> watch::Receiver<Status> {
    self.status.subscribe()
  }

  /// Register `callback` to run on every offline -> online transition.
  ///
  /// The callback stays registered until the returned subscription is
  /// dropped.
  pub fn on_reconnect<F>(&self, callback: F) -> Subscription
  where
    F: Fn() + Send + Sync + 'static,
  {
    let mut callbacks = self
      .callbacks
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let id = callbacks.next_id;
    callbacks.next_id += 1;
    callbacks.entries.insert(id, Arc::new(callback));

    Subscription {
      id,
      callbacks: Arc::downgrade(&self.callbacks),
    }
  }

  /// Feed one reachability signal.
  ///
  /// Signals that repeat the current state are ignored, so a burst of
  /// "online" events yields a single transition. Returns whether the state
  /// changed.
  pub fn report(&self, online: bool) -> bool {
    let changed = self.status.send_if_modified(|status| {
      if status.is_online == online {
        false
      } else {
        status.is_online = online;
        true
      }
    });

    if !changed {
      return false;
    }

    if online {
      info!("connectivity restored");
      for callback in self.reconnect_callbacks() {
        callback();
      }
    } else {
      info!("connectivity lost");
    }
    true
  }

  /// Snapshot so callbacks run without holding the lock.
  fn reconnect_callbacks(&self) -> Vec<Callback> {
    let callbacks = self
      .callbacks
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    callbacks.entries.values().cloned().collect()
  }
}

/// Registration handle returned by [`ConnectivityMonitor::on_reconnect`].
#[must_use = "dropping the subscription unregisters the callback"]
pub struct Subscription {
  id: u64,
  callbacks: Weak<Mutex<Callbacks>>,
}

impl Subscription {
  pub fn unsubscribe(self) {
    drop(self);
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(callbacks) = self.callbacks.upgrade() {
      let mut callbacks = callbacks
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
      callbacks.entries.remove(&self.id);
    }
  }
}

/// Periodic reachability check that feeds a monitor.
pub struct Probe<F: Fetcher> {
  fetcher: F,
  url: Url,
  interval: Duration,
}

impl<F: Fetcher> Probe<F> {
  pub fn new(fetcher: F, url: Url, interval: Duration) -> Self {
    Self {
      fetcher,
      url,
      interval,
    }
  }

  /// Any HTTP answer counts as reachable; only transport failures do not.
  pub async fn check(&self) -> bool {
    match self.fetcher.fetch(&Request::get(self.url.clone())).await {
      Ok(response) => {
        debug!(url = %self.url, status = response.status, "probe answered");
        true
      }
      Err(e) => {
        debug!(url = %self.url, "probe failed: {}", e);
        false
      }
    }
  }
}

impl<F: Fetcher + 'static> Probe<F> {
  /// Check immediately, then every interval, until the task is aborted.
  pub fn spawn(self, monitor: Arc<ConnectivityMonitor>) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let online = self.check().await;
        if monitor.report(online) && !online {
          warn!(url = %self.url, "storefront unreachable, working offline");
        }
      }
    })
  }
}
