//! Wiring of the offline layer and its degraded mode.

use color_eyre::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::applier::ActionApplier;
use crate::catalog::CatalogCache;
use crate::config::Config;
use crate::connectivity::{ConnectivityMonitor, Probe, Subscription};
use crate::net::{resolve, Fetcher, Request, Response};
use crate::queue::{
  ActionOutcome, ActionRecorder, OfflineCartEntry, OfflineWishlistEntry, PendingAction,
  PendingActionLog,
};
use crate::reconcile::{DrainReport, Reconciler, LAST_SYNC_KEY};
use crate::router::CacheRouter;
use crate::store::{Blob, DurableStore, StoreLocation, StoreOpener};

/// Whether offline features are available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
  Full,
  /// The store could not be opened; requests go straight to the network
  OnlineOnly { reason: String },
}

/// Database location for `config`.
pub fn store_location(config: &Config) -> Result<StoreLocation> {
  let path = match &config.store.path {
    Some(path) => path.clone(),
    None => Config::data_dir()?.join("offline.db"),
  };
  Ok(StoreLocation::File(path))
}

/// Parts that only exist while the store is open.
struct Offline<A: ActionApplier> {
  store: DurableStore,
  log: PendingActionLog,
  catalog: CatalogCache,
  reconciler: Reconciler<Arc<A>>,
  _reconnect: Subscription,
}

/// Snapshot for `offcart status`.
#[derive(Debug, Clone, Serialize)]
pub struct LayerStatus {
  pub offline_features: bool,
  pub online: bool,
  pub pending: usize,
  pub cart_lines: usize,
  pub wishlist_items: usize,
  pub last_sync: Option<DrainReport>,
}

/// The assembled offline-first layer.
pub struct OfflineLayer<F: Fetcher + 'static, A: ActionApplier + 'static> {
  availability: Availability,
  fetcher: Arc<F>,
  router: CacheRouter<Arc<F>>,
  recorder: ActionRecorder<Arc<A>>,
  monitor: Arc<ConnectivityMonitor>,
  offline: Option<Offline<A>>,
}

impl<F: Fetcher + 'static, A: ActionApplier + 'static> OfflineLayer<F, A> {
  /// Open the store and wire every component to it.
  ///
  /// A store that fails to open is not an error: the layer comes up in
  /// online-only mode and every request goes to the network.
  pub async fn build(
    config: &Config,
    opener: &StoreOpener,
    fetcher: Arc<F>,
    applier: Arc<A>,
    initially_online: bool,
  ) -> Self {
    let monitor = Arc::new(ConnectivityMonitor::new(initially_online));

    let store = match opener.open().await {
      Ok(store) => store,
      Err(e) => {
        warn!("offline features unavailable: {}", e);
        return Self {
          availability: Availability::OnlineOnly {
            reason: e.to_string(),
          },
          router: CacheRouter::online_only(Arc::clone(&fetcher), config),
          recorder: ActionRecorder::new(applier, None),
          fetcher,
          monitor,
          offline: None,
        };
      }
    };

    let log = PendingActionLog::new(store.clone(), config.queue);
    let reconciler = Reconciler::new(log.clone(), store.clone(), Arc::clone(&applier));
    let reconnect = {
      let reconciler = reconciler.clone();
      monitor.on_reconnect(move || reconciler.trigger())
    };

    Self {
      availability: Availability::Full,
      router: CacheRouter::new(Arc::clone(&fetcher), store.clone(), config),
      recorder: ActionRecorder::new(applier, Some(log.clone())),
      fetcher,
      monitor,
      offline: Some(Offline {
        catalog: CatalogCache::new(store.clone()),
        store,
        log,
        reconciler,
        _reconnect: reconnect,
      }),
    }
  }

  pub fn availability(&self) -> &Availability {
    &self.availability
  }

  pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
    &self.monitor
  }

  pub fn log(&self) -> Option<&PendingActionLog> {
    self.offline.as_ref().map(|o| &o.log)
  }

  pub fn catalog(&self) -> Option<&CatalogCache> {
    self.offline.as_ref().map(|o| &o.catalog)
  }

  pub fn reconciler(&self) -> Option<&Reconciler<Arc<A>>> {
    self.offline.as_ref().map(|o| &o.reconciler)
  }

  /// Route a request through the cache policy.
  pub async fn fetch(&self, request: &Request) -> Result<Response> {
    self.router.handle(request).await
  }

  /// Perform a user mutation, queueing it if the remote call fails.
  pub async fn perform(&self, action: PendingAction) -> ActionOutcome {
    self.recorder.perform(action).await
  }

  /// Run one reconciliation pass in the foreground.
  pub async fn sync(&self) -> Option<DrainReport> {
    self.reconciler()?.run().await
  }

  /// Health probe for the configured storefront.
  pub fn probe(&self, config: &Config) -> Result<Probe<Arc<F>>> {
    let url = resolve(&config.remote.base_url, &config.connectivity.probe_path)?;
    Ok(Probe::new(
      Arc::clone(&self.fetcher),
      url,
      config.connectivity.probe_interval(),
    ))
  }

  pub async fn status(&self) -> LayerStatus {
    let mut status = LayerStatus {
      offline_features: self.offline.is_some(),
      online: self.monitor.is_online(),
      pending: 0,
      cart_lines: 0,
      wishlist_items: 0,
      last_sync: None,
    };

    let Some(offline) = &self.offline else {
      return status;
    };

    status.pending = offline.log.len().await.unwrap_or_else(|e| {
      warn!("failed to count pending actions: {}", e);
      0
    });
    status.cart_lines = self.cart().await.len();
    status.wishlist_items = self.wishlist().await.len();
    status.last_sync = match offline.store.get::<Blob>(LAST_SYNC_KEY).await {
      Ok(blob) => blob.and_then(|b| serde_json::from_value(b.record.value).ok()),
      Err(e) => {
        warn!("failed to read last sync report: {}", e);
        None
      }
    };
    status
  }

  /// Offline cart mirror; empty when nothing is pending.
  pub async fn cart(&self) -> Vec<OfflineCartEntry> {
    let Some(offline) = &self.offline else {
      return Vec::new();
    };
    offline.log.cart().await.unwrap_or_else(|e| {
      warn!("failed to read offline cart: {}", e);
      Vec::new()
    })
  }

  pub async fn wishlist(&self) -> Vec<OfflineWishlistEntry> {
    let Some(offline) = &self.offline else {
      return Vec::new();
    };
    offline.log.wishlist().await.unwrap_or_else(|e| {
      warn!("failed to read offline wishlist: {}", e);
      Vec::new()
    })
  }
}

/// Log the mode the layer came up in.
pub fn announce(availability: &Availability) {
  match availability {
    Availability::Full => info!("offline features available"),
    Availability::OnlineOnly { reason } => {
      warn!(reason = %reason, "running online-only, offline features unavailable")
    }
  }
}
