//! CLI subcommands and their handlers.

use clap::{Args, Subcommand};
use color_eyre::{eyre::eyre, Result};
use offcart::app::{LayerStatus, OfflineLayer};
use offcart::applier::ActionApplier;
use offcart::catalog::{CatalogItem, CatalogKind};
use offcart::config::Config;
use offcart::connectivity::Status;
use offcart::net::{resolve, Destination, Fetcher, Request};
use offcart::queue::{ActionOutcome, CartLine, PendingAction, ProductRef, QuantityChange};
use offcart::reconcile::DrainReport;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Fetch a URL through the cache router
  Fetch {
    /// Absolute URL or path relative to the storefront
    url: String,
    /// Treat the request as an image load
    #[arg(long, conflicts_with = "document")]
    image: bool,
    /// Treat the request as a page navigation
    #[arg(long)]
    document: bool,
  },
  /// Change the cart
  #[command(subcommand)]
  Cart(CartCommand),
  /// Change the wishlist
  #[command(subcommand)]
  Wishlist(WishlistCommand),
  /// Inspect or clear pending actions
  #[command(subcommand)]
  Queue(QueueCommand),
  /// Replay pending actions if the storefront is reachable
  Sync,
  /// Show offline layer status
  Status,
  /// Browse the offline catalog snapshot
  #[command(subcommand)]
  Catalog(CatalogCommand),
  /// Probe connectivity and replay on reconnect until Ctrl-C
  Watch,
}

#[derive(Subcommand, Debug)]
pub enum CartCommand {
  Add(CartAddArgs),
  Update {
    product_id: String,
    /// New quantity; 0 removes the line
    quantity: u32,
  },
  Remove {
    product_id: String,
  },
  /// Show the offline cart mirror
  Show,
}

#[derive(Args, Debug)]
pub struct CartAddArgs {
  product_id: String,
  #[arg(short, long, default_value_t = 1)]
  quantity: u32,
  #[arg(long)]
  size: Option<String>,
  #[arg(long)]
  color: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum WishlistCommand {
  Add { product_id: String },
  Remove { product_id: String },
  /// Show the offline wishlist mirror
  Show,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
  /// List pending actions in replay order
  List,
  /// Discard every pending action
  Clear,
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
  /// List snapshotted products (or categories)
  List {
    #[arg(long)]
    categories: bool,
  },
}

pub async fn run<F, A>(layer: &OfflineLayer<F, A>, config: &Config, command: Command) -> Result<()>
where
  F: Fetcher + 'static,
  A: ActionApplier + 'static,
{
  match command {
    Command::Fetch {
      url,
      image,
      document,
    } => {
      let destination = if image {
        Destination::Image
      } else if document {
        Destination::Document
      } else {
        Destination::Fetch
      };
      fetch(layer, config, &url, destination).await
    }
    Command::Cart(CartCommand::Add(args)) => {
      let action = PendingAction::AddToCart(CartLine {
        product_id: args.product_id,
        quantity: args.quantity,
        selected_size: args.size,
        selected_color: args.color,
      });
      perform(layer, action).await
    }
    Command::Cart(CartCommand::Update {
      product_id,
      quantity,
    }) => {
      let action = PendingAction::UpdateCartQuantity(QuantityChange {
        product_id,
        quantity,
      });
      perform(layer, action).await
    }
    Command::Cart(CartCommand::Remove { product_id }) => {
      perform(layer, PendingAction::RemoveFromCart(ProductRef { product_id })).await
    }
    Command::Cart(CartCommand::Show) => {
      for entry in layer.cart().await {
        let variant: Vec<&str> = [&entry.selected_size, &entry.selected_color]
          .into_iter()
          .flatten()
          .map(String::as_str)
          .collect();
        println!(
          "{}  x{}  {}",
          entry.product_id,
          entry.quantity,
          variant.join("/")
        );
      }
      Ok(())
    }
    Command::Wishlist(WishlistCommand::Add { product_id }) => {
      perform(layer, PendingAction::AddToWishlist(ProductRef { product_id })).await
    }
    Command::Wishlist(WishlistCommand::Remove { product_id }) => {
      perform(layer, PendingAction::RemoveFromWishlist(ProductRef { product_id })).await
    }
    Command::Wishlist(WishlistCommand::Show) => {
      for entry in layer.wishlist().await {
        println!("{}  added {}", entry.product_id, entry.added_at.to_rfc3339());
      }
      Ok(())
    }
    Command::Queue(QueueCommand::List) => queue_list(layer).await,
    Command::Queue(QueueCommand::Clear) => queue_clear(layer).await,
    Command::Sync => sync(layer, config).await,
    Command::Status => {
      let online = layer.probe(config)?.check().await;
      print_status(&layer.status().await, online);
      Ok(())
    }
    Command::Catalog(CatalogCommand::List { categories }) => {
      let kind = if categories {
        CatalogKind::Category
      } else {
        CatalogKind::Product
      };
      catalog_list(layer, kind).await
    }
    Command::Watch => watch(layer, config).await,
  }
}

async fn fetch<F, A>(
  layer: &OfflineLayer<F, A>,
  config: &Config,
  target: &str,
  destination: Destination,
) -> Result<()>
where
  F: Fetcher + 'static,
  A: ActionApplier + 'static,
{
  let url = resolve(&config.remote.base_url, target)?;
  let request = Request::get(url).with_destination(destination);
  let response = layer.fetch(&request).await?;

  eprintln!(
    "{} ({:?}) {}",
    response.status,
    response.source,
    response.content_type.as_deref().unwrap_or("-")
  );
  println!("{}", response.text());
  Ok(())
}

async fn perform<F, A>(layer: &OfflineLayer<F, A>, action: PendingAction) -> Result<()>
where
  F: Fetcher + 'static,
  A: ActionApplier + 'static,
{
  match layer.perform(action).await {
    ActionOutcome::Applied => println!("Done."),
    ActionOutcome::Queued(id) => {
      println!("Storefront unreachable; saved offline as #{} for later sync.", id)
    }
    ActionOutcome::Unavailable => {
      return Err(eyre!(
        "Storefront unreachable and offline features are unavailable; change not saved"
      ))
    }
  }
  Ok(())
}

async fn queue_list<F, A>(layer: &OfflineLayer<F, A>) -> Result<()>
where
  F: Fetcher + 'static,
  A: ActionApplier + 'static,
{
  let log = layer
    .log()
    .ok_or_else(|| eyre!("Offline features are unavailable"))?;

  let entries = log.drain().await?;
  if entries.is_empty() {
    println!("No pending actions.");
    return Ok(());
  }

  for entry in entries {
    let note = match entry.action() {
      Ok(action) => action.product_id().to_string(),
      Err(_) => "(unreadable, kept)".to_string(),
    };
    println!(
      "#{:<5} {}  {:<22} {}  {}",
      entry.id,
      entry.created_at.format("%Y-%m-%d %H:%M:%S"),
      entry.kind,
      note,
      entry.payload_text()
    );
  }
  Ok(())
}

async fn queue_clear<F, A>(layer: &OfflineLayer<F, A>) -> Result<()>
where
  F: Fetcher + 'static,
  A: ActionApplier + 'static,
{
  let log = layer
    .log()
    .ok_or_else(|| eyre!("Offline features are unavailable"))?;

  let removed = log.clear().await?;
  log.clear_mirrors_if_settled().await?;
  println!("Discarded {} pending action(s).", removed);
  Ok(())
}

async fn sync<F, A>(layer: &OfflineLayer<F, A>, config: &Config) -> Result<()>
where
  F: Fetcher + 'static,
  A: ActionApplier + 'static,
{
  let reconciler = layer
    .reconciler()
    .ok_or_else(|| eyre!("Offline features are unavailable"))?;

  if !layer.probe(config)?.check().await {
    let pending = layer.status().await.pending;
    println!("Storefront unreachable; {} action(s) still pending.", pending);
    return Ok(());
  }

  // Going online runs a pass through the reconnect hook.
  let mut reports = reconciler.reports();
  let report = if layer.monitor().report(true) {
    reports
      .changed()
      .await
      .map_err(|e| eyre!("Reconciler stopped: {}", e))?;
    reports.borrow_and_update().clone()
  } else {
    reconciler.run().await
  };

  match report {
    Some(report) => print_report(&report),
    None => println!("A sync is already running."),
  }
  Ok(())
}

async fn catalog_list<F, A>(layer: &OfflineLayer<F, A>, kind: CatalogKind) -> Result<()>
where
  F: Fetcher + 'static,
  A: ActionApplier + 'static,
{
  let catalog = layer
    .catalog()
    .ok_or_else(|| eyre!("Offline features are unavailable"))?;

  let items = catalog.list(kind).await;
  if items.is_empty() {
    println!("Nothing cached yet. Browse the storefront online first.");
  }
  for item in items {
    println!("{:<26} {}", item.id, display_name(&item));
  }
  Ok(())
}

fn display_name(item: &CatalogItem) -> &str {
  ["name", "title", "slug"]
    .iter()
    .find_map(|field| item.data.get(*field).and_then(|v| v.as_str()))
    .unwrap_or("-")
}

async fn watch<F, A>(layer: &OfflineLayer<F, A>, config: &Config) -> Result<()>
where
  F: Fetcher + 'static,
  A: ActionApplier + 'static,
{
  let probe = layer.probe(config)?.spawn(Arc::clone(layer.monitor()));
  let mut status = layer.monitor().subscribe();
  let mut reports = layer.reconciler().map(|r| r.reports());

  println!("Watching storefront connectivity. Press Ctrl-C to stop.");

  let ctrl_c = tokio::signal::ctrl_c();
  tokio::pin!(ctrl_c);

  loop {
    tokio::select! {
      _ = &mut ctrl_c => break,
      changed = status.changed() => {
        if changed.is_err() {
          break;
        }
        let Status { is_online } = *status.borrow_and_update();
        println!("{}", if is_online { "Online" } else { "Offline" });
      }
      Some(report) = next_report(&mut reports) => print_report(&report),
    }
  }

  probe.abort();
  Ok(())
}

async fn next_report(
  reports: &mut Option<watch::Receiver<Option<DrainReport>>>,
) -> Option<DrainReport> {
  match reports {
    Some(rx) => {
      rx.changed().await.ok()?;
      rx.borrow_and_update().clone()
    }
    None => futures::future::pending().await,
  }
}

fn print_report(report: &DrainReport) {
  println!(
    "Synced {} of {} pending action(s); {} rejected, {} unreadable kept for later.",
    report.applied, report.attempted, report.failed, report.unknown
  );
}

fn print_status(status: &LayerStatus, online: bool) {
  println!(
    "Offline features: {}",
    if status.offline_features {
      "available"
    } else {
      "unavailable"
    }
  );
  println!(
    "Storefront:       {}",
    if online { "reachable" } else { "unreachable" }
  );
  println!("Pending actions:  {}", status.pending);
  println!("Offline cart:     {} line(s)", status.cart_lines);
  println!("Offline wishlist: {} item(s)", status.wishlist_items);
  match &status.last_sync {
    Some(report) => println!(
      "Last sync:        {} ({} applied, {} retained)",
      report
        .finished_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string()),
      report.applied,
      report.retained()
    ),
    None => println!("Last sync:        never"),
  }
}
