mod commands;

use clap::Parser;
use color_eyre::Result;
use offcart::app::{self, OfflineLayer};
use offcart::config::Config;
use offcart::logging;
use offcart::net::HttpFetcher;
use offcart::remote::RemoteApplier;
use offcart::store::StoreOpener;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "offcart")]
#[command(about = "Offline-first cache and action queue for a storefront")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./offcart.yaml, then $XDG_CONFIG_HOME/offcart/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&Config::data_dir()?.join("logs"), args.verbose)?;

  let opener = StoreOpener::new(app::store_location(&config)?);
  let fetcher = Arc::new(HttpFetcher::new(&config)?);
  let applier = Arc::new(RemoteApplier::new(
    Arc::clone(&fetcher),
    &config.remote.base_url,
  )?);

  // Reachability is unknown until the first probe.
  let layer = OfflineLayer::build(&config, &opener, fetcher, applier, false).await;
  app::announce(layer.availability());

  commands::run(&layer, &config, args.command).await
}
