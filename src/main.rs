use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iptv_player::{
    catalog::Catalog,
    config::Config,
    engine::CapabilityRegistry,
    models::Channel,
    session::Player,
    sink::{HeadlessSink, HeadlessSinkOptions, MediaSink},
    streaming::{classify, UrlResolver},
    utils::{HttpFetcher, ReqwestFetcher, UrlUtils},
};

#[derive(Parser)]
#[command(name = "iptv-player")]
#[command(version)]
#[command(about = "Headless IPTV stream player with URL resolution and engine fallback")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List catalog channels
    Channels {
        /// Category filter, case-insensitive ("all" for every category)
        #[arg(long)]
        category: Option<String>,
        /// Case-insensitive substring of the channel name
        #[arg(long)]
        search: Option<String>,
    },
    /// List catalog categories
    Categories,
    /// Print the stream format of a URL
    Classify { url: String },
    /// Resolve an indirect or script endpoint URL
    Resolve { url: String },
    /// Play a channel (catalog id or stream URL) on the headless sink,
    /// printing every session snapshot as a JSON line
    Play {
        target: String,
        /// Stop after this long (e.g. "30s"); runs until Ctrl-C otherwise
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable.
    let log_filter = format!("iptv_player={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load_from_file(&cli.config)?;

    match cli.command {
        Command::Channels { category, search } => {
            let catalog = Catalog::from_config(&config.catalog)?;
            for channel in catalog.filter(category.as_deref(), search.as_deref()) {
                println!("{:>6}  {:<40}  {}", channel.id, channel.name, channel.category);
            }
        }
        Command::Categories => {
            let catalog = Catalog::from_config(&config.catalog)?;
            for category in catalog.categories() {
                println!("{:<20}  {}", category.name, category.channel_count);
            }
        }
        Command::Classify { url } => {
            let format = classify(&url);
            match format.mime_type() {
                Some(mime) => println!("{format}  {mime}"),
                None => println!("{format}"),
            }
        }
        Command::Resolve { url } => {
            let fetcher = http_fetcher(&config)?;
            let resolver = UrlResolver::from_config(&config.resolver, fetcher);
            let resolved = resolver.resolve(&url, classify(&url)).await;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
        Command::Play { target, duration } => play(config, &target, duration).await?,
    }

    Ok(())
}

fn http_fetcher(config: &Config) -> Result<Arc<dyn HttpFetcher>> {
    let fetcher = ReqwestFetcher::new(config.resolver.request_timeout, config.resolver.max_body_bytes)
        .context("failed to build HTTP client")?;
    Ok(Arc::new(fetcher))
}

/// Catalog channel by id, or an ad-hoc channel for a stream URL
fn channel_for(config: &Config, target: &str) -> Result<Channel> {
    if UrlUtils::scheme(target).is_some() {
        return Ok(Channel::new("adhoc", target, target, "Undefined"));
    }
    let catalog = Catalog::from_config(&config.catalog)?;
    Ok(catalog.require(target)?.clone())
}

async fn play(config: Config, target: &str, duration: Option<Duration>) -> Result<()> {
    let channel = channel_for(&config, target)?;
    let fetcher = http_fetcher(&config)?;

    let sink: Arc<dyn MediaSink> = Arc::new(HeadlessSink::new(HeadlessSinkOptions::from(&config.sink)));
    let providers = CapabilityRegistry::default_providers(&config.engines, fetcher.clone());
    let registry = Arc::new(CapabilityRegistry::probe(providers, sink.as_ref()).await);
    let resolver = Arc::new(UrlResolver::from_config(&config.resolver, fetcher));

    info!(
        "Engines available: {:?}, resolver strategies: {:?}",
        registry.available(),
        resolver.strategy_names()
    );

    let (controls, handle) = Player::spawn(config.playback.clone(), registry, resolver, sink);
    let mut snapshots = controls.subscribe();
    controls.open_channel(channel).await?;

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing the player");
                break;
            }
            _ = &mut deadline => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    println!("{}", serde_json::to_string(&snapshot)?);
                }
            }
        }
    }

    // The player may already be gone; closing is best effort then.
    let _ = controls.close().await;
    let _ = controls.shutdown().await;
    handle.await.context("player task panicked")?;
    Ok(())
}
