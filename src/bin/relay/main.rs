mod cli;
mod printer;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::Notify;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use relay::{FeedRemote, FileStore, HttpRemote, LocalStore, Relay, RelayConfig, RelayError, RelayOptions, StoreRemote};

use cli::{parse_command, read_line, Command};
use printer::{print_feed, print_feed_updates, print_status};

#[derive(Parser, Debug, Clone)]
#[command(name = "relay", about = "Anonymous message relay over a shared JSON document")]
pub struct CliArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Feed document URL, overrides the configuration
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Keep the feed in the local store only
    #[arg(long, conflicts_with = "endpoint")]
    pub offline: bool,

    /// Directory of the local store
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Handle to adopt before connecting
    #[arg(long)]
    pub handle: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config.log_level);

    run_client(config, args.handle).await?;
    Ok(())
}

fn load_config(args: &CliArgs) -> Result<RelayConfig, RelayError> {
    let mut config = RelayConfig::load(args.config.as_deref())?;

    if let Some(endpoint) = &args.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if args.offline {
        config.endpoint = None;
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_client(config: RelayConfig, handle: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn LocalStore> = Arc::new(FileStore::open(&config.data_dir)?);

    let remote: Arc<dyn FeedRemote> = match &config.endpoint {
        Some(endpoint) => {
            println!("Relaying through {endpoint}");
            Arc::new(HttpRemote::new(endpoint, config.request_timeout())?)
        }
        None => {
            println!("No endpoint configured, relaying offline in '{}'", config.data_dir.display());
            Arc::new(StoreRemote::new(store.clone()))
        }
    };

    let relay = Relay::open(remote, store, RelayOptions::from(&config))?;
    if let Some(handle) = handle {
        relay.update_identity(&handle)?;
    }
    println!("Identify: {} (type /help for commands)", relay.handle());

    let interrupt = Arc::new(Notify::new());
    set_interrupt_handler(&interrupt);

    let printer = tokio::spawn(print_feed_updates(relay.clone()));
    let poller = relay.start();

    let result = tokio::select! {
        result = do_work(&relay) => result,
        _ = interrupt.notified() => {
            println!("\rInterrupted.");
            Ok(())
        }
    };

    relay.shutdown();
    printer.abort();
    let _ = poller.await;
    println!("Relay closed.");

    result
}

async fn do_work(relay: &Relay) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = BufReader::new(tokio::io::stdin());

    while let Some(line) = read_line(&mut reader).await? {
        match parse_command(&line) {
            Command::Empty => continue,
            Command::Quit => break,
            Command::Help => print_help(),
            Command::Unknown(name) => println!("\rUnknown command {name}, type /help"),
            Command::Status => print_status(&relay.snapshot()),
            Command::Feed => print_feed(&relay.snapshot()),
            Command::Nick(candidate) => match relay.update_identity(&candidate) {
                Ok(handle) => println!("\rIdentify: {handle}"),
                Err(err) => println!("\rHandle not changed: {err}"),
            },
            Command::Retry => {
                let draft = relay.snapshot().draft;
                if draft.is_empty() {
                    if let Err(err) = relay.refresh().await {
                        println!("\rRefresh failed: {err}");
                    }
                } else {
                    transmit(relay, &draft).await;
                }
            }
            Command::Send(text) => transmit(relay, &text).await,
        }
    }

    Ok(())
}

async fn transmit(relay: &Relay, text: &str) {
    match relay.send(text).await {
        Ok(_) => {}
        Err(RelayError::Busy) => println!("\rA transmission is already in flight."),
        Err(err) if err.is_transient() => {
            println!("\rTransmission failed: {err}. Type /retry to resend.");
        }
        Err(err) => error!(error = %err, "transmission rejected"),
    }
}

fn print_help() {
    println!("\r/nick NAME  change handle (max 15 characters)");
    println!("\r/retry      resend the pending message, or refresh the feed");
    println!("\r/status     show handle and uplink status");
    println!("\r/feed       print the whole feed");
    println!("\r/q          quit");
}

fn set_interrupt_handler(interrupt: &Arc<Notify>) {
    let weak = Arc::downgrade(interrupt);

    let result = ctrlc::set_handler(move || match weak.upgrade() {
        Some(interrupt) => interrupt.notify_one(),
        None => warn!("Client no longer running, nothing to interrupt."),
    });

    match result {
        Ok(_) => {}

        Err(ctrlc::Error::NoSuchSignal(signal_type)) => {
            warn!("Signal {signal_type:?} not found, CTRL + C interrupt will not be handled gracefully.")
        }

        Err(ctrlc::Error::MultipleHandlers) => {
            warn!("CTRL + C interrupt already has a handler, interrupt may not be handled gracefully.")
        }

        Err(ctrlc::Error::System(err)) => {
            warn!("CTRL + C interrupt not set, interrupt may not be handled gracefully. Reason: {err}.")
        }
    }
}
