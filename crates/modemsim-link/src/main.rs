//! `modemsim`: serve the emulated modem to one peer.

use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand};
use crossbeam_channel::{unbounded, Receiver};
use modemsim_at_protocol::MessageUnit;
use modemsim_link::telemetry::{describe_metrics, install_prometheus};
use modemsim_link::{
    build_source, AlwaysDiscoverable, ConnectionManager, LinkConfig, LinkError, LinkParts,
    LinkResult, LinkState, LogStatusSink, ManagerConfig, SourceKind, TransportConfig,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "modemsim", version, about = "Emulated handset modem over a socket")]
struct Cli {
    /// Log filter used when RUST_LOG is not set (e.g. "debug", "modemsim_link=trace").
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept one peer and serve it until stopped.
    Serve(ServeArgs),

    /// Print the hex PDU a message is delivered as.
    Encode {
        /// Message text.
        text: String,
    },
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// YAML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen on this TCP address.
    #[arg(long, conflicts_with = "unix")]
    tcp: Option<String>,

    /// Listen on this Unix-domain socket path.
    #[arg(long)]
    unix: Option<PathBuf>,

    /// Message source.
    #[arg(long, value_enum)]
    source: Option<SourceArg>,

    /// JSON-lines inbox for the read-store source.
    #[arg(long)]
    inbox: Option<PathBuf>,

    /// Accept attempts before giving up.
    #[arg(long)]
    max_accept_attempts: Option<u32>,

    /// Pause between failed accept attempts, in milliseconds.
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Serve Prometheus metrics on this address (needs the `prometheus` feature).
    #[arg(long)]
    metrics_listen: Option<SocketAddr>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SourceArg {
    /// Messages marked read in the inbox.
    ReadStore,
    /// Lines typed on stdin.
    NewArrival,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::ReadStore => SourceKind::ReadStore,
            SourceArg::NewArrival => SourceKind::NewArrival,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Command::Encode { text } => {
            println!("{}", MessageUnit::new(text).to_pdu_hex());
            ExitCode::SUCCESS
        }
        Command::Serve(args) => match serve(args) {
            Ok(LinkState::Failed) => ExitCode::FAILURE,
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Merge the config file with command line overrides.
fn load_config(args: &ServeArgs) -> LinkResult<LinkConfig> {
    // Overrides may complete an otherwise invalid file, so validate last
    let mut config = match &args.config {
        Some(path) => LinkConfig::read(path)?,
        None => LinkConfig::default(),
    };

    if let Some(address) = &args.tcp {
        config.transport = TransportConfig::Tcp {
            address: address.clone(),
        };
    }
    if let Some(path) = &args.unix {
        config.transport = TransportConfig::Unix { path: path.clone() };
    }
    if let Some(source) = args.source {
        config.source.kind = source.into();
    }
    if let Some(inbox) = &args.inbox {
        config.source.inbox_path = Some(inbox.clone());
    }
    if let Some(attempts) = args.max_accept_attempts {
        config.max_accept_attempts = attempts;
    }
    if let Some(delay) = args.retry_delay_ms {
        config.retry_delay_ms = delay;
    }

    config.validate()?;
    Ok(config)
}

/// Feed stdin lines to the new arrival source.
fn stdin_arrivals() -> LinkResult<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("modemsim-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.is_empty() => continue,
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

fn serve(args: ServeArgs) -> LinkResult<LinkState> {
    let config = load_config(&args)?;
    match args.metrics_listen {
        Some(address) => install_prometheus(address)?,
        None => describe_metrics(),
    }

    let arrivals = match config.source.kind {
        SourceKind::NewArrival => Some(stdin_arrivals()?),
        SourceKind::ReadStore => None,
    };
    let parts = LinkParts {
        acceptor: config.transport.build_acceptor()?,
        discoverability: Box::new(AlwaysDiscoverable),
        source: build_source(&config.source, arrivals)?,
        status: Arc::new(LogStatusSink),
    };

    let handle = ConnectionManager::start(ManagerConfig::from(&config), parts)?;
    let ctrlc_handle = handle.clone();
    ctrlc::set_handler(move || ctrlc_handle.stop())
        .map_err(|e| LinkError::Io(std::io::Error::other(e)))?;

    let state = handle.wait();
    info!("modemsim exiting ({})", state);
    Ok(state)
}
