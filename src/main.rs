use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use edge_audio_node::link::LinkOptions;
use edge_audio_node::{
    AlwaysAssociated, AppState, Config, HostNetwork, HttpServer, LinkStateMachine,
    LogToneOutput, LoopExit, MemoryBus, MessageBus, NatsBus, NetworkAssociation, NodeContext,
    SampleSource, Signal, SignalSource, Topics, WavFileSource,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edge-audio-node", version, about = "Edge audio-sensing node")]
struct Cli {
    /// Configuration file, with or without extension
    #[arg(short, long, global = true, default_value = "config/edge-node")]
    config: String,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        /// `synthetic` or `wav:<path>`
        #[arg(long, default_value = "synthetic")]
        source: String,

        /// Use the in-process bus instead of the broker
        #[arg(long)]
        offline: bool,
    },
    /// Save snapshots published by nodes as WAV files
    Receive {
        /// Output directory
        #[arg(long)]
        out: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,edge_audio_node=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_source(arg: &str, cfg: &Config) -> Result<Box<dyn SampleSource>> {
    if arg == "synthetic" {
        let signal = Signal::Sine {
            frequency_hz: 440.0,
            amplitude: 8000,
        };
        return Ok(Box::new(SignalSource::new(
            signal,
            cfg.audio.block_size,
            cfg.audio.sample_rate,
        )));
    }
    if let Some(path) = arg.strip_prefix("wav:") {
        let source = WavFileSource::open(path, cfg.audio.block_size)
            .with_context(|| format!("Failed to open audio source {}", path))?;
        return Ok(Box::new(source));
    }
    bail!("unknown audio source {:?} (expected `synthetic` or `wav:<path>`)", arg)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received");
}

/// Build and run node contexts until a shutdown, rebuilding on restart
async fn run_node<B, N>(
    cfg_path: &str,
    source_arg: &str,
    make_bus: impl Fn(&Config) -> B,
    make_network: impl Fn(&Config) -> N,
) -> Result<()>
where
    B: MessageBus,
    N: NetworkAssociation,
{
    loop {
        let cfg = Config::load(cfg_path)?;
        let source = open_source(source_arg, &cfg)?;

        let mut node = NodeContext::new(
            &cfg,
            source,
            make_bus(&cfg),
            make_network(&cfg),
            Box::new(LogToneOutput::default()),
        );

        let http = if cfg.http.enabled {
            let state = AppState::new(node.status_receiver(), node.command_sender());
            let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
            Some(HttpServer::spawn(&addr, state).await?)
        } else {
            None
        };

        let exit = node.run(shutdown_signal()).await;

        if let Some(server) = http {
            server.stop().await;
        }

        match exit {
            LoopExit::Shutdown => return Ok(()),
            LoopExit::Restart => info!("Restarting node from {}", cfg_path),
        }
    }
}

async fn run_receive(cfg_path: &str, out: PathBuf) -> Result<()> {
    let cfg = Config::load(cfg_path)?;
    let topics = Topics::new(cfg.broker.base_topic.as_str());

    let mut receiver_cfg = cfg.clone();
    receiver_cfg.broker.client_id = Some(format!("{}-receiver", cfg.client_id()));

    let mut link = LinkStateMachine::new(NatsBus::from_config(&receiver_cfg), LinkOptions::from(&cfg.broker));
    let saved = edge_audio_node::receiver::run_receiver(
        &mut link,
        &topics,
        cfg.audio.sample_rate,
        cfg.transport.max_frames,
        &out,
        Duration::from_millis(cfg.control.loop_delay_ms),
        shutdown_signal(),
    )
    .await;

    info!("Saved {} snapshots to {}", saved, out.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    info!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run { source, offline } => {
            if offline {
                warn!("Offline mode: messages stay inside this process");
                run_node(
                    &cli.config,
                    &source,
                    |_| MemoryBus::new().0,
                    |_| AlwaysAssociated,
                )
                .await
            } else {
                run_node(&cli.config, &source, NatsBus::from_config, |cfg| {
                    HostNetwork::new(
                        cfg.probe_host(),
                        Duration::from_millis(cfg.network.probe_timeout_ms),
                    )
                })
                .await
            }
        }
        Commands::Receive { out } => run_receive(&cli.config, out).await,
    }
}
