//! CLI entry point for the XEP firmware.
//!
//! Runs the firmware against the simulated X4 chip:
//!
//! ```bash
//! # Host link on stdin/stdout, logs on stderr
//! xep run
//!
//! # Host link over TCP, persistent flash image
//! XEP_TRANSPORT__KIND=tcp XEP_STORAGE__PATH=flash.bin xep run
//!
//! # Wipe a flash image
//! xep format-store flash.bin
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing::{info, warn};
use xep::boot::{Board, BootState, Firmware};
use xep::config::{StorageConfig, TransportKind, XepConfig, DEFAULT_CONFIG_PATH};
use xep::logging;
use xep::system::ResetReason;
use xep::transport::{Link, LoopbackTransport, StreamTransport};
use xep_hardware::{MockX4, MockX4Config};
use xep_storage::{FileStore, Flash, MemFlash, MmapFlash};

#[derive(Parser)]
#[command(name = "xep")]
#[command(about = "XEP radar module firmware on a simulated X4", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the firmware and serve the host until interrupted
    Run {
        /// Seed of the simulated chip (overrides radar.mock_seed)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Format a memory-mapped flash image
    FormatStore {
        /// Image file, created if missing
        path: PathBuf,
    },

    /// Print the effective configuration as TOML
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = XepConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate().map_err(|e| anyhow!(e))?;

    match cli.command {
        Commands::Run { seed } => {
            logging::init_from_config(&config).map_err(|e| anyhow!(e))?;
            run(config, seed).await
        }
        Commands::FormatStore { path } => {
            logging::init_from_config(&config).map_err(|e| anyhow!(e))?;
            format_store(&path, &config.storage)
        }
        Commands::PrintConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(config: XepConfig, seed: Option<u64>) -> Result<()> {
    let primary = connect(&config).await?;
    let debug = match &config.transport.debug_address {
        Some(address) => Some(accept("dhostcom", address).await?),
        None => None,
    };

    let chip = MockX4::new(MockX4Config {
        seed: seed.or(config.radar.mock_seed),
        ..MockX4Config::default()
    });
    let ram_flash = MemFlash::new(
        config.storage.size,
        config.storage.page_size,
        config.storage.block_size,
    );

    let mut state = BootState::power_on(&config);
    loop {
        let board = Board {
            driver: Box::new(chip.clone()),
            flash: Some(open_flash(&config.storage, &ram_flash)?),
            primary: primary.clone(),
            debug: debug.clone(),
        };
        let firmware = Firmware::boot(&config, state, board)?;

        let requested = tokio::select! {
            reason = firmware.wait_reset() => Some(reason),
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(reason) = requested else {
            info!("Interrupted, shutting down");
            let _ = firmware.shutdown(ResetReason::Intended);
            return Ok(());
        };
        if reason == ResetReason::Bootloader {
            warn!("No bootloader on this target, rebooting the firmware");
        }
        state = firmware.shutdown(reason);
    }
}

async fn connect(config: &XepConfig) -> Result<Link> {
    Ok(match config.transport.kind {
        TransportKind::Stdio => {
            StreamTransport::spawn("stdio", tokio::io::stdin(), tokio::io::stdout())
        }
        TransportKind::Tcp => accept("hostcom", &config.transport.tcp_address).await?,
        TransportKind::Loopback => LoopbackTransport::new("loopback").1,
    })
}

async fn accept(name: &str, address: &str) -> Result<Link> {
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!(link = name, address, "Waiting for host");
    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    info!(link = name, %peer, "Host connected");
    let (reader, writer) = stream.into_split();
    Ok(StreamTransport::spawn(name, reader, writer))
}

fn open_flash(storage: &StorageConfig, ram: &MemFlash) -> Result<Box<dyn Flash>> {
    Ok(match &storage.path {
        Some(path) => Box::new(
            MmapFlash::open(path, storage.size, storage.page_size, storage.block_size)
                .with_context(|| format!("opening flash image {}", path.display()))?,
        ),
        None => Box::new(ram.clone()),
    })
}

fn format_store(path: &Path, storage: &StorageConfig) -> Result<()> {
    let flash = MmapFlash::open(path, storage.size, storage.page_size, storage.block_size)?;
    let store = FileStore::init(Box::new(flash))?;
    store.format()?;
    info!(path = %path.display(), size = storage.size, "Flash image formatted");
    Ok(())
}
