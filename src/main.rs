//================================================
// chainbridge/src/main.rs
//================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Command line host for the native runtime
// Objective: Start a host, evaluate snippets and advance the scheduler
//================================================

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chainbridge::{logging, BridgeConfig, Host, Loopback, NativeLibrary};
use clap::Parser;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Host for the native automation runtime", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Frames to advance (overrides the configuration)
    #[arg(short, long)]
    ticks: Option<u64>,
    /// Snippet to evaluate before ticking; may be repeated
    #[arg(short, long)]
    eval: Vec<String>,
    /// Capability table version to request (overrides the configuration)
    #[arg(long, value_parser = parse_version)]
    abi: Option<u32>,
}

fn parse_version(raw: &str) -> Result<u32, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|err| format!("invalid ABI version `{raw}`: {err}"))
}

fn load_library(config: &BridgeConfig) -> Result<Arc<dyn NativeLibrary>> {
    match &config.library {
        None => Ok(Arc::new(Loopback::new())),
        #[cfg(feature = "dylib")]
        Some(path) => Ok(Arc::new(chainbridge::DylibLibrary::open(path)?)),
        #[cfg(not(feature = "dylib"))]
        Some(path) => anyhow::bail!(
            "cannot load {}: built without the `dylib` feature",
            path.display()
        ),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load_from_file(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(ticks) = cli.ticks {
        config.ticks = ticks;
    }
    if let Some(abi) = cli.abi {
        config.abi_version = abi;
    }
    logging::init(&config.log_filter);

    let library = load_library(&config)?;
    let host = Host::start(library, &config).context("failed to start host")?;

    for code in &cli.eval {
        let value = host
            .env()
            .eval(code)
            .with_context(|| format!("failed to evaluate `{code}`"))?;
        println!("{value:?}");
    }

    let mut advanced = 0;
    for _ in 0..config.ticks {
        if !host.advance()? {
            break;
        }
        advanced += 1;
    }
    info!(ticks = advanced, "scheduler advanced");
    Ok(())
}
