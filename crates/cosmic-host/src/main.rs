use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cosmic_host::HostConfig;
use cosmic_host::node::Node;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Drive a block manager from a JSON-lines script of chain actions.
#[derive(Parser, Debug)]
#[command(name = "cosmic-host", version, about = "Kernel block manager")]
struct Cli {
    /// Node state directory (env: COSMIC_HOST_DIR)
    #[arg(short = 'd', long, env = "COSMIC_HOST_DIR")]
    dir: PathBuf,

    /// Script of actions; reads stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Write the slog as JSON lines to this file on exit
    #[arg(long)]
    slog: Option<PathBuf>,

    /// Busy-wait after each executed END_BLOCK, in milliseconds
    #[arg(long, env = "END_BLOCK_SPIN_MS")]
    end_block_spin_ms: Option<u64>,

    /// Log every block lifecycle step
    #[arg(long, env = "VERBOSE_BLOCKS")]
    verbose_blocks: bool,

    /// Name shown in this node's logs
    #[arg(long, env = "DEBUG_NAME")]
    debug_name: Option<String>,
}

impl Cli {
    fn config(&self) -> HostConfig {
        HostConfig {
            end_block_spin: self
                .end_block_spin_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            verbose_blocks: self.verbose_blocks,
            debug_name: self.debug_name.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    let node = Node::open(&cli.dir, cli.config())
        .with_context(|| format!("opening node at {}", cli.dir.display()))?;

    let result = match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            node.run_script(BufReader::new(file)).await
        }
        None => node.run_script(BufReader::new(tokio::io::stdin())).await,
    };

    let mut manager = node.shutdown().await?;
    tracing::info!(saved_height = manager.saved_height(), "node stopped");

    if let Some(path) = &cli.slog {
        let mut out = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("creating {}", path.display()))?;
        for record in manager.kernel_mut().take_slog() {
            out.write_all(format!("{record}\n").as_bytes()).await?;
        }
        out.flush().await?;
    }

    let summary = result?;
    tracing::info!(sent = summary.sent, queued = summary.queued, "script finished");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}
