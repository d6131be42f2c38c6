use anyhow::{Context, Result};
use clap::Parser;
use diff_context::dispatcher::ResolveOptions;
use diff_context::{Config, DiffEngine, DiffScope, DiffSummary, Strategy};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_COMMIT_HASH"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

/// Print a size-bounded summary of pending git changes
#[derive(Debug, Parser)]
#[command(name = "diff-context", version = VERSION)]
struct Cli {
    /// Which changes to include: staged, unstaged or both
    #[arg(long, default_value = "staged")]
    scope: DiffScope,

    /// Byte budget of the output (defaults to chunking.max_size)
    #[arg(long)]
    max_size: Option<usize>,

    /// Force a strategy: sequential, incremental or parallel
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Repository to read
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Configuration file (defaults to <repo>/.diff-context.toml, then the
    /// platform config directory)
    #[arg(long, env = "DIFF_CONTEXT_CONFIG")]
    config: Option<PathBuf>,

    /// Print every chunk instead of the single-answer text
    #[arg(long)]
    chunks: bool,

    /// Print the health report as JSON on stderr
    #[arg(long)]
    stats: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(path: Option<&PathBuf>, repo: &Path) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = Config::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            config.apply_env_overrides();
            config.validate()?;
            config
        }
        None => Config::for_repo(repo)?,
    };
    Ok(config)
}

fn print_chunks(summary: &DiffSummary) {
    let total = summary.chunks.len();
    for chunk in &summary.chunks {
        println!(
            "=== chunk {}/{} ({} bytes) ===",
            chunk.index + 1,
            total,
            chunk.len()
        );
        print!("{}", chunk.text());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the diff
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    let config = load_config(cli.config.as_ref(), &cli.repo)?;
    let max_size = cli.max_size.unwrap_or(config.chunking.max_size);
    let engine = DiffEngine::with_config(&cli.repo, config);

    let mut options = ResolveOptions::new(max_size);
    if let Some(strategy) = cli.strategy {
        options = options.with_strategy(strategy);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let result = engine.get_diff_with(cli.scope, options, &cancel).await;

    if cli.stats {
        eprintln!("{}", serde_json::to_string_pretty(&engine.health_report())?);
    }

    let summary = result?;
    if cli.chunks {
        print_chunks(&summary);
    } else {
        print!("{}", summary.text);
        if !summary.text.ends_with('\n') {
            println!();
        }
    }

    Ok(())
}
