use anyhow::Result;
use clap::Parser;
use ecgdb::{load_config, prepare_summaries};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ecgdb-summarize", about = "Write summary_<dataset>.csv for each dataset")]
struct Args {
    /// TOML config overriding the built-in constants and data layout
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dataset name (repeatable; default: every configured dataset)
    #[arg(long)]
    dataset: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let (cfg, layout) = load_config(args.config.as_deref())?;
    let datasets = if args.dataset.is_empty() { cfg.all_datasets.clone() } else { args.dataset };

    for s in prepare_summaries(&datasets, &layout, &cfg)? {
        println!("{}", s.report_line());
        if s.unreadable > 0 {
            println!("{}: {} unreadable headers skipped", s.dataset, s.unreadable);
        }
    }
    println!("Summaries → {}", layout.summaries_dir.display());
    Ok(())
}
