use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ecgdb::{export_cohort, load_config, Pass, Portion, Store};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ecgdb", about = "Build and query the single-file ECG store")]
struct Cli {
    /// TOML config overriding the built-in constants and data layout
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true, default_value = "ecg.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the schema and fill the dictionaries
    Create,

    /// Ingest datasets from their summaries
    Ingest {
        /// Dataset name (repeatable; default: every configured dataset)
        #[arg(long)]
        dataset: Vec<String>,

        /// 1 = all, below 1 = fraction, above 1 = count
        #[arg(long, default_value = "1")]
        portion: Portion,

        #[arg(long, value_enum, default_value_t = PassArg::All)]
        pass: PassArg,
    },

    /// Random patients with their diagnosis codes
    Cohort {
        #[arg(long)]
        n: Option<usize>,
    },

    /// Original id and diagnosis codes of one patient
    Patient { id: i64 },

    /// Age and sex of one or more patients
    Covariates {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Print a patient's samples, one row per instant
    Ecg {
        id: i64,

        /// 1-based lead numbers, comma-separated (default: all 12)
        #[arg(long, value_delimiter = ',')]
        leads: Option<Vec<usize>>,

        /// Seconds from the start
        #[arg(long)]
        window: Option<f64>,
    },

    /// Write a random cohort of windows to a safetensors file
    Export {
        #[arg(long)]
        output: PathBuf,

        #[arg(long)]
        n: Option<usize>,

        #[arg(long, value_delimiter = ',')]
        leads: Option<Vec<usize>>,

        #[arg(long)]
        window: Option<f64>,
    },

    /// List tables and row counts
    Inspect,
}

#[derive(Clone, Copy, ValueEnum)]
enum PassArg {
    Metadata,
    TimeSeries,
    All,
}

impl From<PassArg> for Pass {
    fn from(p: PassArg) -> Self {
        match p {
            PassArg::Metadata => Pass::Metadata,
            PassArg::TimeSeries => Pass::TimeSeries,
            PassArg::All => Pass::All,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn open_existing(path: &Path, cfg: &ecgdb::StoreConfig) -> Result<Store> {
    if !path.is_file() {
        bail!("database {} does not exist; run `ecgdb create` first", path.display());
    }
    Store::open(path, cfg)
}

fn run(cli: Cli) -> Result<()> {
    let (cfg, layout) = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Create => {
            Store::create(&cli.db, &cfg)?;
            println!("Created {}", cli.db.display());
        }

        Command::Ingest { dataset, portion, pass } => {
            let mut store = Store::create(&cli.db, &cfg)?;
            let datasets = if dataset.is_empty() { cfg.all_datasets.clone() } else { dataset };
            for ds in &datasets {
                for report in store.ingest(ds, portion, &layout, pass.into())? {
                    println!("{ds}: inserted {}, skipped {}", report.inserted, report.skipped);
                }
            }
        }

        Command::Cohort { n } => {
            let store = open_existing(&cli.db, &cfg)?;
            for entry in store.patients_with_diagnoses(n)? {
                println!("{}\t{}", entry.patient_id, entry.diagnoses);
            }
        }

        Command::Patient { id } => {
            let store = open_existing(&cli.db, &cfg)?;
            let p = store.single_patient(id)?;
            println!("{}\t{}", p.original_id, p.diagnoses);
        }

        Command::Covariates { ids } => {
            let store = open_existing(&cli.db, &cfg)?;
            for c in store.covariates(&ids)? {
                let age = c.age.map_or("NaN".to_string(), |a| a.to_string());
                let sex = c.sex.map_or("NaN".to_string(), |s| s.code().to_string());
                println!("{}\t{age}\t{sex}", c.patient_id);
            }
        }

        Command::Ecg { id, leads, window } => {
            let store = open_existing(&cli.db, &cfg)?;
            let ecg = store.ecg(id, leads.as_deref(), window)?;
            for row in ecg.rows() {
                let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                println!("{}", line.join(" "));
            }
        }

        Command::Export { output, n, leads, window } => {
            let store = open_existing(&cli.db, &cfg)?;
            let summary = export_cohort(&store, n, leads.as_deref(), window, &output)?;
            println!(
                "Written {} patients ({} tensors) → {}",
                summary.patient_ids.len(),
                summary.tensors,
                output.display()
            );
        }

        Command::Inspect => {
            let store = open_existing(&cli.db, &cfg)?;
            println!("page_size {}", store.page_size()?);
            for t in store.inspect()? {
                println!("{:<22}{:>12}", t.name, t.rows);
            }
        }
    }
    Ok(())
}
