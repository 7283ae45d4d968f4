mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dubsync_engine::OptimizationMode;
use tracing_subscriber::EnvFilter;

use crate::commands::RunArgs;
use crate::config::AppConfig;

/// Fit dubbed speech into subtitle timing windows
#[derive(Parser, Debug)]
#[command(name = "dubsync", author, version, about, long_about = None)]
struct Cli {
    /// YAML settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize every cue and write the mixed timeline plus a report
    Run {
        /// JSON array of cues: {id, start, end, translated_text}
        cues: PathBuf,
        /// Output WAV file
        #[arg(short, long, default_value = "dub.wav")]
        out: PathBuf,
        /// Report path (defaults next to the WAV)
        #[arg(short, long)]
        report: Option<PathBuf>,
        #[arg(short, long)]
        language: Option<String>,
        #[arg(long)]
        voice: Option<String>,
        #[arg(short, long)]
        workers: Option<usize>,
        /// economic, balanced or precise
        #[arg(short, long)]
        mode: Option<OptimizationMode>,
        /// Use an offline stub voice instead of the synthesis service
        #[arg(long)]
        stub: bool,
    },

    /// Print local duration estimates without calling any service
    Estimate {
        cues: PathBuf,
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Inspect or prune the clip cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Show the number of cached clips
    Stats,
    /// Remove clips older than the given age
    Prune {
        #[arg(long, default_value_t = 30)]
        older_than_days: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,dubsync=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            cues,
            out,
            report,
            language,
            voice,
            workers,
            mode,
            stub,
        } => {
            commands::run(
                config,
                RunArgs {
                    cues,
                    out,
                    report,
                    language,
                    voice,
                    workers,
                    mode,
                    stub,
                },
            )
            .await
        }
        Commands::Estimate { cues, language } => commands::estimate(&config, &cues, language.as_deref()),
        Commands::Cache { command } => match command {
            CacheCommands::Stats => commands::cache_stats(&config),
            CacheCommands::Prune { older_than_days } => commands::cache_prune(&config, older_than_days),
        },
    }
}
