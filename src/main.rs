use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uplift::filter::FilterCriteria;
use uplift::logging::{self, LogFormat};
use uplift_common::{LoaderType, PipelinePhase, Priority, SourceType};

mod cmd;

#[derive(Parser)]
#[command(name = "uplift")]
#[command(version, about = "Resumable ingestion pipeline for mod-loader upgrade documentation")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Continue past blocking errors, recording them as run warnings
    #[arg(long, global = true)]
    pub force_proceed: bool,

    /// Format of the log stream on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Record selection flags shared by the per-record phases.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Only these source types (comma-separated)
    #[arg(long = "source-type", value_delimiter = ',')]
    pub source_types: Vec<SourceType>,

    /// Only these loaders (comma-separated)
    #[arg(long = "loader", value_delimiter = ',')]
    pub loaders: Vec<LoaderType>,

    #[arg(long)]
    pub min_priority: Option<Priority>,

    #[arg(long)]
    pub min_relevance: Option<f64>,

    #[arg(long)]
    pub minecraft_version: Option<String>,

    /// Process at most this many records
    #[arg(long)]
    pub limit: Option<usize>,
}

impl FilterArgs {
    pub fn criteria(&self, resume: bool) -> FilterCriteria {
        let mut criteria = FilterCriteria::default()
            .with_resume(resume)
            .with_source_types(self.source_types.clone())
            .with_loader_types(self.loaders.clone());
        if let Some(priority) = self.min_priority {
            criteria = criteria.with_min_priority(priority);
        }
        if let Some(relevance) = self.min_relevance {
            criteria = criteria.with_min_relevance(relevance);
        }
        if let Some(ref version) = self.minecraft_version {
            criteria = criteria.with_minecraft_version(version.clone());
        }
        if let Some(limit) = self.limit {
            criteria = criteria.with_limit(limit);
        }
        criteria
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Find candidate sources and add them to the registry
    Discover,
    /// Fetch raw content for discovered sources
    Collect {
        /// Retry sources that failed collection
        #[arg(long)]
        resume: bool,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Turn collected content into structured output
    Distill {
        /// Retry sources that failed distillation
        #[arg(long)]
        resume: bool,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Assemble distilled sources into the package directory
    Package,
    /// Produce a checksummed bundle from the package
    Bundle,
    /// Run every phase in order
    Run {
        #[arg(long)]
        skip_discovery: bool,
        #[arg(long)]
        skip_collection: bool,
        #[arg(long)]
        skip_distillation: bool,
        #[arg(long)]
        skip_packaging: bool,
        #[arg(long)]
        skip_bundling: bool,
        /// Retry sources that failed in any phase being run
        #[arg(long)]
        resume: bool,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Show registry counts, completion and failed sources
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Import legacy per-phase output files into the registry
    Migrate,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

impl Commands {
    /// Commands that touch the registry get a log file under `.uplift/logs`.
    fn writes_state(&self) -> bool {
        !matches!(self, Commands::Status { .. } | Commands::Config { .. })
    }
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    Show,
    Validate,
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = cli
        .command
        .writes_state()
        .then(|| project_dir.join(".uplift").join("logs"));
    let _log_guard = logging::init_tracing(cli.log_format, cli.verbose, log_dir.as_deref())?;

    match &cli.command {
        Commands::Discover => {
            cmd::run_phase(&cli, &project_dir, PipelinePhase::Discovery, FilterCriteria::default())
                .await?
        }
        Commands::Collect { resume, filters } => {
            cmd::run_phase(
                &cli,
                &project_dir,
                PipelinePhase::Collection,
                filters.criteria(*resume),
            )
            .await?
        }
        Commands::Distill { resume, filters } => {
            cmd::run_phase(
                &cli,
                &project_dir,
                PipelinePhase::Distillation,
                filters.criteria(*resume),
            )
            .await?
        }
        Commands::Package => {
            cmd::run_phase(&cli, &project_dir, PipelinePhase::Packaging, FilterCriteria::default())
                .await?
        }
        Commands::Bundle => {
            cmd::run_phase(&cli, &project_dir, PipelinePhase::Bundling, FilterCriteria::default())
                .await?
        }
        Commands::Run {
            skip_discovery,
            skip_collection,
            skip_distillation,
            skip_packaging,
            skip_bundling,
            resume,
            filters,
        } => {
            let skip: Vec<PipelinePhase> = [
                (*skip_discovery, PipelinePhase::Discovery),
                (*skip_collection, PipelinePhase::Collection),
                (*skip_distillation, PipelinePhase::Distillation),
                (*skip_packaging, PipelinePhase::Packaging),
                (*skip_bundling, PipelinePhase::Bundling),
            ]
            .into_iter()
            .filter_map(|(skipped, phase)| skipped.then_some(phase))
            .collect();
            cmd::run_all(&cli, &project_dir, skip, filters.criteria(*resume)).await?
        }
        Commands::Status { json } => cmd::cmd_status(&project_dir, *json)?,
        Commands::Migrate => cmd::cmd_migrate(&project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
