//! # stationwatch CLI (`stw`)
//!
//! Inspect items as they move through the stations of a pipeline.
//!
//! ## Usage
//!
//! ```bash
//! stw --config ./config/stw.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `stw stations` | List configured stations and whether they are available |
//! | `stw roles` | List the roles of the live stations |
//! | `stw ops` | List the search operations the pipeline supports |
//! | `stw search -c "<criterion>"...` | Search every live station |
//!
//! ## Examples
//!
//! ```bash
//! # Orders 1000 and up, wherever they are
//! stw search -c "ID GE 1000"
//!
//! # Stuck items at intake stations, as JSON
//! stw search --role intake -c IS_STUCK --json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stationwatch::config::load_config;
use stationwatch::criteria::Criterion;
use stationwatch::logging::init_logging;
use stationwatch::pipeline::{connection_pool, Pipeline};
use stationwatch::search::{block_on_detached, run_search};
use stationwatch::stations::{list_operations, list_roles, list_stations};
use stationwatch::traits::{StationContext, StationRegistry};

/// stationwatch: federated search across independently operated stations.
#[derive(Parser)]
#[command(name = "stw", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/stw.toml")]
    config: PathBuf,

    /// Debug logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured stations with their status.
    Stations,

    /// List the distinct roles of the live stations.
    Roles,

    /// List supported search operations.
    Ops,

    /// Search all live stations.
    ///
    /// Criteria are written `FIELD OP VALUE`, `FIELD OP` for unary
    /// operations, or just `OP` for status predicates such as `IS_STUCK`.
    Search {
        /// Search criterion; repeat for more. All must match.
        #[arg(short = 'c', long = "criterion")]
        criteria: Vec<Criterion>,

        /// Only search stations with this role.
        #[arg(long)]
        role: Option<String>,

        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn build_pipeline(cfg: &stationwatch::config::Config) -> Result<Pipeline> {
    let ctx = StationContext::new(connection_pool(&cfg.pool)?);
    Ok(Pipeline::from_config(cfg, &StationRegistry::with_builtins(), &ctx))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    // stations abandoned after a timeout must not keep the process alive
    block_on_detached(run(cli))?
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Stations => {
            let pipeline = build_pipeline(&cfg)?;
            list_stations(&pipeline);
            pipeline.shutdown();
        }
        Commands::Roles => {
            let pipeline = build_pipeline(&cfg)?;
            list_roles(&pipeline);
            pipeline.shutdown();
        }
        Commands::Ops => {
            let pipeline = build_pipeline(&cfg)?;
            list_operations(&pipeline);
            pipeline.shutdown();
        }
        Commands::Search {
            criteria,
            role,
            json,
        } => {
            run_search(&cfg, &criteria, role.as_deref(), json).await?;
        }
    }

    Ok(())
}
