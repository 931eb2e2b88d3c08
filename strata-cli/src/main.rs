//! # Strata CLI
//!
//! Drives an in-process Strata cluster: `simulate` brings partitions online
//! and runs a query; `admin` applies one administrative operation and prints
//! the resulting partition table.

mod simulation;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use strata_core::{logging, Config, StorageTier};

use crate::simulation::{PartitionRow, QuerySummary, Simulation};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata - partitioned activity index with adaptive replica queries")]
struct Cli {
    /// JSON configuration file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a simulated cluster, bring it online and run one query
    Simulate {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// Term to look up
        #[arg(long, default_value = "login")]
        term: String,

        /// Maximum matches to return
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Apply an administrative operation to a simulated cluster
    Admin {
        #[command(flatten)]
        cluster: ClusterArgs,

        #[command(subcommand)]
        operation: AdminOperation,
    },
}

#[derive(Args)]
struct ClusterArgs {
    #[arg(long, default_value_t = 2)]
    hosts: usize,

    #[arg(long, default_value_t = 4)]
    partitions: u64,

    /// Synthetic activities per partition
    #[arg(long, default_value_t = 50)]
    activities: usize,

    /// Maintenance tick rounds before the command runs
    #[arg(long, default_value_t = 2)]
    ticks: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value = "acme")]
    tenant: String,
}

#[derive(Subcommand)]
enum AdminOperation {
    /// Migrate one online replica to the given tier
    ForceTier {
        #[arg(long)]
        host: String,
        #[arg(long)]
        partition: u64,
        #[arg(long, value_enum)]
        tier: TierArg,
    },
    /// Destroy every partition on a host and drop it from the cluster
    RemoveHost {
        #[arg(long)]
        host: String,
    },
    /// Take one replica offline and drop its topology entry
    RemoveTopology {
        #[arg(long)]
        host: String,
        #[arg(long)]
        partition: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    Memory,
    Disk,
}

impl From<TierArg> for StorageTier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Memory => StorageTier::Memory,
            TierArg::Disk => StorageTier::Disk,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    logging::init(&config.monitoring.logging)?;

    match cli.command {
        Commands::Simulate { cluster, term, limit } => {
            let simulation = build(config, &cluster).await;
            let summary = simulation.query(&term, limit).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_table(&simulation.partition_table());
                println!();
                print_summary(&summary);
                let metrics = simulation.metrics().snapshot();
                println!();
                println!(
                    "attempts: {}  escalations: {}  cancelled: {}  activities indexed: {}",
                    metrics.attempts, metrics.escalations, metrics.attempts_cancelled, metrics.activities_indexed
                );
            }
        }
        Commands::Admin { cluster, operation } => {
            let simulation = build(config, &cluster).await;
            let message = match operation {
                AdminOperation::ForceTier { host, partition, tier } => {
                    let coordinate = simulation.coordinate(&host, partition);
                    let changed = simulation
                        .host(&host)?
                        .force_tier(&coordinate, tier.into())
                        .await?;
                    format!("force-tier {}: {}", coordinate, if changed { "migrated" } else { "unchanged" })
                }
                AdminOperation::RemoveHost { host } => {
                    let destroyed = simulation.remove_host(&host).await?;
                    format!("remove-host {}: destroyed {} partitions", host, destroyed)
                }
                AdminOperation::RemoveTopology { host, partition } => {
                    let changed = simulation.remove_topology_entry(&host, partition).await?;
                    format!(
                        "remove-topology {}: {}",
                        simulation.coordinate(&host, partition),
                        if changed { "offline" } else { "unchanged" }
                    )
                }
            };
            info!("{}", message);

            let table = simulation.partition_table();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                println!("{}", message);
                println!();
                print_table(&table);
            }
        }
    }

    Ok(())
}

async fn build(config: Config, args: &ClusterArgs) -> Simulation {
    let simulation = Simulation::new(config, args.hosts, &args.tenant);
    simulation.populate(args.partitions, args.activities, args.seed);
    simulation.tick(args.ticks).await;
    simulation
}

fn print_table(rows: &[PartitionRow]) {
    println!(
        "{:<10} {:>9}  {:<10} {:<6} {:>12}",
        "HOST", "PARTITION", "STATE", "TIER", "LAST INDEXED"
    );
    for row in rows {
        println!(
            "{:<10} {:>9}  {:<10} {:<6} {:>12}",
            row.host,
            row.partition,
            row.state.as_str(),
            row.tier,
            row.last_indexed_sequence
        );
    }
}

fn print_summary(summary: &QuerySummary) {
    println!("query {} for \"{}\"", summary.query_id, summary.term);
    if !summary.schema_registered {
        println!("  schema not registered");
        return;
    }
    for answer in &summary.partitions {
        println!(
            "  partition {:>3} answered by {} after {} attempt(s), {:.2}ms",
            answer.partition, answer.host, answer.attempts, answer.elapsed_ms
        );
    }
    println!(
        "  {} matches in {:.2}ms{}{}",
        summary.matches.len(),
        summary.total_elapsed_ms,
        if summary.partial { ", partial" } else { "" },
        if summary.results_exhausted { ", exhausted" } else { "" }
    );
    for activity in &summary.matches {
        println!("  #{:<5} {}", activity.sequence, activity.payload);
    }
}
