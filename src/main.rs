use std::{num::NonZeroUsize, process::ExitCode, time::Duration};

use clap::{command, Parser, Subcommand};
use clusterwait::{config::Config, order, pool::Pool, Cli, Oc, Resource, Result};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a JSONPath query evaluated against one object.
    Get {
        kind: String,
        name: String,
        /// e.g. `{.status.machineCount}`
        query: String,
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Wait for a machine config pool to finish rolling out.
    WaitPool {
        pool: String,
        /// Defaults to ten minutes per machine in the pool.
        #[arg(long)]
        timeout_mins: Option<u64>,
        /// Fail once more nodes than this update at once.
        #[arg(long)]
        max_unavailable: Option<NonZeroUsize>,
    },
    /// Wait for a rollout and verify nodes updated in zone and age order.
    UpdateOrder {
        pool: String,
        #[arg(long)]
        timeout_mins: Option<u64>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let cli = Cli::from_config(&args.config);

    match run(cli, &args.config, args.command).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli<Oc>, config: &Config, command: Command) -> Result<ExitCode> {
    match command {
        Command::Get {
            kind,
            name,
            query,
            namespace,
        } => {
            let resource = match namespace {
                Some(namespace) => Resource::namespaced(cli, &namespace, &kind, &name),
                None => Resource::new(cli, &kind, &name),
            };

            println!("{}", resource.get(&query).await?);
        }

        Command::WaitPool {
            pool,
            timeout_mins,
            max_unavailable,
        } => {
            let pool = Pool::new(cli, &pool);
            let mut rollout = pool.rollout().interval(config.poll_interval());

            if let Some(minutes) = timeout_mins {
                rollout = rollout.timeout(Duration::from_secs(minutes * 60));
            }

            if max_unavailable.is_some() {
                rollout = rollout.track_updates(max_unavailable);
            }

            let report = rollout.wait().await?;
            info!("pool {} updated after {} checks", pool.name(), report.ticks);
        }

        Command::UpdateOrder { pool, timeout_mins } => {
            let pool = Pool::new(cli, &pool);
            let expected = pool.expected_update_order().await?;
            let step = pool.max_unavailable().await?;
            info!("expecting updates in batches of {step}: {expected:?}");

            let mut rollout = pool
                .rollout()
                .interval(config.poll_interval())
                .track_updates(Some(step))
                .expected_order(expected.clone());

            if let Some(minutes) = timeout_mins {
                rollout = rollout.timeout(Duration::from_secs(minutes * 60));
            }

            let report = rollout.wait().await?;

            if let Some(mismatch) = order::first_mismatch(&expected, &report.observed_order, step) {
                error!("pool {} updated out of order: {mismatch}", pool.name());
                return Ok(ExitCode::FAILURE);
            }

            info!(
                "pool {} updated in order: {:?}",
                pool.name(),
                report.observed_order
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}
