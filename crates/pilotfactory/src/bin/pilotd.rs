use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueHint};
use pilotfactory::PILOTD_VERSION;
use pilotfactory::common::config::FactoryConfig;
use pilotfactory::common::setup::setup_logging;
use pilotfactory::factory::Factory;

#[derive(Parser)]
struct CommonOpts {
    /// Enables more detailed log output
    #[arg(long, env = "PILOTD_DEBUG", global = true)]
    debug: bool,
}

#[derive(Parser)]
struct ConfigOpts {
    /// Path to the factory configuration file
    #[arg(long, env = "PILOTD_CONFIG", value_hint = ValueHint::FilePath)]
    config: PathBuf,
}

#[derive(Parser)]
struct StatusOpts {
    #[clap(flatten)]
    config: ConfigOpts,

    /// Only show the statistics and jobs of this queue
    #[arg(long)]
    queue: Option<String>,
}

#[derive(Parser)]
enum SubCommand {
    /// Run the factory until it is interrupted
    Run(ConfigOpts),
    /// Query the batch system once and print its state as JSON
    Status(StatusOpts),
}

#[derive(Parser)]
#[command(
    author,
    about,
    version(PILOTD_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
struct RootOptions {
    #[clap(flatten)]
    common: CommonOpts,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

async fn command_run(opts: ConfigOpts) -> anyhow::Result<()> {
    let config = FactoryConfig::load(&opts.config)?;
    log::info!(
        "Starting pilot factory {PILOTD_VERSION} with {} queue(s)",
        config.queues.len()
    );
    let factory = Factory::new(config);
    factory
        .run(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                log::error!("Cannot listen for the interrupt signal: {error}");
            }
        })
        .await?;
    Ok(())
}

async fn command_status(opts: StatusOpts) -> anyhow::Result<()> {
    let config = FactoryConfig::load(&opts.config.config)?;
    let factory = Factory::new(config);
    let snapshot = factory.refresh_once().await?;
    let output = match opts.queue {
        Some(queue) => {
            let cell = factory.snapshots();
            serde_json::json!({
                "queue": queue,
                "stats": cell.get_stats(Some(&queue), Duration::MAX),
                "jobs": cell.get_job_info(Some(&queue), Duration::MAX),
            })
        }
        None => serde_json::to_value(snapshot.as_ref())?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = RootOptions::parse();
    setup_logging(opts.common.debug);

    let result = match opts.subcmd {
        SubCommand::Run(opts) => command_run(opts).await,
        SubCommand::Status(opts) => command_status(opts).await,
    };

    if let Err(error) = result {
        log::error!("{error:?}");
        std::process::exit(1);
    }
    Ok(())
}
