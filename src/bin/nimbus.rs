//! Nimbus CLI - load a model, run the single-rank engine, write reports.
//!
//! ```bash
//! # Run a JSON model with its routing file
//! nimbus --routes cluster.route --model cluster.json --report report.json
//!
//! # Run the built-in star benchmark (routes are generated)
//! nimbus --machine-amount 16 --task-amount 500
//! ```

use anyhow::Context;
use clap::Parser;
use nimbus::harness::Engine;
use nimbus::metrics::GlobalMetrics;
use nimbus_core::routing::RoutingTable;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nimbus")]
#[command(version)]
#[command(about = "Time-warp discrete-event simulator for cloud and cluster workloads")]
struct Cli {
    /// Routing file: one `src dst h1 ... hN` line per route
    #[arg(long)]
    routes: Option<PathBuf>,

    /// Model file (JSON). Omit to run the built-in star benchmark
    #[arg(long)]
    model: Option<PathBuf>,

    /// Number of machines in the built-in star benchmark
    #[arg(long, default_value_t = 10)]
    machine_amount: u32,

    /// Number of tasks in the built-in star benchmark
    #[arg(long, default_value_t = 100)]
    task_amount: u32,

    /// Minimum outgoing delay for generator services, in seconds
    #[arg(long, default_value_t = nimbus_core::DEFAULT_LOOKAHEAD)]
    lookahead: f64,

    /// Directory for the per-node report (node_<rank>.json)
    #[arg(long, default_value = ".")]
    node_report: PathBuf,

    /// Path for the prettified global report; omit to skip writing it
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let (model, routes) = match &cli.model {
        Some(path) => {
            let model = nimbus::model::load_path(path)
                .with_context(|| format!("loading model {}", path.display()))?;

            let mut routes = RoutingTable::new();
            let route_path = cli
                .routes
                .as_ref()
                .context("--routes is required when --model is given")?;
            routes
                .load_path(route_path)
                .with_context(|| format!("loading routes {}", route_path.display()))?;

            (model, routes)
        }
        None => nimbus::star::build(cli.machine_amount, cli.task_amount)
            .context("building the star benchmark model")?,
    };

    tracing::info!(
        services = model.service_count(),
        users = model.users().len(),
        lookahead = cli.lookahead,
        "starting simulation"
    );

    let mut engine = Engine::new(model, routes, cli.lookahead)?;
    let events = engine.run()?;
    tracing::info!(events, now = engine.now(), "event queue drained");

    let node = engine.finish();
    let node_path = node
        .write_report(&cli.node_report)
        .with_context(|| format!("writing node report into {}", cli.node_report.display()))?;
    tracing::info!(path = %node_path.display(), "node report written");

    let global = GlobalMetrics::reduce([&node], engine.users());
    global.log_summary();

    if let Some(report_path) = &cli.report {
        global
            .report()
            .write(report_path)
            .with_context(|| format!("writing global report {}", report_path.display()))?;
        tracing::info!(path = %report_path.display(), "global report written");
    }

    Ok(())
}
