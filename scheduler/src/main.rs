#[macro_use]
extern crate log;

use std::path::PathBuf;
use std::sync::Arc;

use acine_core::exec_info;
use acine_core::graph::RoutineGraph;
use acine_core::image_match::Bitmap;
use acine_core::layout;
use acine_core::model::Routine;
use acine_runtime::controller::Controller;
use acine_runtime::navigator::Navigator;
use acine_scheduler::config::Config;
use acine_scheduler::dispatch::Dispatcher;
use acine_scheduler::runtime_adapter::NavigatorInterface;
use acine_scheduler::scheduler::Scheduler;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use log::LevelFilter;

#[derive(Parser)]
#[command(
    name = "acine-scheduler",
    version,
    about = "Serves a routine's scheduling groups against a target window"
)]
struct Cli {
    /// Path to the scheduler's YAML config file.
    #[arg(short, long, default_value = "acine.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Loads the configured routine and serves its scheduling groups
    /// forever.
    Run,
    /// Dispatches a single edge immediately and exits, for scripting and
    /// manual testing.
    Once {
        /// The edge id to run.
        edge_id: String,
    },
}

/// Stand-in for the window-capture/input-injection collaborator. A real
/// integrator supplies its own [`Controller`]; this one only exists so the
/// binary itself is runnable and every call site below is exercised.
struct NullController;

#[async_trait]
impl Controller for NullController {
    async fn get_frame(&mut self) -> anyhow::Result<Bitmap> {
        anyhow::bail!("no window-capture collaborator is wired in (acine_runtime::controller::Controller)")
    }

    async fn mouse_move(&mut self, _x: i64, _y: i64) -> anyhow::Result<()> {
        anyhow::bail!("no input-injection collaborator is wired in (acine_runtime::controller::Controller)")
    }

    async fn mouse_down(&mut self) -> anyhow::Result<()> {
        anyhow::bail!("no input-injection collaborator is wired in (acine_runtime::controller::Controller)")
    }

    async fn mouse_up(&mut self) -> anyhow::Result<()> {
        anyhow::bail!("no input-injection collaborator is wired in (acine_runtime::controller::Controller)")
    }
}

fn load_routine(config: &Config) -> anyhow::Result<Routine> {
    let path = layout::routine_path(&config.data_dir, &config.routine_id);
    let bytes = std::fs::read(&path).map_err(|e| anyhow::anyhow!("reading routine {}: {e}", path.display()))?;
    Ok(bincode::deserialize(&bytes)?)
}

async fn run(config_path: PathBuf, command: Command) -> anyhow::Result<()> {
    let config = Config::load(&config_path)?;
    if let Some(level) = &config.log_level {
        std::env::set_var("RUST_LOG", level);
    }

    let routine = load_routine(&config)?;
    let graph = Arc::new(RoutineGraph::build(routine.clone())?);

    let frame_dir = layout::routine_dir(&config.data_dir, &config.routine_id).join("img");
    let runtimedata_path = layout::runtimedata_path(&config.data_dir, &config.routine_id);
    let exec_table = exec_info::load(&runtimedata_path)?;

    let mut navigator = Navigator::new(graph.clone(), frame_dir, NullController, 0);
    navigator.load_exec_info(exec_table);
    let mut iface = NavigatorInterface::new(navigator);

    match command {
        Command::Once { edge_id } => {
            let result = iface.goto(&edge_id).await;
            info!("edge '{edge_id}' finished with result {result:?}");
        }
        Command::Run => {
            let edges: Vec<_> = graph.all_edges().cloned().collect();
            let mut scheduler = Scheduler::new(edges);
            let mut dispatcher = Dispatcher::new(&routine, acine_core::time::wall_now())?;

            loop {
                let now = acine_core::time::wall_now();
                let now_ms = acine_core::time::now_ms();
                dispatcher.dispatch_due(now, now_ms, &routine, &mut scheduler)?;

                if !scheduler.next(now_ms, &mut iface).await {
                    tokio::time::sleep(config.poll_interval).await;
                }
            }
        }
    }

    exec_info::save(&runtimedata_path, iface.navigator().exec_info())?;
    Ok(())
}

/// Helper to print top-level errors through [log::error]
#[quit::main]
fn main() {
    log_panics::init();
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    std::env::set_var("RUST_LOG", level.clone());

    pretty_env_logger::formatted_builder()
        .parse_filters(&level)
        .filter_module("tokio", LevelFilter::Off)
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let rt = tokio::runtime::Runtime::new().expect("failed to start the tokio runtime");
    if let Err(e) = rt.block_on(run(cli.config, cli.command)) {
        error!("{e}");
        quit::with_code(1);
    }
}
