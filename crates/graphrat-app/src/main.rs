//! Command-line shell for the graphrat simulator.
//!
//! Rank 0 reads the input files, distributes the graph and rat table,
//! and owns the stdout step stream; every zone runs as its own
//! single-threaded worker over the in-process channel mesh. Whatever
//! happens, the last line on stdout is `DONE`; the exit status, not
//! the stream, distinguishes success from abort.

mod files;
mod stream;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use graphrat_comm::ChannelMesh;
use graphrat_core::{
    Activity, ActivityTimer, CoreError, Graph, NullSink, SimState, Worker, DEFAULT_GLOBAL_SEED,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use stream::StdoutSink;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "graphrat",
    version,
    about = "Distributed rat-walk simulation on grid graphs"
)]
struct AppCli {
    /// Graph file
    #[arg(short = 'g', long = "graph")]
    graph: PathBuf,

    /// Initial rat position file
    #[arg(short = 'r', long = "rats")]
    rats: Option<PathBuf>,

    /// Number of simulation steps
    #[arg(short = 'n', long = "steps", default_value_t = 1)]
    steps: u32,

    /// Initial random seed
    #[arg(short = 's', long = "seed", default_value_t = DEFAULT_GLOBAL_SEED)]
    seed: u32,

    /// Display update interval
    #[arg(short = 'i', long = "interval", default_value_t = 1)]
    interval: u32,

    /// Quiet mode; do not emit simulation frames
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Instrument simulation activities
    #[arg(short = 'I', long = "instrument")]
    instrument: bool,

    /// Number of zones, one worker per zone
    #[arg(short = 'z', long = "zones", default_value_t = 1)]
    zones: usize,

    /// Inspect the zone partition and exit without simulating
    #[arg(long)]
    partition_only: bool,
}

#[derive(Debug, Clone, Copy)]
struct RunSettings {
    steps: u32,
    interval: u32,
    display: bool,
    instrument: bool,
    seed: u32,
}

fn main() -> ExitCode {
    let cli = AppCli::parse();
    init_tracing();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let chain = format!("{err:#}");
            error!(error = chain.as_str(), "run aborted");
            // A visualizer reading stdout must still see a final DONE.
            println!("DONE");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn run(cli: &AppCli) -> Result<()> {
    if cli.zones == 0 {
        bail!("at least one zone is required");
    }
    if cli.partition_only {
        return inspect_partition(cli);
    }
    let rat_path = cli
        .rats
        .as_ref()
        .ok_or_else(|| anyhow!("an initial rat position file is required"))?;

    let mut timer = ActivityTimer::new(cli.instrument);
    timer.start(Activity::Startup);
    let graph = files::read_graph(&cli.graph, cli.zones)?;
    let positions = files::read_rats(rat_path, &graph)?;
    timer.finish(Activity::Startup);
    info!(zones = cli.zones, "starting workers");

    let settings = RunSettings {
        steps: cli.steps,
        interval: cli.interval.max(1),
        display: !cli.quiet,
        instrument: cli.instrument,
        seed: cli.seed,
    };

    let mut endpoints = ChannelMesh::build(cli.zones).into_iter();
    let master_transport = endpoints
        .next()
        .ok_or_else(|| anyhow!("no transport endpoint for rank 0"))?;
    let results: Vec<(usize, Result<(), String>)> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(cli.zones);
        handles.push(scope.spawn(move || {
            run_master(graph, positions, timer, master_transport, settings)
        }));
        for transport in endpoints {
            handles.push(scope.spawn(move || run_follower(transport, settings)));
        }
        handles
            .into_iter()
            .enumerate()
            .map(|(zone, handle)| {
                let outcome = match handle.join() {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err("worker panicked".to_string()),
                };
                (zone, outcome)
            })
            .collect()
    });

    let mut failed = false;
    for (zone, outcome) in results {
        if let Err(err) = outcome {
            failed = true;
            error!(zone, error = err.as_str(), "worker failed");
        }
    }
    if failed {
        bail!("one or more workers failed");
    }
    Ok(())
}

fn run_master(
    graph: Graph,
    positions: Vec<u32>,
    mut timer: ActivityTimer,
    mut transport: ChannelMesh,
    settings: RunSettings,
) -> Result<(), CoreError> {
    timer.start(Activity::Startup);
    graph.broadcast(&mut transport)?;
    let state = SimState::new(&graph, positions, settings.seed)?;
    state.distribute(&mut transport)?;
    timer.finish(Activity::Startup);

    let mut worker = Worker::new(graph, state, transport, timer);
    let mut sink = StdoutSink::new();
    worker.simulate(settings.steps, settings.interval, settings.display, &mut sink)?;
    if settings.instrument {
        worker.report_activity();
    }
    Ok(())
}

fn run_follower(mut transport: ChannelMesh, settings: RunSettings) -> Result<(), CoreError> {
    let mut timer = ActivityTimer::new(settings.instrument);
    timer.start(Activity::Startup);
    let graph = Graph::receive(&mut transport)?;
    let state = SimState::receive(&graph, settings.seed, &mut transport)?;
    timer.finish(Activity::Startup);

    let mut worker = Worker::new(graph, state, transport, timer);
    worker.simulate(
        settings.steps,
        settings.interval,
        settings.display,
        &mut NullSink,
    )?;
    if settings.instrument {
        worker.report_activity();
    }
    Ok(())
}

/// Set up every zone in turn and log its boundary structure, without
/// running the simulation.
fn inspect_partition(cli: &AppCli) -> Result<()> {
    let graph = files::read_graph(&cli.graph, cli.zones)?;
    for zone in 0..cli.zones {
        let layout = graph.zone_layout(zone);
        info!(
            zone,
            nodes = layout.local_nodes().len(),
            edges = layout.local_edge_count(),
            "zone"
        );
        for peer in layout.boundary_peers() {
            let exports = preview(layout.exports(peer));
            let imports = preview(layout.imports(peer));
            info!(
                zone,
                peer,
                exports = exports.as_str(),
                imports = imports.as_str(),
                "boundary"
            );
        }
    }
    println!("DONE");
    Ok(())
}

/// First few ids of a boundary list.
fn preview(list: &[u32]) -> String {
    const SHOWN: usize = 10;
    let mut out = String::from("[");
    for (i, id) in list.iter().take(SHOWN).enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&id.to_string());
    }
    if list.len() > SHOWN {
        out.push_str(", ...");
    }
    out.push(']');
    out
}
