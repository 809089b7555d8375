use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rand::Rng;

use pull_map::api::group_dto::GroupDto;
use pull_map::domain::communication::session::TcpComm;
use pull_map::loader::parser::load_group_config;
use pull_map::{AddressingMode, Communicator, MapOptions, Rank, logger, map_unordered, run_local};

/// Demo launcher: squares the numbers 0..N across a group, with a tunable cost per item.
#[derive(Debug, Parser)]
#[command(name = "pull-map", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a whole group inside this process, one thread per rank.
    Local {
        #[arg(long, default_value_t = 3)]
        size: usize,
        #[command(flatten)]
        workload: Workload,
    },
    /// Run one member of a multi-process group over TCP.
    Tcp {
        /// JSON file with rank, size and coordinatorAddr.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        rank: Option<usize>,
        #[arg(long)]
        size: Option<usize>,
        /// Coordinator listen address, e.g. 127.0.0.1:47800.
        #[arg(long)]
        addr: Option<String>,
        #[command(flatten)]
        workload: Workload,
    },
}

#[derive(Debug, Clone, Args)]
struct Workload {
    #[arg(long, default_value_t = 100)]
    items: u64,
    #[arg(long, default_value = "indexable")]
    mode: AddressingMode,
    #[arg(long)]
    progress: bool,
    /// Base cost of every item.
    #[arg(long, default_value_t = 5)]
    cost_ms: u64,
    /// Extra cost of item 0.
    #[arg(long, default_value_t = 0)]
    skew_ms: u64,
    /// Random extra cost per item, up to this bound.
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,
}

impl Workload {
    fn compute(&self, x: u64) -> u64 {
        let mut cost = self.cost_ms;
        if x == 0 {
            cost += self.skew_ms;
        }
        if self.jitter_ms > 0 {
            cost += rand::rng().random_range(0..=self.jitter_ms);
        }
        thread::sleep(Duration::from_millis(cost));
        x * x
    }

    fn options(&self) -> MapOptions {
        MapOptions::default().with_progress(self.progress).with_addressing(self.mode)
    }
}

fn run_member<C: Communicator>(comm: C, workload: &Workload) -> anyhow::Result<()> {
    let items: Vec<u64> = (0..workload.items).collect();
    let started = Instant::now();

    let mut map = map_unordered(comm, &items, |x| workload.compute(*x), workload.options())?;
    let context = map.context();

    let mut checksum: u64 = 0;
    for result in &mut map {
        checksum = checksum.wrapping_add(result?);
    }

    if context.is_coordinator() {
        log::info!(
            "Collected {} result(s) in {:.3}s, checksum {}, {} failed worker(s).",
            map.processed(),
            started.elapsed().as_secs_f64(),
            checksum,
            map.failed_workers()
        );
    } else {
        log::info!("Computed {} item(s) in {:.3}s.", map.processed(), started.elapsed().as_secs_f64());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Local { size, workload } => {
            logger::init(None);
            log::info!("Starting an in-process group of {} rank(s).", size);

            let outcomes = run_local(size, |comm| run_member(comm, &workload))?;
            for (rank, outcome) in outcomes.into_iter().enumerate() {
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => log::error!("Rank {} failed: {:#}", rank, e),
                    Err(_) => log::error!("Rank {} panicked.", rank),
                }
            }
        }
        Command::Tcp { config, rank, size, addr, workload } => {
            let overrides = GroupDto { rank, size, coordinator_addr: addr, ..Default::default() };
            let group = load_group_config(overrides, config.as_deref()).context("could not resolve group membership")?;

            logger::init(Some(Rank(group.rank)));
            let comm = TcpComm::connect(&group).context("could not connect to the group")?;
            run_member(comm, &workload)?;
        }
    }
    Ok(())
}
