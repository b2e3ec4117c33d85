use std::mem;
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use log::{debug, error, LevelFilter};

use xdptrace::errors;
use xdptrace::loader;
use xdptrace::shape::{self, TableShape};
use xdptrace::stats;

/// Tracepoint the program gets attached to. The xdp:xdp_exception event
/// fires whenever an XDP program takes the exception path on any interface.
const TRACEPOINT_CATEGORY: &str = "xdp";
const TRACEPOINT_NAME: &str = "xdp_exception";

/// Map the kernel side fills with one counter per CPU per interface index.
const STATS_MAP_NAME: &str = "xdp_stats_map";

#[derive(Debug, Parser)]
struct Command {
    /// Load the BPF object from <FILENAME>
    #[arg(long, default_value = "trace_prog_kern.o")]
    filename: PathBuf,
    /// Seconds between stats polls
    #[arg(short, long, default_value = "2")]
    interval: u64,
    /// Interface to operate on (the tracepoint hook is system-wide, so this
    /// only matters to XDP attach modes and is ignored here)
    #[arg(short, long)]
    dev: Option<String>,
    #[arg(short, long)]
    verbose: bool,
}

fn bump_memlock_rlimit() -> Result<()> {
    let rlimit = libc::rlimit {
        rlim_cur: 128 << 20,
        rlim_max: 128 << 20,
    };

    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlimit) } != 0 {
        bail!("Failed to increase rlimit");
    }

    Ok(())
}

fn run(opts: &Command) -> Result<()> {
    bump_memlock_rlimit()?;

    let probe = loader::load_and_attach(&opts.filename, TRACEPOINT_CATEGORY, TRACEPOINT_NAME)?;
    debug!("loaded BPF object {}", opts.filename.display());
    if let Some(dev) = &opts.dev {
        debug!("--dev {dev} has no effect on the {TRACEPOINT_CATEGORY}:{TRACEPOINT_NAME} hook");
    }

    let map = loader::find_map(probe.object(), STATS_MAP_NAME)?;
    let expected = TableShape {
        key_size: mem::size_of::<i32>() as u32,
        value_size: mem::size_of::<u64>() as u32,
        ..Default::default()
    };
    shape::verify_map_shape(&map, &expected)?;

    debug!("collecting stats from BPF map '{STATS_MAP_NAME}'");
    let stats_map = stats::StatsMap::new(map.as_fd())?;
    stats::poll(&stats_map, Duration::from_secs(opts.interval))
}

fn main() {
    let opts = Command::parse();
    env_logger::Builder::from_default_env()
        .filter_level(if opts.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init();

    if let Err(err) = run(&opts) {
        error!("{err:#}");
        process::exit(errors::classify_exit(&err));
    }
}
