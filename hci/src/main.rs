use std::{fs::File, io::IsTerminal};

use anyhow::{Context, Result};
use binutils::{clap, verbose};
use clap::Parser;
use hci_sim::{framework::Severity, Cluster, ClusterConfig};

// Cycle-level simulator of the heterogeneous cluster interconnect
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = None,
    styles = binutils::get_styles(),
    arg_required_else_help = true,
)]
struct Args {
    /// Path to the cluster description (.toml)
    config: String,

    /// Stop the simulation after this many cycles
    #[arg(long, default_value_t = 100_000)]
    max_cycles: u64,

    /// Override the stimuli seed of the description
    #[arg(long)]
    seed: Option<u64>,

    /// Write one JSON line per cycle with the active channels
    #[arg(long)]
    trace: Option<String>,

    /// Write the report as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Abort on the first protocol violation
    #[arg(long)]
    fatal: bool,

    /// Write logs as JSON lines to this file instead of stderr
    #[arg(long)]
    log_file: Option<String>,

    #[command(flatten)]
    verbose: verbose::Verbosity,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_file = args
        .log_file
        .as_ref()
        .map(|path| File::create(path).with_context(|| format!("could not create file `{path}`")))
        .transpose()?;
    binutils::logging_setup(
        binutils::verbose_level_to_trace(args.verbose.log_level()),
        log_file.as_ref(),
    );

    let mut config = ClusterConfig::load(&args.config)?;
    if let Some(seed) = args.seed {
        config.sim.seed = seed;
    }

    let mut cluster = Cluster::build(&config)?;
    if args.fatal {
        cluster.set_severity(Severity::Fatal);
    }
    let report = match &args.trace {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("could not create file `{path}`"))?;
            cluster.run(args.max_cycles, Some(std::io::BufWriter::new(file)))?
        }
        None => cluster.run(args.max_cycles, None::<File>)?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render(std::io::stdout().is_terminal()));
    }
    if !report.passed() {
        std::process::exit(1);
    }
    Ok(())
}
