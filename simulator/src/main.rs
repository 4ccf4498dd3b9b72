//! Simulate the dissemination of data-availability samples over a GossipSub overlay.

use clap::{builder::RangedU64ValueParser, value_parser, Arg, ArgAction, Command};
use dasgossip_gossipsub::{self as gossipsub, PeerId};
use prometheus_client::{encoding::text::encode, registry::Registry};
use rand::{rngs::StdRng, SeedableRng};
use simulator::{
    publication_delay, Block, Config, Error, Link, Monitor, Network, RowColumn, Sample, Sequencer,
    Uplink, Workload,
};
use std::{
    str::FromStr,
    time::{Duration, UNIX_EPOCH},
};
use tracing::{error, info, Level};

/// Everything needed to run a simulation, parsed from the command line.
struct Arguments {
    cfg: Config,
    nodes: u64,
    workload: String,
    blocks: u64,
    interval: Duration,
    dim: usize,
    sample_size: usize,
    copies: usize,
    duration: Duration,
    metrics: bool,
    level: Level,
}

fn main() {
    let args = match parse_arguments() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    // Initialize logging
    tracing_subscriber::fmt().with_max_level(args.level).init();

    let result = match args.workload.as_str() {
        "sequencer" => {
            let workload = Sequencer::new(PeerId::from(0));
            run(&args, workload)
        }
        _ => RowColumn::new(PeerId::from(0), args.dim, args.copies)
            .and_then(|workload| run(&args, workload)),
    };
    if let Err(err) = result {
        error!(?err, "simulation failed");
        std::process::exit(1);
    }
}

/// Parse command line arguments and return structured data
fn parse_arguments() -> Result<Arguments, String> {
    let matches = Command::new("dasgossip-simulator")
        .about("Simulate dissemination of data-availability samples over a GossipSub overlay")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("nodes")
                .long("nodes")
                .default_value("100")
                .value_parser(value_parser!(u64).range(1..))
                .help("Number of nodes in the network"),
        )
        .arg(
            Arg::new("workload")
                .long("workload")
                .default_value("row-column")
                .value_parser(["row-column", "sequencer"])
                .help("Who joins which topic and how blocks are published"),
        )
        .arg(
            Arg::new("blocks")
                .long("blocks")
                .default_value("5")
                .value_parser(value_parser!(u64))
                .help("Number of blocks to publish"),
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .default_value("12000")
                .value_parser(value_parser!(u64))
                .help("Time between blocks in milliseconds"),
        )
        .arg(
            Arg::new("dim")
                .long("dim")
                .default_value("8")
                .value_parser(RangedU64ValueParser::<usize>::new().range(1..))
                .help("Number of rows (and columns) of a block"),
        )
        .arg(
            Arg::new("sample-size")
                .long("sample-size")
                .default_value("512")
                .value_parser(value_parser!(usize))
                .help("Size of a sample in bytes"),
        )
        .arg(
            Arg::new("copies")
                .long("copies")
                .default_value("2")
                .value_parser(value_parser!(usize))
                .help("Rows and columns joined by every non-builder node (row-column only)"),
        )
        .arg(
            Arg::new("degree")
                .long("degree")
                .default_values(["2", "4", "6"])
                .value_delimiter(',')
                .num_args(3)
                .value_parser(value_parser!(usize))
                .help("Mesh degree as <d_low>,<d>,<d_high>"),
        )
        .arg(
            Arg::new("heartbeat")
                .long("heartbeat")
                .default_value("1000")
                .value_parser(value_parser!(u64))
                .help("Heartbeat interval in milliseconds"),
        )
        .arg(
            Arg::new("latency")
                .long("latency")
                .default_values(["10", "100"])
                .value_delimiter(',')
                .num_args(2)
                .value_parser(value_parser!(u64))
                .help("Link latency range as <min>,<max> in milliseconds"),
        )
        .arg(
            Arg::new("bandwidth")
                .long("bandwidth")
                .default_value("100000000")
                .value_parser(value_parser!(u64))
                .help("Uplink bandwidth of every node in bits per second (0 for unlimited)"),
        )
        .arg(
            Arg::new("shared-uplink")
                .long("shared-uplink")
                .action(ArgAction::SetTrue)
                .help("Use a single uplink for the whole network instead of one per node"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .default_value("0")
                .value_parser(value_parser!(u64))
                .help("Seed of the simulation"),
        )
        .arg(
            Arg::new("duration")
                .long("duration")
                .default_value("120000")
                .value_parser(value_parser!(u64))
                .help("Simulated time in milliseconds"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .help("Maximum level of logs"),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .help("Print metrics in the Prometheus text format once done"),
        )
        .get_matches();

    let number = |id: &str| matches.get_one::<u64>(id).copied().unwrap_or_default();
    let size = |id: &str| matches.get_one::<usize>(id).copied().unwrap_or_default();
    let degree: Vec<usize> = matches
        .get_many::<usize>("degree")
        .map(|values| values.copied().collect())
        .unwrap_or_default();
    let [d_low, d, d_high] = degree[..] else {
        return Err("degree must be <d_low>,<d>,<d_high>".to_string());
    };
    let latency: Vec<u64> = matches
        .get_many::<u64>("latency")
        .map(|values| values.copied().collect())
        .unwrap_or_default();
    let [min, max] = latency[..] else {
        return Err("latency must be <min>,<max>".to_string());
    };
    let level = matches
        .get_one::<String>("log-level")
        .map_or(Ok(Level::INFO), |level| Level::from_str(level))
        .map_err(|err| err.to_string())?;

    let cfg = Config {
        seed: number("seed"),
        protocol: gossipsub::Config {
            d,
            d_low,
            d_high,
            heartbeat_interval: Duration::from_millis(number("heartbeat")),
            ..Default::default()
        },
        link: Link {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        },
        uplink: if matches.get_flag("shared-uplink") {
            Uplink::Shared
        } else {
            Uplink::PerNode
        },
        bandwidth: number("bandwidth"),
    };
    Ok(Arguments {
        cfg,
        nodes: number("nodes"),
        workload: matches
            .get_one::<String>("workload")
            .cloned()
            .unwrap_or_default(),
        blocks: number("blocks"),
        interval: Duration::from_millis(number("interval")),
        dim: size("dim"),
        sample_size: size("sample-size"),
        copies: size("copies"),
        duration: Duration::from_millis(number("duration")),
        metrics: matches.get_flag("metrics"),
        level,
    })
}

/// Build the network, install `workload`, publish every block, and report the outcome.
fn run<W: Workload>(args: &Arguments, mut workload: W) -> Result<(), Error> {
    let mut registry = Registry::default();
    let monitor = Monitor::new(&mut registry);
    let mut network: Network<Sample, Monitor> = Network::new(args.cfg.clone(), monitor)?;

    // The publisher is always present, every other node gets a random identity
    let mut rng = StdRng::seed_from_u64(args.cfg.seed);
    network.register(workload.publisher())?;
    while (network.peers().count() as u64) < args.nodes {
        let peer = PeerId::random(&mut rng);
        if network.engine(&peer).is_none() {
            network.register(peer)?;
        }
    }
    workload.setup(&mut network)?;
    info!(
        nodes = args.nodes,
        workload = %args.workload,
        blocks = args.blocks,
        "starting simulation"
    );

    for id in 0..args.blocks {
        let block = Block::new(id, args.dim, args.sample_size, workload.publisher());
        let delay = publication_delay(args.interval, id)?;
        workload.publish(&mut network, delay, &block)?;
    }
    network.run_until(UNIX_EPOCH + args.duration);

    // Report
    let monitor = network.observer();
    let summary = monitor.summary();
    let coverage: Vec<usize> = network.peers().map(|peer| monitor.coverage(&peer)).collect();
    let lowest = coverage.iter().min().copied().unwrap_or_default();
    let highest = coverage.iter().max().copied().unwrap_or_default();
    let mean = coverage.iter().sum::<usize>() as f64 / coverage.len().max(1) as f64;
    info!(
        published = summary.published,
        deliveries = summary.deliveries,
        mean = ?summary.mean,
        median = ?summary.median,
        max = ?summary.max,
        dropped = network.dropped(),
        "simulation complete"
    );
    println!("published:           {}", summary.published);
    println!("first deliveries:    {}", summary.deliveries);
    println!("samples per node:    min={lowest} mean={mean:.1} max={highest}");
    println!("mean latency:        {:?}", summary.mean);
    println!("median latency:      {:?}", summary.median);
    println!("max latency:         {:?}", summary.max);

    if args.metrics {
        let mut buffer = String::new();
        match encode(&mut buffer, &registry) {
            Ok(()) => println!("{buffer}"),
            Err(err) => error!(?err, "failed to encode metrics"),
        }
    }
    Ok(())
}
