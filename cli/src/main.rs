use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{event, span, Level};
use tracing_subscriber::prelude::*;

use base::prelude::*;
use kn10::{Bugcheck, HostSupport, Kn10, MachineConfiguration, StopReason, TickModel, Variant};

mod clock;
mod image;
mod report;
mod sleep;

use clock::ThreadHost;
use report::StopReporter;

/// Longest single idle wait; the host timer normally ends it sooner.
const MAX_IDLE_WAIT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TickModelArg {
    /// Count instructions (exactly reproducible).
    Counting,
    /// Use a host interval timer.
    Host,
}

fn parse_octal(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s, 8).map_err(|e| format!("'{s}' is not an octal number: {e}"))
}

/// Emulate the KN10 processor core.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Core image: lines of octal 'address: word'
    image: PathBuf,

    /// Emulate the multi-section (extended addressing) processor
    #[arg(long)]
    extended: bool,

    /// Physical memory size in words
    #[arg(long, default_value_t = 512 * 1024)]
    memory_words: usize,

    #[arg(long, value_enum, default_value_t = TickModelArg::Counting)]
    tick_model: TickModelArg,

    /// Instructions per scheduler tick (counting model only)
    #[arg(long, default_value_t = 1)]
    instructions_per_tick: u32,

    /// Microseconds of emulated time per scheduler tick
    #[arg(long, default_value_t = 1)]
    usec_per_tick: u64,

    /// Scheduler ticks per interval tick
    #[arg(long, default_value_t = 1000)]
    subticks_per_interval: u64,

    /// Starting PC (octal); overrides the image's start line
    #[arg(long, value_parser = parse_octal)]
    start: Option<u32>,

    /// Stop after this many instructions
    #[arg(long)]
    limit: Option<u64>,

    /// Log every instruction (at TRACE level)
    #[arg(long)]
    trace: bool,

    /// Stop before executing the instruction at this address (octal)
    #[arg(long = "break", value_parser = parse_octal)]
    breakpoints: Vec<u32>,

    /// Stop after this many instructions, reporting a single step
    #[arg(long)]
    step: Option<u64>,
}

impl Args {
    fn configuration(&self) -> MachineConfiguration {
        MachineConfiguration {
            variant: if self.extended {
                Variant::Extended
            } else {
                Variant::Flat
            },
            memory_words: self.memory_words,
            tick_model: match self.tick_model {
                TickModelArg::Counting => TickModel::Counting {
                    instructions_per_tick: self.instructions_per_tick,
                },
                TickModelArg::Host => TickModel::HostInterrupt,
            },
            usec_per_tick: self.usec_per_tick,
            subticks_per_interval: self.subticks_per_interval,
            ..MachineConfiguration::default()
        }
    }
}

/// Run until the machine stops for a reason other than idling, or
/// until `limit` instructions have been executed.
fn run(
    kn: &mut Kn10,
    host: &mut dyn HostSupport,
    limit: Option<u64>,
) -> Result<StopReason, Bugcheck> {
    let attention = kn.attention();
    let first = kn.instructions_executed();
    loop {
        let remaining = match limit {
            Some(n) => {
                let done = kn.instructions_executed() - first;
                if done >= n {
                    return Ok(StopReason::InstructionLimit);
                }
                Some(n - done)
            }
            None => None,
        };
        match kn.run(remaining)? {
            StopReason::Idle => {
                event!(Level::TRACE, "guest is idle at {}", kn.pc());
                host.idle_until_event(&attention, MAX_IDLE_WAIT);
            }
            other => return Ok(other),
        }
    }
}

fn run_simulator() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    // See
    // https://docs.rs/tracing-subscriber/latest/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            return Err(Box::new(e));
        }
        Ok(layer) => layer,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let config = args.configuration();
    event!(Level::DEBUG, "machine configuration is {:?}", config);
    let mut kn = Kn10::new(config)?;

    let text = fs::read_to_string(&args.image)?;
    let core = image::parse(&text)?;
    event!(
        Level::INFO,
        "loaded {} words from {}",
        core.words.len(),
        args.image.display()
    );
    kn.load_image(&core.words)?;
    let start = match (args.start, core.start) {
        (Some(pc), _) => VirtualAddress::from_bits(pc),
        (None, Some(pc)) => pc,
        (None, None) => {
            event!(Level::WARN, "no starting address given, starting at 0");
            VirtualAddress::ZERO
        }
    };
    kn.set_pc(start);
    for bp in args.breakpoints.iter() {
        kn.set_breakpoint(VirtualAddress::from_bits(*bp));
    }
    kn.set_trace(args.trace);
    kn.set_single_step(args.step);

    let mut host = ThreadHost::new();
    if args.tick_model == TickModelArg::Host {
        kn.start_host_clock(&mut host)?;
    }

    let outcome = {
        let span = span!(Level::INFO, "run", start = %start);
        let _enter = span.enter();
        run(&mut kn, &mut host, args.limit)
    };
    event!(Level::DEBUG, "host was idle for {:?}", host.idle_time());

    let mut reporter = StopReporter::new();
    reporter.stopped(&outcome)?;
    reporter.machine_state(&kn)?;
    reporter.apr_changes(&kn.drain_apr_changes())?;
    match outcome {
        Ok(_) => Ok(()),
        Err(bugcheck) => Err(Box::new(bugcheck)),
    }
}

fn main() {
    match run_simulator() {
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}
