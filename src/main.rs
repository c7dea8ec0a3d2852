use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use parexec::demo::{build_sleep_tasks, DemoPlan};
use parexec::trace::{self, Trace};
use parexec::{BoundedExecutor, CancelToken, ExecutorConfig, HostSpec, Outcome, PanicPolicy};

/// Bounded-concurrency executor demo driver.
#[derive(Parser, Debug)]
#[command(name = "parexec")]
#[command(about = "Run demo workloads through the bounded parallel executor", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run sleeping demo tasks that each return their own index
    Demo(DemoArgs),

    /// Validate an executor config file and print the resolved policy
    Check {
        /// Path to the executor config YAML
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct DemoArgs {
    /// Number of tasks
    #[arg(long, default_value_t = 5)]
    tasks: usize,

    /// Duration of each task in milliseconds
    #[arg(long, default_value_t = 100)]
    task_ms: u64,

    /// Randomize task durations (+/-50%)
    #[arg(long)]
    scramble: bool,

    /// Seed for --scramble
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Flat concurrency ceiling
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Host slot limit as NAME=SLOTS (repeatable; empty NAME or "localhost" is local)
    #[arg(long = "host", value_parser = parse_host)]
    hosts: Vec<HostSpec>,

    /// Global deadline in milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Poll quantum in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Executor config YAML; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Make the task at this index panic
    #[arg(long)]
    panic_at: Option<usize>,

    /// Let task panics escape instead of reporting them as FAILED
    #[arg(long)]
    propagate_panics: bool,

    /// Print the run trace
    #[arg(long)]
    trace: bool,

    /// Print outcomes as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    ok: bool,
    failure: Option<String>,
    elapsed_ms: u128,
    outcomes: &'a [Outcome<usize>],
}

fn parse_host(raw: &str) -> Result<HostSpec, String> {
    let (name, slots) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=SLOTS, got '{raw}'"))?;
    let slots: usize = slots
        .trim()
        .parse()
        .map_err(|_| format!("invalid slot count in '{raw}'"))?;
    let name = name.trim();
    Ok(if name.is_empty() {
        HostSpec::local(slots)
    } else {
        HostSpec::new(name, slots)
    })
}

fn print_error_chain(err: &anyhow::Error) {
    eprintln!("Error: {err}");

    let mut n = 0;
    let mut cur = err.source();
    while let Some(cause) = cur {
        eprintln!("  {n}: {cause}");
        n += 1;
        cur = cause.source();
    }
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --debug when set.
    let filter = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    if let Err(err) = real_main(cli) {
        print_error_chain(&err);
        std::process::exit(1);
    }
}

fn real_main(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Demo(args) => run_demo(args),
        Command::Check { path } => {
            let mut cfg = ExecutorConfig::load_from_file(&path)?;
            cfg.apply_env_overrides()?;
            cfg.validate()?;
            let resolved = cfg.policy()?.resolve()?;
            println!("deadline_ms={} poll_ms={}", cfg.deadline_ms, cfg.poll_ms);
            println!("ceiling={}", resolved.ceiling);
            if let Some(table) = resolved.table {
                for h in table.hosts() {
                    println!("  host={} slots={}", h.display_name(), h.max_slots);
                }
            }
            Ok(())
        }
    }
}

fn demo_config(args: &DemoArgs) -> Result<ExecutorConfig> {
    let mut cfg = match args.config.as_deref() {
        Some(path) => ExecutorConfig::load_from_file(path)?,
        None => {
            let default_parallel = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            ExecutorConfig::flat(default_parallel, 10_000)
        }
    };
    cfg.apply_env_overrides()?;

    if let Some(n) = args.max_parallel {
        cfg.max_parallel = Some(n);
        cfg.hosts.clear();
    }
    if !args.hosts.is_empty() {
        cfg.hosts = args.hosts.clone();
    }
    if let Some(ms) = args.deadline_ms {
        cfg.deadline_ms = ms;
    }
    if let Some(ms) = args.poll_ms {
        cfg.poll_ms = ms;
    }
    if args.propagate_panics {
        cfg.panic_policy = PanicPolicy::Propagate;
    }
    cfg.validate().context("invalid executor settings")?;
    Ok(cfg)
}

fn run_demo(args: DemoArgs) -> Result<()> {
    let cfg = demo_config(&args)?;
    let plan = DemoPlan {
        tasks: args.tasks,
        task_ms: args.task_ms,
        scramble: args.scramble,
        seed: args.seed,
        panic_at: args.panic_at,
        host_aware: !cfg.hosts.is_empty(),
    };

    let executor = BoundedExecutor::from_config(build_sleep_tasks(&plan), &cfg)?;
    let mut tr = Trace::new("demo");
    let started = std::time::Instant::now();
    let result = executor.run_traced(&CancelToken::new(), &mut tr);
    let elapsed_ms = started.elapsed().as_millis();

    let (outcomes, failure) = match result {
        Ok(outcomes) => (outcomes, None),
        Err(failure) => {
            let message = failure.to_string();
            (failure.into_outcomes(), Some(message))
        }
    };

    if args.json {
        let report = JsonReport {
            ok: failure.is_none(),
            failure: failure.clone(),
            elapsed_ms,
            outcomes: &outcomes,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize run report")?
        );
    } else {
        println!(
            "RUN SUMMARY: {} task(s) ceiling={} elapsed_ms={elapsed_ms}",
            outcomes.len(),
            executor.concurrency_ceiling()
        );
        for (idx, o) in outcomes.iter().enumerate() {
            match o {
                Outcome::Done(v) => println!("  task={idx} outcome=DONE value={v}"),
                Outcome::Failed(msg) => println!("  task={idx} outcome=FAILED error={msg}"),
                Outcome::NotDone => println!("  task={idx} outcome=NOT_DONE"),
            }
        }
    }

    if args.trace {
        trace::print_trace(&tr);
    }

    match failure {
        Some(message) => Err(anyhow!(message)),
        None => Ok(()),
    }
}
