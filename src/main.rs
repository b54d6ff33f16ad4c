//! Command-line interface for canary.
//!
//! # Usage Examples
//!
//! ```bash
//! # Run every test beneath the current directory
//! canary run
//!
//! # Eight concurrent cases, keyword-filtered, into a named session dir
//! canary run -d nightly-results --workers 8 -k "regression and not slow" tests/
//!
//! # Stop after freezing (inspect the case graph without running)
//! canary run --until freeze tests/
//!
//! # Tile into ~30-minute batches and submit through Slurm
//! canary run -b spec=duration:30m -b layout=atomic -b scheduler=slurm tests/
//!
//! # Re-print the summary of a finished session
//! canary status -d nightly-results
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use canary::config::{parse_batch_options, Phase, SessionConfig};
use canary::exec::ProcessRunner;
use canary::report;
use canary::session::{run_batch, state, Session};
use canary::testfile::TomlParser;

#[derive(Parser)]
#[command(name = "canary")]
#[command(about = "A test runner for scientific and HPC applications")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover, stage, and execute tests
    Run(RunArgs),

    /// Discover and freeze only; list the concrete cases
    Find(FindArgs),

    /// Re-print the summary of an existing session
    Status {
        /// Session directory
        #[arg(short = 'd', long = "work-dir", default_value = "TestResults")]
        session: PathBuf,
    },

    /// Execute one batch inside a scheduler allocation (internal)
    #[command(name = "run-batch", hide = true)]
    RunBatch {
        /// Session directory
        #[arg(short = 'd', long = "work-dir")]
        session: PathBuf,
        /// Batch id to execute
        #[arg(long)]
        batch: usize,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Session directory
    #[arg(short = 'd', long = "work-dir", default_value = "TestResults")]
    session: PathBuf,

    /// Maximum concurrently running cases (resource-bound when omitted)
    #[arg(long)]
    workers: Option<usize>,

    /// Batch options: spec=duration:T|count:N, layout=flat|atomic,
    /// nodes=any|same, scheduler=shell|slurm|pbs|flux, workers=N
    #[arg(short = 'b', value_name = "KEY=VALUE")]
    batch: Vec<String>,

    /// Keyword filter expression, e.g. "regression and not slow"
    #[arg(short = 'k', value_name = "EXPR")]
    keywords: Option<String>,

    /// Options made visible to when= guards
    #[arg(short = 'o', value_name = "OPTION")]
    options: Vec<String>,

    /// Stop after the named phase (discover, freeze, populate, run)
    #[arg(long, value_name = "PHASE")]
    until: Option<Phase>,

    /// Cpu cores in the pool (defaults to this host's)
    #[arg(long)]
    cpus: Option<u32>,

    /// Gpu devices in the pool
    #[arg(long)]
    gpus: Option<u32>,

    /// Nodes in the pool
    #[arg(long)]
    nodes: Option<u32>,

    /// Whole-session wall-clock budget, e.g. "2h" or "1:30:00"
    #[arg(long, value_name = "DURATION")]
    timeout: Option<String>,

    /// Test roots (directories or single test files)
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,
}

#[derive(Args)]
struct FindArgs {
    /// Keyword filter expression
    #[arg(short = 'k', value_name = "EXPR")]
    keywords: Option<String>,

    /// Options made visible to when= guards
    #[arg(short = 'o', value_name = "OPTION")]
    options: Vec<String>,

    /// Test roots
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => handle_run(args).await,
        Commands::Find(args) => handle_find(args),
        Commands::Status { session } => handle_status(session),
        Commands::RunBatch { session, batch } => run_batch(&session, batch).await,
    }
}

async fn handle_run(args: RunArgs) -> anyhow::Result<i32> {
    let paths = state::SessionPaths::new(&args.session);
    let mut session = if args.paths.is_empty() && paths.exists() {
        // Re-entrant run on an existing session: reuse its frozen
        // configuration; finished cases will be restored from their locks.
        tracing::info!(dir = %args.session.display(), "resuming existing session");
        Session::load(&args.session)?
    } else {
        let mut config = SessionConfig::default();
        config.roots = resolve_roots(&args.paths)?;
        config.workers = args.workers;
        config.keyword_expr = args.keywords;
        config.options = args.options;
        if let Some(cpus) = args.cpus {
            config.capacity.cpus = cpus;
        }
        if let Some(gpus) = args.gpus {
            config.capacity.gpus = gpus;
        }
        if let Some(nodes) = args.nodes {
            config.capacity.nodes = nodes;
        }
        if !args.batch.is_empty() {
            config.batch = Some(parse_batch_options(&args.batch)?);
        }
        if let Some(timeout) = &args.timeout {
            let budget = canary_core::parse_timeout(timeout)
                .map_err(|e| anyhow::anyhow!("invalid --timeout: {e}"))?;
            config.session_timeout_secs = Some(budget.as_secs_f64());
        }
        Session::create(&args.session, config)
    };

    // Ctrl-C sets the session cancel flag; the coordinator drains workers
    // and marks the rest NotRun.
    let cancel = session.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling session");
            cancel.cancel();
        }
    });

    let code = session
        .execute(args.until, Arc::new(ProcessRunner))
        .await?;
    if args.until.is_none() {
        print!("{}", report::summary(&session.graph));
    }
    Ok(code)
}

fn handle_find(args: FindArgs) -> anyhow::Result<i32> {
    let mut config = SessionConfig::default();
    config.roots = resolve_roots(&args.paths)?;
    config.keyword_expr = args.keywords;
    config.options = args.options;
    // Listing is not scheduling: no capacity feasibility check.
    config.capacity = canary::ResourceSpec {
        cpus: u32::MAX,
        gpus: u32::MAX,
        nodes: u32::MAX,
    };

    // Freeze in a scratch directory; find never touches TestResults and
    // the directory is removed on every exit path.
    let scratch = tempfile::Builder::new()
        .prefix("canary-find-")
        .tempdir()
        .context("cannot create scratch directory")?;
    let mut session = Session::create(scratch.path(), config);
    session.discover(&TomlParser)?;
    session.freeze()?;
    for case in &session.graph.cases {
        let keywords = if case.keywords.is_empty() {
            String::new()
        } else {
            format!("  [{}]", case.keywords.join(", "))
        };
        println!("{}{keywords}", case.name);
    }
    Ok(report::EXIT_OK)
}

fn handle_status(session_dir: PathBuf) -> anyhow::Result<i32> {
    let mut session = Session::load(&session_dir)?;
    session.discover(&TomlParser)?;
    session.freeze()?;
    print!("{}", report::summary(&session.graph));
    Ok(report::exit_code(&session.graph))
}

fn resolve_roots(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let raw: Vec<PathBuf> = if paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        paths.to_vec()
    };
    raw.iter()
        .map(|p| {
            p.canonicalize()
                .with_context(|| format!("no such path: {}", p.display()))
        })
        .collect()
}

