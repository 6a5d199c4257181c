use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;

use symsync::oracle::{AlwaysInteresting, BranchOracle, CoverageMap, NeverInteresting};
use symsync::session::{SessionConfig, SolverSession, SyncMode};
use symsync::trace::{parse_trace_file, replay};

// --- Command Line Arguments ---

#[derive(Parser)]
#[command(name = "symsync")]
#[command(about = "symsync - incremental branch negation over recorded traces")]
#[command(version)]
#[command(subcommand_required = true)]
#[command(arg_required_else_help = true)]
struct Args {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// CLI sync mode selection
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliSyncMode {
    /// Flip concreteness flags on shared reads
    Mark,
    /// Replace pinned reads by constants in a per-query copy of each constraint
    Rewrite,
}

impl From<CliSyncMode> for SyncMode {
    fn from(cli: CliSyncMode) -> Self {
        match cli {
            CliSyncMode::Mark => SyncMode::Mark,
            CliSyncMode::Rewrite => SyncMode::Rewrite,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a trace, negating interesting branches into new test cases
    Replay {
        /// Concrete input the traced run consumed
        #[arg(long)]
        input: PathBuf,
        /// Event trace to replay
        #[arg(long)]
        trace: PathBuf,
        /// Directory test cases are written to (stderr log if omitted)
        #[arg(long, short)]
        output_dir: Option<PathBuf>,
        /// AFL-style edge bitmap, created if missing and saved back afterwards
        #[arg(long)]
        bitmap: Option<PathBuf>,
        /// Per-query solver timeout in seconds
        #[arg(long, default_value = "10")]
        solver_timeout: u64,
        /// How recorded constraints are pinned during synchronisation
        #[arg(long, value_enum, default_value = "mark")]
        sync_mode: CliSyncMode,
        /// Cap on values enumerated per solve-all event
        #[arg(long)]
        enumeration_limit: Option<usize>,
        /// Check the recorded path is jointly satisfiable at the end (debug builds)
        #[arg(long)]
        check_feasible: bool,
    },
    /// Record a trace without solving and print the resulting dependency forest
    Forest {
        /// Concrete input the traced run consumed
        #[arg(long)]
        input: PathBuf,
        /// Event trace to record
        #[arg(long)]
        trace: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Build the session, load the trace into it and replay every event
fn run_trace<O: BranchOracle>(
    config: SessionConfig,
    oracle: O,
    trace: &Path,
) -> Result<SolverSession<O>, String> {
    let mut session = SolverSession::new(config, oracle).map_err(|e| e.to_string())?;
    let events = parse_trace_file(trace, session.arena_mut())
        .map_err(|e| format!("{}: {}", trace.display(), e))?;
    log::info!("replaying {} events from {}", events.len(), trace.display());

    let summary = replay(&mut session, &events);
    if summary.errors > 0 {
        log::warn!("{} of {} events failed", summary.errors, summary.events);
    }
    Ok(session)
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Commands::Replay {
            input,
            trace,
            output_dir,
            bitmap,
            solver_timeout,
            sync_mode,
            enumeration_limit,
            check_feasible,
        } => {
            let mut config = SessionConfig::new(input)
                .with_solver_timeout(Duration::from_secs(solver_timeout))
                .with_sync_mode(sync_mode.into())
                .with_enumeration_limit(enumeration_limit)
                .with_feasibility_check(check_feasible);
            if let Some(dir) = output_dir {
                config = config.with_output_dir(dir);
            }

            let generated = match bitmap {
                Some(path) => {
                    let map = match CoverageMap::load(&path) {
                        Ok(map) => map,
                        Err(e) => {
                            eprintln!("Error loading bitmap: {}", e);
                            std::process::exit(1);
                        }
                    };
                    match run_trace(config, map, &trace) {
                        Ok(session) => {
                            if let Err(e) = session.oracle().save() {
                                eprintln!("Error saving bitmap: {}", e);
                            }
                            session.generated()
                        }
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            std::process::exit(1);
                        }
                    }
                }
                None => match run_trace(config, AlwaysInteresting, &trace) {
                    Ok(session) => session.generated(),
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        std::process::exit(1);
                    }
                },
            };
            println!("generated {} test cases", generated);
        }
        Commands::Forest { input, trace } => {
            match run_trace(SessionConfig::new(input), NeverInteresting, &trace) {
                Ok(session) => print!("{}", session.dump_forest()),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}
