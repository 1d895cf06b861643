use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use log::{LevelFilter, debug};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use harness_results::config::{self, Config};
use harness_results::legacy::{PhaseIdentity, PhaseLegacyStore, Scope};
use harness_results::publisher::{ResultPublisher, TestCaseUpdate};

/// harness-results - shared test results and inter-phase data for test workers
#[derive(Parser, Debug)]
#[command(
    name = "harness-results",
    about = "Record test status into a shared report and pass data between test phases",
    after_help = "ENVIRONMENT VARIABLES:\n\
        HARNESS_RESULTS_OUTPUT_DIR     Directory of the result document\n\
        HARNESS_RESULTS_FILE           Result document file name\n\
        HARNESS_RESULTS_LOCK_TIMEOUT   Lock timeout in seconds, or 'none'\n\
        HARNESS_RESULTS_STATUSES       Comma-separated status vocabulary\n\
        HARNESS_RESULTS_RESULTS        Comma-separated result vocabulary\n\
        HARNESS_RESULTS_LEGACY_DIR     Directory of legacy records"
)]
struct Args {
    /// Directory holding the result document
    #[arg(long, global = true, env = "HARNESS_RESULTS_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Result document file name
    #[arg(long, global = true, env = "HARNESS_RESULTS_FILE")]
    file: Option<String>,

    /// Seconds to wait for the result file lock, or 'none' to wait forever
    #[arg(long, global = true, env = "HARNESS_RESULTS_LOCK_TIMEOUT", value_parser = parse_lock_timeout)]
    lock_timeout: Option<LockTimeout>,

    /// Directory holding legacy records
    #[arg(long, global = true, env = "HARNESS_RESULTS_LEGACY_DIR")]
    legacy_dir: Option<PathBuf>,

    /// Logging verbosity (written to stderr)
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upsert a test case's status
    Case {
        /// Test case name
        name: String,

        #[arg(long)]
        status: String,

        #[arg(long)]
        result: Option<String>,

        /// Start time (RFC 3339 or 'now')
        #[arg(long, value_parser = parse_timestamp)]
        start: Option<DateTime<Utc>>,

        /// End time (RFC 3339 or 'now')
        #[arg(long, value_parser = parse_timestamp)]
        end: Option<DateTime<Utc>>,
    },

    /// Upsert a test's status within a test case
    Test {
        /// Test case name
        case: String,

        /// Test name
        test: String,

        #[arg(long)]
        status: String,

        #[arg(long)]
        result: Option<String>,

        #[arg(long)]
        message: Option<String>,
    },

    /// Print the current result document as JSON
    Show {
        /// Print only counts per result
        #[arg(long)]
        summary: bool,
    },

    /// Print the result document path
    Path,

    /// Delete the result document
    Clean,

    /// Data handed between phases of a scenario
    Legacy {
        #[command(subcommand)]
        command: LegacyCommand,
    },
}

#[derive(Subcommand, Debug)]
enum LegacyCommand {
    /// Print the key a scenario's phases share
    Key {
        #[command(flatten)]
        identity: IdentityArgs,
    },

    /// Store a JSON value for later phases
    Save {
        #[command(flatten)]
        target: LegacyTarget,

        /// JSON value to store
        #[arg(long)]
        data: String,
    },

    /// Print a stored JSON value
    Load {
        #[command(flatten)]
        target: LegacyTarget,
    },

    /// List stored record keys
    List,
}

#[derive(ClapArgs, Debug)]
struct IdentityArgs {
    /// Phase-tagged scenario name, e.g. CheckoutFlowPhase1
    #[arg(long)]
    scenario: String,

    /// Individual test name (required for --scope test)
    #[arg(long)]
    test: Option<String>,

    /// Who shares the record: 'case' or 'test'
    #[arg(long, default_value = "case")]
    scope: Scope,
}

#[derive(ClapArgs, Debug)]
struct LegacyTarget {
    /// Phase-tagged scenario name, e.g. CheckoutFlowPhase1
    #[arg(long, required_unless_present = "key", conflicts_with = "key")]
    scenario: Option<String>,

    /// Individual test name (required for --scope test)
    #[arg(long)]
    test: Option<String>,

    /// Who shares the record: 'case' or 'test'
    #[arg(long, default_value = "case")]
    scope: Scope,

    /// Explicit record key instead of a derived one
    #[arg(long)]
    key: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LockTimeout(Option<Duration>);

fn parse_lock_timeout(value: &str) -> Result<LockTimeout, String> {
    config::parse_lock_timeout(value)
        .map(LockTimeout)
        .ok_or_else(|| format!("invalid lock timeout '{}' (seconds or 'none')", value))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    if value.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| format!("invalid timestamp '{}': {}", value, err))
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = init_logging(args.log_level.into()) {
        eprintln!("error: could not initialize logging: {}", err);
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = Config::from_env()?;
    if let Some(dir) = args.output_dir {
        config.publisher.output_dir = Some(dir);
    }
    if let Some(file) = args.file {
        config.publisher.file_name = file;
    }
    if let Some(LockTimeout(timeout)) = args.lock_timeout {
        config.publisher.lock_timeout = timeout;
    }
    if let Some(dir) = args.legacy_dir {
        config.legacy.dir = dir;
    }
    debug!("Using configuration {:#?}", config);

    match args.command {
        Commands::Case {
            name,
            status,
            result,
            start,
            end,
        } => {
            let mut update = TestCaseUpdate::new(status);
            update.result = result;
            update.start = start;
            update.end = end;
            ResultPublisher::new(config.publisher).publish_test_case_status(&name, update)?;
        }

        Commands::Test {
            case,
            test,
            status,
            result,
            message,
        } => {
            ResultPublisher::new(config.publisher).publish_test_status(
                &case,
                &test,
                &status,
                result.as_deref(),
                message.as_deref(),
            )?;
        }

        Commands::Show { summary } => {
            let document = ResultPublisher::new(config.publisher).read_document()?;
            if summary {
                println!("{}", serde_json::to_string_pretty(&document.summary())?);
            } else {
                println!("{}", serde_json::to_string_pretty(&document)?);
            }
        }

        Commands::Path => {
            let path = ResultPublisher::new(config.publisher).file_path()?;
            println!("{}", path.display());
        }

        Commands::Clean => {
            ResultPublisher::new(config.publisher).clean()?;
        }

        Commands::Legacy { command } => run_legacy(command, PhaseLegacyStore::new(config.legacy.dir))?,
    }

    Ok(())
}

fn run_legacy(command: LegacyCommand, store: PhaseLegacyStore) -> Result<(), Box<dyn Error>> {
    match command {
        LegacyCommand::Key { identity } => {
            let key = identity_of(&identity.scenario, identity.test.as_deref())?
                .derive_key(identity.scope)?;
            println!("{}", key);
        }

        LegacyCommand::Save { target, data } => {
            let value: serde_json::Value = serde_json::from_str(&data)
                .map_err(|err| format!("--data is not valid JSON: {}", err))?;
            let key = match (&target.key, &target.scenario) {
                (Some(key), _) => store.save_with_key(&value, key)?,
                (None, Some(scenario)) => store
                    .with_identity(identity_of(scenario, target.test.as_deref())?)
                    .save(&value, target.scope)?,
                (None, None) => return Err("either --scenario or --key is required".into()),
            };
            println!("{}", key);
        }

        LegacyCommand::Load { target } => {
            let value: serde_json::Value = match (&target.key, &target.scenario) {
                (Some(key), _) => store.load_with_key(key)?,
                (None, Some(scenario)) => store
                    .with_identity(identity_of(scenario, target.test.as_deref())?)
                    .load(target.scope)?,
                (None, None) => return Err("either --scenario or --key is required".into()),
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
        }

        LegacyCommand::List => {
            for key in store.keys()? {
                println!("{}", key);
            }
        }
    }

    Ok(())
}

fn identity_of(scenario: &str, test: Option<&str>) -> Result<PhaseIdentity, Box<dyn Error>> {
    let identity = PhaseIdentity::from_scenario(scenario)?;
    Ok(match test {
        Some(test) => identity.with_test(test),
        None => identity,
    })
}

fn init_logging(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}:{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record
                    .line()
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
}
