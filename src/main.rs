use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use certcheck::config;
use certcheck::contract;
use certcheck::executor;
use certcheck::identity::Identity;
use certcheck::verify_cmd::{self, VerifyOptions};

#[derive(Parser)]
#[command(
    name = "certcheck",
    about = "Verify the pki CLI output contract under different certificate identities"
)]
struct Cli {
    /// Settings file (default: {config_dir}/certcheck/config.toml)
    #[arg(long, global = true, env = "CERTCHECK_CONFIG")]
    config: Option<PathBuf>,

    /// Log executed commands and case outcomes to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run contract suites against the configured hosts
    Verify {
        /// Suite id, e.g. `tps/config` (default: all discovered suites)
        suite: Option<String>,
        /// Only run cases whose name contains this text
        #[arg(long)]
        case: Option<String>,
        /// Inventory group to run against
        #[arg(long)]
        group: Option<String>,
        /// List suites and their case counts without running them
        #[arg(long)]
        list: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a suite file
    Check {
        /// Path to the suite file
        suite_path: PathBuf,
    },
    /// Show how certificate nicknames are interpreted
    Identity {
        #[arg(required = true)]
        nicknames: Vec<String>,
    },
    /// List discovered suites
    Ls,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "certcheck=debug"
    } else {
        "certcheck=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn cmd_verify(
    config_path: Option<&Path>,
    suite: Option<&str>,
    case: Option<&str>,
    group: Option<&str>,
    list: bool,
    json: bool,
) -> i32 {
    let settings = match config::load(config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[certcheck] error: {e:#}");
            return 2;
        }
    };
    let exec = executor::from_settings(&settings);
    let opts = VerifyOptions {
        suite,
        case_filter: case,
        group,
        list,
        json,
    };
    verify_cmd::cmd_verify(&settings, exec.as_ref(), &contract::default_search_dirs(), &opts)
}

fn cmd_check(suite_path: &Path) -> i32 {
    match contract::load_file(suite_path) {
        Ok(suite) => {
            let count = suite.help.len() + suite.show.len();
            eprintln!(
                "[certcheck] {} is valid (suite: \"{}\", {count} cases)",
                suite_path.display(),
                suite.name
            );
            0
        }
        Err(e) => {
            eprintln!("[certcheck] error: {e:#}");
            1
        }
    }
}

fn cmd_identity(nicknames: &[String]) -> i32 {
    let mut exit_code = 0;
    for nick in nicknames {
        match Identity::parse(nick) {
            Ok(id) => {
                let expected = id
                    .default_expectations()
                    .map_or_else(|| "(set per command)".to_string(), |e| e.join(" | "));
                println!(
                    "{nick}: subsystem={} role={:?} validity={:?} stream={} expect={expected}",
                    id.subsystem,
                    id.role,
                    id.validity,
                    id.expected_stream()
                );
            }
            Err(e) => {
                eprintln!("[certcheck] error: {e:#}");
                exit_code = 1;
            }
        }
    }
    exit_code
}

fn cmd_ls(verbose: bool) -> i32 {
    for suite in contract::discover(&contract::default_search_dirs(), None) {
        println!("{}", suite.id);
        if verbose {
            eprintln!("[certcheck]   source: {}", suite.origin);
        }
    }
    0
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match &cli.command {
        Commands::Verify {
            suite,
            case,
            group,
            list,
            json,
        } => cmd_verify(
            cli.config.as_deref(),
            suite.as_deref(),
            case.as_deref(),
            group.as_deref(),
            *list,
            *json,
        ),
        Commands::Check { suite_path } => cmd_check(suite_path),
        Commands::Identity { nicknames } => cmd_identity(nicknames),
        Commands::Ls => cmd_ls(cli.verbose),
    };
    std::process::exit(exit_code);
}
