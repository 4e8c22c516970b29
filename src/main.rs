//! iocage-reconcile - declarative FreeBSD jail state on top of iocage
//!
//! Observes what iocage manages, plans the commands that bring one jail,
//! release or plugin to the requested state, runs them (or describes them in
//! dry-run mode) and prints a JSON report.

mod cli;
mod differ;
mod error;
mod executor;
mod facts;
mod iocage;
mod jail;
mod manifest;
mod planner;
mod reconcile;
mod report;
mod sys;

use cli::{ApplyArgs, Cli, Commands};
use error::Result;
use iocage::SystemRunner;
use manifest::Manifest;
use planner::{DesiredState, Verb};
use report::{Failure, Report};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(Some(report)) => match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => fail(&e.to_string()),
        },
        Ok(None) => {}
        Err(e) => fail(&e.to_string()),
    }
}

/// Log to stderr; stdout carries only the report
fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();
}

fn fail(msg: &str) -> ! {
    error!("{}", msg);
    match Failure::new(msg).to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: {}", e),
    }
    std::process::exit(1);
}

fn run(cli: Cli) -> Result<Option<Report>> {
    let config = manifest::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            Ok(None)
        }

        Commands::Facts => {
            let settings = config.settings(&Manifest::default());
            let runner = SystemRunner::new(cli.iocage.unwrap_or(settings.iocage_path));
            let report = reconcile::reconcile(&runner, DesiredState::new(Verb::Facts), sys::host_release)?;
            Ok(Some(report))
        }

        Commands::Apply(args) => {
            let desired_manifest = match &args.manifest {
                Some(path) => manifest::load(path)?,
                None => Manifest::default(),
            };
            apply(desired_manifest, &config, cli.iocage, args).map(Some)
        }
    }
}

fn apply(
    desired_manifest: Manifest,
    config: &Manifest,
    iocage: Option<std::path::PathBuf>,
    args: ApplyArgs,
) -> Result<Report> {
    let mut settings = desired_manifest.settings(config);
    if let Some(path) = iocage {
        settings.iocage_path = path;
    }

    let target = desired_manifest
        .target
        .unwrap_or_default()
        .merge(args.overrides());
    let desired = target.into_desired(&settings)?;

    let runner = SystemRunner::new(settings.iocage_path);
    reconcile::reconcile(&runner, desired, sys::host_release)
}
