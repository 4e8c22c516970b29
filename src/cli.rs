//! Command-line interface for iocage-reconcile
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::manifest::TargetDef;
use crate::planner::Verb;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// iocage-reconcile - declarative state for iocage jails
#[derive(Parser)]
#[command(name = "iocage-reconcile")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path (default: iocage-reconcile.toml, if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path of the iocage executable
    #[arg(long, global = true)]
    pub iocage: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Bring a jail, release or plugin to the given state
    Apply(ApplyArgs),

    /// Report releases, templates, jails and plugins
    Facts,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Desired state given on the command line
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Target state (overrides the manifest)
    #[arg(value_enum)]
    pub state: Option<Verb>,

    /// Manifest declaring the target
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Jail name, or ALL
    #[arg(short, long)]
    pub name: Option<String>,

    /// Jail property (KEY=VALUE, repeatable)
    #[arg(short = 'p', long = "property", value_parser = parse_key_val)]
    pub properties: Vec<(String, String)>,

    /// Jail or template to clone from
    #[arg(long)]
    pub clone_from: Option<String>,

    /// Release to fetch or create from (default: host release)
    #[arg(short, long)]
    pub release: Option<String>,

    /// Plugin to fetch
    #[arg(long)]
    pub plugin: Option<String>,

    /// Release components to fetch
    #[arg(long, value_delimiter = ',')]
    pub components: Vec<String>,

    /// Command for exec or pkg
    #[arg(long, allow_hyphen_values = true)]
    pub cmd: Option<String>,

    /// User to run exec as
    #[arg(short, long)]
    pub user: Option<String>,

    /// Package list file for new jails
    #[arg(long)]
    pub pkglist: Option<String>,

    /// Update the release or jail
    #[arg(long)]
    pub update: bool,

    /// Extra iocage arguments, as one string
    #[arg(long, allow_hyphen_values = true)]
    pub args: Option<String>,

    /// Show what would be done without making changes
    #[arg(long)]
    pub dry_run: bool,
}

impl ApplyArgs {
    /// Fields given on the command line, as manifest overrides
    pub fn overrides(self) -> TargetDef {
        TargetDef {
            state: self.state,
            name: self.name,
            release: self.release,
            clone_from: self.clone_from,
            plugin: self.plugin,
            components: self.components,
            cmd: self.cmd,
            user: self.user,
            pkglist: self.pkglist,
            update: self.update.then_some(true),
            args: self.args,
            dry_run: self.dry_run.then_some(true),
            properties: self
                .properties
                .into_iter()
                .map(|(k, v)| (k, toml::Value::String(v)))
                .collect(),
        }
    }
}

/// Parse key=value pairs for properties
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "iocage-reconcile", &mut std::io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(args: &[&str]) -> ApplyArgs {
        let mut argv = vec!["iocage-reconcile", "apply"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Apply(apply) => apply,
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let args = apply(&[
            "present",
            "--name",
            "www",
            "-p",
            "boot=on",
            "-p",
            "notes=a=b",
            "--components",
            "base.txz,src.txz",
            "--dry-run",
        ]);
        assert_eq!(args.state, Some(Verb::Present));
        assert_eq!(args.properties[1], ("notes".to_string(), "a=b".to_string()));
        assert_eq!(args.components, vec!["base.txz", "src.txz"]);

        let overrides = args.overrides();
        assert_eq!(overrides.dry_run, Some(true));
        assert_eq!(overrides.update, None);
        assert_eq!(overrides.properties["boot"], toml::Value::String("on".to_string()));
    }

    #[test]
    fn test_hyphenated_values() {
        let args = apply(&["started", "--args", "--rc"]);
        assert_eq!(args.args.as_deref(), Some("--rc"));
        assert_eq!(args.name, None);
    }

    #[test]
    fn test_state_is_optional_with_manifest() {
        let args = apply(&["--manifest", "www.toml"]);
        assert_eq!(args.state, None);
        assert_eq!(args.manifest, Some(PathBuf::from("www.toml")));
    }

    #[test]
    fn test_property_without_equals_rejected() {
        assert!(Cli::try_parse_from(["iocage-reconcile", "apply", "set", "-p", "boot"]).is_err());
    }
}
