//! Command-line interface of the `dirsrv` binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::ServiceConfig;
use crate::dn::Dn;
use crate::schema::SchemaRegistry;
use crate::subtree::SubtreeSpecificationParser;

/// Top-level arguments.
#[derive(Parser)]
#[command(name = "dirsrv")]
#[command(about = "Directory server core", long_about = None)]
pub struct Cli {
    /// Configuration file (`.toml` or `.json`); defaults apply when absent.
    #[arg(short, long, global = true, env = "DIRSRV_CONFIG")]
    pub config: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Start the service and run until interrupted.
    Serve,
    /// Parse a subtree specification and print its canonical form.
    CheckSpec {
        /// Specification text, e.g. `{ base "ou=users", minimum 1 }`.
        spec: String,
    },
    /// Print the normalized form of a DN.
    NormalizeDn {
        /// The DN.
        dn: String,
    },
    /// Print the effective configuration as TOML.
    ShowConfig,
}

/// Load the configuration named on the command line, or the defaults.
pub fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    match path {
        Some(path) => ServiceConfig::from_file(path),
        None => Ok(ServiceConfig::default()),
    }
}

impl Cli {
    /// Run every subcommand except `serve`, returning what to print.
    pub fn run(&self) -> Result<String> {
        let schema = Arc::new(SchemaRegistry::bootstrap());
        match &self.command {
            Command::Serve => anyhow::bail!("serve must be run from the binary"),
            Command::CheckSpec { spec } => {
                let parsed = SubtreeSpecificationParser::new(schema)
                    .parse(spec)
                    .with_context(|| format!("invalid subtree specification: {}", spec))?;
                Ok(parsed.to_string())
            }
            Command::NormalizeDn { dn } => {
                let dn = Dn::parse(dn)
                    .and_then(|d| d.normalized(&schema))
                    .with_context(|| format!("invalid DN: {}", dn))?;
                Ok(dn.norm_name().to_string())
            }
            Command::ShowConfig => load_config(self.config.as_deref())?.to_toml(),
        }
    }
}
