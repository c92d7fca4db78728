//! Operator command line for a satsflow deployment.

mod doctor;
mod intents;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{Config, DatabaseBackend};
use crate::observability::{ObservabilityConfig, init_tracing};
use crate::settings::Settings;

pub use doctor::run_doctor_command;
pub use intents::{IntentsCommand, run_intents_command, run_transactions_command};

#[derive(Parser, Debug)]
#[command(name = "satsflow", version, about = "Intent runtime for chat Lightning wallets")]
pub struct Cli {
    /// TOML config file. Defaults to ~/.satsflow/config.toml.
    #[arg(long, global = true, env = "SATSFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check configuration and storage.
    Doctor {
        /// Exit non-zero when any check fails.
        #[arg(long)]
        strict: bool,
    },
    /// Inspect or clean up stored intents.
    Intents {
        #[command(subcommand)]
        command: IntentsCommand,
    },
    /// List a user's transaction audit log, newest first.
    Transactions {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Write a config file with the defaults.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
        /// Also pin the database backend in ~/.satsflow/.env.
        #[arg(long)]
        database_backend: Option<String>,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = Config::from_env_with_toml(self.config.as_deref());
        match &config {
            Ok(config) => init_tracing(&config.observability),
            Err(_) => init_tracing(&ObservabilityConfig::default()),
        }

        match self.command {
            Command::Doctor { strict } => run_doctor_command(config, self.config, strict).await,
            Command::Intents { command } => run_intents_command(&config?, command).await,
            Command::Transactions { user, limit } => {
                run_transactions_command(&config?, user, limit).await
            }
            Command::Init {
                force,
                database_backend,
            } => run_init(self.config, force, database_backend.as_deref()),
        }
    }
}

fn run_init(path: Option<PathBuf>, force: bool, backend: Option<&str>) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(Settings::default_toml_path);
    if path.exists() && !force {
        anyhow::bail!("{} already exists; pass --force to overwrite", path.display());
    }

    let mut settings = Settings::default();
    if let Some(backend) = backend {
        let backend = DatabaseBackend::parse(backend, "--database-backend")?;
        settings.database.backend = backend.as_str().to_string();
        crate::bootstrap::save_bootstrap_env(&[("SATSFLOW_DATABASE_BACKEND", backend.as_str())])?;
        println!("Pinned SATSFLOW_DATABASE_BACKEND={}", backend.as_str());
    }
    settings
        .save_toml(&path)
        .map_err(|e| anyhow::anyhow!(e))?;
    println!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_config_after_subcommand() {
        let cli = Cli::try_parse_from([
            "satsflow",
            "transactions",
            "--user",
            "42",
            "--config",
            "/tmp/satsflow.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/satsflow.toml")));
        assert!(matches!(
            cli.command,
            Command::Transactions { user: 42, limit: 20 }
        ));
    }

    #[test]
    fn parses_intent_subcommands() {
        let cli = Cli::try_parse_from(["satsflow", "intents", "show", "faucet:abc:30"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Intents {
                command: IntentsCommand::Show { ref id }
            } if id == "faucet:abc:30"
        ));
        assert!(Cli::try_parse_from(["satsflow", "intents"]).is_err());
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        run_init(Some(path.clone()), false, None).unwrap();
        assert!(Settings::load_toml(&path).unwrap().is_some());
        assert!(run_init(Some(path.clone()), false, None).is_err());
        run_init(Some(path), true, None).unwrap();
    }
}
