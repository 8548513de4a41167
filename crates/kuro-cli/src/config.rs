use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kuro_core::{default_config_path, load_file_config, AppError, DbConfig, IndexerConfig};

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "kuro")]
#[command(
    author,
    version,
    about = "Keeps the manga index in step with the content tree on disk"
)]
#[command(after_help = "Examples:
  kuro index
  kuro index --slug one-piece --force
  kuro index --dry-run
  kuro health > report.json
  kuro runs --limit 5")]
pub struct Config {
    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://kuro.db")]
    pub database_url: String,

    /// Root of the content tree ({root}/{slug}/{chapter}/{image})
    #[arg(long, env = "KURO_CONTENT_ROOT", value_name = "PATH")]
    pub content_root: Option<PathBuf>,

    /// Directory for run records
    #[arg(long, env = "KURO_RUN_LOGS", value_name = "PATH")]
    pub run_logs: Option<PathBuf>,

    /// Path to config.toml (default: <config dir>/kuro/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Reconcile the index with the content tree
    #[command(after_help = "Prints the trigger response as JSON. Exits with 1 when the pass failed.")]
    Index {
        /// Only synchronize this slug directory
        #[arg(short, long, value_name = "SLUG")]
        slug: Option<String>,
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
        /// Ignore the throttle window
        #[arg(short, long)]
        force: bool,
    },
    /// Compare the content tree with the index without changing either
    Health {
        /// Ignore the throttle window
        #[arg(short, long)]
        force: bool,
    },
    /// Show recent run records
    Runs {
        /// Maximum number of records to list
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show database statistics
    Stats,
}

impl Config {
    /// Layers built-in defaults, the config file and command line values.
    pub fn resolve(&self) -> Result<(IndexerConfig, DbConfig), AppError> {
        let file = match self.config.clone().or_else(default_config_path) {
            Some(path) => load_file_config(&path)?,
            None => Default::default(),
        };

        let mut db = DbConfig::default();
        if let Some(max) = file.db_max_connections {
            db.max_connections = max;
        }

        let mut indexer = IndexerConfig::default().merge(file);
        if let Some(root) = &self.content_root {
            indexer.content_root = root.clone();
        }
        if let Some(logs) = &self.run_logs {
            indexer.run_logs_path = logs.clone();
        }
        Ok((indexer, db))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_index_flags() {
        let config = parse(&["kuro", "index", "--slug", "one-piece", "--dry-run", "-f"]);
        assert_eq!(
            config.command,
            Command::Index {
                slug: Some("one-piece".to_string()),
                dry_run: true,
                force: true,
            }
        );
    }

    #[test]
    fn test_runs_default_limit() {
        let config = parse(&["kuro", "runs"]);
        assert_eq!(config.command, Command::Runs { limit: 10 });
    }

    #[test]
    fn test_missing_command_is_rejected() {
        assert!(Config::try_parse_from(["kuro"]).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        fs::write(
            &file,
            "content_root = \"/from/file\"\nrun_logs_path = \"/logs/file\"\nindex_window_secs = 5\ndb_max_connections = 2\n",
        )
        .unwrap();

        let config = parse(&[
            "kuro",
            "--config",
            file.to_str().unwrap(),
            "--content-root",
            "/from/flag",
            "stats",
        ]);
        let (indexer, db) = config.resolve().unwrap();
        assert_eq!(indexer.content_root, PathBuf::from("/from/flag"));
        assert_eq!(indexer.run_logs_path, PathBuf::from("/logs/file"));
        assert_eq!(indexer.index_window, Duration::from_secs(5));
        assert_eq!(db.max_connections, 2);
    }

    #[test]
    fn test_invalid_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        fs::write(&file, "unknown_key = 1\n").unwrap();

        let config = parse(&["kuro", "--config", file.to_str().unwrap(), "stats"]);
        assert!(matches!(config.resolve(), Err(AppError::Config(_))));
    }
}
