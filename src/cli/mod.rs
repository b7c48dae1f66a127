use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Root directory of the BookStack deployment (where the compose file lives).
    #[arg(long, default_value = ".")]
    pub deployment_root: PathBuf,

    /// Folder for database dumps and data archives.
    #[arg(long, short = 'r', default_value = "backups")]
    pub backup_root: PathBuf,

    /// Backup configuration file, written with defaults when missing.
    #[arg(long, default_value = "bs-backup.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub database: DatabaseArgs,

    /// Simulative backup run.
    #[arg(long)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub action: Option<Action>,
}

/// Database credentials, usually supplied via the deployment environment.
#[derive(Args, Debug)]
pub struct DatabaseArgs {
    /// Name of the BookStack database.
    #[arg(long, env = "DB_DATABASE", default_value = "bookstack")]
    pub db_database: String,

    /// Application database user for the primary dump attempt.
    #[arg(long, env = "DB_USERNAME", default_value = "bookstack")]
    pub db_username: String,

    /// Password of the application database user.
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: String,

    /// Administrative password for the fallback dump attempt.
    #[arg(long, env = "MYSQL_ROOT_PASSWORD", hide_env_values = true)]
    pub mysql_root_password: Option<String>,
}

#[derive(Subcommand, Debug, Default, Clone, Copy)]
pub enum Action {
    /// Backup the BookStack database and data, then publish a snapshot. (Default)
    #[default]
    Backup,
}
