use std::fs;
use std::process::ExitCode;

use bs_backup_lib::backends::{Archive, Backup, BackendsConfig, MariaDb, PageExport};
use bs_backup_lib::bookstack::{Bookstack, Compose, DbCredentials};
use bs_backup_lib::cli::{Action, Cli, DatabaseArgs};
use bs_backup_lib::publish::GitPublisher;
use bs_backup_lib::util::lock::LockFile;

use clap::Parser;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let Action::Backup = cli.action.unwrap_or_default();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    let backends_config: BackendsConfig = match fs::read_to_string(&cli.config) {
        Ok(config_str) => match toml::from_str(&config_str) {
            Err(e) => {
                log::error!("Reading the config file failed: {e}");
                return ExitCode::FAILURE;
            }
            Ok(cfg) => cfg,
        },
        Err(e) => {
            if fs::exists(&cli.config).is_ok_and(|b| !b) {
                log::debug!(
                    "Writing default config to {} because it doesn't exist yet",
                    cli.config.display()
                );
                let default_config = BackendsConfig::default();
                let config_str = toml::to_string_pretty(&default_config)
                    .expect("default config should be serializable");
                if let Err(e) = fs::write(&cli.config, config_str) {
                    log::warn!(
                        "Writing default config to {} failed {e}",
                        cli.config.display(),
                    );
                }

                default_config
            } else {
                log::error!("Reading the config file failed: {e}");
                return ExitCode::FAILURE;
            }
        }
    };

    let dry_run = cli.dry_run;
    if dry_run {
        log::warn!("Running in dry-run mode");
    }

    let DatabaseArgs {
        db_database,
        db_username,
        db_password,
        mysql_root_password,
    } = cli.database;
    let credentials = DbCredentials {
        database: db_database,
        user: db_username,
        password: db_password,
        root_password: mysql_root_password,
    };

    // configuration resolution is fatal: abort before attempting any dump
    let compose = match Compose::resolve(&cli.deployment_root, &backends_config.compose) {
        Ok(compose) => compose,
        Err(e) => {
            log::error!("Resolving the compose deployment failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    let bookstack = Bookstack::new(cli.deployment_root, compose, credentials);

    // the lock itself is skipped on dry-run, where nothing is written anyway
    let _lock = if dry_run {
        None
    } else {
        if let Err(e) = fs::create_dir_all(&cli.backup_root) {
            log::error!("Creating the backup root failed: {e}");
            return ExitCode::FAILURE;
        }
        match LockFile::acquire(&cli.backup_root) {
            Ok(lock) => Some(lock),
            Err(e) => {
                log::error!("{e}");
                return ExitCode::FAILURE;
            }
        }
    };

    // database dump: a double credential failure aborts the run
    let mariadb = MariaDb::with_config(&cli.backup_root, backends_config.mariadb);
    if let Err(e) = mariadb.backup(&bookstack, dry_run) {
        log::error!(target: "backend::mariadb", "Backup of the BookStack database resulted in a fatal error: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = mariadb.retention(&backends_config.retention, dry_run) {
        log::warn!(target: "backend::mariadb", "Retention of database dumps failed: {e}");
    }

    // data archive and everything after it is best-effort
    let archive = Archive::with_config(&cli.backup_root, backends_config.archive);
    if let Err(e) = archive.backup(&bookstack, dry_run) {
        log::error!(target: "backend::archive", "Backup of the BookStack data resulted in an error: {e}");
    } else if let Err(e) = archive.retention(&backends_config.retention, dry_run) {
        log::warn!(target: "backend::archive", "Retention of data archives failed: {e}");
    }

    if backends_config.export.enabled {
        let export = PageExport::with_config(&cli.backup_root, backends_config.export);
        if let Err(e) = export.backup(&bookstack, dry_run) {
            log::error!(target: "backend::export", "Export of the BookStack pages resulted in an error: {e}");
        }
    }

    if backends_config.publish.enabled {
        let repository = backends_config
            .publish
            .repository
            .clone()
            .unwrap_or_else(|| bookstack.deployment_root().to_path_buf());
        let publisher = GitPublisher::new(repository, backends_config.publish.remote.clone());

        match publisher.publish(dry_run) {
            Ok(outcome) => {
                log::debug!(target: "publish::git", "Publish outcome: {outcome:?}");
            }
            Err(e) => {
                // surfaced in the journal for alerting, local state stays intact
                log::error!(target: "publish::git", "Publishing the snapshot failed: {e}");
            }
        }
    }

    ExitCode::SUCCESS
}
