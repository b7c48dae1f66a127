use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use derive_more::{Display, Error, From};
use serde::Deserialize;

const COMPOSE_FILE_CANDIDATES: [&str; 4] = [
    "compose.yaml",
    "compose.yml",
    "docker-compose.yml",
    "docker-compose.yaml",
];

/// Configuration of the compose deployment resolution.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    /// Compose file relative to the deployment root.
    ///
    /// If unset, well-known compose file names are probed.
    pub file: Option<PathBuf>,

    /// Compose service running the database.
    ///
    /// If unset, the service is detected from the running services
    /// using [`service_candidates`](Self::service_candidates).
    pub service: Option<String>,

    /// Service names considered to be the database container.
    pub service_candidates: Vec<String>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            file: None,
            service: None,
            service_candidates: ["db", "mariadb", "mysql", "database"]
                .map(String::from)
                .to_vec(),
        }
    }
}

/// Errors while resolving the compose deployment.
#[derive(Debug, Display, Error, From)]
pub enum ComposeError {
    /// No compose file present in the deployment root.
    #[display("No compose file found in {}", _0.display())]
    ComposeFileNotFound(#[error(ignore)] PathBuf),
    /// Neither compose front-end is installed.
    #[display("Neither `docker compose` nor `docker-compose` is available")]
    FrontendNotFound,
    /// Listing the running services failed.
    #[display("Listing compose services failed: {_0}")]
    Ps(#[error(ignore)] String),
    /// None of the candidate database services is running.
    #[display("No running database service matched the candidates {_0:?}")]
    ServiceNotFound(#[error(ignore)] Vec<String>),

    #[from]
    Io(io::Error),
    #[from]
    Json(serde_json::Error),
}

/// Compose front-ends, probed in declaration order.
#[derive(Copy, Clone, Debug, Display)]
enum Frontend {
    /// The `compose` plugin of the docker CLI.
    #[display("docker compose")]
    Plugin,
    /// The standalone `docker-compose` binary.
    #[display("docker-compose")]
    Standalone,
}

impl Frontend {
    fn command(&self) -> Command {
        match self {
            Frontend::Plugin => {
                let mut command = Command::new("docker");
                command.arg("compose");
                command
            }
            Frontend::Standalone => Command::new("docker-compose"),
        }
    }

    fn detect() -> Result<Frontend, ComposeError> {
        for frontend in [Frontend::Plugin, Frontend::Standalone] {
            let probe = frontend
                .command()
                .arg("version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();

            if probe.is_ok_and(|status| status.success()) {
                log::debug!(target: "compose", "Using compose front-end: {frontend}");
                return Ok(frontend);
            }
        }

        Err(ComposeError::FrontendNotFound)
    }
}

/// A service entry as reported by `compose ps --format json`.
///
/// Depending on the compose version the listing is either a JSON array or
/// one JSON object per line.
#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "State")]
    state: String,
}

impl PsEntry {
    fn is_running(&self) -> bool {
        self.state == "running"
    }
}

fn parse_ps(stdout: &str) -> Result<Vec<PsEntry>, serde_json::Error> {
    let stdout = stdout.trim();
    if stdout.starts_with('[') {
        serde_json::from_str(stdout)
    } else {
        stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect()
    }
}

fn detect_service(
    frontend: Frontend,
    compose_file: &Path,
    candidates: &[String],
) -> Result<String, ComposeError> {
    let ps_output = frontend
        .command()
        .arg("-f")
        .arg(compose_file)
        .arg("ps")
        .arg("--format")
        .arg("json")
        .output()?;

    if !ps_output.status.success() {
        let stderr = String::from_utf8_lossy(&ps_output.stderr);
        return Err(ComposeError::Ps(stderr.trim().to_string()));
    }

    let stdout = String::from_utf8_lossy(&ps_output.stdout);
    let entries = parse_ps(&stdout)?;

    select_service(&entries, candidates)
        .ok_or_else(|| ComposeError::ServiceNotFound(candidates.to_vec()))
}

fn select_service(entries: &[PsEntry], candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .find(|candidate| {
            entries
                .iter()
                .any(|entry| entry.is_running() && entry.service == **candidate)
        })
        .cloned()
}

/// Resolved handle to the compose deployment.
///
/// Holds the detected front-end, the compose file and the database service
/// so that later invocations don't repeat the probing.
#[derive(Debug, Clone)]
pub struct Compose {
    frontend: Frontend,
    compose_file: PathBuf,
    service: String,
}

impl Compose {
    /// Resolve the compose deployment rooted at `deployment_root`.
    ///
    /// Fails if no compose front-end is installed, no compose file is found
    /// or no running database service can be determined.
    pub fn resolve(deployment_root: &Path, config: &ComposeConfig) -> Result<Self, ComposeError> {
        let frontend = Frontend::detect()?;

        let compose_file = match &config.file {
            Some(file) => {
                let compose_file = deployment_root.join(file);
                if !compose_file.is_file() {
                    return Err(ComposeError::ComposeFileNotFound(compose_file));
                }
                compose_file
            }
            None => COMPOSE_FILE_CANDIDATES
                .iter()
                .map(|name| deployment_root.join(name))
                .find(|path| path.is_file())
                .ok_or_else(|| ComposeError::ComposeFileNotFound(deployment_root.to_path_buf()))?,
        };
        log::debug!(target: "compose", "Using compose file: {}", compose_file.display());

        let service = match &config.service {
            Some(service) => service.clone(),
            None => detect_service(frontend, &compose_file, &config.service_candidates)?,
        };
        log::info!(target: "compose", "Using database service: {service}");

        Ok(Self {
            frontend,
            compose_file,
            service,
        })
    }

    /// Database service the dump runs in.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Base compose command with the resolved compose file.
    fn command(&self) -> Command {
        let mut command = self.frontend.command();
        command.arg("-f").arg(&self.compose_file);
        command
    }

    /// Command executing inside the database service container.
    ///
    /// `envs` are passed into the container. Only the variable *name* is
    /// put on the compose command line (`--env KEY`); the value is set on
    /// the child environment and picked up from there, so secrets never
    /// show up in the host argv.
    pub fn exec(&self, envs: &[(&str, &str)]) -> Command {
        let mut command = self.command();
        command.arg("exec").arg("-T");
        for (key, value) in envs {
            command.env(key, value);
            command.arg("--env").arg(key);
        }
        command.arg(&self.service);
        command
    }

    pub fn compose_file(&self) -> &Path {
        &self.compose_file
    }

    /// Pre-resolved handle, bypassing the front-end and service probing.
    #[cfg(test)]
    pub(crate) fn fixed(compose_file: PathBuf, service: String) -> Self {
        Self {
            frontend: Frontend::Plugin,
            compose_file,
            service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PS_NDJSON: &str = r#"{"Name":"wiki-db-1","Service":"db","State":"running"}
{"Name":"wiki-app-1","Service":"app","State":"running"}"#;

    const PS_ARRAY: &str = r#"[
        {"Name":"wiki-db-1","Service":"mariadb","State":"exited"},
        {"Name":"wiki-app-1","Service":"app","State":"running"}
    ]"#;

    #[test]
    fn parses_line_delimited_ps_output() {
        let entries = parse_ps(PS_NDJSON).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].service, "db");
        assert!(entries[0].is_running());
    }

    #[test]
    fn parses_array_ps_output() {
        let entries = parse_ps(PS_ARRAY).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].service, "mariadb");
        assert!(!entries[0].is_running());
    }

    #[test]
    fn selects_first_running_candidate() {
        let entries = parse_ps(PS_NDJSON).unwrap();
        let candidates = ComposeConfig::default().service_candidates;

        assert_eq!(select_service(&entries, &candidates).as_deref(), Some("db"));
    }

    #[test]
    fn ignores_stopped_candidates() {
        let entries = parse_ps(PS_ARRAY).unwrap();
        let candidates = ComposeConfig::default().service_candidates;

        assert_eq!(select_service(&entries, &candidates), None);
    }

    #[test]
    fn empty_ps_output_yields_no_entries() {
        assert!(parse_ps("").unwrap().is_empty());
    }

    #[test]
    fn exec_keeps_secret_values_out_of_host_argv() {
        let compose = Compose {
            frontend: Frontend::Plugin,
            compose_file: PathBuf::from("docker-compose.yml"),
            service: "db".to_string(),
        };

        let command = compose.exec(&[("MYSQL_PWD", "hunter2")]);

        let args: Vec<String> = command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"MYSQL_PWD".to_string()));
        assert!(args.iter().all(|arg| !arg.contains("hunter2")));

        let env = command
            .get_envs()
            .find(|(key, _)| *key == "MYSQL_PWD")
            .and_then(|(_, value)| value);
        assert_eq!(env.unwrap().to_string_lossy(), "hunter2");
    }
}
