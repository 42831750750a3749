/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::main
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Entry point for the reference update agent. Merges the
    configuration file with CLI overrides, registers on the
    bus and serves update events until shutdown.

  Security / Safety Notes:
    Transfer passwords are only accepted through a named
    environment variable, never as a CLI argument.

  Dependencies:
    clap for CLI parsing, tracing-subscriber for diagnostics,
    chrono for log session stamps.

  Operational Scope:
    Bench runs against a device manager or a JSON-lines relay.

  Revision History:
    2026-10-16 COD  Authored ua-core reference agent CLI.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Result-first error handling with deterministic exits
    - Configurable execution via CLI and config file
============================================================*/

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use ua_core::config::AgentConfig;
use ua_core::error::Result;
use ua_core::reference::{DownloadPolicy, ReferenceAgent, TestMode};
use ua_core::{transfer, JsonLineBus, Logger, Runner, VersionStore};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 9133;

/// Command-line arguments for the reference update agent.
#[derive(Debug, Parser)]
#[command(
    name = "ua-core",
    version,
    author = "Synavera Systems",
    about = "Reference over-the-air update agent"
)]
struct Cli {
    /// Certificate directory.
    #[arg(short = 'k', long = "cert", value_name = "DIR")]
    cert: Option<PathBuf>,
    /// Handler type served by this agent.
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    node_type: Option<String>,
    /// Bus host, also the staging host for scp transfers.
    #[arg(short = 'i', long, value_name = "HOST")]
    host: Option<String>,
    /// Bus port.
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,
    /// Staging host user; enables scp transfers.
    #[arg(short = 'u', long, value_name = "USER")]
    user: Option<String>,
    /// Private key for scp transfers.
    #[arg(long, value_name = "PATH")]
    identity: Option<PathBuf>,
    /// Environment variable holding the staging host password.
    #[arg(long = "password-env", value_name = "VAR")]
    password_env: Option<String>,
    /// Delta capability descriptor.
    #[arg(short = 'a', long, value_name = "CAP")]
    cap: Option<String>,
    /// Cache directory for staged packages.
    #[arg(short = 'c', long = "temp", value_name = "DIR")]
    temp: Option<PathBuf>,
    /// Disable delta support.
    #[arg(short = 'D', long = "delta", action = ArgAction::SetTrue)]
    disable_delta: bool,
    /// Show debug messages.
    #[arg(short = 'd', long, action = ArgAction::SetTrue)]
    debug: bool,
    /// Install behaviour of the reference agent. `rollback` rolls back from
    /// the agent instead of failing over to the device manager.
    #[arg(short = 'M', long, value_enum, default_value_t = TestMode::Success)]
    mode: TestMode,
    /// Final rollback version, required by `--mode rollback`.
    #[arg(short = 'r', long = "rver", value_name = "RVER")]
    rollback_version: Option<String>,
    /// Answer to download offers.
    #[arg(long, value_enum, default_value_t = DownloadPolicy::Consent)]
    download: DownloadPolicy,
    /// Override configuration file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Explicit log file path.
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,
    /// Directory holding version records.
    #[arg(long = "version-dir", value_name = "DIR")]
    version_dir: Option<PathBuf>,
    /// Directory holding package backups.
    #[arg(long = "backup-dir", value_name = "DIR")]
    backup_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("[ua-core] {}", err);
            err.exit_code()
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = AgentConfig::load_from_optional_path(cli.config.as_deref())?;
    apply_overrides(&cli, &mut config);
    init_tracing(config.debug);
    config.validate()?;

    let transfer = transfer::from_config(&config.transfer)?;
    let agent = ReferenceAgent::new(
        cli.mode,
        cli.rollback_version.clone(),
        cli.download,
        config.paths.cache_dir.clone(),
        transfer,
    )?;

    let session_stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let log_path = cli
        .log
        .clone()
        .unwrap_or_else(|| config.log_dir().join(format!("ua_{session_stamp}.log")));
    let logger = Arc::new(Logger::new(Some(log_path))?);
    logger.info(
        "INIT",
        format!(
            "ua-core {} serving {} in {:?} mode",
            env!("CARGO_PKG_VERSION"),
            config.node_type,
            cli.mode
        ),
    );

    let store = VersionStore::new(&config.paths.version_dir, &config.paths.backup_dir);
    let mut runner = Runner::new(agent, Arc::new(JsonLineBus::new()), store, logger, &config);
    runner.run().await?;
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_overrides(cli: &Cli, config: &mut AgentConfig) {
    if let Some(cert) = &cli.cert {
        config.bus.cert_dir = cert.clone();
    }
    if let Some(node_type) = &cli.node_type {
        config.node_type = node_type.clone();
    }
    if cli.host.is_some() || cli.port.is_some() {
        let (host, port) = bus_endpoint(&config.bus.url);
        let host = cli.host.clone().unwrap_or(host);
        let port = cli.port.unwrap_or(port);
        config.bus.url = format!("tcp://{host}:{port}");
    }
    if let Some(user) = &cli.user {
        config.transfer.user = Some(user.clone());
        if let Some(host) = &cli.host {
            config.transfer.host = Some(host.clone());
        } else if config.transfer.host.is_none() {
            config.transfer.host = Some(bus_endpoint(&config.bus.url).0);
        }
    }
    if let Some(identity) = &cli.identity {
        config.transfer.identity_file = Some(identity.clone());
    }
    if let Some(var) = &cli.password_env {
        config.transfer.password_env = Some(var.clone());
    }
    if let Some(cap) = &cli.cap {
        config.delta.cap = cap.clone();
    }
    if let Some(temp) = &cli.temp {
        config.paths.cache_dir = temp.clone();
    }
    if cli.disable_delta {
        config.delta.enabled = false;
    }
    if cli.debug {
        config.debug = true;
    }
    if let Some(dir) = &cli.version_dir {
        config.paths.version_dir = dir.clone();
    }
    if let Some(dir) = &cli.backup_dir {
        config.paths.backup_dir = dir.clone();
    }
}

/// Host and port of a `tcp://host:port` url, with defaults for missing parts.
fn bus_endpoint(url: &str) -> (String, u16) {
    let address = url.strip_prefix("tcp://").unwrap_or(url);
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            (host.to_string(), port.parse().unwrap_or(DEFAULT_PORT))
        }
        _ if !address.is_empty() => (address.to_string(), DEFAULT_PORT),
        _ => (DEFAULT_HOST.to_string(), DEFAULT_PORT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ua-core").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_configuration() {
        let cli = parse(&[
            "-t", "/ECU/Gateway", "-i", "dmc.local", "-p", "9200", "-u", "ota", "-a", "A:1;B:1;C:10",
            "-c", "/var/cache/ua", "-D", "-d", "-M", "toggle",
        ]);
        let mut config = AgentConfig::default();
        apply_overrides(&cli, &mut config);

        assert_eq!(config.node_type, "/ECU/Gateway");
        assert_eq!(config.bus.url, "tcp://dmc.local:9200");
        assert_eq!(config.transfer.host.as_deref(), Some("dmc.local"));
        assert_eq!(config.transfer.user.as_deref(), Some("ota"));
        assert_eq!(config.delta.cap, "A:1;B:1;C:10");
        assert_eq!(config.paths.cache_dir, PathBuf::from("/var/cache/ua"));
        assert!(!config.delta.enabled);
        assert!(config.debug);
        assert_eq!(cli.mode, TestMode::Toggle);
    }

    #[test]
    fn port_alone_keeps_configured_host() {
        let cli = parse(&["--port", "9500"]);
        let mut config = AgentConfig::default();
        config.bus.url = "tcp://broker:9133".into();
        apply_overrides(&cli, &mut config);
        assert_eq!(config.bus.url, "tcp://broker:9500");
        assert!(config.transfer.user.is_none());
    }

    #[test]
    fn modes_and_policies_parse() {
        let cli = parse(&["-M", "prepare-failure", "--download", "postponed", "-r", "1.0"]);
        assert_eq!(cli.mode, TestMode::PrepareFailure);
        assert_eq!(cli.download, DownloadPolicy::Postponed);
        assert_eq!(cli.rollback_version.as_deref(), Some("1.0"));
        assert!(Cli::try_parse_from(["ua-core", "-M", "sometimes"]).is_err());
    }

    #[test]
    fn rollback_mode_help_names_the_difference() {
        use clap::CommandFactory;
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("rolls back from"));
        assert!(help.contains("device manager"));
    }

    #[test]
    fn endpoint_defaults() {
        assert_eq!(bus_endpoint("tcp://host:1"), ("host".to_string(), 1));
        assert_eq!(bus_endpoint("tcp://host"), ("host".to_string(), DEFAULT_PORT));
        assert_eq!(bus_endpoint(""), (DEFAULT_HOST.to_string(), DEFAULT_PORT));
    }
}
