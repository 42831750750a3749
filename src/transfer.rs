/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::transfer
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Pluggable transfer stage that makes a package file locally
    available before installation: no-op, scp or HTTP(S).

  Security / Safety Notes:
    Passwords never appear in process argument lists; scp is
    driven through `sshpass -e` with the secret in SSHPASS.
    Secrets are wrapped so Debug output is redacted.

  Dependencies:
    tokio::process for scp, reqwest for HTTP, urlencoding for
    path segments, async-trait for the stage interface.

  Operational Scope:
    Invoked by agents from the transfer_file hook after a
    prepare-update event and before prepare_install.

  Revision History:
    2026-10-16 COD  Crafted transfer stage implementations.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic command invocation with explicit checks
    - Credentials passed through a side channel only
    - Partial downloads never replace the target file
============================================================*/

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use urlencoding::encode;

use crate::config::TransferConfig;
use crate::error::{Result, UaError};
use crate::package::PackageId;

/// Relocates a package file from a staging location to the local path
/// the remaining lifecycle steps will use.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Make `file` locally available. Returns a replacement path when the
    /// file ends up somewhere other than `file`.
    async fn fetch(&self, package: &PackageId, file: &Path) -> Result<Option<PathBuf>>;

    /// Short human readable description for logs.
    fn describe(&self) -> String;
}

/// Build the transfer stage described by `config`.
pub fn from_config(config: &TransferConfig) -> Result<Box<dyn FileTransfer>> {
    if let Some(base_url) = &config.http_base_url {
        let timeout = Duration::from_secs(config.timeout.unwrap_or(300));
        return Ok(Box::new(HttpTransfer::new(base_url, timeout)?));
    }
    match (&config.host, &config.user) {
        (Some(host), Some(user)) => {
            let password = match &config.password_env {
                Some(var) => Some(Secret::from_env(var)?),
                None => None,
            };
            let mut scp = ScpTransfer::new(host, user);
            scp.identity_file = config.identity_file.clone();
            scp.password = password;
            Ok(Box::new(scp))
        }
        _ => Ok(Box::new(LocalTransfer)),
    }
}

/// Default stage: the file is already local.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransfer;

#[async_trait]
impl FileTransfer for LocalTransfer {
    async fn fetch(&self, _package: &PackageId, _file: &Path) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    fn describe(&self) -> String {
        "local".into()
    }
}

/// A credential whose value never shows up in Debug output.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read the secret from environment variable `var`.
    pub fn from_env(var: &str) -> Result<Self> {
        std::env::var(var).map(Self).map_err(|_| {
            UaError::Config(format!("transfer password variable `{var}` is not set"))
        })
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Secure copy from `user@host:<file>` into the file's local directory.
#[derive(Debug, Clone)]
pub struct ScpTransfer {
    host: String,
    user: String,
    pub identity_file: Option<PathBuf>,
    pub password: Option<Secret>,
    program: String,
}

impl ScpTransfer {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            identity_file: None,
            password: None,
            program: "scp".into(),
        }
    }

    /// Override the scp binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, file: &Path, local_dir: &Path) -> Command {
        let remote = format!("{}@{}:{}", self.user, self.host, file.display());
        let mut command = match &self.password {
            Some(secret) => {
                let mut command = Command::new("sshpass");
                command
                    .arg("-e")
                    .arg(&self.program)
                    .env("SSHPASS", secret.expose());
                command
            }
            None => {
                let mut command = Command::new(&self.program);
                command.arg("-o").arg("BatchMode=yes");
                command
            }
        };
        command.arg("-o").arg("StrictHostKeyChecking=accept-new");
        if let Some(identity) = &self.identity_file {
            command.arg("-i").arg(identity);
        }
        command
            .arg(remote)
            .arg(local_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    fn launcher(&self) -> &str {
        if self.password.is_some() {
            "sshpass"
        } else {
            &self.program
        }
    }
}

#[async_trait]
impl FileTransfer for ScpTransfer {
    async fn fetch(&self, package: &PackageId, file: &Path) -> Result<Option<PathBuf>> {
        let local_dir = file
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(local_dir).await.map_err(|err| {
            UaError::Filesystem(format!(
                "Failed to create transfer directory {}: {err}",
                local_dir.display()
            ))
        })?;

        tracing::debug!(package = %package, host = self.host.as_str(), "scp transfer");
        let output = self
            .command(file, local_dir)
            .output()
            .await
            .map_err(|err| map_spawn_error(err, self.launcher()))?;

        if !output.status.success() {
            return Err(UaError::CommandFailure {
                command: format!("{} {}@{}:{}", self.program, self.user, self.host, file.display()),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("scp {}@{}", self.user, self.host)
    }
}

/// Fetch package files from an HTTP(S) staging server. The remote path
/// mirrors the local one below `base_url`.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransfer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ua-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| UaError::Transfer(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn compose_url(&self, file: &Path) -> String {
        let mut url = self.base_url.clone();
        for segment in file.iter().filter_map(|part| part.to_str()) {
            if segment == "/" || segment.is_empty() {
                continue;
            }
            url.push('/');
            url.push_str(&encode(segment));
        }
        url
    }
}

#[async_trait]
impl FileTransfer for HttpTransfer {
    async fn fetch(&self, package: &PackageId, file: &Path) -> Result<Option<PathBuf>> {
        let url = self.compose_url(file);
        tracing::debug!(package = %package, url = url.as_str(), "http transfer");

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| UaError::Transfer(format!("GET {url} failed: {err}")))?;
        if response.status() != StatusCode::OK {
            return Err(UaError::Transfer(format!(
                "GET {url} answered {}",
                response.status()
            )));
        }

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut partial_os = file.as_os_str().to_os_string();
        partial_os.push(".part");
        let partial = PathBuf::from(partial_os);

        let mut out = tokio::fs::File::create(&partial).await.map_err(|err| {
            UaError::Filesystem(format!("Failed to create {}: {err}", partial.display()))
        })?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| UaError::Transfer(format!("reading {url} failed: {err}")))?
        {
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        tokio::fs::rename(&partial, file).await.map_err(|err| {
            UaError::Filesystem(format!("Failed to move {} into place: {err}", partial.display()))
        })?;
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("http {}", self.base_url)
    }
}

fn map_spawn_error(err: io::Error, command: &str) -> UaError {
    if err.kind() == io::ErrorKind::NotFound {
        UaError::CommandMissing {
            command: command.into(),
        }
    } else {
        UaError::Runtime(format!("Failed to spawn {command}: {err}"))
    }
}
