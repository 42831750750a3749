/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::reference
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Reference test agent: stages packages in a cache
    directory and answers install requests according to a
    selectable test mode.

  Security / Safety Notes:
    Only touches its own cache directory; installation itself
    is simulated.

  Dependencies:
    clap for CLI value enums, tokio::fs for staging copies.

  Operational Scope:
    Bench and integration testing against a device manager.

  Revision History:
    2026-10-16 COD  Authored reference agent.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Test behaviour selected explicitly, never implied
    - Staging is idempotent
============================================================*/

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clap::ValueEnum;

use crate::agent::{PrepareOutcome, TransferOutcome, UpdateAgent};
use crate::error::{Result, UaError};
use crate::package::{PackageId, UpdateRecord};
use crate::status::{DownloadStatus, InstallStatus};
use crate::transfer::FileTransfer;

/// How the reference agent answers `install`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TestMode {
    #[default]
    Success,
    Failure,
    /// Alternate between failure and success, starting with failure.
    Toggle,
    /// Complete only the rollback version. Other versions answer
    /// INSTALL_ROLLBACK to it from the agent side, rather than failing and
    /// leaving the rollback to the device manager.
    Rollback,
    PrepareFailure,
}

/// How the reference agent answers download offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DownloadPolicy {
    #[default]
    Consent,
    Postponed,
    Denied,
}

impl From<DownloadPolicy> for DownloadStatus {
    fn from(policy: DownloadPolicy) -> Self {
        match policy {
            DownloadPolicy::Consent => DownloadStatus::Consent,
            DownloadPolicy::Postponed => DownloadStatus::Postponed,
            DownloadPolicy::Denied => DownloadStatus::Denied,
        }
    }
}

pub struct ReferenceAgent {
    mode: TestMode,
    rollback_version: Option<String>,
    download: DownloadPolicy,
    cache_dir: PathBuf,
    transfer: Box<dyn FileTransfer>,
    last_completed: bool,
}

impl ReferenceAgent {
    /// `rollback_version` is mandatory in rollback mode.
    pub fn new(
        mode: TestMode,
        rollback_version: Option<String>,
        download: DownloadPolicy,
        cache_dir: impl Into<PathBuf>,
        transfer: Box<dyn FileTransfer>,
    ) -> Result<Self> {
        if mode == TestMode::Rollback && rollback_version.is_none() {
            return Err(UaError::Config(
                "rollback mode needs the final rollback version (--rver)".into(),
            ));
        }
        Ok(Self {
            mode,
            rollback_version,
            download,
            cache_dir: cache_dir.into(),
            transfer,
            last_completed: true,
        })
    }

    pub fn mode(&self) -> TestMode {
        self.mode
    }

    fn stage_dir(&self, package: &str) -> PathBuf {
        self.cache_dir.join(package)
    }

    fn staged_path(&self, record: &UpdateRecord) -> PathBuf {
        let file_name = record
            .package_file()
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| format!("{}-{}", record.name(), record.version()).into());
        self.stage_dir(record.name())
            .join(record.version())
            .join(file_name)
    }
}

async fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(UaError::Filesystem(format!(
            "Failed to clear {}: {err}",
            dir.display()
        ))),
    }
}

#[async_trait]
impl UpdateAgent for ReferenceAgent {
    async fn init(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|err| {
                UaError::Filesystem(format!(
                    "Failed to create cache directory {}: {err}",
                    self.cache_dir.display()
                ))
            })?;
        tracing::info!(
            mode = ?self.mode,
            transfer = self.transfer.describe().as_str(),
            "reference agent ready"
        );
        Ok(())
    }

    async fn confirm_download(&mut self, package: &PackageId) -> Result<DownloadStatus> {
        tracing::debug!(package = %package, policy = ?self.download, "download offered");
        Ok(self.download.into())
    }

    async fn transfer_file(&mut self, record: &UpdateRecord) -> Result<TransferOutcome> {
        match self
            .transfer
            .fetch(&record.package, record.package_file())
            .await
        {
            Ok(Some(path)) => Ok(TransferOutcome::relocated(path)),
            Ok(None) => Ok(TransferOutcome::success()),
            Err(err) => {
                tracing::warn!(package = %record.package, "transfer failed: {err}");
                Ok(TransferOutcome::failed(1))
            }
        }
    }

    async fn prepare_install(&mut self, record: &UpdateRecord) -> Result<PrepareOutcome> {
        if self.mode == TestMode::PrepareFailure {
            return Ok(PrepareOutcome::failed());
        }

        let staged = self.staged_path(record);
        if staged == record.package_file() {
            return Ok(PrepareOutcome::ready_at(staged));
        }

        // One staged copy per package: drop whatever an earlier attempt left.
        remove_dir_if_present(&self.stage_dir(record.name())).await?;
        if let Some(parent) = staged.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(record.package_file(), &staged)
            .await
            .map_err(|err| {
                UaError::Filesystem(format!(
                    "Failed to stage {} at {}: {err}",
                    record.package_file().display(),
                    staged.display()
                ))
            })?;
        Ok(PrepareOutcome::ready_at(staged))
    }

    async fn install(&mut self, record: &mut UpdateRecord) -> Result<InstallStatus> {
        let status = match self.mode {
            TestMode::Success | TestMode::PrepareFailure => InstallStatus::Completed,
            TestMode::Failure => InstallStatus::Failed,
            TestMode::Toggle => {
                if self.last_completed {
                    InstallStatus::Failed
                } else {
                    InstallStatus::Completed
                }
            }
            TestMode::Rollback => match self.rollback_version.as_deref() {
                Some(target) if target == record.version() => InstallStatus::Completed,
                Some(target) => {
                    record.request_rollback(target);
                    InstallStatus::Rollback
                }
                None => InstallStatus::Failed,
            },
        };
        self.last_completed = status == InstallStatus::Completed;
        tracing::info!(package = %record.package, mode = ?self.mode, %status, "install simulated");
        Ok(status)
    }

    async fn post_install(&mut self, package: &str) -> Result<()> {
        remove_dir_if_present(&self.stage_dir(package)).await
    }
}
