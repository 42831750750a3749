/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::agent
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Capability set a device-specific update agent implements.
    Every hook except `install` has a safe default.

  Security / Safety Notes:
    Hooks run inside the lifecycle's fault boundary; an error
    or panic is mapped to the failure status of that step.

  Dependencies:
    async-trait for async hooks.

  Operational Scope:
    Implemented by concrete agents, driven by the lifecycle.

  Revision History:
    2026-10-16 COD  Declared update agent hooks.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Capabilities declared statically, no runtime probing
    - State owned by the agent or the update record
============================================================*/

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::package::{PackageId, UpdateRecord};
use crate::status::{DownloadStatus, InstallStatus};
use crate::version_store::{VersionCommit, VersionStore};

/// Result of the transfer hook. Status `0` means success.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferOutcome {
    pub status: i32,
    /// Replaces the package file for every later step.
    pub new_path: Option<PathBuf>,
}

impl TransferOutcome {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn relocated(path: impl Into<PathBuf>) -> Self {
        Self {
            status: 0,
            new_path: Some(path.into()),
        }
    }

    pub fn failed(status: i32) -> Self {
        Self {
            status,
            new_path: None,
        }
    }
}

/// Result of the prepare hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareOutcome {
    pub status: InstallStatus,
    pub new_path: Option<PathBuf>,
}

impl PrepareOutcome {
    pub fn ready() -> Self {
        Self {
            status: InstallStatus::Ready,
            new_path: None,
        }
    }

    pub fn ready_at(path: impl Into<PathBuf>) -> Self {
        Self {
            status: InstallStatus::Ready,
            new_path: Some(path.into()),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: InstallStatus::Failed,
            new_path: None,
        }
    }
}

/// Device-specific install logic plugged into the lifecycle.
///
/// Hooks are awaited one at a time, in lifecycle order, for a single
/// update; no hook is called concurrently with another.
#[async_trait]
pub trait UpdateAgent: Send {
    /// Runs once before the bus is started.
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Answer a download offer. Must not touch the version store.
    async fn confirm_download(&mut self, _package: &PackageId) -> Result<DownloadStatus> {
        Ok(DownloadStatus::Consent)
    }

    /// Make the package file locally available.
    async fn transfer_file(&mut self, _record: &UpdateRecord) -> Result<TransferOutcome> {
        Ok(TransferOutcome::success())
    }

    /// Stage the package file. Must be safe to call again with the same
    /// record after an earlier failure.
    async fn prepare_install(&mut self, _record: &UpdateRecord) -> Result<PrepareOutcome> {
        Ok(PrepareOutcome::ready())
    }

    /// Pre-flight checks. `InProgress` proceeds to install.
    async fn pre_install(&mut self, _record: &UpdateRecord) -> Result<InstallStatus> {
        Ok(InstallStatus::InProgress)
    }

    /// Perform the installation. Call
    /// [`UpdateRecord::request_rollback`] before answering `Rollback` to
    /// pick the version to fall back to.
    async fn install(&mut self, record: &mut UpdateRecord) -> Result<InstallStatus>;

    /// Notification after a completed install. Errors are logged only.
    async fn post_install(&mut self, _package: &str) -> Result<()> {
        Ok(())
    }

    /// Installed version of `package`, `None` when nothing is recorded.
    async fn get_version(&mut self, store: &VersionStore, package: &str) -> Result<Option<String>> {
        Ok(store.current_version(package))
    }

    /// Record a completed install. Called exactly once per completed
    /// install, before `post_install`.
    async fn set_version(&mut self, store: &VersionStore, commit: &VersionCommit) -> Result<()> {
        store.commit(commit).map(|_| ())
    }

    /// Device manager presence change. The return value is advisory.
    fn dmc_presence(&mut self, _connected: bool) -> i32 {
        0
    }

    /// Sees every inbound message first; `true` suppresses default handling.
    fn on_message(&mut self, _kind: &str, _raw: &str) -> bool {
        false
    }
}
