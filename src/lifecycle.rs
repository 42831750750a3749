/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::lifecycle
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Drive one update at a time through confirm-download,
    transfer, prepare, pre-install, install, version commit
    and post-install, with the rollback and abort paths.

  Security / Safety Notes:
    Every agent hook runs inside a fault boundary: an error or
    a panic becomes that step's failure status. The version
    store is only written after a completed install or by an
    explicit rollback.

  Dependencies:
    futures for catch_unwind on hook futures, serde_json for
    query replies.

  Operational Scope:
    Owned by the runner; events are applied serially.

  Revision History:
    2026-10-16 COD  Implemented install lifecycle.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Every state change goes through the transition table
    - Failures terminate the update and are always reported
    - No automatic retries
============================================================*/

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Map, Value};

use crate::agent::UpdateAgent;
use crate::bus::BusEvent;
use crate::config::AgentConfig;
use crate::diagnostics::{StatusDetails, StatusReporter, UpdateStage};
use crate::error::{Result, UaError};
use crate::logger::Logger;
use crate::package::{PackageId, UpdateRecord, UpdateRequest};
use crate::status::{DownloadStatus, InstallStatus, LifecycleState};
use crate::version_store::{
    decode_sha256, encode_sha256, file_digest, file_sha256, VersionCommit, VersionStore,
};

/// Knobs the lifecycle needs from the agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub node_type: String,
    /// Reported in query replies when delta support is enabled.
    pub delta_cap: Option<String>,
    pub verify_checksum: bool,
}

impl From<&AgentConfig> for LifecycleSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            node_type: config.node_type.clone(),
            delta_cap: config
                .delta
                .enabled
                .then(|| config.delta.cap.clone()),
            verify_checksum: config.verify_checksum,
        }
    }
}

/// Install lifecycle of a single agent.
pub struct Lifecycle<A> {
    agent: A,
    store: VersionStore,
    reporter: StatusReporter,
    logger: Arc<Logger>,
    settings: LifecycleSettings,
    state: LifecycleState,
    /// Update staged by `prepare-update`, waiting for `ready-update`.
    current: Option<UpdateRecord>,
    /// Package whose download was consented to or postponed.
    pending: Option<PackageId>,
}

impl<A: UpdateAgent> Lifecycle<A> {
    pub fn new(
        agent: A,
        store: VersionStore,
        reporter: StatusReporter,
        logger: Arc<Logger>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            agent,
            store,
            reporter,
            logger,
            settings,
            state: LifecycleState::Idle,
            current: None,
            pending: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut A {
        &mut self.agent
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    pub fn node_type(&self) -> &str {
        &self.settings.node_type
    }

    /// Update currently staged for installation, if any.
    pub fn current(&self) -> Option<&UpdateRecord> {
        self.current.as_ref()
    }

    /// Apply one decoded bus event. Events for other node types are ignored.
    pub async fn handle(&mut self, event: BusEvent) -> Result<()> {
        if let Some(target) = event.node_type() {
            if target != self.settings.node_type {
                self.logger.debug(
                    "ROUTING",
                    format!("ignoring event for node type {target}"),
                );
                return Ok(());
            }
        }

        match event {
            BusEvent::QueryPackage { name, reply_id, .. } => {
                self.query_package(&name, reply_id.as_deref()).await;
            }
            BusEvent::ReadyDownload { package, .. } => {
                self.ready_download(package).await?;
            }
            BusEvent::PrepareUpdate(request) => {
                self.prepare_update(request).await?;
            }
            BusEvent::ReadyUpdate(request) => {
                self.ready_update(request).await?;
            }
            BusEvent::ConfirmUpdate { package, .. } => self.confirm_update(&package),
            BusEvent::DownloadReport {
                package,
                downloaded_bytes,
                total_bytes,
                ..
            } => self.download_report(&package, downloaded_bytes, total_bytes),
            BusEvent::Unhandled(kind) => {
                self.logger
                    .debug("ROUTING", format!("nothing to do for {kind}"));
            }
        }
        Ok(())
    }

    /// `ready-download`: ask the agent whether the package may be fetched.
    pub async fn ready_download(&mut self, package: PackageId) -> Result<DownloadStatus> {
        self.settle()?;
        match self.state {
            LifecycleState::Idle | LifecycleState::ConfirmDownload => {}
            LifecycleState::AwaitingTransfer if self.pending.as_ref() == Some(&package) => {
                self.logger
                    .info("READY-DOWNLOAD", format!("{package} already consented"));
                self.reporter
                    .send_update_status(&package, DownloadStatus::Consent, &StatusDetails::default())
                    .await;
                return Ok(DownloadStatus::Consent);
            }
            _ => self.supersede(&package).await?,
        }

        self.advance(LifecycleState::ConfirmDownload)?;
        let status = match guarded("confirm_download", self.agent.confirm_download(&package)).await
        {
            Ok(status) => status,
            Err(err) => {
                self.logger
                    .error("CONFIRM-DOWNLOAD", format!("{package}: {err}"));
                DownloadStatus::Denied
            }
        };

        match status {
            DownloadStatus::Consent => {
                self.advance(LifecycleState::AwaitingTransfer)?;
                self.pending = Some(package.clone());
            }
            DownloadStatus::Denied => {
                self.advance(LifecycleState::Idle)?;
                self.pending = None;
            }
            DownloadStatus::Postponed => {
                self.pending = Some(package.clone());
            }
        }

        self.logger
            .info("READY-DOWNLOAD", format!("{package}: {status}"));
        self.reporter
            .send_update_status(&package, status, &StatusDetails::default())
            .await;
        Ok(status)
    }

    /// `prepare-update`: transfer and stage the package without installing.
    pub async fn prepare_update(&mut self, request: UpdateRequest) -> Result<InstallStatus> {
        self.settle()?;
        if self.is_prepared_for(&request) {
            self.logger.info(
                "PREPARE-UPDATE",
                format!("{} already prepared", request.package),
            );
            self.reporter
                .send_update_status(&request.package, InstallStatus::Ready, &StatusDetails::default())
                .await;
            return Ok(InstallStatus::Ready);
        }

        self.enter_update(&request).await?;
        match self.stage(&request).await? {
            Staged::Ready(record) => {
                self.logger.info(
                    "PREPARE-UPDATE",
                    format!(
                        "{} staged at {}",
                        record.package,
                        record.package_file().display()
                    ),
                );
                self.current = Some(record);
                self.reporter
                    .send_update_status(&request.package, InstallStatus::Ready, &StatusDetails::default())
                    .await;
                Ok(InstallStatus::Ready)
            }
            Staged::Ended(status) => Ok(status),
        }
    }

    /// `ready-update`: install the package, staging it first unless a
    /// matching `prepare-update` already did.
    pub async fn ready_update(&mut self, request: UpdateRequest) -> Result<InstallStatus> {
        self.settle()?;
        let previous_version = self.store.current_version(&request.package.name);

        let prepared = if self.is_prepared_for(&request) {
            self.current.take()
        } else {
            None
        };
        let mut record = match prepared {
            Some(record) => record,
            None => {
                self.enter_update(&request).await?;
                match self.stage(&request).await? {
                    Staged::Ready(record) => record,
                    Staged::Ended(status) => return Ok(status),
                }
            }
        };

        let pre = match guarded("pre_install", self.agent.pre_install(&record)).await {
            Ok(status) => status,
            Err(err) => {
                self.logger
                    .error("PRE-INSTALL", format!("{}: {err}", record.package));
                InstallStatus::Failed
            }
        };
        match pre {
            InstallStatus::InProgress => {}
            InstallStatus::Aborted => return self.abort(&request).await,
            other => {
                return self
                    .fail(&request, format!("pre_install answered {other}"))
                    .await
            }
        }

        self.advance(LifecycleState::Installing)?;
        self.reporter
            .send_update_status(&request.package, InstallStatus::InProgress, &StatusDetails::default())
            .await;
        self.progress(UpdateStage::Install, &record.package, 0, true)
            .await;

        let status = match guarded("install", self.agent.install(&mut record)).await {
            Ok(status) => status,
            Err(err) => {
                self.logger
                    .error("INSTALL", format!("{}: {err}", record.package));
                InstallStatus::Failed
            }
        };
        record.install_status = Some(status);

        match status {
            InstallStatus::Completed => self.complete(&request, record).await,
            InstallStatus::Rollback => self.roll_back(&request, record, previous_version).await,
            InstallStatus::Aborted => self.abort(&request).await,
            other => {
                self.fail(&request, format!("install answered {other}"))
                    .await
            }
        }
    }

    /// `query-package`: reply with the installed version and history.
    /// Returns the reported package object, or `None` when the version
    /// could not be determined.
    pub async fn query_package(&mut self, name: &str, reply_id: Option<&str>) -> Option<Value> {
        let version = match guarded("get_version", self.agent.get_version(&self.store, name)).await
        {
            Ok(version) => version,
            Err(err) => {
                self.logger
                    .error("QUERY-PACKAGE", format!("{name}: {err}"));
                return None;
            }
        };

        let mut package = Map::new();
        package.insert("type".into(), json!(self.settings.node_type));
        package.insert("name".into(), json!(name));
        package.insert("version".into(), json!(version));
        if let Some(cap) = &self.settings.delta_cap {
            package.insert("delta-cap".into(), json!(cap));
        }
        if let Some(record) = self.store.get(name) {
            let mut list = Map::new();
            for (recorded, entry) in &record.history {
                list.insert(
                    recorded.clone(),
                    json!({
                        "file": entry.file,
                        "sha-256": entry.sha256,
                        "downloaded": entry.downloaded,
                    }),
                );
            }
            let rollback: Vec<&String> = record.history.keys().collect();
            package.insert("version-list".into(), Value::Object(list));
            package.insert("rollback-versions".into(), json!(rollback));
        }
        let package = Value::Object(package);

        self.logger.info(
            "QUERY-PACKAGE",
            format!(
                "{name} reports {}",
                version.as_deref().unwrap_or("no version")
            ),
        );
        self.reporter
            .send_query_reply(reply_id, package.clone())
            .await;
        Some(package)
    }

    /// Device manager presence change.
    pub fn presence(&mut self, connected: bool) -> i32 {
        let advice = self.agent.dmc_presence(connected);
        self.logger.info(
            "DMC-PRESENCE",
            if connected {
                "device manager connected"
            } else {
                "device manager disconnected"
            },
        );
        advice
    }

    pub fn confirm_update(&mut self, package: &PackageId) {
        self.logger
            .info("CONFIRM-UPDATE", format!("{package} confirmed by device manager"));
    }

    pub fn download_report(&mut self, package: &PackageId, downloaded: u64, total: u64) {
        self.logger.debug(
            "DOWNLOAD-REPORT",
            format!("{package}: {downloaded}/{total} bytes"),
        );
    }

    fn advance(&mut self, to: LifecycleState) -> Result<()> {
        let next = self.state.transition(to)?;
        self.logger
            .debug("STATE", format!("{} -> {next}", self.state));
        self.state = next;
        Ok(())
    }

    /// Leave a finished update behind before handling the next event.
    fn settle(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            self.advance(LifecycleState::Idle)?;
            self.current = None;
            self.pending = None;
        }
        Ok(())
    }

    fn is_prepared_for(&self, request: &UpdateRequest) -> bool {
        self.state == LifecycleState::PreInstall
            && self
                .current
                .as_ref()
                .map(|record| record.is_prepared() && record.matches(request))
                .unwrap_or(false)
    }

    fn is_pending_for(&self, request: &UpdateRequest) -> bool {
        self.pending
            .as_ref()
            .map(|pending| {
                pending.name == request.package.name && pending.version == request.package.version
            })
            .unwrap_or(false)
    }

    /// Drop whatever update is in flight in favour of `incoming`.
    async fn supersede(&mut self, incoming: &PackageId) -> Result<()> {
        if self.state == LifecycleState::Idle {
            return Ok(());
        }
        let previous = self
            .current
            .take()
            .map(|record| record.package)
            .or_else(|| self.pending.take());
        self.pending = None;

        if let Some(previous) = &previous {
            self.logger.warn(
                "SUPERSEDED",
                format!("{previous} superseded by {incoming}"),
            );
            self.reporter
                .send_update_status(previous, InstallStatus::Aborted, &StatusDetails::default())
                .await;
        }
        self.advance(LifecycleState::Aborted)?;
        self.advance(LifecycleState::Idle)
    }

    async fn enter_update(&mut self, request: &UpdateRequest) -> Result<()> {
        match self.state {
            LifecycleState::Idle => {}
            LifecycleState::ConfirmDownload | LifecycleState::AwaitingTransfer
                if self.is_pending_for(request) => {}
            _ => {
                let incoming = PackageId::new(
                    request.package.name.clone(),
                    request.target_version(),
                );
                self.supersede(&incoming).await?;
            }
        }
        if self.state != LifecycleState::AwaitingTransfer {
            self.advance(LifecycleState::AwaitingTransfer)?;
        }
        self.pending = None;
        Ok(())
    }

    /// Build the record for the version the request installs: from the
    /// message `version-list`, or from the local backup for a rollback.
    fn resolve_record(&self, request: &UpdateRequest) -> Option<UpdateRecord> {
        let target = request.target_version();
        let package = PackageId::new(request.package.name.clone(), target);

        if let Some(file) = request.file_for(target) {
            let mut record = UpdateRecord::new(package, file.file.clone());
            record.requested_version = request.package.version.clone();
            record.sha256_received = file.sha256.clone();
            record.downloaded = file.downloaded;
            return Some(record);
        }

        if request.rollback_version.is_some() {
            let entry = self.store.entry(&request.package.name, target)?;
            let mut record = UpdateRecord::new(package, entry.file);
            record.requested_version = request.package.version.clone();
            record.sha256_received = Some(entry.sha256).filter(|sha| !sha.is_empty());
            record.downloaded = false;
            record.from_backup = true;
            return Some(record);
        }
        None
    }

    /// Transfer, verify and prepare. Leaves the lifecycle in PRE_INSTALL
    /// when the record is ready; an ended update is already reported.
    async fn stage(&mut self, request: &UpdateRequest) -> Result<Staged> {
        let Some(mut record) = self.resolve_record(request) else {
            if let Some(version) = &request.rollback_version {
                return self.request_rollback_download(request, version).await;
            }
            self.fail(
                request,
                format!("no package file for version {}", request.target_version()),
            )
            .await?;
            return Ok(Staged::Ended(InstallStatus::Failed));
        };

        if request.rollback_version.is_some() {
            let mut entry = Map::new();
            entry.insert("downloaded".into(), json!(record.downloaded));
            let mut list = Map::new();
            list.insert(record.version().to_string(), Value::Object(entry));
            let details = StatusDetails {
                rollback_version: Some(record.version().to_string()),
                version_list: Some(Value::Object(list)),
                ..StatusDetails::default()
            };
            self.reporter
                .send_update_status(&request.package, InstallStatus::Rollback, &details)
                .await;
        }

        if !record.from_backup {
            self.progress(UpdateStage::Transfer, &record.package, 0, false)
                .await;
            let status = match guarded("transfer_file", self.agent.transfer_file(&record)).await {
                Ok(outcome) => {
                    if outcome.status == 0 {
                        if let Some(path) = outcome.new_path {
                            record.relocate(path);
                        }
                    }
                    outcome.status
                }
                Err(err) => {
                    self.logger
                        .error("TRANSFER", format!("{}: {err}", record.package));
                    1
                }
            };
            record.transfer_status = Some(status);
            if status != 0 {
                self.fail(request, format!("transfer returned {status}"))
                    .await?;
                return Ok(Staged::Ended(InstallStatus::Failed));
            }
            self.progress(UpdateStage::Transfer, &record.package, 100, false)
                .await;
        }

        if let Err(err) = self.verify_checksum(&record) {
            self.fail(request, err.to_string()).await?;
            return Ok(Staged::Ended(InstallStatus::Failed));
        }

        self.advance(LifecycleState::PrepareInstall)?;
        match guarded("prepare_install", self.agent.prepare_install(&record)).await {
            Ok(outcome) if outcome.status == InstallStatus::Ready => {
                if let Some(path) = outcome.new_path {
                    record.relocate(path);
                }
                record.prepare_status = Some(InstallStatus::Ready);
            }
            Ok(outcome) => {
                record.prepare_status = Some(outcome.status);
                self.fail(
                    request,
                    format!("prepare_install answered {}", outcome.status),
                )
                .await?;
                return Ok(Staged::Ended(InstallStatus::Failed));
            }
            Err(err) => {
                record.prepare_status = Some(InstallStatus::Failed);
                self.fail(request, format!("prepare_install: {err}"))
                    .await?;
                return Ok(Staged::Ended(InstallStatus::Failed));
            }
        }

        self.advance(LifecycleState::PreInstall)?;
        Ok(Staged::Ready(record))
    }

    /// The rollback version is neither in the message nor backed up: ask
    /// the device manager to download it and leave the update.
    async fn request_rollback_download(
        &mut self,
        request: &UpdateRequest,
        version: &str,
    ) -> Result<Staged> {
        let mut list = Map::new();
        list.insert(version.to_string(), json!({ "downloaded": false }));
        let details = StatusDetails {
            rollback_version: Some(version.to_string()),
            version_list: Some(Value::Object(list)),
            ..StatusDetails::default()
        };
        self.logger.warn(
            "ROLLBACK-DOWNLOAD",
            format!("{}: rollback version {version} is not available locally", request.package),
        );
        self.reporter
            .send_update_status(&request.package, InstallStatus::Rollback, &details)
            .await;
        self.current = None;
        self.pending = None;
        self.advance(LifecycleState::Idle)?;
        Ok(Staged::Ended(InstallStatus::Rollback))
    }

    fn verify_checksum(&self, record: &UpdateRecord) -> Result<()> {
        if !self.settings.verify_checksum {
            return Ok(());
        }
        let Some(expected) = record.sha256_received.as_deref() else {
            return Ok(());
        };
        let Some(wanted) = decode_sha256(expected) else {
            return Err(UaError::Transfer(format!(
                "unreadable sha-256 {expected:?} for {}",
                record.package
            )));
        };
        let actual = file_digest(record.package_file())?;
        if actual == wanted {
            Ok(())
        } else {
            Err(UaError::Transfer(format!(
                "checksum mismatch for {}: expected {expected}, found {}",
                record.package_file().display(),
                encode_sha256(&actual)
            )))
        }
    }

    async fn complete(&mut self, request: &UpdateRequest, record: UpdateRecord) -> Result<InstallStatus> {
        let commit = VersionCommit {
            package: record.name().to_string(),
            version: record.version().to_string(),
            sha256_received: record.sha256_received.clone(),
            sha256_local: file_sha256(record.package_file()).ok(),
            downloaded: record.downloaded,
            package_file: record.package_file().to_path_buf(),
        };
        if let Err(err) = guarded("set_version", self.agent.set_version(&self.store, &commit)).await
        {
            self.logger
                .error("SET-VERSION", format!("{}: {err}", record.package));
        }

        self.advance(LifecycleState::PostInstall)?;
        self.reporter
            .send_update_status(&request.package, InstallStatus::Completed, &StatusDetails::default())
            .await;
        if let Err(err) = guarded("post_install", self.agent.post_install(record.name())).await {
            self.logger
                .warn("POST-INSTALL", format!("{}: {err}", record.package));
        }

        self.advance(LifecycleState::Completed)?;
        self.logger
            .info("UPDATE-COMPLETED", format!("{} installed", record.package));
        Ok(InstallStatus::Completed)
    }

    async fn roll_back(
        &mut self,
        request: &UpdateRequest,
        record: UpdateRecord,
        previous_version: Option<String>,
    ) -> Result<InstallStatus> {
        let failed = record.version();
        let name = record.name();
        let from_history = request
            .rollback_versions
            .iter()
            .filter(|version| version.as_str() != failed)
            .find(|version| self.store.entry(name, version).is_some())
            .cloned();
        let target = record
            .rollback_target()
            .map(str::to_string)
            .or_else(|| {
                request
                    .rollback_version
                    .clone()
                    .filter(|version| version != failed)
            })
            .or(from_history)
            .or_else(|| previous_version.filter(|version| version != failed));

        let Some(target) = target else {
            return self
                .fail(request, "install requested a rollback without a known target")
                .await;
        };

        match self.store.restore(name, &target) {
            Ok(_) => {
                self.advance(LifecycleState::RolledBack)?;
                self.logger.warn(
                    "UPDATE-ROLLBACK",
                    format!("{} rolled back to {target}", record.package),
                );
                let details = StatusDetails {
                    rollback_version: Some(target),
                    rollback_versions: request.rollback_versions.clone(),
                    ..StatusDetails::default()
                };
                self.reporter
                    .send_update_status(&request.package, InstallStatus::Rollback, &details)
                    .await;
                Ok(InstallStatus::Rollback)
            }
            Err(err) => {
                self.fail(request, format!("rollback to {target} failed: {err}"))
                    .await
            }
        }
    }

    async fn abort(&mut self, request: &UpdateRequest) -> Result<InstallStatus> {
        self.advance(LifecycleState::Aborted)?;
        self.current = None;
        self.logger
            .warn("UPDATE-ABORTED", format!("{} aborted", request.package));
        self.reporter
            .send_update_status(&request.package, InstallStatus::Aborted, &StatusDetails::default())
            .await;
        Ok(InstallStatus::Aborted)
    }

    async fn fail(&mut self, request: &UpdateRequest, reason: impl Into<String>) -> Result<InstallStatus> {
        let reason = reason.into();
        self.advance(LifecycleState::Failed)?;
        self.current = None;
        self.logger
            .error("UPDATE-FAILED", format!("{}: {reason}", request.package));
        let details = self.failure_details(request);
        self.reporter
            .send_update_status(&request.package, InstallStatus::Failed, &details)
            .await;
        Ok(InstallStatus::Failed)
    }

    /// Point the device manager at the next locally available rollback
    /// version, or tell it none is left.
    fn failure_details(&self, request: &UpdateRequest) -> StatusDetails {
        if request.rollback_versions.is_empty() {
            return StatusDetails::default();
        }
        let failed = request.target_version();
        let next = request
            .rollback_versions
            .iter()
            .filter(|version| version.as_str() != failed)
            .find(|version| {
                self.store
                    .entry(&request.package.name, version)
                    .map(|entry| entry.file.exists())
                    .unwrap_or(false)
            })
            .cloned();
        StatusDetails {
            terminal_failure: next.is_none(),
            rollback_version: next,
            rollback_versions: request.rollback_versions.clone(),
            version_list: None,
        }
    }

    async fn progress(&self, stage: UpdateStage, package: &PackageId, percent: u8, indeterminate: bool) {
        if let Err(err) = self
            .reporter
            .send_update_report(package, stage, percent, indeterminate)
            .await
        {
            self.logger.warn("PROGRESS", err.to_string());
        }
    }
}

/// Where staging left an update.
enum Staged {
    Ready(UpdateRecord),
    /// Already reported with this status.
    Ended(InstallStatus),
}

/// Await a hook, turning a panic into a hook error.
async fn guarded<T, F>(hook: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(UaError::hook(hook, panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    use async_trait::async_trait;
    use tempfile::{tempdir, TempDir};

    use crate::agent::{PrepareOutcome, TransferOutcome};
    use crate::bus::{MemoryBus, QUERY_PACKAGE, UPDATE_REPORT, UPDATE_STATUS};
    use crate::package::PackageFile;

    const NODE: &str = "/ECU/ROM";

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Fault {
        Error,
        Panic,
    }

    struct ScriptedAgent {
        download: DownloadStatus,
        transfer_status: i32,
        prepare: VecDeque<InstallStatus>,
        pre: InstallStatus,
        install: InstallStatus,
        rollback_to: Option<String>,
        fault: Option<(&'static str, Fault)>,
        calls: Vec<&'static str>,
    }

    impl ScriptedAgent {
        fn new() -> Self {
            Self {
                download: DownloadStatus::Consent,
                transfer_status: 0,
                prepare: VecDeque::new(),
                pre: InstallStatus::InProgress,
                install: InstallStatus::Completed,
                rollback_to: None,
                fault: None,
                calls: Vec::new(),
            }
        }

        fn faulting(hook: &'static str, fault: Fault) -> Self {
            let mut agent = Self::new();
            agent.fault = Some((hook, fault));
            agent
        }

        fn hook(&mut self, name: &'static str) -> Result<()> {
            self.calls.push(name);
            match self.fault {
                Some((hook, Fault::Error)) if hook == name => {
                    Err(UaError::hook(name, "scripted failure"))
                }
                Some((hook, Fault::Panic)) if hook == name => panic!("scripted panic in {name}"),
                _ => Ok(()),
            }
        }

        fn count(&self, name: &str) -> usize {
            self.calls.iter().filter(|call| **call == name).count()
        }
    }

    #[async_trait]
    impl UpdateAgent for ScriptedAgent {
        async fn confirm_download(&mut self, _package: &PackageId) -> Result<DownloadStatus> {
            self.hook("confirm_download")?;
            Ok(self.download)
        }

        async fn transfer_file(&mut self, _record: &UpdateRecord) -> Result<TransferOutcome> {
            self.hook("transfer_file")?;
            Ok(TransferOutcome::failed(self.transfer_status))
        }

        async fn prepare_install(&mut self, _record: &UpdateRecord) -> Result<PrepareOutcome> {
            self.hook("prepare_install")?;
            Ok(PrepareOutcome {
                status: self.prepare.pop_front().unwrap_or(InstallStatus::Ready),
                new_path: None,
            })
        }

        async fn pre_install(&mut self, _record: &UpdateRecord) -> Result<InstallStatus> {
            self.hook("pre_install")?;
            Ok(self.pre)
        }

        async fn install(&mut self, record: &mut UpdateRecord) -> Result<InstallStatus> {
            self.hook("install")?;
            if let Some(version) = &self.rollback_to {
                record.request_rollback(version.clone());
            }
            Ok(self.install)
        }

        async fn post_install(&mut self, _package: &str) -> Result<()> {
            self.hook("post_install")
        }

        async fn get_version(&mut self, store: &VersionStore, package: &str) -> Result<Option<String>> {
            self.hook("get_version")?;
            Ok(store.current_version(package))
        }

        async fn set_version(&mut self, store: &VersionStore, commit: &VersionCommit) -> Result<()> {
            self.hook("set_version")?;
            store.commit(commit).map(|_| ())
        }
    }

    struct Fixture {
        dir: TempDir,
        bus: Arc<MemoryBus>,
        lifecycle: Lifecycle<ScriptedAgent>,
    }

    impl Fixture {
        fn new(agent: ScriptedAgent) -> Self {
            let dir = tempdir().unwrap();
            let store = VersionStore::new(dir.path().join("versions"), dir.path().join("backup"));
            let bus = Arc::new(MemoryBus::new());
            let logger = Arc::new(Logger::disabled());
            let reporter = StatusReporter::new(bus.clone(), NODE, logger.clone());
            let settings = LifecycleSettings {
                node_type: NODE.into(),
                delta_cap: Some("A:3;B:3;C:100".into()),
                verify_checksum: true,
            };
            let lifecycle = Lifecycle::new(agent, store, reporter, logger, settings);
            Self { dir, bus, lifecycle }
        }

        fn package_file(&self, version: &str) -> PathBuf {
            let incoming = self.dir.path().join("incoming");
            std::fs::create_dir_all(&incoming).unwrap();
            let path = incoming.join(format!("app-{version}.pkg"));
            std::fs::write(&path, format!("payload {version}")).unwrap();
            path
        }

        fn request(&self, version: &str) -> UpdateRequest {
            UpdateRequest::new(NODE, PackageId::new("app", version)).with_file(PackageFile {
                version: version.into(),
                file: self.package_file(version),
                sha256: None,
                downloaded: true,
            })
        }

        /// Put `version` into the store as if it had been installed earlier.
        fn seed(&self, version: &str) {
            let file = self.package_file(version);
            self.lifecycle
                .store()
                .commit(&VersionCommit {
                    package: "app".into(),
                    version: version.into(),
                    sha256_received: None,
                    sha256_local: Some(file_sha256(&file).unwrap()),
                    downloaded: true,
                    package_file: file,
                })
                .unwrap();
        }

        fn recorded(&self) -> Option<String> {
            self.lifecycle.store().current_version("app")
        }

        fn calls(&self) -> &[&'static str] {
            &self.lifecycle.agent().calls
        }

        fn last_status(&self) -> Value {
            self.bus
                .sent_of(UPDATE_STATUS)
                .last()
                .map(|envelope| envelope["body"]["package"].clone())
                .unwrap_or(Value::Null)
        }
    }

    #[tokio::test]
    async fn full_lifecycle_records_installed_version() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        let request = fx.request("2.0");
        let original = request.files[0].file.clone();

        let consent = fx
            .lifecycle
            .ready_download(PackageId::new("app", "2.0"))
            .await
            .unwrap();
        assert_eq!(consent, DownloadStatus::Consent);
        assert_eq!(fx.lifecycle.state(), LifecycleState::AwaitingTransfer);

        let prepared = fx.lifecycle.prepare_update(request.clone()).await.unwrap();
        assert_eq!(prepared, InstallStatus::Ready);
        assert_eq!(fx.lifecycle.state(), LifecycleState::PreInstall);

        let installed = fx.lifecycle.ready_update(request).await.unwrap();
        assert_eq!(installed, InstallStatus::Completed);
        assert_eq!(fx.lifecycle.state(), LifecycleState::Completed);
        assert_eq!(fx.recorded().as_deref(), Some("2.0"));

        let entry = fx.lifecycle.store().entry("app", "2.0").unwrap();
        assert_eq!(entry.sha256, file_sha256(&original).unwrap());
        assert!(entry.file.starts_with(fx.dir.path().join("backup")));
        assert!(entry.file.exists());

        assert_eq!(
            fx.calls(),
            [
                "confirm_download",
                "transfer_file",
                "prepare_install",
                "pre_install",
                "install",
                "set_version",
                "post_install",
            ]
        );
        assert_eq!(
            fx.bus.statuses(),
            [
                "DOWNLOAD_CONSENT",
                "INSTALL_READY",
                "INSTALL_IN_PROGRESS",
                "INSTALL_COMPLETED",
            ]
        );
    }

    #[tokio::test]
    async fn ready_update_without_prepare_stages_inline() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        let request = fx.request("2.0");

        let status = fx.lifecycle.ready_update(request).await.unwrap();
        assert_eq!(status, InstallStatus::Completed);
        assert_eq!(fx.lifecycle.agent().count("transfer_file"), 1);
        assert_eq!(fx.lifecycle.agent().count("prepare_install"), 1);
        assert_eq!(fx.recorded().as_deref(), Some("2.0"));
    }

    #[tokio::test]
    async fn progress_is_reported_per_stage() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        fx.lifecycle.ready_update(fx.request("2.0")).await.unwrap();

        let reports: Vec<(Value, Value)> = fx
            .bus
            .sent_of(UPDATE_REPORT)
            .iter()
            .map(|envelope| (envelope["body"]["stage"].clone(), envelope["body"]["progress"].clone()))
            .collect();
        assert_eq!(
            reports,
            [
                (json!("US_TRANSFER"), json!(0)),
                (json!("US_TRANSFER"), json!(100)),
                (json!("US_INSTALL"), json!(0)),
            ]
        );
    }

    #[tokio::test]
    async fn prepared_update_is_not_staged_twice() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        let request = fx.request("2.0");

        fx.lifecycle.prepare_update(request.clone()).await.unwrap();
        assert_eq!(
            fx.lifecycle.prepare_update(request.clone()).await.unwrap(),
            InstallStatus::Ready
        );
        fx.lifecycle.ready_update(request).await.unwrap();

        assert_eq!(fx.lifecycle.agent().count("transfer_file"), 1);
        assert_eq!(fx.lifecycle.agent().count("prepare_install"), 1);
        assert_eq!(fx.lifecycle.agent().count("install"), 1);
    }

    #[tokio::test]
    async fn transfer_failure_stops_before_prepare() {
        let mut agent = ScriptedAgent::new();
        agent.transfer_status = 1;
        let mut fx = Fixture::new(agent);
        fx.seed("1.0");

        let status = fx.lifecycle.prepare_update(fx.request("2.0")).await.unwrap();
        assert_eq!(status, InstallStatus::Failed);
        assert_eq!(fx.lifecycle.state(), LifecycleState::Failed);
        assert_eq!(fx.calls(), ["transfer_file"]);
        assert_eq!(fx.recorded().as_deref(), Some("1.0"));
        assert!(fx.lifecycle.store().entry("app", "2.0").is_none());
        assert_eq!(fx.last_status()["status"], "INSTALL_FAILED");
    }

    async fn drive(agent: ScriptedAgent) -> (LifecycleState, Option<String>) {
        let mut fx = Fixture::new(agent);
        let package = PackageId::new("app", "2.0");
        let consent = fx.lifecycle.ready_download(package).await.unwrap();
        if consent == DownloadStatus::Consent {
            let request = fx.request("2.0");
            fx.lifecycle.ready_update(request).await.unwrap();
        }
        (fx.lifecycle.state(), fx.recorded())
    }

    #[tokio::test]
    async fn hook_faults_end_like_explicit_failures() {
        let mut denied = ScriptedAgent::new();
        denied.download = DownloadStatus::Denied;
        let mut transfer = ScriptedAgent::new();
        transfer.transfer_status = 1;
        let mut prepare = ScriptedAgent::new();
        prepare.prepare.push_back(InstallStatus::Failed);
        let mut pre = ScriptedAgent::new();
        pre.pre = InstallStatus::Failed;
        let mut install = ScriptedAgent::new();
        install.install = InstallStatus::Failed;

        let explicit = [
            ("confirm_download", denied),
            ("transfer_file", transfer),
            ("prepare_install", prepare),
            ("pre_install", pre),
            ("install", install),
        ];

        for (hook, agent) in explicit {
            let expected = drive(agent).await;
            for fault in [Fault::Error, Fault::Panic] {
                let observed = drive(ScriptedAgent::faulting(hook, fault)).await;
                assert_eq!(observed, expected, "{hook} with {fault:?}");
            }
        }
        assert_eq!(
            drive(ScriptedAgent::faulting("install", Fault::Panic)).await,
            (LifecycleState::Failed, None)
        );
        assert_eq!(
            drive(ScriptedAgent::faulting("confirm_download", Fault::Error)).await,
            (LifecycleState::Idle, None)
        );
    }

    #[tokio::test]
    async fn install_rollback_restores_requested_version() {
        let mut agent = ScriptedAgent::new();
        agent.install = InstallStatus::Rollback;
        agent.rollback_to = Some("1.0".into());
        let mut fx = Fixture::new(agent);
        fx.seed("1.0");

        let status = fx.lifecycle.ready_update(fx.request("2.0")).await.unwrap();
        assert_eq!(status, InstallStatus::Rollback);
        assert_eq!(fx.lifecycle.state(), LifecycleState::RolledBack);
        assert_eq!(fx.recorded().as_deref(), Some("1.0"));
        assert!(fx.lifecycle.store().entry("app", "2.0").is_none());
        assert_eq!(fx.lifecycle.agent().count("set_version"), 0);

        let report = fx.last_status();
        assert_eq!(report["status"], "INSTALL_ROLLBACK");
        assert_eq!(report["rollback-version"], "1.0");
    }

    #[tokio::test]
    async fn install_rollback_defaults_to_previous_version() {
        let mut agent = ScriptedAgent::new();
        agent.install = InstallStatus::Rollback;
        let mut fx = Fixture::new(agent);
        fx.seed("1.0");
        fx.seed("1.5");

        fx.lifecycle.ready_update(fx.request("2.0")).await.unwrap();
        assert_eq!(fx.recorded().as_deref(), Some("1.5"));
    }

    #[tokio::test]
    async fn install_rollback_without_target_fails() {
        let mut agent = ScriptedAgent::new();
        agent.install = InstallStatus::Rollback;
        let mut fx = Fixture::new(agent);

        let status = fx.lifecycle.ready_update(fx.request("2.0")).await.unwrap();
        assert_eq!(status, InstallStatus::Failed);
        assert_eq!(fx.lifecycle.state(), LifecycleState::Failed);
        assert!(fx.recorded().is_none());
    }

    #[tokio::test]
    async fn corrupt_record_is_replaced_on_commit() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        fx.seed("1.0");
        std::fs::write(fx.dir.path().join("versions").join("app"), "{ not json").unwrap();

        let status = fx.lifecycle.ready_update(fx.request("3.0")).await.unwrap();
        assert_eq!(status, InstallStatus::Completed);
        let record = fx.lifecycle.store().get("app").unwrap();
        assert_eq!(record.current_version, "3.0");
        assert_eq!(record.history.keys().collect::<Vec<_>>(), ["3.0"]);
    }

    #[tokio::test]
    async fn prepare_can_be_retried_after_failure() {
        let mut agent = ScriptedAgent::new();
        agent.prepare.push_back(InstallStatus::Failed);
        let mut fx = Fixture::new(agent);
        let request = fx.request("2.0");

        assert_eq!(
            fx.lifecycle.prepare_update(request.clone()).await.unwrap(),
            InstallStatus::Failed
        );
        assert_eq!(
            fx.lifecycle.prepare_update(request.clone()).await.unwrap(),
            InstallStatus::Ready
        );
        assert_eq!(fx.lifecycle.state(), LifecycleState::PreInstall);
        assert_eq!(
            fx.lifecycle.ready_update(request).await.unwrap(),
            InstallStatus::Completed
        );
        assert_eq!(fx.lifecycle.agent().count("prepare_install"), 2);
    }

    #[tokio::test]
    async fn new_update_aborts_prepared_one() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        fx.lifecycle.prepare_update(fx.request("2.0")).await.unwrap();
        fx.lifecycle.prepare_update(fx.request("3.0")).await.unwrap();

        assert_eq!(
            fx.bus.statuses(),
            ["INSTALL_READY", "INSTALL_ABORTED", "INSTALL_READY"]
        );
        assert_eq!(fx.lifecycle.current().unwrap().version(), "3.0");
    }

    #[tokio::test]
    async fn download_can_be_denied_or_postponed() {
        let mut agent = ScriptedAgent::new();
        agent.download = DownloadStatus::Postponed;
        let mut fx = Fixture::new(agent);
        let package = PackageId::new("app", "2.0");

        let status = fx.lifecycle.ready_download(package.clone()).await.unwrap();
        assert_eq!(status, DownloadStatus::Postponed);
        assert_eq!(fx.lifecycle.state(), LifecycleState::ConfirmDownload);

        fx.lifecycle.agent_mut().download = DownloadStatus::Denied;
        let status = fx.lifecycle.ready_download(package.clone()).await.unwrap();
        assert_eq!(status, DownloadStatus::Denied);
        assert_eq!(fx.lifecycle.state(), LifecycleState::Idle);

        fx.lifecycle.agent_mut().download = DownloadStatus::Consent;
        fx.lifecycle.ready_download(package).await.unwrap();
        assert_eq!(fx.lifecycle.state(), LifecycleState::AwaitingTransfer);
        assert_eq!(
            fx.bus.statuses(),
            ["DOWNLOAD_POSTPONED", "DOWNLOAD_DENIED", "DOWNLOAD_CONSENT"]
        );
        assert!(fx.recorded().is_none());
    }

    #[tokio::test]
    async fn query_reports_version_and_history() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        fx.seed("1.0");
        fx.seed("2.0");

        let package = fx.lifecycle.query_package("app", Some("r-9")).await.unwrap();
        assert_eq!(package["version"], "2.0");
        assert_eq!(package["delta-cap"], "A:3;B:3;C:100");
        assert_eq!(package["rollback-versions"], json!(["1.0", "2.0"]));
        let seeded = fx.lifecycle.store().entry("app", "1.0").unwrap();
        assert_eq!(package["version-list"]["1.0"]["sha-256"], json!(seeded.sha256));
        assert_eq!(package["version-list"]["1.0"]["downloaded"], true);

        let reply = &fx.bus.sent_of(QUERY_PACKAGE)[0];
        assert_eq!(reply["reply-to"], "r-9");
        assert_eq!(reply["body"]["package"]["name"], "app");
    }

    #[tokio::test]
    async fn query_without_version_reports_null() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        let package = fx.lifecycle.query_package("app", None).await.unwrap();
        assert!(package["version"].is_null());
        assert!(package.get("version-list").is_none());
    }

    #[tokio::test]
    async fn failing_version_query_sends_nothing() {
        let mut fx = Fixture::new(ScriptedAgent::faulting("get_version", Fault::Error));
        assert!(fx.lifecycle.query_package("app", Some("r-1")).await.is_none());
        assert!(fx.bus.sent_of(QUERY_PACKAGE).is_empty());
    }

    #[tokio::test]
    async fn events_for_other_node_types_are_ignored() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        fx.lifecycle
            .handle(BusEvent::ReadyDownload {
                node_type: "/ECU/Other".into(),
                package: PackageId::new("app", "2.0"),
            })
            .await
            .unwrap();
        assert!(fx.calls().is_empty());
        assert_eq!(fx.lifecycle.state(), LifecycleState::Idle);

        fx.lifecycle
            .handle(BusEvent::ReadyDownload {
                node_type: NODE.into(),
                package: PackageId::new("app", "2.0"),
            })
            .await
            .unwrap();
        assert_eq!(fx.calls(), ["confirm_download"]);
    }

    #[tokio::test]
    async fn checksum_mismatch_fails_before_prepare() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        let mut request = fx.request("2.0");
        request.files[0].sha256 = Some("00".repeat(32));

        let status = fx.lifecycle.ready_update(request).await.unwrap();
        assert_eq!(status, InstallStatus::Failed);
        assert_eq!(fx.calls(), ["transfer_file"]);
    }

    #[tokio::test]
    async fn base64_checksum_from_device_manager_passes() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        let mut request = fx.request("2.0");
        let digest = file_sha256(&request.files[0].file).unwrap();
        assert_eq!(digest.len(), 44);
        request.files[0].sha256 = Some(digest.clone());

        assert_eq!(
            fx.lifecycle.ready_update(request).await.unwrap(),
            InstallStatus::Completed
        );
        assert_eq!(
            fx.calls(),
            ["transfer_file", "prepare_install", "pre_install", "install", "set_version", "post_install"]
        );
        assert_eq!(
            fx.lifecycle.store().entry("app", "2.0").unwrap().sha256,
            digest
        );
    }

    #[tokio::test]
    async fn hex_checksum_is_accepted_and_stored_as_base64() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        let mut request = fx.request("2.0");
        let file = request.files[0].file.clone();
        let hex: String = file_digest(&file)
            .unwrap()
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect();
        request.files[0].sha256 = Some(hex);

        assert_eq!(
            fx.lifecycle.ready_update(request).await.unwrap(),
            InstallStatus::Completed
        );
        assert_eq!(
            fx.lifecycle.store().entry("app", "2.0").unwrap().sha256,
            file_sha256(&file).unwrap()
        );
    }

    #[tokio::test]
    async fn unreadable_checksum_fails_before_prepare() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        let mut request = fx.request("2.0");
        request.files[0].sha256 = Some("not-a-digest".into());

        let status = fx.lifecycle.ready_update(request).await.unwrap();
        assert_eq!(status, InstallStatus::Failed);
        assert_eq!(fx.calls(), ["transfer_file"]);
    }

    #[tokio::test]
    async fn failure_points_at_next_rollback_version() {
        let mut agent = ScriptedAgent::new();
        agent.install = InstallStatus::Failed;
        let mut fx = Fixture::new(agent);
        fx.seed("1.0");
        let mut request = fx.request("2.0");
        request.rollback_versions = vec!["1.5".into(), "1.0".into()];

        fx.lifecycle.ready_update(request.clone()).await.unwrap();
        let report = fx.last_status();
        assert_eq!(report["status"], "INSTALL_FAILED");
        assert_eq!(report["rollback-version"], "1.0");
        assert!(report.get("terminal-failure").is_none());

        request.rollback_versions = vec!["0.9".into()];
        fx.lifecycle.ready_update(request).await.unwrap();
        assert_eq!(fx.last_status()["terminal-failure"], true);
    }

    #[tokio::test]
    async fn requested_rollback_installs_from_backup() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        fx.seed("1.0");
        fx.seed("2.0");
        let mut request = UpdateRequest::new(NODE, PackageId::new("app", "2.0"));
        request.rollback_version = Some("1.0".into());

        let status = fx.lifecycle.ready_update(request).await.unwrap();
        assert_eq!(status, InstallStatus::Completed);
        assert_eq!(fx.recorded().as_deref(), Some("1.0"));
        assert_eq!(fx.lifecycle.agent().count("transfer_file"), 0);
        assert_eq!(fx.bus.statuses()[0], "INSTALL_ROLLBACK");
    }

    #[tokio::test]
    async fn requested_rollback_without_file_asks_for_download() {
        let mut fx = Fixture::new(ScriptedAgent::new());
        let mut request = UpdateRequest::new(NODE, PackageId::new("app", "2.0"));
        request.rollback_version = Some("1.0".into());

        assert_eq!(
            fx.lifecycle.ready_update(request).await.unwrap(),
            InstallStatus::Rollback
        );
        assert!(fx.calls().is_empty());
        assert_eq!(fx.lifecycle.state(), LifecycleState::Idle);
        assert_eq!(fx.bus.statuses(), ["INSTALL_ROLLBACK"]);
        let report = fx.last_status();
        assert_eq!(report["rollback-version"], "1.0");
        assert_eq!(report["version-list"]["1.0"]["downloaded"], false);
        assert!(fx.recorded().is_none());

        // The device manager follows up with the downloaded file.
        let mut retry = UpdateRequest::new(NODE, PackageId::new("app", "2.0")).with_file(PackageFile {
            version: "1.0".into(),
            file: fx.package_file("1.0"),
            sha256: None,
            downloaded: true,
        });
        retry.rollback_version = Some("1.0".into());
        assert_eq!(
            fx.lifecycle.ready_update(retry).await.unwrap(),
            InstallStatus::Completed
        );
        assert_eq!(fx.recorded().as_deref(), Some("1.0"));
    }

    #[tokio::test]
    async fn set_version_failure_keeps_completed() {
        let mut fx = Fixture::new(ScriptedAgent::faulting("set_version", Fault::Error));
        let status = fx.lifecycle.ready_update(fx.request("2.0")).await.unwrap();
        assert_eq!(status, InstallStatus::Completed);
        assert_eq!(fx.lifecycle.state(), LifecycleState::Completed);
        assert!(fx.recorded().is_none());
        assert_eq!(fx.lifecycle.agent().count("post_install"), 1);
    }

    #[tokio::test]
    async fn post_install_fault_is_contained() {
        let mut fx = Fixture::new(ScriptedAgent::faulting("post_install", Fault::Panic));
        let status = fx.lifecycle.ready_update(fx.request("2.0")).await.unwrap();
        assert_eq!(status, InstallStatus::Completed);
        assert_eq!(fx.recorded().as_deref(), Some("2.0"));
    }

    #[tokio::test]
    async fn aborted_install_leaves_store_alone() {
        let mut agent = ScriptedAgent::new();
        agent.install = InstallStatus::Aborted;
        let mut fx = Fixture::new(agent);

        let status = fx.lifecycle.ready_update(fx.request("2.0")).await.unwrap();
        assert_eq!(status, InstallStatus::Aborted);
        assert_eq!(fx.lifecycle.state(), LifecycleState::Aborted);
        assert!(fx.recorded().is_none());

        fx.lifecycle.ready_update(fx.request("2.0")).await.unwrap();
        assert_eq!(fx.lifecycle.agent().count("install"), 2);
    }

    #[test]
    fn settings_follow_delta_switch() {
        let mut config = AgentConfig::default();
        assert_eq!(
            LifecycleSettings::from(&config).delta_cap.as_deref(),
            Some("A:3;B:3;C:100")
        );
        config.delta.enabled = false;
        assert!(LifecycleSettings::from(&config).delta_cap.is_none());
    }
}
