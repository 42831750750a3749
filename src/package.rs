/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::package
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Package identity, inbound update requests and the update
    record that owns all state of one in-flight update.

  Security / Safety Notes:
    Pure data containers; no I/O performed in this module.

  Dependencies:
    serde for diagnostic serialisation.

  Operational Scope:
    Created from bus events, threaded through every agent hook
    and dropped when the lifecycle reaches a terminal state.

  Revision History:
    2026-10-16 COD  Introduced package and update record types.
  ------------------------------------------------------------
  SSE Principles Observed:
    - State owned by the in-flight update, not ambient globals
    - Clear data contracts between modules
============================================================*/

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::status::InstallStatus;

/// Uniquely identifies one update unit. Versions are opaque strings and
/// only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PackageId {
    pub name: String,
    pub version: String,
}

impl PackageId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// One `version-list` entry of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    pub version: String,
    pub file: PathBuf,
    pub sha256: Option<String>,
    pub downloaded: bool,
}

/// A `prepare-update` or `ready-update` request as received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub package: PackageId,
    /// Handler type the request was addressed to.
    pub node_type: String,
    pub files: Vec<PackageFile>,
    /// Set when the device manager asks for a specific older version.
    pub rollback_version: Option<String>,
    pub rollback_versions: Vec<String>,
}

impl UpdateRequest {
    pub fn new(node_type: impl Into<String>, package: PackageId) -> Self {
        Self {
            package,
            node_type: node_type.into(),
            files: Vec::new(),
            rollback_version: None,
            rollback_versions: Vec::new(),
        }
    }

    /// Attach a `version-list` entry.
    pub fn with_file(mut self, file: PackageFile) -> Self {
        self.files.push(file);
        self
    }

    /// Version that will actually be installed.
    pub fn target_version(&self) -> &str {
        self.rollback_version
            .as_deref()
            .unwrap_or(&self.package.version)
    }

    /// `version-list` entry for `version`, if the message carried one.
    pub fn file_for(&self, version: &str) -> Option<&PackageFile> {
        self.files.iter().find(|entry| entry.version == version)
    }
}

/// Transient state of one in-flight update.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateRecord {
    /// Package identity of the version being installed.
    pub package: PackageId,
    /// Version the device manager announced; differs from
    /// `package.version` during a requested rollback.
    pub requested_version: String,
    pub package_file: PathBuf,
    pub sha256_received: Option<String>,
    /// Whether the file was freshly downloaded rather than taken from the
    /// local backup.
    pub downloaded: bool,
    pub from_backup: bool,
    pub transfer_status: Option<i32>,
    pub prepare_status: Option<InstallStatus>,
    pub install_status: Option<InstallStatus>,
    rollback_target: Option<String>,
}

impl UpdateRecord {
    pub fn new(package: PackageId, package_file: PathBuf) -> Self {
        let requested_version = package.version.clone();
        Self {
            package,
            requested_version,
            package_file,
            sha256_received: None,
            downloaded: true,
            from_backup: false,
            transfer_status: None,
            prepare_status: None,
            install_status: None,
            rollback_target: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.package.name
    }

    pub fn version(&self) -> &str {
        &self.package.version
    }

    pub fn package_file(&self) -> &Path {
        &self.package_file
    }

    /// Replace the staged file used by every later step.
    pub fn relocate(&mut self, new_path: PathBuf) {
        self.package_file = new_path;
    }

    /// Ask the lifecycle to restore `version` when `install` answers
    /// `INSTALL_ROLLBACK`.
    pub fn request_rollback(&mut self, version: impl Into<String>) {
        self.rollback_target = Some(version.into());
    }

    pub fn rollback_target(&self) -> Option<&str> {
        self.rollback_target.as_deref()
    }

    /// True once prepare-install has accepted the staged file.
    pub fn is_prepared(&self) -> bool {
        self.prepare_status == Some(InstallStatus::Ready)
    }

    pub fn matches(&self, request: &UpdateRequest) -> bool {
        self.package.name == request.package.name
            && self.package.version == request.target_version()
    }
}
