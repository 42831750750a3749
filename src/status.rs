/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::status
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Shared status vocabulary exchanged with the device manager
    and the lifecycle states an update passes through.

  Security / Safety Notes:
    Pure data definitions; no I/O performed in this module.

  Dependencies:
    serde for wire representation.

  Operational Scope:
    Used by the lifecycle, the agent hooks and status reports.

  Revision History:
    2026-10-16 COD  Introduced status and lifecycle state types.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Clear data contracts between modules
    - Transition table kept next to the states it governs
============================================================*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UaError};

/// Answer to a `ready-download` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadStatus {
    #[serde(rename = "DOWNLOAD_CONSENT")]
    Consent,
    #[serde(rename = "DOWNLOAD_DENIED")]
    Denied,
    #[serde(rename = "DOWNLOAD_POSTPONED")]
    Postponed,
}

impl DownloadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Consent => "DOWNLOAD_CONSENT",
            DownloadStatus::Denied => "DOWNLOAD_DENIED",
            DownloadStatus::Postponed => "DOWNLOAD_POSTPONED",
        }
    }
}

/// Install-side status values reported for prepare, pre-install and
/// install steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstallStatus {
    #[serde(rename = "INSTALL_READY")]
    Ready,
    #[serde(rename = "INSTALL_PENDING")]
    Pending,
    #[serde(rename = "INSTALL_IN_PROGRESS")]
    InProgress,
    #[serde(rename = "INSTALL_COMPLETED")]
    Completed,
    #[serde(rename = "INSTALL_ABORTED")]
    Aborted,
    #[serde(rename = "INSTALL_ROLLBACK")]
    Rollback,
    #[serde(rename = "INSTALL_FAILED")]
    Failed,
}

impl InstallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallStatus::Ready => "INSTALL_READY",
            InstallStatus::Pending => "INSTALL_PENDING",
            InstallStatus::InProgress => "INSTALL_IN_PROGRESS",
            InstallStatus::Completed => "INSTALL_COMPLETED",
            InstallStatus::Aborted => "INSTALL_ABORTED",
            InstallStatus::Rollback => "INSTALL_ROLLBACK",
            InstallStatus::Failed => "INSTALL_FAILED",
        }
    }
}

/// The complete status vocabulary shared with the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Download(DownloadStatus),
    Install(InstallStatus),
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Download(status) => status.as_str(),
            Status::Install(status) => status.as_str(),
        }
    }
}

impl From<DownloadStatus> for Status {
    fn from(status: DownloadStatus) -> Self {
        Status::Download(status)
    }
}

impl From<InstallStatus> for Status {
    fn from(status: InstallStatus) -> Self {
        Status::Install(status)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = UaError;

    fn from_str(s: &str) -> Result<Self> {
        let status = match s {
            "DOWNLOAD_CONSENT" => DownloadStatus::Consent.into(),
            "DOWNLOAD_DENIED" => DownloadStatus::Denied.into(),
            "DOWNLOAD_POSTPONED" => DownloadStatus::Postponed.into(),
            "INSTALL_READY" => InstallStatus::Ready.into(),
            "INSTALL_PENDING" => InstallStatus::Pending.into(),
            "INSTALL_IN_PROGRESS" => InstallStatus::InProgress.into(),
            "INSTALL_COMPLETED" => InstallStatus::Completed.into(),
            "INSTALL_ABORTED" => InstallStatus::Aborted.into(),
            "INSTALL_ROLLBACK" => InstallStatus::Rollback.into(),
            "INSTALL_FAILED" => InstallStatus::Failed.into(),
            other => {
                return Err(UaError::Serialization(format!("unknown status `{other}`")));
            }
        };
        Ok(status)
    }
}

/// Where one update currently sits in the install lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    #[default]
    Idle,
    ConfirmDownload,
    AwaitingTransfer,
    PrepareInstall,
    PreInstall,
    Installing,
    PostInstall,
    Completed,
    Failed,
    RolledBack,
    Aborted,
}

impl LifecycleState {
    /// Terminal states end the lifecycle of one update.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::RolledBack | Self::Aborted
        )
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    pub fn can_transition(self, to: LifecycleState) -> bool {
        use LifecycleState::*;

        if self.is_terminal() {
            return to == Idle;
        }
        // A pending update can always be superseded.
        if to == Aborted && self != Idle {
            return true;
        }
        matches!(
            (self, to),
            (Idle, ConfirmDownload)
                | (Idle, AwaitingTransfer)
                | (ConfirmDownload, AwaitingTransfer)
                | (ConfirmDownload, Idle)
                | (ConfirmDownload, ConfirmDownload)
                | (AwaitingTransfer, PrepareInstall)
                | (AwaitingTransfer, Failed)
                | (AwaitingTransfer, Idle)
                | (PrepareInstall, PreInstall)
                | (PrepareInstall, Failed)
                | (PreInstall, Installing)
                | (PreInstall, Failed)
                | (Installing, PostInstall)
                | (Installing, Failed)
                | (Installing, RolledBack)
                | (PostInstall, Completed)
        )
    }

    /// Checked transition.
    pub fn transition(self, to: LifecycleState) -> Result<LifecycleState> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(UaError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "IDLE",
            Self::ConfirmDownload => "CONFIRM_DOWNLOAD",
            Self::AwaitingTransfer => "AWAITING_TRANSFER",
            Self::PrepareInstall => "PREPARE_INSTALL",
            Self::PreInstall => "PRE_INSTALL",
            Self::Installing => "INSTALLING",
            Self::PostInstall => "POST_INSTALL",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::RolledBack => "ROLLED_BACK",
            Self::Aborted => "ABORTED",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_parse_back() {
        for raw in [
            "DOWNLOAD_CONSENT",
            "DOWNLOAD_DENIED",
            "DOWNLOAD_POSTPONED",
            "INSTALL_READY",
            "INSTALL_PENDING",
            "INSTALL_IN_PROGRESS",
            "INSTALL_COMPLETED",
            "INSTALL_ABORTED",
            "INSTALL_ROLLBACK",
            "INSTALL_FAILED",
        ] {
            assert_eq!(raw.parse::<Status>().unwrap().as_str(), raw);
        }
        assert!("INSTALL_MAYBE".parse::<Status>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&InstallStatus::InProgress).unwrap();
        assert_eq!(json, "\"INSTALL_IN_PROGRESS\"");
        let parsed: DownloadStatus = serde_json::from_str("\"DOWNLOAD_POSTPONED\"").unwrap();
        assert_eq!(parsed, DownloadStatus::Postponed);
    }

    #[test]
    fn happy_path_is_a_chain_of_valid_edges() {
        use LifecycleState::*;
        let path = [
            Idle,
            ConfirmDownload,
            AwaitingTransfer,
            PrepareInstall,
            PreInstall,
            Installing,
            PostInstall,
            Completed,
            Idle,
        ];
        let mut state = path[0];
        for next in &path[1..] {
            state = state.transition(*next).unwrap();
        }
        assert_eq!(state, Idle);
    }

    #[test]
    fn steps_cannot_be_skipped() {
        use LifecycleState::*;
        assert!(!AwaitingTransfer.can_transition(PreInstall));
        assert!(!PrepareInstall.can_transition(Installing));
        assert!(!Installing.can_transition(Completed));
        assert!(!PreInstall.can_transition(RolledBack));
        assert!(matches!(
            Completed.transition(Installing),
            Err(UaError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn terminal_states_only_reset() {
        use LifecycleState::*;
        for state in [Completed, Failed, RolledBack, Aborted] {
            assert!(state.is_terminal());
            assert!(state.can_transition(Idle));
            assert!(!state.can_transition(ConfirmDownload));
        }
        assert!(!Idle.can_transition(Aborted));
        assert!(PreInstall.can_transition(Aborted));
        // Rollback handed back to the device manager for download.
        assert!(AwaitingTransfer.can_transition(Idle));
        assert!(!PrepareInstall.can_transition(Idle));
    }
}
