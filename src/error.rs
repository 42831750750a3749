/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::error
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Centralise update agent error types so every lifecycle
    boundary, store operation and CLI exit shares one taxonomy.

  Security / Safety Notes:
    Error contexts never carry transfer credentials; only
    package names, versions and filesystem paths are exposed.

  Dependencies:
    thiserror for ergonomic error definitions.

  Operational Scope:
    Used across modules to propagate recoverable failures and
    consolidate exit codes for the reference agent binary.

  Revision History:
    2026-10-16 COD  Established update agent error taxonomy.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit error taxonomy with actionable context
    - No silent failure paths
    - Stable exit codes for operational tooling
============================================================*/

use std::io;
use std::process::ExitCode;

use thiserror::Error;

/// Result alias for update agent operations.
pub type Result<T> = std::result::Result<T, UaError>;

/// Enumerates high-level error domains surfaced by the update agent.
#[derive(Debug, Error)]
pub enum UaError {
    #[error("Required command `{command}` not found in PATH")]
    CommandMissing { command: String },
    #[error("Command `{command}` failed with status {status}: {stderr}")]
    CommandFailure {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Configuration: {0}")]
    Config(String),
    #[error("Transfer: {0}")]
    Transfer(String),
    #[error("Persistence: {0}")]
    Persistence(String),
    #[error("Bus: {0}")]
    Bus(String),
    #[error("Serialization: {0}")]
    Serialization(String),
    #[error("Filesystem: {0}")]
    Filesystem(String),
    #[error("Hook `{hook}` failed: {reason}")]
    Hook { hook: String, reason: String },
    #[error("Invalid lifecycle transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Runtime: {0}")]
    Runtime(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl UaError {
    /// Shorthand for a failure raised inside an agent hook.
    pub fn hook(hook: &str, reason: impl Into<String>) -> Self {
        UaError::Hook {
            hook: hook.to_string(),
            reason: reason.into(),
        }
    }

    /// Map error category to a deterministic exit code.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            UaError::CommandMissing { .. } => ExitCode::from(10),
            UaError::CommandFailure { .. } => ExitCode::from(11),
            UaError::Config(_) => ExitCode::from(20),
            UaError::Transfer(_) => ExitCode::from(30),
            UaError::Bus(_) => ExitCode::from(32),
            UaError::Serialization(_) => ExitCode::from(31),
            UaError::Persistence(_) => ExitCode::from(42),
            UaError::Filesystem(_) => ExitCode::from(40),
            UaError::Io(_) => ExitCode::from(41),
            UaError::Hook { .. } => ExitCode::from(51),
            UaError::InvalidTransition { .. } => ExitCode::from(52),
            UaError::Runtime(_) => ExitCode::from(50),
        }
    }
}

impl From<serde_json::Error> for UaError {
    fn from(err: serde_json::Error) -> Self {
        UaError::Serialization(err.to_string())
    }
}
