/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::diagnostics
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Format status, progress, query and log-report envelopes
    and hand them to the bus adapter.

  Security / Safety Notes:
    Diagnostics are best-effort: a failed send is logged and
    never changes lifecycle state.

  Dependencies:
    serde_json for envelopes, chrono for timestamps.

  Operational Scope:
    Shared by the lifecycle and by agents that want to emit
    their own log reports.

  Revision History:
    2026-10-16 COD  Built status reporter.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Outbound failures contained at the boundary
    - Envelope layout defined in one place
============================================================*/

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::bus::{BusAdapter, LOG_REPORT, QUERY_PACKAGE, UPDATE_REPORT, UPDATE_STATUS};
use crate::error::{Result, UaError};
use crate::logger::Logger;
use crate::package::PackageId;
use crate::status::Status;

/// Severity of a log report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiagLevel {
    Event,
    Info,
    Warn,
    Error,
    Severe,
}

impl DiagLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagLevel::Event => "EVENT",
            DiagLevel::Info => "INFO",
            DiagLevel::Warn => "WARN",
            DiagLevel::Error => "ERROR",
            DiagLevel::Severe => "SEVERE",
        }
    }
}

impl fmt::Display for DiagLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle stage a progress report refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    Transfer,
    Install,
}

impl UpdateStage {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateStage::Transfer => "US_TRANSFER",
            UpdateStage::Install => "US_INSTALL",
        }
    }
}

/// Optional fields of an update-status report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusDetails {
    pub rollback_version: Option<String>,
    pub rollback_versions: Vec<String>,
    pub terminal_failure: bool,
    pub version_list: Option<Value>,
}

/// Emits structured envelopes for one registered node type.
#[derive(Clone)]
pub struct StatusReporter {
    bus: Arc<dyn BusAdapter>,
    node_type: String,
    logger: Arc<Logger>,
}

impl StatusReporter {
    pub fn new(bus: Arc<dyn BusAdapter>, node_type: impl Into<String>, logger: Arc<Logger>) -> Self {
        Self {
            bus,
            node_type: node_type.into(),
            logger,
        }
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Send a `log-report`. `timestamp` defaults to now and `node_type` to
    /// the registered node type. Returns whether the bus accepted it.
    pub async fn send_diag_data(
        &self,
        message: impl Into<Value>,
        level: DiagLevel,
        timestamp: Option<DateTime<Utc>>,
        compoundable: bool,
        node_type: Option<&str>,
    ) -> bool {
        let timestamp = timestamp
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let envelope = json!({
            "type": LOG_REPORT,
            "body": {
                "type": node_type.unwrap_or(&self.node_type),
                "level": level.as_str(),
                "timestamp": timestamp,
                "compoundable": compoundable,
                "message": message.into(),
            }
        });
        self.emit(envelope).await
    }

    /// Report a lifecycle decision for `package`.
    pub async fn send_update_status(
        &self,
        package: &PackageId,
        status: impl Into<Status>,
        details: &StatusDetails,
    ) -> bool {
        let status = status.into();
        let mut body = Map::new();
        body.insert("name".into(), json!(package.name));
        body.insert("type".into(), json!(self.node_type));
        body.insert("version".into(), json!(package.version));
        body.insert("status".into(), json!(status.as_str()));
        if let Some(version) = &details.rollback_version {
            body.insert("rollback-version".into(), json!(version));
        }
        if !details.rollback_versions.is_empty() {
            body.insert("rollback-versions".into(), json!(details.rollback_versions));
        }
        if details.terminal_failure {
            body.insert("terminal-failure".into(), json!(true));
        }
        if let Some(list) = &details.version_list {
            body.insert("version-list".into(), list.clone());
        }

        self.logger.info(
            "UPDATE-STATUS",
            format!("{package} -> {status}"),
        );
        self.emit(json!({
            "type": UPDATE_STATUS,
            "body": { "package": Value::Object(body) }
        }))
        .await
    }

    /// Send an `update-report` progress envelope. `percent` must lie in
    /// `0..=100`.
    pub async fn send_update_report(
        &self,
        package: &PackageId,
        stage: UpdateStage,
        percent: u8,
        indeterminate: bool,
    ) -> Result<bool> {
        if percent > 100 {
            return Err(UaError::Runtime(format!(
                "progress {percent}% out of range for {package}"
            )));
        }
        Ok(self
            .emit(json!({
                "type": UPDATE_REPORT,
                "body": {
                    "package": { "name": package.name, "version": package.version },
                    "progress": percent,
                    "indeterminate": indeterminate,
                    "stage": stage.as_str(),
                }
            }))
            .await)
    }

    /// Answer a `query-package` request.
    pub async fn send_query_reply(&self, reply_to: Option<&str>, package: Value) -> bool {
        let mut envelope = json!({
            "type": QUERY_PACKAGE,
            "body": { "package": package }
        });
        if let (Some(reply_to), Some(object)) = (reply_to, envelope.as_object_mut()) {
            object.insert("reply-to".into(), json!(reply_to));
        }
        self.emit(envelope).await
    }

    async fn emit(&self, envelope: Value) -> bool {
        match self.bus.send_message(&envelope).await {
            Ok(()) => true,
            Err(err) => {
                let kind = envelope
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                self.logger
                    .warn("DIAG-SEND", format!("dropping {kind} envelope: {err}"));
                false
            }
        }
    }
}
