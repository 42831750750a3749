/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::bus
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Contract between the agent core and the message bus that
    connects it to the device manager, inbound event parsing,
    a JSON-lines development relay and an in-memory bus.

  Security / Safety Notes:
    The development relay speaks plain TCP and is meant for
    bench setups only; it performs no authentication.

  Dependencies:
    tokio for sockets and channels, serde_json for envelopes,
    async-trait for the adapter interface.

  Operational Scope:
    `start` is issued once by the runner; `send_message` by the
    status reporter for every outbound envelope.

  Revision History:
    2026-10-16 COD  Defined bus adapter contract and adapters.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Transport kept behind a narrow trait
    - Malformed input rejected with explicit errors
============================================================*/

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use crate::config::AgentConfig;
use crate::error::{Result, UaError};
use crate::package::{PackageFile, PackageId, UpdateRequest};

pub const QUERY_PACKAGE: &str = "xl4.query-package";
pub const READY_DOWNLOAD: &str = "xl4.ready-download";
pub const PREPARE_UPDATE: &str = "xl4.prepare-update";
pub const READY_UPDATE: &str = "xl4.ready-update";
pub const CONFIRM_UPDATE: &str = "xl4.confirm-update";
pub const DOWNLOAD_REPORT: &str = "xl4.download-report";
pub const UPDATE_STATUS: &str = "xl4.update-status";
pub const UPDATE_REPORT: &str = "xl4.update-report";
pub const LOG_REPORT: &str = "xl4.log-report";
pub const PRESENCE: &str = "xl4.presence";

const INBOUND_QUEUE: usize = 64;

/// Parameters handed to the bus when the agent registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartConfig {
    pub url: String,
    pub cert_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub delta: bool,
    /// Opaque delta capability descriptor.
    pub delta_cap: String,
    pub debug: bool,
    pub reboot_support: bool,
}

impl From<&AgentConfig> for StartConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            url: config.bus.url.clone(),
            cert_dir: config.bus.cert_dir.clone(),
            cache_dir: config.paths.cache_dir.clone(),
            backup_dir: config.paths.backup_dir.clone(),
            delta: config.delta.enabled,
            delta_cap: config.delta.cap.clone(),
            debug: config.debug,
            reboot_support: config.reboot_support,
        }
    }
}

/// Traffic delivered by the bus, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A raw JSON envelope.
    Message(String),
    /// The device manager appeared on or left the bus.
    Presence(bool),
}

/// The transport the agent core talks through.
#[async_trait]
pub trait BusAdapter: Send + Sync {
    /// Register `node_type` on the bus. Inbound traffic is delivered on the
    /// returned channel until the bus closes it.
    async fn start(&self, node_type: &str, config: &StartConfig) -> Result<mpsc::Receiver<Inbound>>;

    /// Transmit one JSON envelope. No reply is awaited.
    async fn send_message(&self, envelope: &Value) -> Result<()>;
}

/// Decoded inbound lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    QueryPackage {
        node_type: String,
        name: String,
        reply_id: Option<String>,
    },
    ReadyDownload {
        node_type: String,
        package: PackageId,
    },
    PrepareUpdate(UpdateRequest),
    ReadyUpdate(UpdateRequest),
    ConfirmUpdate {
        node_type: String,
        package: PackageId,
    },
    DownloadReport {
        node_type: String,
        package: PackageId,
        downloaded_bytes: u64,
        total_bytes: u64,
    },
    /// A message type the core does not act on.
    Unhandled(String),
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "reply-id")]
    reply_id: Option<String>,
    #[serde(default)]
    body: RawBody,
}

#[derive(Debug, Default, Deserialize)]
struct RawBody {
    package: Option<RawPackage>,
    #[serde(rename = "downloaded-bytes")]
    downloaded_bytes: Option<u64>,
    #[serde(rename = "total-bytes")]
    total_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawPackage {
    #[serde(rename = "type")]
    node_type: String,
    name: String,
    version: Option<String>,
    #[serde(rename = "version-list", default)]
    version_list: BTreeMap<String, RawVersion>,
    #[serde(rename = "rollback-version")]
    rollback_version: Option<String>,
    #[serde(rename = "rollback-versions", default)]
    rollback_versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawVersion {
    file: Option<PathBuf>,
    #[serde(rename = "sha-256")]
    sha256: Option<String>,
    #[serde(default)]
    downloaded: bool,
}

impl RawPackage {
    fn identity(&self, kind: &str) -> Result<PackageId> {
        let version = self.version.clone().ok_or_else(|| {
            UaError::Serialization(format!("{kind} for {} carries no version", self.name))
        })?;
        Ok(PackageId::new(self.name.clone(), version))
    }

    fn into_request(self, kind: &str) -> Result<UpdateRequest> {
        let package = self.identity(kind)?;
        let mut request = UpdateRequest::new(self.node_type, package);
        for (version, entry) in self.version_list {
            if let Some(file) = entry.file {
                request = request.with_file(PackageFile {
                    version,
                    file,
                    sha256: entry.sha256,
                    downloaded: entry.downloaded,
                });
            }
        }
        request.rollback_version = self.rollback_version;
        request.rollback_versions = self.rollback_versions;
        Ok(request)
    }
}

impl BusEvent {
    /// Decode one raw envelope.
    pub fn parse(raw: &str) -> Result<Self> {
        let envelope: RawEnvelope = serde_json::from_str(raw)?;
        let kind = envelope.kind;
        let handled = [
            QUERY_PACKAGE,
            READY_DOWNLOAD,
            PREPARE_UPDATE,
            READY_UPDATE,
            CONFIRM_UPDATE,
            DOWNLOAD_REPORT,
        ];
        if !handled.contains(&kind.as_str()) {
            return Ok(BusEvent::Unhandled(kind));
        }

        let package = envelope
            .body
            .package
            .ok_or_else(|| UaError::Serialization(format!("{kind} without package")))?;

        let event = match kind.as_str() {
            QUERY_PACKAGE => BusEvent::QueryPackage {
                node_type: package.node_type,
                name: package.name,
                reply_id: envelope.reply_id,
            },
            READY_DOWNLOAD => BusEvent::ReadyDownload {
                package: package.identity(&kind)?,
                node_type: package.node_type,
            },
            PREPARE_UPDATE => BusEvent::PrepareUpdate(package.into_request(&kind)?),
            READY_UPDATE => BusEvent::ReadyUpdate(package.into_request(&kind)?),
            CONFIRM_UPDATE => BusEvent::ConfirmUpdate {
                package: package.identity(&kind)?,
                node_type: package.node_type,
            },
            _ => BusEvent::DownloadReport {
                package: package.identity(&kind)?,
                node_type: package.node_type,
                downloaded_bytes: envelope.body.downloaded_bytes.unwrap_or(0),
                total_bytes: envelope.body.total_bytes.unwrap_or(0),
            },
        };
        Ok(event)
    }

    /// Handler type the event is addressed to.
    pub fn node_type(&self) -> Option<&str> {
        match self {
            BusEvent::QueryPackage { node_type, .. }
            | BusEvent::ReadyDownload { node_type, .. }
            | BusEvent::ConfirmUpdate { node_type, .. }
            | BusEvent::DownloadReport { node_type, .. } => Some(node_type),
            BusEvent::PrepareUpdate(request) | BusEvent::ReadyUpdate(request) => {
                Some(&request.node_type)
            }
            BusEvent::Unhandled(_) => None,
        }
    }
}

/// Message type of a raw envelope, if it has one.
pub fn message_kind(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

/// Development relay: newline-delimited JSON envelopes over TCP.
///
/// A `{"type":"xl4.presence","body":{"connected":bool}}` line is turned into
/// a presence event; every other line is delivered verbatim.
#[derive(Default)]
pub struct JsonLineBus {
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl JsonLineBus {
    pub fn new() -> Self {
        Self::default()
    }
}

fn socket_address(url: &str) -> Result<&str> {
    let address = url.strip_prefix("tcp://").unwrap_or(url);
    if address.is_empty() || !address.contains(':') {
        return Err(UaError::Config(format!(
            "bus url `{url}` is not of the form tcp://host:port"
        )));
    }
    Ok(address)
}

fn presence_of(line: &str) -> Option<bool> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value.get("type")?.as_str()? != PRESENCE {
        return None;
    }
    value.get("body")?.get("connected")?.as_bool()
}

#[async_trait]
impl BusAdapter for JsonLineBus {
    async fn start(&self, node_type: &str, config: &StartConfig) -> Result<mpsc::Receiver<Inbound>> {
        let address = socket_address(&config.url)?;
        let stream = TcpStream::connect(address)
            .await
            .map_err(|err| UaError::Bus(format!("Failed to connect to {address}: {err}")))?;
        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        tracing::info!(node_type, address, "bus connected");

        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!("bus read failed: {err}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let inbound = match presence_of(&line) {
                    Some(connected) => Inbound::Presence(connected),
                    None => Inbound::Message(line),
                };
                if tx.send(inbound).await.is_err() {
                    break;
                }
            }
            tracing::info!("bus connection closed");
        });
        Ok(rx)
    }

    async fn send_message(&self, envelope: &Value) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| UaError::Bus("bus not started".into()))?;
        let mut line = serde_json::to_vec(envelope)?;
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .map_err(|err| UaError::Bus(format!("send failed: {err}")))?;
        Ok(())
    }
}

/// In-process bus. Tests and embedders push inbound traffic through
/// [`MemoryBus::sender`] and inspect everything the agent sent.
pub struct MemoryBus {
    sender: mpsc::Sender<Inbound>,
    receiver: StdMutex<Option<mpsc::Receiver<Inbound>>>,
    sent: StdMutex<Vec<Value>>,
    failing: AtomicBool,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(INBOUND_QUEUE);
        Self {
            sender,
            receiver: StdMutex::new(Some(receiver)),
            sent: StdMutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<Inbound> {
        self.sender.clone()
    }

    /// Make every following `send_message` fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every envelope sent so far.
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Envelopes of message type `kind`.
    pub fn sent_of(&self, kind: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|envelope| envelope.get("type").and_then(Value::as_str) == Some(kind))
            .collect()
    }

    /// `package.status` of every update-status envelope, in order.
    pub fn statuses(&self) -> Vec<String> {
        self.sent_of(UPDATE_STATUS)
            .iter()
            .filter_map(|envelope| {
                envelope
                    .pointer("/body/package/status")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect()
    }
}

#[async_trait]
impl BusAdapter for MemoryBus {
    async fn start(&self, _node_type: &str, _config: &StartConfig) -> Result<mpsc::Receiver<Inbound>> {
        self.receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| UaError::Bus("memory bus already started".into()))
    }

    async fn send_message(&self, envelope: &Value) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(UaError::Bus("memory bus refused the message".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(envelope.clone());
        Ok(())
    }
}
