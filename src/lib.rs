/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Update agent framework for over-the-air updates: install
    lifecycle, version bookkeeping, transfer stage, status
    reporting and the bus adapter contract.

  Security / Safety Notes:
    Hooks supplied by device-specific agents run inside the
    lifecycle's fault boundary.

  Dependencies:
    See Cargo.toml; tokio runtime required.

  Operational Scope:
    Linked by device-specific agents and by the `ua-core`
    reference agent binary.

  Revision History:
    2026-10-16 COD  Assembled library surface.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Narrow public surface re-exported at the root
============================================================*/

//! A device-side update agent implements [`UpdateAgent`] and hands it to a
//! [`Runner`] together with a [`BusAdapter`] and a [`VersionStore`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use ua_core::{
//!     AgentConfig, InstallStatus, JsonLineBus, Logger, Result, Runner, UpdateAgent,
//!     UpdateRecord, VersionStore,
//! };
//!
//! struct Flasher;
//!
//! #[async_trait]
//! impl UpdateAgent for Flasher {
//!     async fn install(&mut self, _record: &mut UpdateRecord) -> Result<InstallStatus> {
//!         Ok(InstallStatus::Completed)
//!     }
//! }
//!
//! # async fn start() -> Result<()> {
//! let config = AgentConfig::default();
//! let store = VersionStore::new(&config.paths.version_dir, &config.paths.backup_dir);
//! let mut runner = Runner::new(
//!     Flasher,
//!     Arc::new(JsonLineBus::new()),
//!     store,
//!     Arc::new(Logger::disabled()),
//!     &config,
//! );
//! runner.run().await
//! # }
//! ```

pub mod agent;
pub mod bus;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod lifecycle;
pub mod logger;
pub mod package;
pub mod reference;
pub mod runner;
pub mod status;
pub mod transfer;
pub mod version_store;

pub use agent::{PrepareOutcome, TransferOutcome, UpdateAgent};
pub use bus::{BusAdapter, BusEvent, Inbound, JsonLineBus, MemoryBus, StartConfig};
pub use config::AgentConfig;
pub use diagnostics::{DiagLevel, StatusDetails, StatusReporter, UpdateStage};
pub use error::{Result, UaError};
pub use lifecycle::{Lifecycle, LifecycleSettings};
pub use logger::{LogLevel, Logger};
pub use package::{PackageFile, PackageId, UpdateRecord, UpdateRequest};
pub use runner::Runner;
pub use status::{DownloadStatus, InstallStatus, LifecycleState, Status};
pub use transfer::{FileTransfer, HttpTransfer, LocalTransfer, ScpTransfer, Secret};
pub use version_store::{VersionCommit, VersionEntry, VersionRecord, VersionStore};
