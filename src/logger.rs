/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::logger
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    Provide the append-only post-mortem log for update agent
    lifecycle outcomes, mirrored into the tracing pipeline.

  Security / Safety Notes:
    Callers never pass transfer credentials to the logger; the
    log records package names, versions, statuses and paths.

  Dependencies:
    std::fs::File, std::sync::Mutex, sha2 for integrity hashing,
    tracing for the runtime event mirror.

  Operational Scope:
    Shared by the lifecycle, runner and CLI to emit RFC-3339
    UTC stamped entries and produce session hash digests.

  Revision History:
    2026-10-16 COD  Adapted logging module for the update agent.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Append-only logging with UTC timestamps
    - Deterministic formatting for auditability
    - Graceful error propagation on I/O failures
============================================================*/

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::error::{Result, UaError};

/// Structured log level for post-mortem entries.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Shared logger that appends entries to an optional file and mirrors
/// every entry as a `tracing` event.
pub struct Logger {
    file: Option<Mutex<BufWriter<File>>>,
    path: Option<PathBuf>,
}

impl Logger {
    /// Build a logger that optionally appends to `path`.
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        let file = if let Some(ref file_path) = path {
            if let Some(parent) = file_path.parent() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    UaError::Filesystem(format!(
                        "Failed to create log directory {}: {err}",
                        parent.display()
                    ))
                })?;
            }

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(file_path)
                .map_err(|err| {
                    UaError::Filesystem(format!(
                        "Failed to open log file {}: {err}",
                        file_path.display()
                    ))
                })?;
            Some(Mutex::new(BufWriter::new(file)))
        } else {
            None
        };

        Ok(Self { file, path })
    }

    /// Logger without a backing file; entries only reach `tracing`.
    pub fn disabled() -> Self {
        Self {
            file: None,
            path: None,
        }
    }

    /// Emit a log entry with the given level, code, and message.
    pub fn log<S: AsRef<str>>(&self, level: LogLevel, code: &str, message: S) {
        let message = message.as_ref();
        match level {
            LogLevel::Info => tracing::info!(code, "{message}"),
            LogLevel::Warn => tracing::warn!(code, "{message}"),
            LogLevel::Error => tracing::error!(code, "{message}"),
            LogLevel::Debug => tracing::debug!(code, "{message}"),
        }

        let Some(file) = &self.file else {
            return;
        };

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let payload = format!("{timestamp} [{}] [{}] {}", level.as_str(), code, message);

        if let Ok(mut guard) = file.lock() {
            if writeln!(guard, "{payload}").is_err() {
                tracing::error!(code = "LOGGER", "Failed to write to log file");
            }
            if guard.flush().is_err() {
                tracing::warn!(code = "LOGGER", "Failed to flush log writer");
            }
        }
    }

    /// Convenience wrapper for `INFO` level events.
    pub fn info<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Info, code, message);
    }

    /// Convenience wrapper for `WARN` level events.
    pub fn warn<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Warn, code, message);
    }

    /// Convenience wrapper for `ERROR` level events.
    pub fn error<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Error, code, message);
    }

    /// Convenience wrapper for `DEBUG` level events.
    pub fn debug<S: AsRef<str>>(&self, code: &str, message: S) {
        self.log(LogLevel::Debug, code, message);
    }

    /// Return the path backing this logger, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Compute and persist SHA-256 digest of the log file.
    pub fn finalize(&self) -> Result<()> {
        if let Some(path) = self.path() {
            let data = std::fs::read(path).map_err(|err| {
                UaError::Filesystem(format!(
                    "Failed to read log for hashing {}: {err}",
                    path.display()
                ))
            })?;
            let digest = Sha256::digest(&data);
            let mut hash_os = path.as_os_str().to_os_string();
            hash_os.push(".hash");
            let hash_path = PathBuf::from(hash_os);
            let mut file = File::create(&hash_path).map_err(|err| {
                UaError::Filesystem(format!(
                    "Failed to create hash file {}: {err}",
                    hash_path.display()
                ))
            })?;
            writeln!(
                file,
                "{:x}  {}",
                digest,
                path.file_name().unwrap_or_default().to_string_lossy()
            )
            .map_err(|err| {
                UaError::Filesystem(format!(
                    "Failed to write hash file {}: {err}",
                    hash_path.display()
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_entries_and_writes_digest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("agent.log");
        let logger = Logger::new(Some(path.clone())).unwrap();

        logger.info("INSTALL", "app 2.0 INSTALL_COMPLETED");
        logger.error("INSTALL", "app 3.0 INSTALL_FAILED");
        logger.finalize().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[INFO] [INSTALL] app 2.0 INSTALL_COMPLETED"));
        assert!(lines[1].contains("[ERROR] [INSTALL]"));

        let hash = std::fs::read_to_string(dir.path().join("logs").join("agent.log.hash")).unwrap();
        assert!(hash.trim_end().ends_with("agent.log"));
        assert_eq!(hash.split_whitespace().next().unwrap().len(), 64);
    }

    #[test]
    fn disabled_logger_has_no_path() {
        let logger = Logger::disabled();
        logger.warn("NOOP", "nothing is written");
        assert!(logger.path().is_none());
        assert!(logger.finalize().is_ok());
    }
}
