/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::version_store
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Persist the installed version of every package together
    with its version history and backed-up package files.

  Security / Safety Notes:
    Package names are validated before they become paths.
    Record files are replaced by atomic rename while holding an
    exclusive advisory lock, so concurrent agents never observe
    a half-written record.

  Dependencies:
    serde/serde_json for the record format, sha2 and base64 for
    package digests, libc for flock(2).

  Operational Scope:
    Read by version queries and rollback resolution; mutated
    only by the commit and restore steps of the lifecycle.

  Revision History:
    2026-10-16 COD  Authored version store and backup handling.
    2026-10-16 COD  Digests stored base64, as the device manager sends them.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Crash-safe writes (temp file, fsync, rename)
    - Explicit recovery policy for corrupt records
    - Deterministic ordering of version history
============================================================*/

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, UaError};

/// One `version-list` entry of a persisted record. `sha256` is the
/// base64 encoded digest, empty when none was known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub downloaded: bool,
    #[serde(rename = "sha-256")]
    pub sha256: String,
    pub file: PathBuf,
}

/// Persisted version record of one package.
///
/// Once `history` is non-empty, `current_version` is always one of its
/// keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(rename = "version")]
    pub current_version: String,
    #[serde(rename = "version-list", default)]
    pub history: BTreeMap<String, VersionEntry>,
}

impl VersionRecord {
    fn is_consistent(&self) -> bool {
        self.history.is_empty() || self.history.contains_key(&self.current_version)
    }
}

/// Everything the commit step needs to record a successful install.
#[derive(Debug, Clone)]
pub struct VersionCommit {
    pub package: String,
    pub version: String,
    pub sha256_received: Option<String>,
    pub sha256_local: Option<String>,
    pub downloaded: bool,
    pub package_file: PathBuf,
}

/// File-backed store: one JSON record per package under `version_dir`,
/// package backups under `backup_dir/<package>/<version>/`.
#[derive(Debug, Clone)]
pub struct VersionStore {
    version_dir: PathBuf,
    backup_dir: PathBuf,
}

impl VersionStore {
    pub fn new(version_dir: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            version_dir: version_dir.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn version_dir(&self) -> &Path {
        &self.version_dir
    }

    /// Current record for `package`. Missing, unreadable and corrupt
    /// records all read as `None`.
    pub fn get(&self, package: &str) -> Option<VersionRecord> {
        match self.load(package) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(package, "version record unavailable: {err}");
                None
            }
        }
    }

    /// Currently installed version, `None` when nothing is recorded.
    pub fn current_version(&self, package: &str) -> Option<String> {
        self.get(package).map(|record| record.current_version)
    }

    /// Record a successful install: back up the package file, append the
    /// version to the history and make it current.
    ///
    /// A corrupt or unreadable record is replaced by a fresh one, which
    /// drops the previous history.
    pub fn commit(&self, commit: &VersionCommit) -> Result<VersionRecord> {
        let record_path = self.record_path(&commit.package)?;
        self.ensure_version_dir()?;
        let backup_file = self.backup_package(commit)?;

        let _lock = RecordLock::acquire(&self.lock_path(&commit.package))?;
        let mut record = match self.load(&commit.package) {
            Ok(Some(record)) => record,
            Ok(None) => self.fresh_record(&commit.version),
            Err(err) => {
                tracing::warn!(
                    package = commit.package.as_str(),
                    "discarding unreadable version record: {err}"
                );
                self.fresh_record(&commit.version)
            }
        };

        let sha256 = [&commit.sha256_received, &commit.sha256_local]
            .into_iter()
            .flatten()
            .find_map(|text| decode_sha256(text))
            .map(|digest| encode_sha256(&digest))
            .unwrap_or_default();
        record.history.insert(
            commit.version.clone(),
            VersionEntry {
                downloaded: commit.downloaded,
                sha256,
                file: backup_file,
            },
        );
        record.current_version = commit.version.clone();

        self.write_atomic(&record_path, &record)?;
        Ok(record)
    }

    /// Make an already recorded `version` current again.
    pub fn restore(&self, package: &str, version: &str) -> Result<VersionRecord> {
        let record_path = self.record_path(package)?;
        self.ensure_version_dir()?;
        let _lock = RecordLock::acquire(&self.lock_path(package))?;

        let mut record = self.load(package)?.ok_or_else(|| {
            UaError::Persistence(format!("no version record for {package}"))
        })?;
        if !record.history.contains_key(version) {
            return Err(UaError::Persistence(format!(
                "{package} has no recorded version {version} to restore"
            )));
        }
        if record.current_version != version {
            record.current_version = version.to_string();
            self.write_atomic(&record_path, &record)?;
        }
        Ok(record)
    }

    /// Recorded history entry for `version`.
    pub fn entry(&self, package: &str, version: &str) -> Option<VersionEntry> {
        self.get(package)
            .and_then(|record| record.history.get(version).cloned())
    }

    /// Backup location of a package file.
    pub fn backup_path(&self, package: &str, version: &str, file: &Path) -> PathBuf {
        let name = file
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| package.into());
        self.backup_dir.join(package).join(version).join(name)
    }

    fn backup_package(&self, commit: &VersionCommit) -> Result<PathBuf> {
        let backup = self.backup_path(&commit.package, &commit.version, &commit.package_file);
        if backup == commit.package_file {
            return Ok(backup);
        }
        if let Some(parent) = backup.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                UaError::Filesystem(format!(
                    "Failed to create backup directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        std::fs::copy(&commit.package_file, &backup).map_err(|err| {
            UaError::Filesystem(format!(
                "Failed to back up {} to {}: {err}",
                commit.package_file.display(),
                backup.display()
            ))
        })?;
        Ok(backup)
    }

    fn load(&self, package: &str) -> Result<Option<VersionRecord>> {
        let path = self.record_path(package)?;
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(UaError::Persistence(format!(
                    "Failed to read {}: {err}",
                    path.display()
                )))
            }
        };
        let record: VersionRecord = serde_json::from_str(&raw).map_err(|err| {
            UaError::Serialization(format!("Corrupt version record {}: {err}", path.display()))
        })?;
        if !record.is_consistent() {
            return Err(UaError::Serialization(format!(
                "Version record {} names current version {} outside its history",
                path.display(),
                record.current_version
            )));
        }
        Ok(Some(record))
    }

    fn fresh_record(&self, version: &str) -> VersionRecord {
        VersionRecord {
            current_version: version.to_string(),
            history: BTreeMap::new(),
        }
    }

    fn write_atomic(&self, path: &Path, record: &VersionRecord) -> Result<()> {
        let mut tmp_os = path.as_os_str().to_os_string();
        tmp_os.push(".tmp");
        let tmp_path = PathBuf::from(tmp_os);

        let payload = serde_json::to_vec_pretty(record)?;
        let mut file = File::create(&tmp_path).map_err(|err| {
            UaError::Persistence(format!("Failed to create {}: {err}", tmp_path.display()))
        })?;
        file.write_all(&payload)
            .and_then(|_| file.sync_all())
            .map_err(|err| {
                UaError::Persistence(format!("Failed to write {}: {err}", tmp_path.display()))
            })?;
        std::fs::rename(&tmp_path, path).map_err(|err| {
            UaError::Persistence(format!(
                "Failed to replace {} with {}: {err}",
                path.display(),
                tmp_path.display()
            ))
        })
    }

    fn ensure_version_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.version_dir).map_err(|err| {
            UaError::Filesystem(format!(
                "Failed to create version directory {}: {err}",
                self.version_dir.display()
            ))
        })
    }

    fn record_path(&self, package: &str) -> Result<PathBuf> {
        validate_package_name(package)?;
        Ok(self.version_dir.join(package))
    }

    fn lock_path(&self, package: &str) -> PathBuf {
        self.version_dir.join(format!(".{package}.lock"))
    }
}

fn validate_package_name(package: &str) -> Result<()> {
    if package.is_empty()
        || package == "."
        || package == ".."
        || package.contains('/')
        || package.contains('\\')
        || package.contains('\0')
    {
        return Err(UaError::Persistence(format!(
            "package name `{package}` cannot be used as a record file name"
        )));
    }
    Ok(())
}

/// Exclusive flock(2) on a sidecar lock file, released on drop.
struct RecordLock {
    file: File,
}

impl RecordLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|err| {
                UaError::Persistence(format!("Failed to open lock {}: {err}", path.display()))
            })?;
        // SAFETY: the descriptor is owned by `file` and stays open for the
        // lifetime of the lock.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(UaError::Persistence(format!(
                "Failed to lock {}: {}",
                path.display(),
                io::Error::last_os_error()
            )));
        }
        Ok(Self { file })
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        // SAFETY: see `acquire`; closing the file would release it anyway.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

/// Lower-case hex SHA-256 of a file.
/// Raw SHA-256 digest of a file.
pub fn file_digest(path: &Path) -> Result<[u8; 32]> {
    let file = File::open(path).map_err(|err| {
        UaError::Filesystem(format!("Failed to open {} for hashing: {err}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer).map_err(|err| {
            UaError::Filesystem(format!("Failed to hash {}: {err}", path.display()))
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().into())
}

/// SHA-256 of a file in the wire encoding (base64).
pub fn file_sha256(path: &Path) -> Result<String> {
    file_digest(path).map(|digest| encode_sha256(&digest))
}

pub fn encode_sha256(digest: &[u8; 32]) -> String {
    STANDARD.encode(digest)
}

/// Parse a received digest: base64 as sent by the device manager, or
/// 64 hex digits.
pub fn decode_sha256(text: &str) -> Option<[u8; 32]> {
    let text = text.trim();
    if let Ok(bytes) = STANDARD.decode(text) {
        if let Ok(digest) = <[u8; 32]>::try_from(bytes.as_slice()) {
            return Some(digest);
        }
    }
    if text.len() != 64 || !text.is_ascii() {
        return None;
    }
    let mut digest = [0u8; 32];
    for (byte, pair) in digest.iter_mut().zip(text.as_bytes().chunks(2)) {
        let pair = std::str::from_utf8(pair).ok()?;
        *byte = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn store_in(dir: &TempDir) -> VersionStore {
        VersionStore::new(dir.path().join("versions"), dir.path().join("backup"))
    }

    fn package_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join("incoming").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn commit_for(package: &str, version: &str, file: PathBuf) -> VersionCommit {
        VersionCommit {
            package: package.into(),
            version: version.into(),
            sha256_received: Some(file_sha256(&file).unwrap()),
            sha256_local: None,
            downloaded: true,
            package_file: file,
        }
    }

    #[test]
    fn missing_record_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.get("app").is_none());
        assert_eq!(store.current_version("app"), None);
    }

    #[test]
    fn commit_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let file = package_file(&dir, "app-2.0.pkg", "payload-2");
        let digest = file_sha256(&file).unwrap();

        let written = store.commit(&commit_for("app", "2.0", file)).unwrap();
        let reloaded = store_in(&dir).get("app").unwrap();

        assert_eq!(written, reloaded);
        assert_eq!(reloaded.current_version, "2.0");
        let entry = &reloaded.history["2.0"];
        assert_eq!(entry.sha256, digest);
        assert!(entry.downloaded);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("versions/app")).unwrap())
                .unwrap();
        assert_eq!(raw["version"], "2.0");
        assert_eq!(raw["version-list"]["2.0"]["sha-256"], digest.as_str());
    }

    #[test]
    fn backup_survives_removal_of_original() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let file = package_file(&dir, "app-1.0.pkg", "payload-1");

        let record = store.commit(&commit_for("app", "1.0", file.clone())).unwrap();
        std::fs::remove_file(&file).unwrap();

        let backup = &record.history["1.0"].file;
        assert_eq!(backup, &dir.path().join("backup/app/1.0/app-1.0.pkg"));
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "payload-1");
    }

    #[test]
    fn history_accumulates_and_local_checksum_fills_in() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store
            .commit(&commit_for("app", "1.0", package_file(&dir, "a1", "one")))
            .unwrap();
        let mut second = commit_for("app", "2.0", package_file(&dir, "a2", "two"));
        let local = second.sha256_received.take().unwrap();
        second.sha256_local = Some(local.clone());
        let record = store.commit(&second).unwrap();

        assert_eq!(record.current_version, "2.0");
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.history["2.0"].sha256, local);
    }

    #[test]
    fn corrupt_record_is_replaced_by_fresh_history() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store
            .commit(&commit_for("app", "1.0", package_file(&dir, "a1", "one")))
            .unwrap();
        std::fs::write(dir.path().join("versions/app"), "{ not json").unwrap();

        let record = store
            .commit(&commit_for("app", "3.0", package_file(&dir, "a3", "three")))
            .unwrap();

        assert_eq!(record.current_version, "3.0");
        assert_eq!(record.history.keys().collect::<Vec<_>>(), vec!["3.0"]);
        assert_eq!(store.get("app").unwrap(), record);
    }

    #[test]
    fn inconsistent_record_counts_as_corrupt() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(dir.path().join("versions")).unwrap();
        std::fs::write(
            dir.path().join("versions/app"),
            r#"{"version":"9.9","version-list":{"1.0":{"downloaded":true,"sha-256":"x","file":"/f"}}}"#,
        )
        .unwrap();
        assert!(store.get("app").is_none());
    }

    #[test]
    fn restore_switches_current_version() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store
            .commit(&commit_for("app", "1.0", package_file(&dir, "a1", "one")))
            .unwrap();
        store
            .commit(&commit_for("app", "1.5", package_file(&dir, "a15", "one-five")))
            .unwrap();

        let record = store.restore("app", "1.0").unwrap();
        assert_eq!(record.current_version, "1.0");
        assert_eq!(store.current_version("app").as_deref(), Some("1.0"));
        assert_eq!(record.history.len(), 2);
    }

    #[test]
    fn restore_of_unknown_version_leaves_record_intact() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store
            .commit(&commit_for("app", "1.0", package_file(&dir, "a1", "one")))
            .unwrap();

        assert!(matches!(
            store.restore("app", "0.5"),
            Err(UaError::Persistence(_))
        ));
        assert_eq!(store.current_version("app").as_deref(), Some("1.0"));
        assert!(store.restore("other", "1.0").is_err());
    }

    #[test]
    fn path_like_package_names_are_rejected() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let file = package_file(&dir, "evil", "x");
        assert!(store.commit(&commit_for("../evil", "1.0", file)).is_err());
        assert!(store.get("a/b").is_none());
    }

    #[test]
    fn concurrent_commits_keep_every_version() {
        let dir = tempdir().unwrap();
        let store = Arc::new(store_in(&dir));
        let files: Vec<PathBuf> = (0..8)
            .map(|i| package_file(&dir, &format!("app-{i}.pkg"), &format!("payload-{i}")))
            .collect();

        let handles: Vec<_> = files
            .into_iter()
            .enumerate()
            .map(|(i, file)| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .commit(&commit_for("app", &format!("{i}.0"), file))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let record = store.get("app").unwrap();
        assert_eq!(record.history.len(), 8);
        assert!(record.history.contains_key(&record.current_version));
    }

    #[test]
    fn sha256_of_known_content() {
        let dir = tempdir().unwrap();
        let file = package_file(&dir, "abc", "abc");
        let digest = file_digest(&file).unwrap();
        assert_eq!(
            decode_sha256("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"),
            Some(digest)
        );
        let encoded = file_sha256(&file).unwrap();
        assert_eq!(encoded.len(), 44);
        assert_eq!(decode_sha256(&encoded), Some(digest));
    }

    #[test]
    fn digests_are_recorded_in_base64() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let file = package_file(&dir, "app-1.0.pkg", "payload-1");
        let encoded = file_sha256(&file).unwrap();
        let hex: String = file_digest(&file)
            .unwrap()
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect();

        let mut commit = commit_for("app", "1.0", file);
        commit.sha256_received = Some(hex);
        let record = store.commit(&commit).unwrap();
        assert_eq!(record.history["1.0"].sha256, encoded);
    }

    #[test]
    fn malformed_received_digest_falls_back_to_local() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let file = package_file(&dir, "app-1.0.pkg", "payload-1");
        let local = file_sha256(&file).unwrap();

        let mut commit = commit_for("app", "1.0", file);
        commit.sha256_received = Some("not a digest".into());
        commit.sha256_local = Some(local.clone());
        let record = store.commit(&commit).unwrap();
        assert_eq!(record.history["1.0"].sha256, local);
        assert_eq!(decode_sha256("c2hvcnQ="), None);
    }
}
