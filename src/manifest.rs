//! The manifest: one JSON ledger per parent directory recording every
//! feature's identity, location, and lifecycle status.
//!
//! Mutations follow read-whole-document, transform in memory, write to a
//! temp file, atomic rename. An exclusive flock on a sidecar lock file
//! serializes mutating processes so two nearly-simultaneous workers cannot
//! overwrite each other's updates; the kernel releases the flock when its
//! holder dies, so there is no stale lock state to clean up.

use std::fs;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Manifest file name within the parent directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Sidecar file flocked for the duration of each mutation.
const MANIFEST_LOCK_FILE: &str = "manifest.json.lock";

const MANIFEST_VERSION: u32 = 1;

/// Current UTC time as ISO 8601 with second precision, e.g.
/// `2026-08-22T17:03:09Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Lifecycle state of one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureStatus {
    Running,
    Completed,
    Failed,
}

impl FeatureStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Where a feature came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FeatureSource {
    /// Positional feature description on the command line.
    Features,
    /// A GitHub issue.
    Issue,
    /// A line from a `--file` feature list.
    File,
}

impl FeatureSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Features => "features",
            Self::Issue => "issue",
            Self::File => "file",
        }
    }
}

/// One feature's persisted record. Field order matches the on-disk JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub slug: String,
    pub description: String,
    pub branch: String,
    pub worktree: String,
    pub index: usize,
    /// Effective offset for this feature (`index * global offset`).
    pub port_offset: u32,
    pub pid: u32,
    pub status: FeatureStatus,
    pub started: String,
    pub completed: Option<String>,
    pub exit_code: Option<i32>,
    pub issue_number: Option<u64>,
    pub source: FeatureSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub created: String,
    pub features: Vec<ManifestEntry>,
}

impl Manifest {
    fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            created: now_iso(),
            features: Vec::new(),
        }
    }
}

/// Handle on the manifest of one parent directory.
pub struct ManifestStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl ManifestStore {
    pub fn new(parent: &Path) -> Self {
        Self {
            path: parent.join(MANIFEST_FILE),
            lock_path: parent.join(MANIFEST_LOCK_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Create an empty manifest if none exists yet. Idempotent: an existing
    /// manifest (from an earlier run against the same parent directory) is
    /// left untouched.
    pub fn init(&self) -> anyhow::Result<()> {
        let _lock = self.lock_exclusive()?;
        if self.path.exists() {
            return Ok(());
        }
        self.write_atomic(&Manifest::empty())
    }

    /// Read the whole manifest.
    pub fn load(&self) -> anyhow::Result<Manifest> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", self.path.display()))
    }

    /// Record a feature's fresh lifecycle. A leftover entry with the same
    /// slug (from an earlier run) is replaced in place; within one run the
    /// slug uniqueness gate makes a duplicate append impossible.
    pub fn append(&self, entry: ManifestEntry) -> anyhow::Result<()> {
        self.mutate(|manifest| {
            if let Some(existing) = manifest
                .features
                .iter_mut()
                .find(|e| e.slug == entry.slug)
            {
                *existing = entry;
            } else {
                manifest.features.push(entry);
            }
            Ok(())
        })
    }

    /// Merge `{status, completed: now, exit_code}` into the entry for
    /// `slug`, leaving every other field untouched.
    pub fn update_status(
        &self,
        slug: &str,
        status: FeatureStatus,
        exit_code: Option<i32>,
    ) -> anyhow::Result<()> {
        self.mutate(|manifest| {
            let entry = manifest
                .features
                .iter_mut()
                .find(|e| e.slug == slug)
                .with_context(|| format!("no manifest entry for slug '{slug}'"))?;
            entry.status = status;
            entry.completed = Some(now_iso());
            entry.exit_code = exit_code;
            Ok(())
        })
    }

    /// Read-transform-replace under the manifest flock. A transform or
    /// serialization failure leaves the previous manifest intact.
    fn mutate(
        &self,
        transform: impl FnOnce(&mut Manifest) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let _lock = self.lock_exclusive()?;
        let mut manifest = if self.path.exists() {
            self.load()?
        } else {
            Manifest::empty()
        };
        transform(&mut manifest)?;
        self.write_atomic(&manifest)
    }

    /// Serialize to `manifest.json.tmp`, then rename over the manifest.
    /// Callers hold the flock, so the fixed temp name cannot collide.
    fn write_atomic(&self, manifest: &Manifest) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(manifest).context("serializing manifest")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, format!("{json}\n"))
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming {} into place", tmp.display()))?;
        Ok(())
    }

    /// Block until this process holds the manifest flock. The returned file
    /// handle owns the lock; dropping it releases.
    fn lock_exclusive(&self) -> anyhow::Result<fs::File> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .with_context(|| format!("opening {}", self.lock_path.display()))?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("locking {}", self.lock_path.display()));
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(slug: &str, index: usize) -> ManifestEntry {
        ManifestEntry {
            slug: slug.to_string(),
            description: "Add OAuth2 support".to_string(),
            branch: format!("feature/{slug}"),
            worktree: format!("/tmp/features/{slug}"),
            index,
            port_offset: u32::try_from(index).unwrap() * 10,
            pid: std::process::id(),
            status: FeatureStatus::Running,
            started: now_iso(),
            completed: None,
            exit_code: None,
            issue_number: None,
            source: FeatureSource::Features,
        }
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        assert!(!store.exists());

        store.init().unwrap();
        assert!(store.exists());
        let first = store.load().unwrap();
        assert_eq!(first.version, 1);
        assert!(first.features.is_empty());

        store.append(sample_entry("x", 0)).unwrap();
        store.init().unwrap();
        let second = store.load().unwrap();
        assert_eq!(second.created, first.created);
        assert_eq!(second.features.len(), 1);
    }

    #[test]
    fn append_then_update_status_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        store.init().unwrap();
        store.append(sample_entry("add-auth", 1)).unwrap();

        store
            .update_status("add-auth", FeatureStatus::Completed, Some(0))
            .unwrap();

        let manifest = store.load().unwrap();
        assert_eq!(manifest.features.len(), 1);
        let entry = &manifest.features[0];
        assert_eq!(entry.status, FeatureStatus::Completed);
        assert_eq!(entry.exit_code, Some(0));
        assert!(entry.completed.is_some());
        // untouched fields
        assert_eq!(entry.description, "Add OAuth2 support");
        assert_eq!(entry.branch, "feature/add-auth");
        assert_eq!(entry.index, 1);
        assert_eq!(entry.port_offset, 10);
    }

    #[test]
    fn append_replaces_entry_from_earlier_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        store.init().unwrap();
        store.append(sample_entry("add-auth", 0)).unwrap();
        store
            .update_status("add-auth", FeatureStatus::Failed, Some(3))
            .unwrap();

        store.append(sample_entry("add-auth", 2)).unwrap();

        let manifest = store.load().unwrap();
        assert_eq!(manifest.features.len(), 1);
        let entry = &manifest.features[0];
        assert_eq!(entry.status, FeatureStatus::Running);
        assert_eq!(entry.index, 2);
        assert!(entry.completed.is_none());
    }

    #[test]
    fn update_status_unknown_slug_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        store.init().unwrap();
        let err = store
            .update_status("ghost", FeatureStatus::Completed, Some(0))
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn on_disk_field_names_and_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        store.init().unwrap();
        store.append(sample_entry("wire", 0)).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["created"].is_string());

        let entry = &value["features"][0];
        for key in [
            "slug",
            "description",
            "branch",
            "worktree",
            "index",
            "port_offset",
            "pid",
            "status",
            "started",
            "completed",
            "exit_code",
            "issue_number",
            "source",
        ] {
            assert!(
                entry.as_object().unwrap().contains_key(key),
                "missing key {key}"
            );
        }
        assert_eq!(entry["status"], "running");
        assert_eq!(entry["source"], "features");
        assert!(entry["completed"].is_null());
        assert!(entry["exit_code"].is_null());
    }

    #[test]
    fn now_iso_is_rfc3339_utc() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'), "{ts}");
        chrono::DateTime::parse_from_rfc3339(&ts).unwrap();
    }
}
