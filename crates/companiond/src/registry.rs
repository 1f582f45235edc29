//! UID/app registry: what the daemon is told about installed packages.
//!
//! Full snapshots cover every package of every user; incremental updates
//! cover one package at a time. The `ReplaceFilter` collapses the
//! remove/add/replace burst of an upgrade into a single install report.

use companion_common::{PackageAction, PackageEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Uids are per-user: user_id * PER_USER_RANGE + app_id
pub const PER_USER_RANGE: i32 = 100_000;

/// Parallel sequences of (uid, version, name)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub uids: Vec<i32>,
    pub versions: Vec<i64>,
    pub names: Vec<String>,
}

impl RegistrySnapshot {
    pub fn push(&mut self, uid: i32, version: i64, name: impl Into<String>) {
        self.uids.push(uid);
        self.versions.push(version);
        self.names.push(name.into());
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }
}

/// Source of installed-package information
pub trait PackageSource: Send + Sync {
    /// Every installed package for every user and profile
    fn snapshot(&self) -> RegistrySnapshot;

    /// Version of `package` as installed for `uid`
    fn version_of(&self, package: &str, uid: i32) -> Option<i64>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default)]
    pub users: Vec<ManifestUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestUser {
    pub id: i32,
    #[serde(default)]
    pub packages: Vec<ManifestPackage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPackage {
    pub name: String,
    /// Full uid; takes precedence over `app_id`
    #[serde(default)]
    pub uid: Option<i32>,
    #[serde(default)]
    pub app_id: Option<i32>,
    #[serde(default)]
    pub version: i64,
}

impl ManifestPackage {
    fn uid_for(&self, user_id: i32) -> Option<i32> {
        self.uid
            .or_else(|| self.app_id.map(|app| user_id * PER_USER_RANGE + app))
    }
}

/// Reads installed packages from a JSON manifest on every query
pub struct ManifestPackageSource {
    path: PathBuf,
}

impl ManifestPackageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> PackageManifest {
        match load_manifest(&self.path) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Package manifest {} unreadable: {}", self.path.display(), e);
                PackageManifest::default()
            }
        }
    }
}

fn load_manifest(path: &Path) -> anyhow::Result<PackageManifest> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

impl PackageSource for ManifestPackageSource {
    fn snapshot(&self) -> RegistrySnapshot {
        let mut snapshot = RegistrySnapshot::default();
        for user in self.read().users {
            for pkg in &user.packages {
                match pkg.uid_for(user.id) {
                    Some(uid) => snapshot.push(uid, pkg.version, pkg.name.clone()),
                    None => warn!("Package {} for user {} has no uid", pkg.name, user.id),
                }
            }
        }
        snapshot
    }

    fn version_of(&self, package: &str, uid: i32) -> Option<i64> {
        self.read().users.iter().find_map(|user| {
            user.packages
                .iter()
                .find(|p| p.name == package && p.uid_for(user.id) == Some(uid))
                .map(|p| p.version)
        })
    }
}

/// What a package broadcast turns into, if anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryUpdate {
    Installed { package: String, uid: i32 },
    Removed { package: String, uid: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplacePhase {
    /// Saw the removing half of an upgrade
    Removing,
    /// Already reported the install side
    Reported,
}

/// Upgrades tracked at once; beyond this the oldest entry is dropped
pub const MAX_IN_FLIGHT: usize = 64;

/// Suppresses the transient remove/add pair of a package upgrade
#[derive(Debug, Default)]
pub struct ReplaceFilter {
    in_flight: HashMap<(String, i32), (ReplacePhase, u64)>,
    next_seq: u64,
}

impl ReplaceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&mut self, event: &PackageEvent) -> Option<RegistryUpdate> {
        let key = (event.package.clone(), event.uid);
        let installed = || RegistryUpdate::Installed {
            package: event.package.clone(),
            uid: event.uid,
        };

        match (event.action, event.replacing) {
            (PackageAction::Removed, true) => {
                self.track(key, ReplacePhase::Removing);
                None
            }
            (PackageAction::Removed, false) => {
                self.in_flight.remove(&key);
                Some(RegistryUpdate::Removed {
                    package: event.package.clone(),
                    uid: event.uid,
                })
            }
            (PackageAction::Added, true) => match self.track(key, ReplacePhase::Reported) {
                Some(ReplacePhase::Reported) => None,
                _ => Some(installed()),
            },
            (PackageAction::Added, false) => {
                self.in_flight.remove(&key);
                Some(installed())
            }
            (PackageAction::Replaced, _) => match self.in_flight.remove(&key) {
                Some((ReplacePhase::Reported, _)) => None,
                _ => Some(installed()),
            },
        }
    }

    /// Upgrades seen but not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    /// Record `phase` for `key`, returning the phase it replaced.
    /// An upgrade that never finishes is evicted once the map is full.
    fn track(&mut self, key: (String, i32), phase: ReplacePhase) -> Option<ReplacePhase> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let previous = self.in_flight.insert(key, (phase, seq)).map(|(p, _)| p);

        if self.in_flight.len() > MAX_IN_FLIGHT {
            let oldest = self
                .in_flight
                .iter()
                .min_by_key(|(_, (_, s))| *s)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                debug!("Dropping unfinished upgrade of {} (uid {})", oldest.0, oldest.1);
                self.in_flight.remove(&oldest);
            }
        }
        previous
    }
}
