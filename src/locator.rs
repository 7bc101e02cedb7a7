//! Archive locator
//!
//! Walks the submissions root and groups what it finds by owner, where the owner is the
//! name of the directory that directly contains the archive. Output is sorted by owner so
//! repeated runs produce diffable reports.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::error::LocatorError;
use crate::toolchains::Toolchain;

/// Directory names never treated as owners or descended into
const IGNORED_DIRS: &[&str] = &["__MACOSX", ".git"];

/// What will be unpacked into the owner's workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionSource {
    /// One archive file
    Archive(PathBuf),
    /// Loose source files sitting directly in the owner directory
    LooseFiles(Vec<PathBuf>),
}

impl SubmissionSource {
    /// Path shown in reports
    pub fn display_path(&self) -> String {
        match self {
            SubmissionSource::Archive(path) => path.display().to_string(),
            SubmissionSource::LooseFiles(files) => files
                .iter()
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// One owner and the submission chosen for them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRef {
    pub owner: String,
    pub source: SubmissionSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatedSubmission {
    Found(ArchiveRef),
    /// Requested through the allow-list but nothing was found
    NotFound { owner: String },
}

impl LocatedSubmission {
    pub fn owner(&self) -> &str {
        match self {
            LocatedSubmission::Found(archive) => &archive.owner,
            LocatedSubmission::NotFound { owner } => owner,
        }
    }
}

#[derive(Debug, Default)]
struct OwnerDir {
    dir: PathBuf,
    archives: Vec<PathBuf>,
    loose_sources: Vec<PathBuf>,
}

/// Scans a submissions root for archives
#[derive(Debug, Clone)]
pub struct ArchiveLocator {
    root: PathBuf,
    excluded: Vec<PathBuf>,
    allow_list: Option<BTreeSet<String>>,
}

impl ArchiveLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excluded: Vec::new(),
            allow_list: None,
        }
    }

    /// Never descend into `dir` (workspace root, results directory)
    pub fn exclude(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.excluded
            .push(dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf()));
        self
    }

    /// Restrict the scan to these owners; missing ones are reported as `NotFound`
    pub fn with_allow_list(mut self, owners: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allow_list = Some(owners.into_iter().map(Into::into).collect());
        self
    }

    /// Scan the root. Calling this again rescans from scratch.
    pub fn locate(&self, toolchain: &Toolchain) -> Result<Vec<LocatedSubmission>, LocatorError> {
        if !self.root.is_dir() {
            return Err(LocatorError::MissingRoot(self.root.clone()));
        }
        let root = self
            .root
            .canonicalize()
            .map_err(|source| LocatorError::Unreadable {
                path: self.root.clone(),
                source,
            })?;
        std::fs::read_dir(&root).map_err(|source| LocatorError::Unreadable {
            path: root.clone(),
            source,
        })?;

        let mut owners: BTreeMap<String, OwnerDir> = BTreeMap::new();

        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded(entry.path(), entry.file_type().is_dir()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable path under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || is_platform_junk(entry.path()) {
                continue;
            }

            let path = entry.path();
            let is_archive = toolchain.is_archive(path);
            // Loose sources only count directly inside an owner directory
            let is_loose = entry.depth() == 2 && toolchain.is_source(path);
            if !is_archive && !is_loose {
                continue;
            }

            let Some(parent) = path.parent() else { continue };
            if parent == root {
                warn!("Ignoring {} at the submissions root: no owner directory", path.display());
                continue;
            }
            let Some(owner) = parent.file_name().and_then(|n| n.to_str()) else {
                warn!("Ignoring {}: owner directory name is not UTF-8", path.display());
                continue;
            };

            let slot = owners.entry(owner.to_string()).or_insert_with(|| OwnerDir {
                dir: parent.to_path_buf(),
                ..Default::default()
            });
            if slot.dir != parent {
                return Err(LocatorError::DuplicateOwner {
                    owner: owner.to_string(),
                    first: slot.dir.clone(),
                    second: parent.to_path_buf(),
                });
            }

            if is_archive {
                slot.archives.push(path.to_path_buf());
            } else {
                slot.loose_sources.push(path.to_path_buf());
            }
        }

        let mut located: BTreeMap<String, LocatedSubmission> = BTreeMap::new();
        for (owner, mut dir) in owners {
            if let Some(allow) = &self.allow_list {
                if !allow.contains(&owner) {
                    continue;
                }
            }

            dir.archives.sort();
            dir.loose_sources.sort();
            let source = if let Some(first) = dir.archives.first() {
                if dir.archives.len() > 1 {
                    warn!(
                        "Owner {} has {} archives; grading {}",
                        owner,
                        dir.archives.len(),
                        first.display()
                    );
                }
                SubmissionSource::Archive(first.clone())
            } else {
                SubmissionSource::LooseFiles(dir.loose_sources)
            };

            debug!("Located submission for {}: {}", owner, source.display_path());
            located.insert(
                owner.clone(),
                LocatedSubmission::Found(ArchiveRef { owner, source }),
            );
        }

        if let Some(allow) = &self.allow_list {
            for owner in allow {
                if !located.contains_key(owner) {
                    warn!("Requested owner {} has no submission", owner);
                    located.insert(
                        owner.clone(),
                        LocatedSubmission::NotFound {
                            owner: owner.clone(),
                        },
                    );
                }
            }
        }

        Ok(located.into_values().collect())
    }

    fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if !is_dir {
            return false;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if IGNORED_DIRS.contains(&name) {
            return true;
        }
        self.excluded.iter().any(|excluded| path == excluded)
    }
}

/// macOS resource forks and Finder metadata
pub fn is_platform_junk(path: &Path) -> bool {
    if path.components().any(|c| c.as_os_str() == "__MACOSX") {
        return true;
    }
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.starts_with("._") || name == ".DS_Store",
        None => false,
    }
}
