//! Per-owner workspace directories
//!
//! Layout under `<work_root>/<owner>/`:
//! - `submission/` owner files as extracted; the program runs from here
//! - `reference/`  reference implementation copy
//! - `<output_dir>/` compiler output (toolchain-defined, e.g. `classes/`)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

pub const SUBMISSION_DIR: &str = "submission";
pub const REFERENCE_DIR: &str = "reference";

/// Whether `owner` can name a directory directly under the work root
pub fn is_valid_owner(owner: &str) -> bool {
    !(owner.is_empty()
        || owner == "."
        || owner == ".."
        || owner.contains(['/', '\\', '\0']))
}

/// Isolated build directory for one owner in one run
#[derive(Debug, Clone)]
pub struct Workspace {
    owner: String,
    root: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace, removing anything left over from a previous run
    pub fn create(work_root: &Path, owner: &str, output_dir: &str) -> io::Result<Self> {
        if !is_valid_owner(owner) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("owner `{}` is not a valid directory name", owner),
            ));
        }

        fs::create_dir_all(work_root)?;
        let work_root = work_root.canonicalize()?;
        let root = work_root.join(owner);
        if root.exists() {
            debug!("Removing stale workspace {}", root.display());
            fs::remove_dir_all(&root)?;
        }

        fs::create_dir_all(root.join(SUBMISSION_DIR))?;
        fs::create_dir_all(root.join(REFERENCE_DIR))?;
        fs::create_dir_all(root.join(output_dir))?;

        Ok(Self {
            owner: owner.to_string(),
            root,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Working directory for compile
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Owner files, and the working directory for execute
    pub fn submission_dir(&self) -> PathBuf {
        self.root.join(SUBMISSION_DIR)
    }

    /// Absolute compiler output directory
    pub fn output_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn reference_dir(&self) -> PathBuf {
        self.root.join(REFERENCE_DIR)
    }

    /// Path relative to the workspace root, with `/` separators
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}
