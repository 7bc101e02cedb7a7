//! Sandbox extractor
//!
//! Unpacks one submission into the `submission/` directory of a fresh workspace. Every
//! archive entry is checked before anything is written, so a single unsafe path rejects
//! the whole archive and nothing lands outside the workspace.
//!
//! Archives shipped inside the archive are unpacked in place under the same checks, and a
//! lone wrapper folder is hoisted so the owner's files sit directly in `submission/`.

use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::core::error::ExtractionError;
use crate::locator::{is_platform_junk, SubmissionSource};
use crate::toolchains::Toolchain;

/// Levels of archives-inside-archives that are unpacked
pub const MAX_NESTING: usize = 3;

/// What the extractor produced
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    /// Files written into the workspace
    pub files: usize,
    /// Source files among them
    pub sources: usize,
    /// SHA-256 of the archive (or of the loose files, concatenated in order)
    pub sha256: String,
}

/// Unpack `source` into `dest`, which must already exist
pub fn extract_submission(
    source: &SubmissionSource,
    dest: &Path,
    toolchain: &Toolchain,
) -> Result<ExtractionReport, ExtractionError> {
    let mut hasher = Sha256::new();

    let files = match source {
        SubmissionSource::Archive(path) => {
            let data = fs::read(path).map_err(|e| {
                ExtractionError::Unreadable(format!("{}: {}", path.display(), e))
            })?;
            hasher.update(&data);
            extract_zip(Cursor::new(data), dest)?;
            expand_nested_archives(dest, toolchain, 1)?;
            flatten_wrapper(dest)?;
            count_files(dest)
        }
        SubmissionSource::LooseFiles(paths) => {
            for path in paths {
                let data = fs::read(path).map_err(|e| {
                    ExtractionError::Unreadable(format!("{}: {}", path.display(), e))
                })?;
                hasher.update(&data);
                let name = path.file_name().ok_or_else(|| {
                    ExtractionError::Unreadable(format!("{} has no file name", path.display()))
                })?;
                fs::write(dest.join(name), &data)?;
            }
            paths.len()
        }
    };

    let sources = count_sources(dest, toolchain);
    if sources == 0 {
        return Err(ExtractionError::NoSources);
    }

    Ok(ExtractionReport {
        files,
        sources,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

/// Extract a ZIP archive into `dest`, returning the number of files written
pub fn extract_zip<R: Read + Seek>(data: R, dest: &Path) -> Result<usize, ExtractionError> {
    let mut archive =
        ZipArchive::new(data).map_err(|e| ExtractionError::Unreadable(e.to_string()))?;

    // Validate every entry up front
    let mut plan: Vec<(usize, PathBuf, bool)> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let file = archive
            .by_index(i)
            .map_err(|e| ExtractionError::Unreadable(e.to_string()))?;
        let relative = safe_relative_path(file.name()).ok_or_else(|| {
            ExtractionError::UnsafeEntry {
                entry: file.name().to_string(),
            }
        })?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        // enclosed_name applies the zip crate's own containment rules as well
        if file.enclosed_name().is_none() {
            return Err(ExtractionError::UnsafeEntry {
                entry: file.name().to_string(),
            });
        }
        let outpath = dest.join(&relative);
        if !outpath.starts_with(dest) {
            return Err(ExtractionError::UnsafeEntry {
                entry: file.name().to_string(),
            });
        }
        plan.push((i, outpath, file.is_dir()));
    }

    let mut written = 0;
    for (i, outpath, is_dir) in plan {
        if is_dir {
            fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractionError::Unreadable(e.to_string()))?;
        let mut outfile = fs::File::create(&outpath)?;
        std::io::copy(&mut file, &mut outfile)
            .map_err(|e| ExtractionError::Unreadable(format!("{}: {}", file.name(), e)))?;
        written += 1;
    }

    debug!("Extracted {} files into {}", written, dest.display());
    Ok(written)
}

/// Unpack every archive found under `dir` next to itself and drop the archive file
fn expand_nested_archives(
    dir: &Path,
    toolchain: &Toolchain,
    depth: usize,
) -> Result<(), ExtractionError> {
    let inner: Vec<PathBuf> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| !is_platform_junk(p) && toolchain.is_archive(p))
        .collect();

    for archive in inner {
        let name = archive
            .strip_prefix(dir)
            .unwrap_or(&archive)
            .display()
            .to_string();
        if depth > MAX_NESTING {
            return Err(ExtractionError::NestedTooDeep { entry: name });
        }

        let target = unpack_target(&archive);
        fs::create_dir_all(&target)?;
        let file = fs::File::open(&archive)?;
        extract_zip(file, &target).map_err(|e| match e {
            ExtractionError::UnsafeEntry { entry } => ExtractionError::UnsafeEntry {
                entry: format!("{}/{}", name, entry),
            },
            ExtractionError::Unreadable(msg) => {
                ExtractionError::Unreadable(format!("{}: {}", name, msg))
            }
            other => other,
        })?;
        fs::remove_file(&archive)?;
        info!("Unpacked nested archive {}", name);

        expand_nested_archives(&target, toolchain, depth + 1)?;
    }
    Ok(())
}

/// `Lab02.zip` unpacks into `Lab02/`, or `Lab02_1/` when that is taken
fn unpack_target(archive: &Path) -> PathBuf {
    let base = archive.with_extension("");
    let mut target = base.clone();
    let mut n = 1;
    while target.exists() {
        let mut name = base.as_os_str().to_owned();
        name.push(format!("_{}", n));
        target = PathBuf::from(name);
        n += 1;
    }
    target
}

/// Hoist the contents of a lone wrapper directory into `dest`.
///
/// Platform junk next to the wrapper does not count; a wrapper beside any other file or
/// directory is left alone.
fn flatten_wrapper(dest: &Path) -> Result<(), ExtractionError> {
    let mut items = Vec::new();
    for entry in fs::read_dir(dest)? {
        let path = entry?.path();
        if !is_platform_junk(&path) {
            items.push(path);
        }
    }
    let [wrapper] = items.as_slice() else {
        return Ok(());
    };
    if !wrapper.is_dir() {
        return Ok(());
    }

    // Move the wrapper aside first so an inner entry with the wrapper's name cannot clash
    let staging = dest.join(".unwrap");
    fs::rename(wrapper, &staging)?;
    for entry in fs::read_dir(&staging)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if target.exists() {
            debug!("Dropping {} while unwrapping", entry.path().display());
            continue;
        }
        fs::rename(entry.path(), target)?;
    }
    fs::remove_dir_all(&staging)?;
    debug!("Flattened wrapper folder {}", wrapper.display());
    Ok(())
}

/// Normalize an entry name lexically. `None` when it is absolute or has any `..` segment,
/// even one that would stay inside the root; an empty path names the root itself.
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    let name = name.replace('\\', "/");
    let mut out = PathBuf::new();
    for component in Path::new(&name).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn count_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count()
}

fn count_sources(dir: &Path, toolchain: &Toolchain) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| !is_platform_junk(e.path()) && toolchain.is_source(e.path()))
        .count()
}
