//! Source assembler
//!
//! Merges an owner's extracted files with the reference implementation inside the
//! workspace. Precedence is an explicit rule over a unit-name map: a unit the reference
//! declares always comes from the reference, whatever the owner shipped and wherever
//! the owner put it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::error::{AssemblyError, ReferenceError};
use crate::locator::is_platform_junk;
use crate::toolchains::Toolchain;
use crate::workspace::Workspace;

/// One file of the reference implementation
#[derive(Debug, Clone)]
pub struct ReferenceFile {
    /// Path relative to the reference directory
    pub rel_path: PathBuf,
    pub unit: String,
}

/// The trusted reference implementation
#[derive(Debug, Clone)]
pub struct ReferenceImpl {
    pub dir: PathBuf,
    pub files: Vec<ReferenceFile>,
    /// Unit name of the designated entry point
    pub entry_point: String,
    entry_file: PathBuf,
}

impl ReferenceImpl {
    /// Load the reference sources and settle which one is the entry point.
    ///
    /// An explicit `entry_point` wins. Otherwise a lone source file is the entry point,
    /// otherwise the only file declaring an entry method.
    pub fn load(
        dir: &Path,
        toolchain: &Toolchain,
        entry_point: Option<&str>,
    ) -> Result<Self, ReferenceError> {
        if !dir.is_dir() {
            return Err(ReferenceError::MissingDir(dir.to_path_buf()));
        }

        let mut files = Vec::new();
        let mut with_entry = Vec::new();
        for path in discover_sources(dir, toolchain) {
            let content = fs::read_to_string(&path)?;
            let rel_path = path
                .strip_prefix(dir)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.clone());
            let unit = unit_name(toolchain, &path, &content);
            if toolchain.declares_entry(&content) {
                with_entry.push(files.len());
            }
            files.push(ReferenceFile { rel_path, unit });
        }

        if files.is_empty() {
            return Err(ReferenceError::NoSources(dir.to_path_buf()));
        }

        let entry_idx = match entry_point {
            Some(name) => files
                .iter()
                .position(|f| f.unit == name || file_stem(&f.rel_path) == name)
                .ok_or_else(|| ReferenceError::EntryPointNotFound(name.to_string()))?,
            None if files.len() == 1 => 0,
            None if with_entry.len() == 1 => with_entry[0],
            None => {
                let candidates = if with_entry.is_empty() {
                    files.iter().map(|f| f.unit.clone()).collect()
                } else {
                    with_entry.iter().map(|&i| files[i].unit.clone()).collect()
                };
                return Err(ReferenceError::AmbiguousEntryPoint(candidates));
            }
        };

        let entry_file = files[entry_idx].rel_path.clone();
        // Launchers address the entry point by file stem (Java requires it to match)
        let entry_point = file_stem(&entry_file);
        info!(
            "Reference implementation: {} files, entry point {}",
            files.len(),
            entry_point
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            entry_point,
            entry_file,
        })
    }

    pub fn units(&self) -> BTreeSet<String> {
        let mut units = BTreeSet::new();
        for file in &self.files {
            units.insert(file.unit.clone());
            units.insert(file_stem(&file.rel_path));
        }
        units
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblyOptions {
    /// Strip namespace declarations from owner files
    pub remove_packages: bool,
    /// Rename owner files to match their declared public unit
    pub normalize_filenames: bool,
    /// Drop owner files that declare an entry method of their own
    pub evict_owner_entry_points: bool,
}

/// Where a Source Set file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    Owner,
    Reference,
}

/// Workspace-relative path → origin, sorted
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    entries: BTreeMap<String, SourceOrigin>,
}

impl SourceSet {
    pub fn insert(&mut self, rel_path: String, origin: SourceOrigin) {
        self.entries.insert(rel_path, origin);
    }

    pub fn paths(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn origin(&self, rel_path: &str) -> Option<SourceOrigin> {
        self.entries.get(rel_path).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What the assembler did to the owner's files
#[derive(Debug, Clone, Default)]
pub struct AssemblyReport {
    pub source_set: SourceSet,
    pub entry_point: String,
    /// Owner files removed in favour of the reference
    pub evicted: Vec<String>,
    /// `(from, to)` renames
    pub renamed: Vec<(String, String)>,
    /// Owner files whose namespace declaration was stripped
    pub stripped: Vec<String>,
}

/// Merge the owner's files in `ws` with the reference implementation
pub fn assemble(
    ws: &Workspace,
    reference: &ReferenceImpl,
    toolchain: &Toolchain,
    options: AssemblyOptions,
) -> Result<AssemblyReport, AssemblyError> {
    let mut report = AssemblyReport {
        entry_point: reference.entry_point.clone(),
        ..Default::default()
    };
    let reference_units = reference.units();
    let rel = |path: &Path| ws.relative(path).unwrap_or_else(|| path.display().to_string());

    for path in discover_sources(&ws.submission_dir(), toolchain) {
        let mut path = path;
        let mut content = fs::read_to_string(&path)?;

        if options.remove_packages {
            let stripped = strip_namespace(&content, &toolchain.namespace_pattern);
            if stripped != content {
                fs::write(&path, &stripped)?;
                content = stripped;
                report.stripped.push(rel(&path));
            }
        }

        let unit = unit_name(toolchain, &path, &content);
        let stem = file_stem(&path);
        if reference_units.contains(&unit) || reference_units.contains(&stem) {
            debug!("{}: owner copy of `{}` replaced by reference", ws.owner(), unit);
            fs::remove_file(&path)?;
            report.evicted.push(rel(&path));
            continue;
        }
        if options.evict_owner_entry_points && toolchain.declares_entry(&content) {
            debug!("{}: owner entry method in `{}` dropped", ws.owner(), unit);
            fs::remove_file(&path)?;
            report.evicted.push(rel(&path));
            continue;
        }

        if options.normalize_filenames {
            if let Some(renamed) = normalize_filename(&path, toolchain, &content)? {
                report.renamed.push((rel(&path), rel(&renamed)));
                path = renamed;
            }
        }

        report.source_set.insert(rel(&path), SourceOrigin::Owner);
    }

    let reference_root = ws.reference_dir();
    for file in &reference.files {
        let dest = reference_root.join(&file.rel_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(reference.dir.join(&file.rel_path), &dest)?;
        report.source_set.insert(rel(&dest), SourceOrigin::Reference);
    }

    if report.source_set.is_empty() {
        return Err(AssemblyError::EmptySourceSet);
    }
    let entry_rel = rel(&reference_root.join(&reference.entry_file));
    if report.source_set.origin(&entry_rel) != Some(SourceOrigin::Reference)
        || !ws.root().join(&entry_rel).is_file()
    {
        return Err(AssemblyError::MissingEntryPoint(reference.entry_point.clone()));
    }

    info!(
        "{}: assembled {} sources ({} evicted, {} renamed, {} stripped)",
        ws.owner(),
        report.source_set.len(),
        report.evicted.len(),
        report.renamed.len(),
        report.stripped.len()
    );
    Ok(report)
}

/// Remove namespace declarations, touching only the declaration itself.
///
/// Works line by line so line numbers in compiler diagnostics stay put. Running it on
/// its own output changes nothing.
pub fn strip_namespace(content: &str, pattern: &Regex) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);
        let mut rest = body;
        // Several declarations on one line all go in a single pass
        while let Some(m) = pattern.find(rest) {
            if m.start() != 0 || m.end() == 0 {
                break;
            }
            rest = &rest[m.end()..];
        }
        if rest.len() == body.len() {
            out.push_str(line);
            continue;
        }
        if !rest.trim().is_empty() {
            out.push_str(rest);
        }
        out.push_str(ending);
    }
    out
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

/// Rename `path` to `<PublicUnit>.<ext>` when the names differ. Skips if the target exists.
fn normalize_filename(
    path: &Path,
    toolchain: &Toolchain,
    content: &str,
) -> Result<Option<PathBuf>, AssemblyError> {
    let Some(unit) = toolchain.declared_public_unit(content) else {
        return Ok(None);
    };
    if file_stem(path) == unit {
        return Ok(None);
    }
    let target = path.with_file_name(format!("{}.{}", unit, toolchain.source_extension));
    if target.exists() {
        warn!(
            "Not renaming {}: {} already exists",
            path.display(),
            target.display()
        );
        return Ok(None);
    }
    fs::rename(path, &target)?;
    Ok(Some(target))
}

/// Source files under `dir`, sorted, platform junk skipped
pub fn discover_sources(dir: &Path, toolchain: &Toolchain) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| !is_platform_junk(p) && toolchain.is_source(p))
        .collect()
}

fn unit_name(toolchain: &Toolchain, path: &Path, content: &str) -> String {
    toolchain
        .declared_unit(content)
        .unwrap_or_else(|| file_stem(path))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
