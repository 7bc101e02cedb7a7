//! Toolchain configuration for compilation and execution

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;

const EMBEDDED_TOOLCHAINS: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/toolchains.toml"));

/// External compiler and runtime for one source language
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub name: String,
    /// Extension of compilable source files, without the dot (e.g. "java")
    pub source_extension: String,
    /// Archive extensions recognised by the locator, lowercase
    pub archive_extensions: Vec<String>,
    /// Compiler output directory, relative to the workspace
    pub output_dir: String,
    /// Compile command template
    pub compile_command: Vec<String>,
    /// Run command template
    pub run_command: Vec<String>,
    /// Matches type declarations: group 1 = modifiers, group 2 = unit name
    pub unit_pattern: Regex,
    /// Matches a namespace declaration at the start of a line
    pub namespace_pattern: Regex,
    /// Detects a program entry method
    pub entry_pattern: Regex,
}

impl Toolchain {
    /// Whether `path` is a source file for this toolchain (case-insensitive extension)
    pub fn is_source(&self, path: &Path) -> bool {
        has_extension(path, std::slice::from_ref(&self.source_extension))
    }

    pub fn is_archive(&self, path: &Path) -> bool {
        has_extension(path, &self.archive_extensions)
    }

    /// Expand the compile template over the given workspace-relative sources
    pub fn compile_argv(&self, sources: &[String], entry: &str) -> Vec<String> {
        expand_template(&self.compile_command, &self.output_dir, sources, entry)
    }

    /// Expand the run template. `{out}` becomes `out_dir` as given, since the program
    /// runs from the owner's directory rather than the workspace root.
    pub fn run_argv(&self, entry: &str, out_dir: &Path) -> Vec<String> {
        let out = out_dir.to_string_lossy();
        expand_template(&self.run_command, &out, &[], entry)
    }

    /// Name of the compilable unit a file declares.
    ///
    /// The first public type wins, then the first type of any visibility. `None` when the
    /// file declares no type at all (callers fall back to the file stem).
    pub fn declared_unit(&self, content: &str) -> Option<String> {
        let mut first_any = None;
        for caps in self.unit_pattern.captures_iter(content) {
            let Some(name) = caps.get(2) else { continue };
            let modifiers = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            if modifiers.split_whitespace().any(|m| m == "public") {
                return Some(name.as_str().to_string());
            }
            if first_any.is_none() {
                first_any = Some(name.as_str().to_string());
            }
        }
        first_any
    }

    /// Name of the first public type, used when normalising file names
    pub fn declared_public_unit(&self, content: &str) -> Option<String> {
        self.unit_pattern.captures_iter(content).find_map(|caps| {
            let modifiers = caps.get(1)?.as_str();
            if modifiers.split_whitespace().any(|m| m == "public") {
                caps.get(2).map(|m| m.as_str().to_string())
            } else {
                None
            }
        })
    }

    pub fn declares_entry(&self, content: &str) -> bool {
        self.entry_pattern.is_match(content)
    }
}

/// Raw TOML configuration for a toolchain
#[derive(Debug, Deserialize)]
struct RawToolchain {
    source_extension: String,
    #[serde(default = "default_archive_extensions")]
    archive_extensions: Vec<String>,
    #[serde(default = "default_output_dir")]
    output_dir: String,
    compile_command: String,
    run_command: String,
    unit_pattern: String,
    namespace_pattern: String,
    entry_pattern: String,
    #[serde(default)]
    aliases: Vec<String>,
}

fn default_archive_extensions() -> Vec<String> {
    vec!["zip".to_string()]
}

fn default_output_dir() -> String {
    "classes".to_string()
}

/// Toolchains by lowercase name and alias
#[derive(Debug, Clone, Default)]
pub struct ToolchainTable {
    toolchains: HashMap<String, Toolchain>,
}

impl ToolchainTable {
    /// Table compiled into the binary from `files/toolchains.toml`
    pub fn embedded() -> anyhow::Result<Self> {
        Self::from_toml_str(EMBEDDED_TOOLCHAINS).context("Invalid embedded toolchain table")
    }

    /// Embedded table with entries from `path` layered on top
    pub fn with_overrides(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read toolchain file {}", path.display()))?;
        let overrides = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid toolchain file {}", path.display()))?;

        let mut table = Self::embedded()?;
        table.toolchains.extend(overrides.toolchains);
        Ok(table)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawToolchain> = toml::from_str(content)?;
        let mut toolchains = HashMap::new();
        // lowercase key -> toolchain that owns it
        let mut claimed: HashMap<String, String> = HashMap::new();

        for (name, raw) in raw_configs {
            let compile_command = into_command(&raw.compile_command);
            let run_command = into_command(&raw.run_command);
            if compile_command.is_empty() || run_command.is_empty() {
                anyhow::bail!("Toolchain {} has an empty compile or run command", name);
            }

            let compile = |pattern: &str, kind: &str| {
                Regex::new(pattern)
                    .with_context(|| format!("Invalid {} pattern for {}: {}", kind, name, pattern))
            };

            let toolchain = Toolchain {
                name: name.to_lowercase(),
                source_extension: raw.source_extension.trim_start_matches('.').to_lowercase(),
                archive_extensions: raw
                    .archive_extensions
                    .iter()
                    .map(|ext| ext.trim_start_matches('.').to_lowercase())
                    .collect(),
                output_dir: raw.output_dir,
                compile_command,
                run_command,
                unit_pattern: compile(&raw.unit_pattern, "unit")?,
                namespace_pattern: compile(&raw.namespace_pattern, "namespace")?,
                entry_pattern: compile(&raw.entry_pattern, "entry")?,
            };

            let keys = std::iter::once(name.to_lowercase())
                .chain(raw.aliases.iter().map(|alias| alias.to_lowercase()));
            for key in keys {
                match claimed.insert(key.clone(), name.clone()) {
                    Some(other) if other != name => anyhow::bail!(
                        "Toolchain name or alias `{}` is claimed by both {} and {}",
                        key,
                        other,
                        name
                    ),
                    _ => {}
                }
                toolchains.insert(key, toolchain.clone());
            }
        }

        Ok(Self { toolchains })
    }

    pub fn get(&self, name: &str) -> Option<Toolchain> {
        self.toolchains.get(&name.to_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.toolchains.keys().cloned().collect();
        names.sort();
        names
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

fn expand_template(template: &[String], out: &str, sources: &[String], entry: &str) -> Vec<String> {
    let mut argv = Vec::with_capacity(template.len() + sources.len());
    for token in template {
        if token == "{sources}" {
            argv.extend(sources.iter().cloned());
        } else {
            argv.push(token.replace("{out}", out).replace("{entry}", entry));
        }
    }
    argv
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            extensions.iter().any(|candidate| *candidate == ext)
        })
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) fn java() -> Toolchain {
    ToolchainTable::embedded()
        .unwrap()
        .get("java")
        .expect("embedded java toolchain")
}
