//! Grader configuration
//!
//! Built-in defaults, then environment variables (a `.env` file is loaded first), then
//! command-line flags. The result is a plain `GraderConfig` value passed down explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser};
use tracing::info;

use crate::assembler::AssemblyOptions;
use crate::core::error::ConfigError;
use crate::toolchains::{Toolchain, ToolchainTable};

pub const DEFAULT_SUBMISSIONS_DIR: &str = "submissions";
pub const DEFAULT_REFERENCE_DIR: &str = "default_code";
pub const DEFAULT_RESULTS_DIR: &str = "test_results";
pub const DEFAULT_WORK_DIR: &str = "temp_extracts";
pub const DEFAULT_TOOLCHAIN: &str = "java";
pub const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EXECUTION_TIMEOUT_MS: u64 = 10_000;
const MAX_DEFAULT_WORKERS: usize = 8;

#[derive(Debug, Parser)]
#[command(name = "grader", version)]
#[command(about = "Compile, run and check archived submissions against a reference implementation")]
pub struct Cli {
    /// Directory holding one sub-directory per owner
    #[arg(long, env = "GRADER_SUBMISSIONS_DIR", default_value = DEFAULT_SUBMISSIONS_DIR)]
    pub submissions: PathBuf,

    /// Reference implementation directory
    #[arg(long, visible_alias = "default", env = "GRADER_REFERENCE_DIR", default_value = DEFAULT_REFERENCE_DIR)]
    pub reference: PathBuf,

    /// Where the JSON and CSV reports are written
    #[arg(long, env = "GRADER_RESULTS_DIR", default_value = DEFAULT_RESULTS_DIR)]
    pub results: PathBuf,

    /// Parent directory of the per-owner workspaces
    #[arg(long, env = "GRADER_WORK_DIR", default_value = DEFAULT_WORK_DIR)]
    pub work_dir: PathBuf,

    /// Expected program output; validation is skipped without it
    #[arg(long)]
    pub expected: Option<PathBuf>,

    /// Strip namespace declarations from owner files
    #[arg(long, visible_alias = "remove-pack")]
    pub remove_packages: bool,

    /// Drop owner files that declare their own entry method
    #[arg(long)]
    pub evict_entry_points: bool,

    /// Keep owner file names as submitted
    #[arg(long = "no-normalize", action = ArgAction::SetFalse)]
    pub normalize: bool,

    /// Only grade these owners
    #[arg(long, visible_alias = "check-stuid", num_args = 1..)]
    pub owners: Option<Vec<String>>,

    /// Submissions graded concurrently
    #[arg(long, short = 'j', env = "GRADER_WORKERS")]
    pub workers: Option<usize>,

    #[arg(long, env = "GRADER_COMPILE_TIMEOUT_MS", default_value_t = DEFAULT_COMPILE_TIMEOUT_MS)]
    pub compile_timeout_ms: u64,

    #[arg(long, env = "GRADER_EXECUTION_TIMEOUT_MS", default_value_t = DEFAULT_EXECUTION_TIMEOUT_MS)]
    pub execution_timeout_ms: u64,

    /// Remove workspaces once the reports are written
    #[arg(long)]
    pub cleanup: bool,

    #[arg(long, env = "GRADER_TOOLCHAIN", default_value = DEFAULT_TOOLCHAIN)]
    pub toolchain: String,

    /// TOML file with extra or replacement toolchains
    #[arg(long)]
    pub toolchain_file: Option<PathBuf>,

    /// Reference unit to launch, when it cannot be detected
    #[arg(long)]
    pub entry_point: Option<String>,

    /// Exit with status 2 when any submission failed
    #[arg(long)]
    pub fail_on_any: bool,

    /// Debug logging
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct GraderConfig {
    pub submissions_dir: PathBuf,
    pub reference_dir: PathBuf,
    pub results_dir: PathBuf,
    pub work_dir: PathBuf,
    pub expected_output: Option<PathBuf>,
    pub remove_packages: bool,
    pub evict_owner_entry_points: bool,
    pub normalize_filenames: bool,
    pub owners: Option<Vec<String>>,
    pub workers: usize,
    pub compile_timeout: Duration,
    pub execution_timeout: Duration,
    pub keep_workspaces: bool,
    pub toolchain: String,
    pub toolchain_file: Option<PathBuf>,
    pub entry_point: Option<String>,
    pub fail_on_any: bool,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            submissions_dir: PathBuf::from(DEFAULT_SUBMISSIONS_DIR),
            reference_dir: PathBuf::from(DEFAULT_REFERENCE_DIR),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            expected_output: None,
            remove_packages: false,
            evict_owner_entry_points: false,
            normalize_filenames: true,
            owners: None,
            workers: default_workers(),
            compile_timeout: Duration::from_millis(DEFAULT_COMPILE_TIMEOUT_MS),
            execution_timeout: Duration::from_millis(DEFAULT_EXECUTION_TIMEOUT_MS),
            keep_workspaces: true,
            toolchain: DEFAULT_TOOLCHAIN.to_string(),
            toolchain_file: None,
            entry_point: None,
            fail_on_any: false,
        }
    }
}

/// Available parallelism, capped
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_WORKERS)
}

impl From<Cli> for GraderConfig {
    fn from(cli: Cli) -> Self {
        Self {
            submissions_dir: cli.submissions,
            reference_dir: cli.reference,
            results_dir: cli.results,
            work_dir: cli.work_dir,
            expected_output: cli.expected,
            remove_packages: cli.remove_packages,
            evict_owner_entry_points: cli.evict_entry_points,
            normalize_filenames: cli.normalize,
            owners: cli.owners,
            workers: cli.workers.unwrap_or_else(default_workers),
            compile_timeout: Duration::from_millis(cli.compile_timeout_ms),
            execution_timeout: Duration::from_millis(cli.execution_timeout_ms),
            keep_workspaces: !cli.cleanup,
            toolchain: cli.toolchain,
            toolchain_file: cli.toolchain_file,
            entry_point: cli.entry_point,
            fail_on_any: cli.fail_on_any,
        }
    }
}

impl GraderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    /// Resolve the configured toolchain from the embedded table plus any override file
    pub fn load_toolchain(&self) -> anyhow::Result<Toolchain> {
        let table = match &self.toolchain_file {
            Some(path) => ToolchainTable::with_overrides(path)?,
            None => ToolchainTable::embedded()?,
        };
        let toolchain = table
            .get(&self.toolchain)
            .ok_or_else(|| ConfigError::UnknownToolchain {
                name: self.toolchain.clone(),
                available: table.names().join(", "),
            })?;
        info!("Using toolchain {}", toolchain.name);
        Ok(toolchain)
    }

    /// Read the expected transcript. A configured but unreadable file is fatal.
    pub fn load_expected_output(&self) -> Result<Option<String>, ConfigError> {
        let Some(path) = &self.expected_output else {
            return Ok(None);
        };
        read_expected(path).map(Some)
    }

    pub fn assembly_options(&self) -> AssemblyOptions {
        AssemblyOptions {
            remove_packages: self.remove_packages,
            normalize_filenames: self.normalize_filenames,
            evict_owner_entry_points: self.evict_owner_entry_points,
        }
    }
}

fn read_expected(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::ExpectedOutput {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> GraderConfig {
        let mut argv = vec!["grader"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().into()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.work_dir, PathBuf::from("temp_extracts"));
        assert_eq!(config.compile_timeout, Duration::from_secs(30));
        assert_eq!(config.execution_timeout, Duration::from_secs(10));
        assert!(config.normalize_filenames);
        assert!(config.keep_workspaces);
        assert!(config.workers >= 1 && config.workers <= MAX_DEFAULT_WORKERS);
    }

    #[test]
    fn test_flags_and_aliases() {
        let config = parse(&[
            "--default",
            "ref",
            "--remove-pack",
            "--no-normalize",
            "--check-stuid",
            "alice",
            "bob",
            "--cleanup",
            "-j",
            "3",
            "--execution-timeout-ms",
            "500",
        ]);
        assert_eq!(config.reference_dir, PathBuf::from("ref"));
        assert!(config.remove_packages);
        assert!(!config.normalize_filenames);
        assert_eq!(config.owners, Some(vec!["alice".to_string(), "bob".to_string()]));
        assert!(!config.keep_workspaces);
        assert_eq!(config.workers, 3);
        assert_eq!(config.execution_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        assert!(Cli::try_parse_from(["grader", "--workers", "many"]).is_err());
    }

    #[test]
    fn test_zero_workers() {
        let config = GraderConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoWorkers)));
    }

    #[test]
    fn test_unknown_toolchain() {
        let config = GraderConfig {
            toolchain: "cobol".into(),
            ..Default::default()
        };
        let err = config.load_toolchain().unwrap_err();
        assert!(err.to_string().contains("cobol"));
        assert!(config.assembly_options().normalize_filenames);
    }

    #[test]
    fn test_expected_output() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("expected.txt");
        std::fs::write(&path, "Barbie\n").unwrap();

        let config = GraderConfig {
            expected_output: Some(path),
            ..Default::default()
        };
        assert_eq!(config.load_expected_output().unwrap().as_deref(), Some("Barbie\n"));

        let missing = GraderConfig {
            expected_output: Some(tmp.path().join("nope.txt")),
            ..Default::default()
        };
        assert!(matches!(
            missing.load_expected_output(),
            Err(ConfigError::ExpectedOutput { .. })
        ));
        assert_eq!(GraderConfig::default().load_expected_output().unwrap(), None);
    }
}
