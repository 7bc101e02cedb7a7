mod aggregator;
mod assembler;
mod compiler;
mod config;
mod core;
mod executer;
mod extractor;
mod judger;
mod locator;
mod report;
mod runner;
mod toolchains;
mod validator;
mod workspace;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::aggregator::{cleanup_workspaces, grade_all};
use crate::assembler::ReferenceImpl;
use crate::config::{Cli, GraderConfig};
use crate::judger::JudgeContext;
use crate::locator::ArchiveLocator;
use crate::report::{render_console, write_reports};
use crate::runner::ProcessRunner;
use crate::validator::ValidationOptions;

/// Exit status when `--fail-on-any` is set and a submission failed
const EXIT_SUBMISSION_FAILED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let directive = if cli.verbose { "grader=debug" } else { "grader=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)),
        )
        .init();

    match run(GraderConfig::from(cli)).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: GraderConfig) -> Result<ExitCode> {
    config.validate()?;
    let toolchain = config.load_toolchain()?;
    let expected_output = config.load_expected_output()?;
    if expected_output.is_none() {
        info!("No expected output configured; a clean exit is a pass");
    }

    let reference = ReferenceImpl::load(
        &config.reference_dir,
        &toolchain,
        config.entry_point.as_deref(),
    )?;

    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("Failed to create {}", config.work_dir.display()))?;
    std::fs::create_dir_all(&config.results_dir)
        .with_context(|| format!("Failed to create {}", config.results_dir.display()))?;

    let mut locator = ArchiveLocator::new(&config.submissions_dir)
        .exclude(&config.work_dir)
        .exclude(&config.results_dir)
        .exclude(&config.reference_dir);
    if let Some(owners) = &config.owners {
        locator = locator.with_allow_list(owners.iter().cloned());
    }
    let submissions = locator.locate(&toolchain)?;
    info!(
        "Found {} submissions under {}",
        submissions.len(),
        config.submissions_dir.display()
    );

    let ctx = Arc::new(JudgeContext {
        toolchain,
        reference,
        expected_output,
        assembly: config.assembly_options(),
        validation: ValidationOptions::default(),
        work_root: config.work_dir.clone(),
        compile_timeout: config.compile_timeout,
        execution_timeout: config.execution_timeout,
        runner: Arc::new(ProcessRunner::new()),
    });

    let summary = grade_all(ctx, submissions, config.workers).await;
    let paths = write_reports(&config.results_dir, &summary)?;

    print!("{}", render_console(&summary));
    println!("JSON report: {}", paths.json.display());
    println!("CSV report:  {}", paths.csv.display());

    if !config.keep_workspaces {
        cleanup_workspaces(&config.work_dir, &summary);
    }

    if config.fail_on_any && summary.failed > 0 {
        return Ok(ExitCode::from(EXIT_SUBMISSION_FAILED));
    }
    Ok(ExitCode::SUCCESS)
}
