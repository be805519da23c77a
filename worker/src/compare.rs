use crate::config::TaskPaths;
use crate::errors::{Category, WrapErrors};
use crate::pair_center::JobOutcome;
use crate::transpiler::Job;
use bugswarm_analyzer::{self as analyzer, AnalyzeOptions, AnalyzedLog, Mismatch};
use bugswarm_common::api::MetadataStore;
use bugswarm_common::errors::*;
use bugswarm_common::model::Side;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;

const SHOWN_VALUE_LEN: usize = 30;

pub fn analyze_options(job: &Job<'_>) -> Result<AnalyzeOptions> {
    let record = job.record()?;
    Ok(AnalyzeOptions {
        build_system: job.jp.build_system(),
        trigger_sha: Some(job.bp.build(job.side).trigger_sha().to_string()),
        repo: Some(job.bp.repo.clone()),
        language: Some(record.language()),
        force_java: false,
    })
}

/// Path of the original log of a job, downloading it first if needed.
pub async fn original_log(store: &dyn MetadataStore, paths: &TaskPaths, job_id: u64) -> Result<PathBuf> {
    let path = paths.orig_log(job_id);
    if !path.exists() {
        info!("Downloading original log of job {}", job_id);
        let log = store.get_build_log(job_id).await
            .with_context(|| anyhow!("Failed to download original log of job {}", job_id))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, log).await?;
    }
    Ok(path)
}

pub fn analyze_original(job: &Job<'_>, path: &Path) -> Result<AnalyzedLog> {
    let opts = analyze_options(job)?;
    let mut result = analyzer::analyze(path, job.job_id(), job.ci_service(), &opts)?;
    if job.side == Side::Passed && result.status() == "broken" {
        warn!("Analyzer classified the passed original log of job {} as broken, overriding", job.job_id());
        result.set_status("ok");
    }
    Ok(result)
}

/// Analyze a reproduced log, the container's exit code has the last word on its status.
pub fn analyze_reproduced(job: &Job<'_>, path: &Path, exit_code: Option<i32>) -> Result<AnalyzedLog> {
    let opts = analyze_options(job)?;
    let mut result = analyzer::analyze(path, job.job_id(), job.ci_service(), &opts)?;
    if let Some(code) = exit_code {
        let status = if code == 0 { "ok" } else { "broken" };
        if result.status() != status {
            warn!("Analyzer classified the reproduced log of job {} as {}, overriding with {}", job.job_id(), result.status(), status);
            result.set_status(status);
        }
    }
    Ok(result)
}

fn shorten(value: &Value) -> String {
    let s = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if s.chars().count() > SHOWN_VALUE_LEN {
        s.chars().take(SHOWN_VALUE_LEN).collect()
    } else {
        s
    }
}

pub fn log_mismatches(mismatches: &[Mismatch]) {
    info!("The mismatched attributes are:");
    for m in mismatches {
        info!("  {:<40}(original, reproduced) = ({}, {})", m.attr, shorten(&m.orig), shorten(&m.reproduced));
    }
}

/// Analyze both logs of a job and compare them.
pub fn analyze_and_compare(job: &Job<'_>, orig_log: &Path, reproduced_log: &Path, exit_code: Option<i32>) -> Result<JobOutcome> {
    let original = analyze_original(job, orig_log)
        .wrap_errors(Category::AnalysisError, "analyze_original")?;
    let reproduced = analyze_reproduced(job, reproduced_log, exit_code)
        .wrap_errors(Category::AnalysisError, "analyze_reproduced")?;

    let (matched, mismatches) = analyzer::compare_attributes(&reproduced, &original, false);
    if matched {
        info!("Reproduced log and original log match ({})", job.job_id());
    } else {
        info!("Reproduced log and original log do not match ({})", job.job_id());
        info!("The original log is stored at {:?}", orig_log);
        info!("The reproduced log is stored at {:?}", reproduced_log);
        log_mismatches(&mismatches);
    }

    Ok(JobOutcome {
        matched,
        reproduced,
        original,
        mismatches,
    })
}
