use crate::compare;
use crate::config::TaskPaths;
use crate::pair_center::{self, PairCenter};
use bugswarm_common::api::MetadataStore;
use bugswarm_common::errors::*;
use bugswarm_common::model::{self, MatchHistory, Side};
use bugswarm_common::Classification;
use colored::Colorize;
use std::collections::BTreeSet;

/// Turn the outcomes recorded during run `run` into match types and histories.
pub fn finish_run(center: &PairCenter, run: u32) {
    center.update_buildpair_done_status();
    center.assign_pair_match_types();
    center.assign_pair_match_history(run);
    info!("Done analyzing run {}", run);
    show_match_history(center);
}

/// Analyze the reproduced logs that already exist for a run, without running anything.
///
/// Returns the number of logs analyzed and the number of errors.
pub async fn analyze_run(center: &PairCenter, paths: &TaskPaths, store: Option<&dyn MetadataStore>, run: u32) -> (usize, usize) {
    let mut analyzed = 0;
    let mut errors = 0;
    for item in center.items(false) {
        if center.is_skipped(&item) {
            continue;
        }
        let side = match item.side {
            Some(side) => side,
            None => continue,
        };
        let job = center.job(&item, side);
        let job_id = job.job_id();

        let reproduced = paths.reproduced_log(job_id);
        if !reproduced.exists() {
            debug!("No reproduced log for job {} in run {}", job_id, run);
            continue;
        }

        let orig = match store {
            Some(store) => compare::original_log(store, paths, job_id).await,
            None => Ok(paths.orig_log(job_id)),
        };
        let res = match orig {
            Ok(orig) => compare::analyze_and_compare(&job, &orig, &reproduced, None),
            Err(err) => Err(err),
        };

        match res {
            Ok(outcome) => {
                center.record_job(job_id, Some(outcome));
                analyzed += 1;
            },
            Err(err) => {
                error!("Failed to analyze and compare job {}: {:#}", job_id, err);
                center.record_job(job_id, None);
                errors += 1;
            },
        }
    }
    finish_run(center, run);
    info!("{} reproduced logs analyzed and {} errors in run {}", analyzed, errors, run);
    (analyzed, errors)
}

fn history_line(history: &MatchHistory, runs: &BTreeSet<u32>) -> String {
    runs.iter()
        .map(|run| match history.get(run) {
            Some(m) => m.to_string(),
            None => "N".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn show_match_history(center: &PairCenter) {
    let annotated = center.annotated();
    let runs = annotated.iter()
        .flat_map(|bp| bp.jobpairs.iter())
        .flat_map(|jp| jp.match_history.iter().flat_map(|h| h.keys().copied()))
        .collect::<BTreeSet<_>>();

    info!("Match history per run, N means there is no result for that run");
    for bp in &annotated {
        for jp in &bp.jobpairs {
            info!("{}/{}", pair_center::buildpair_name(bp), pair_center::jobpair_name(jp));
            let empty = MatchHistory::new();
            info!("  {:<12}{}", "Job pair", history_line(jp.match_history.as_ref().unwrap_or(&empty), &runs));
            for side in Side::BOTH {
                let job = jp.job(side);
                let label = format!("{} job", side);
                info!("  {:<12}{}", label, history_line(job.match_history.as_ref().unwrap_or(&empty), &runs));
            }
        }
    }
}

/// Log how many job pairs ended up in which class.
pub fn show_reproducibility(center: &PairCenter) {
    let mut total = 0;
    info!("Reproducibility of {} job pairs:", center.total_jobpairs());
    for (bi, bp) in center.buildpairs.iter().enumerate() {
        for (ji, jp) in bp.jobpairs.iter().enumerate() {
            let history = center.match_history(bi, ji);
            let (_, _, stability) = model::stability(&history);
            let class = model::classify(&history);
            info!("  {:<60} {:>6} {}", format!("{}/{}", pair_center::buildpair_name(bp), pair_center::jobpair_name(jp)),
                stability, class.fancy());
            total += 1;
        }
    }

    let summary = center.summary();
    for class in [Classification::Reproducible, Classification::Flaky, Classification::Unreproducible, Classification::Broken] {
        let n = summary.get(&class.to_string()).copied().unwrap_or(0);
        info!("{:>16}: {}/{}", class.to_string(), n, total);
    }
    if total > 0 {
        let reproducible = summary.get(&Classification::Reproducible.to_string()).copied().unwrap_or(0);
        let line = format!("{}/{} job pairs are reproducible", reproducible, total);
        info!("{}", if reproducible == total { line.green() } else { line.yellow() });
    }
}

/// Write the input annotated with match histories and analysis results.
pub fn write_result_json(center: &PairCenter, paths: &TaskPaths) -> Result<()> {
    let path = paths.result_json();
    info!("Writing output JSON annotated with match history to {:?}", path);
    model::write_buildpairs(&path, &center.annotated())
        .with_context(|| anyhow!("Failed to write {:?}", path))
}
