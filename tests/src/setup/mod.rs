use crate::data::analyzed;
use bugswarm_common::model::{self, BuildPairRecord, Side};
use bugswarm_worker::config::TaskPaths;
use bugswarm_worker::pair_center::{JobOutcome, PairCenter};
use bugswarm_worker::transpiler::dockerfile;
use serde_json::json;
use std::fs;

fn outcome(matched: bool) -> JobOutcome {
    let log = analyzed(json!({
        "tr_log_status": "ok",
        "tr_log_num_tests_run": 0,
        "tr_log_num_tests_failed": 0,
    }));
    JobOutcome {
        matched,
        reproduced: log.clone(),
        original: log,
        mismatches: Vec::new(),
    }
}

/// Play one run in which every job either matches its original log or doesn't.
pub fn record_run(center: &PairCenter, run: u32, matched: bool) {
    center.reset_run();
    for bp in &center.buildpairs {
        for jp in &bp.jobpairs {
            for side in Side::BOTH {
                center.record_job(jp.job(side).job_id, Some(outcome(matched)));
            }
        }
    }
    center.update_buildpair_done_status();
    center.assign_pair_match_types();
    center.assign_pair_match_history(run);
}

/// Write the build context reproducer --package-mode leaves behind for every pair.
pub fn prepare_contexts(paths: &TaskPaths, buildpairs: &[BuildPairRecord]) {
    for bp in buildpairs {
        for jp in &bp.jobpairs {
            let tag = model::image_tag(&bp.repo, jp.failed_job.job_id).unwrap();
            let dir = paths.pair_output(&tag);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(dockerfile::DOCKERFILE), "FROM bugswarm/githubactionsjobrunners:ubuntu-22.04\n").unwrap();
        }
    }
}
