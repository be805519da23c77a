//! Test result extraction for java builds, one sub-analyzer per build system.

use crate::exceptions;
use crate::folds::{strip_ansi, Folds};
use crate::stats::LogStats;

pub mod ant;
pub mod gradle;
pub mod maven;
pub mod other;

/// Run the sub-analyzer for `build_system` (lowercased) and collect the exceptions of failed tests.
pub fn analyze(build_system: &str, folds: &Folds, stats: &mut LogStats) {
    match build_system {
        "maven" => maven::analyze(folds, stats),
        "gradle" => gradle::analyze(folds, stats),
        "ant" => ant::analyze(folds, stats),
        "play" => other::analyze("play", folds, stats),
        _ => other::analyze("NA", folds, stats),
    }

    let lines = folds.job_lines()
        .iter()
        .map(|l| strip_ansi(l).into_owned())
        .collect::<Vec<_>>();
    stats.exceptions = exceptions::java_exceptions(&lines)
        .into_keys()
        .collect();

    stats.did_tests_fail = Some(stats.any_test_failed());
}
