use crate::folds::{strip_ansi, Folds};
use crate::stats::LogStats;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PLAY_RESULTS: Regex = Regex::new(
        r"(Passed|Failed): Total (\d+), Failed (\d+), Errors (\d+), Passed (\d+)(, Skipped (\d+))?").unwrap();
    static ref RUN_FAILURES: Regex = Regex::new(r"Tests run: (\d+), Failures: (\d+)").unwrap();
    static ref OK_TESTS: Regex = Regex::new(r"OK \((\d+) tests\)").unwrap();
    static ref TEST_FAILED: Regex = Regex::new(r"\] Test (.+) failed:").unwrap();
    static ref FAILED_TESTS: Regex = Regex::new(r"Failed tests:").unwrap();
    static ref INDENTED: Regex = Regex::new(r"\t(.*)").unwrap();
    static ref PLAY_TOTAL_TIME: Regex = Regex::new(r"Total time: (\d+) s, completed .*").unwrap();
    static ref BUILD_TIME: Regex = Regex::new(r"Build time: (\d+):(\d+):(\d+)").unwrap();
}

fn num(caps: &regex::Captures, idx: usize) -> i64 {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn hms_to_seconds(caps: &regex::Captures) -> f64 {
    let part = |idx: usize| caps[idx].parse::<f64>().unwrap_or(0.0);
    part(1) * 3600.0 + part(2) * 60.0 + part(3)
}

/// Java builds driven by something other than maven, gradle or ant (play/sbt and friends).
pub fn analyze(build_system: &str, folds: &Folds, stats: &mut LogStats) {
    stats.analyzer = "java-other".to_string();
    stats.build_system = Some(build_system.to_string());

    let mut failed_lines = Vec::new();
    let mut in_failed_block = false;

    for line in folds.job_lines() {
        let line = strip_ansi(line);
        let line = line.as_ref();

        if let Some(caps) = PLAY_RESULTS.captures(line) {
            stats.tests_run = true;
            stats.add_framework("JUnit");
            stats.add_run(num(&caps, 2));
            stats.add_failed(num(&caps, 3) + num(&caps, 4));
            if caps.get(6).is_some() {
                stats.add_skipped(num(&caps, 7));
            }
            continue;
        } else if let Some(caps) = RUN_FAILURES.captures(line) {
            stats.tests_run = true;
            stats.add_framework("JUnit");
            stats.add_run(num(&caps, 1));
            stats.add_failed(num(&caps, 2));
            continue;
        } else if let Some(caps) = OK_TESTS.captures(line) {
            stats.tests_run = true;
            stats.add_framework("JUnit");
            stats.add_run(num(&caps, 1));
            continue;
        } else if let Some(caps) = TEST_FAILED.captures(line) {
            stats.init_tests();
            stats.tests_run = true;
            stats.add_framework("JUnit");
            stats.push_failed_test(&caps[1]);
        }

        if !in_failed_block && FAILED_TESTS.is_match(line) {
            in_failed_block = true;
            continue;
        }
        if in_failed_block {
            match INDENTED.captures(line) {
                Some(caps) => failed_lines.push(caps[1].to_string()),
                None => in_failed_block = false,
            }
        }

        if let Some(caps) = PLAY_TOTAL_TIME.captures(line) {
            in_failed_block = false;
            stats.test_duration = caps[1].parse::<f64>().ok();
        } else if let Some(caps) = BUILD_TIME.captures(line) {
            in_failed_block = false;
            stats.test_duration = Some(hms_to_seconds(&caps));
        }
    }

    // only the failing classes are known
    if !failed_lines.is_empty() && stats.tests_failed.is_empty() {
        for class in failed_lines {
            stats.push_failed_test(format!("({})", class));
        }
    }
    stats.finish_ok_tests();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folds::OUT_OF_FOLD;

    fn folds(log: &str) -> Folds {
        let mut folds = Folds::new();
        for line in log.lines() {
            folds.push(OUT_OF_FOLD, line.to_string());
        }
        folds
    }

    #[test]
    fn play_summary() {
        let log = "[info] Test run started
[error] Failed: Total 10, Failed 1, Errors 1, Passed 8, Skipped 2
[error] Failed tests:
[error] \tcontrollers.ApplicationTest
[error] (test:test) sbt.TestsFailedException: Tests unsuccessful
[error] Total time: 42 s, completed Jan 1, 2017 10:00:00 AM
";
        let mut stats = LogStats::new(1, "java");
        analyze("play", &folds(log), &mut stats);
        assert_eq!(stats.analyzer, "java-other");
        assert_eq!(stats.build_system.as_deref(), Some("play"));
        assert_eq!(stats.num_tests_run, Some(10));
        assert_eq!(stats.num_tests_failed, Some(2));
        assert_eq!(stats.num_tests_skipped, Some(2));
        assert_eq!(stats.num_tests_ok, Some(8));
        assert_eq!(stats.tests_failed, vec!["(controllers.ApplicationTest)"]);
        assert_eq!(stats.test_duration, Some(42.0));
    }

    #[test]
    fn junit_text_runner() {
        let log = "OK (7 tests)\nBuild time: 0:01:05\n";
        let mut stats = LogStats::new(1, "java");
        analyze("NA", &folds(log), &mut stats);
        assert_eq!(stats.num_tests_run, Some(7));
        assert_eq!(stats.num_tests_ok, Some(7));
        assert_eq!(stats.test_duration, Some(65.0));
        assert_eq!(stats.build_system.as_deref(), Some("NA"));
    }
}
