//! mocha (plain and karma summary) and jest output.

use crate::folds::{strip_ansi, Folds};
use crate::stats::LogStats;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MOCHA_FAILING: Regex = Regex::new(r"(\d+) failing$").unwrap();
    static ref MOCHA_PASSING: Regex = Regex::new(r"(\d+) passing \((\d+)(\w+)\)$").unwrap();
    static ref MOCHA_PENDING: Regex = Regex::new(r"(\d+) pending$").unwrap();
    static ref SUMMARY: Regex = Regex::new(r"^SUMMARY:$").unwrap();
    static ref SUMMARY_COMPLETED: Regex = Regex::new(r"(\d+) tests? completed$").unwrap();
    static ref SUMMARY_SKIPPED: Regex = Regex::new(r"(\d+) tests? skipped$").unwrap();
    static ref SUMMARY_FAILED: Regex = Regex::new(r"(\d+) tests? failed$").unwrap();
    static ref SUMMARY_TIME: Regex = Regex::new(r"Finished in (\d*\.?\d*) secs").unwrap();
    static ref SUMMARY_FAILED_TESTS: Regex = Regex::new(r"^FAILED TESTS:$").unwrap();

    static ref MOCHA_TEST_TITLE: Regex = Regex::new(r"(\s+)(\d+)\) (.*)").unwrap();
    static ref MOCHA_TITLE_CONTINUED: Regex = Regex::new(r"(\s+)(.*)").unwrap();
    static ref MOCHA_SUMMARY_TEST: Regex = Regex::new(r"(\s+)✖\s(.*)").unwrap();

    static ref JEST_TESTS: Regex = Regex::new(r"Tests:\s+(\d+ failed, )?(\d+ skipped, )?(\d+ passed, )?(\d+ total)").unwrap();
    static ref JEST_FAIL: Regex = Regex::new(r"FAIL\s+(.*)").unwrap();
    static ref JEST_PASS: Regex = Regex::new(r"PASS\s+(.*)").unwrap();
    static ref JEST_SUMMARY: Regex = Regex::new(r"Summary of all failing tests").unwrap();
    static ref JEST_TEST_NAME: Regex = Regex::new(r"●\s(.*)").unwrap();
    static ref JEST_TIME: Regex = Regex::new(r"Time:(\s+)(\d*\.?\d*)s(ecs)?$").unwrap();

    static ref DIGITS: Regex = Regex::new(r"\d+").unwrap();
}

fn leading_int(s: &str) -> i64 {
    DIGITS.find(s)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn mocha_seconds(amount: &str, unit: &str) -> f64 {
    let amount = amount.parse::<f64>().unwrap_or(0.0);
    match unit {
        "ms" => amount / 1000.0,
        "m" => amount * 60.0,
        _ => amount,
    }
}

fn setup(stats: &mut LogStats) {
    if !stats.tests_initialized() {
        stats.init_tests();
        stats.tests_run = true;
        stats.did_tests_fail = Some(false);
    }
}

/// Failure titles of mocha span several indented lines and end with a colon.
#[derive(Debug, Default)]
struct MochaTitle {
    started: bool,
    current: String,
}

impl MochaTitle {
    fn feed(&mut self, line: &str, stats: &mut LogStats) {
        if let Some(caps) = MOCHA_TEST_TITLE.captures(line) {
            self.started = true;
            self.current.push_str(&caps[3]);
        } else if let Some(caps) = MOCHA_TITLE_CONTINUED.captures(line).filter(|_| self.started) {
            self.current.push(' ');
            self.current.push_str(&caps[2]);
        } else if let Some(caps) = MOCHA_SUMMARY_TEST.captures(line) {
            stats.push_failed_test(&caps[2]);
        }

        if line.contains(':') && !self.current.is_empty() {
            self.started = false;
            stats.push_failed_test(std::mem::take(&mut self.current));
        }
    }
}

pub fn analyze(folds: &Folds, stats: &mut LogStats) {
    stats.analyzer = "javascript".to_string();

    let mut mocha_failures = false;
    let mut jest_failures = false;
    let mut title = MochaTitle::default();
    let mut has_summary = false;
    let mut summary_time = 0.0;

    for line in folds.out_of_fold() {
        let line = strip_ansi(line);
        let line = line.as_ref();

        if let Some(caps) = MOCHA_FAILING.captures(line) {
            let failed = leading_int(&caps[1]);
            stats.did_tests_fail = Some(true);
            stats.add_failed(failed);
            stats.add_run(failed);
            mocha_failures = true;
            continue;
        } else if let Some(caps) = MOCHA_PASSING.captures(line) {
            setup(stats);
            stats.add_framework("mocha");
            stats.add_run(leading_int(&caps[1]));
            stats.add_test_duration(mocha_seconds(&caps[2], &caps[3]));
        } else if let Some(caps) = MOCHA_PENDING.captures(line) {
            stats.add_skipped(leading_int(&caps[1]));
        }

        if SUMMARY.is_match(line) {
            has_summary = true;
            setup(stats);
            stats.add_test_duration(summary_time);
            summary_time = 0.0;
            stats.add_framework("mocha");
        }

        if let (Some(caps), true) = (SUMMARY_COMPLETED.captures(line), has_summary) {
            stats.add_run(leading_int(&caps[1]));
        } else if let (Some(caps), true) = (SUMMARY_SKIPPED.captures(line), has_summary) {
            stats.add_skipped(leading_int(&caps[1]));
        } else if let (Some(caps), true) = (SUMMARY_FAILED.captures(line), has_summary) {
            let failed = leading_int(&caps[1]);
            stats.did_tests_fail = Some(true);
            stats.add_failed(failed);
            stats.add_run(failed);
        } else if let Some(caps) = SUMMARY_TIME.captures(line) {
            summary_time += caps[1].parse::<f64>().unwrap_or(0.0);
        } else if SUMMARY_FAILED_TESTS.is_match(line) && has_summary {
            mocha_failures = true;
        }

        if mocha_failures && (stats.tests_failed.len() as i64) < stats.num_tests_failed.unwrap_or(0) {
            title.feed(line, stats);
        }

        if let Some(caps) = JEST_TESTS.captures(line) {
            stats.add_framework("jest");
            if leading_int(&caps[4]) == 0 {
                stats.tests_failed.clear();
                continue;
            }
            setup(stats);
            if let Some(failed) = caps.get(1) {
                let failed = leading_int(failed.as_str());
                stats.did_tests_fail = Some(true);
                stats.add_failed(failed);
                stats.add_run(failed);
            }
            if let Some(skipped) = caps.get(2) {
                stats.add_skipped(leading_int(skipped.as_str()));
            }
            if let Some(passed) = caps.get(3) {
                stats.add_run(leading_int(passed.as_str()));
            }
        }

        if let Some(caps) = JEST_TIME.captures(line) {
            if stats.tests_run {
                stats.add_test_duration(caps[2].parse::<f64>().unwrap_or(0.0));
            }
        }

        if JEST_SUMMARY.is_match(line) || JEST_PASS.is_match(line) {
            jest_failures = false;
        }
        if JEST_FAIL.is_match(line) {
            jest_failures = true;
        }
        if jest_failures {
            if let Some(caps) = JEST_TEST_NAME.captures(line) {
                let name = caps[1].to_string();
                if !stats.tests_failed.contains(&name) {
                    stats.push_failed_test(name);
                }
            }
        }
    }

    stats.finish_ok_tests();
    if stats.did_tests_fail.is_some() || stats.tests_run {
        stats.did_tests_fail = Some(stats.did_tests_fail == Some(true) || stats.any_test_failed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folds::OUT_OF_FOLD;

    fn analyze_log(log: &str) -> LogStats {
        let mut folds = Folds::new();
        for line in log.lines() {
            folds.push(OUT_OF_FOLD, line.to_string());
        }
        let mut stats = LogStats::new(1, "node_js");
        analyze(&folds, &mut stats);
        stats
    }

    #[test]
    fn mocha_failures() {
        let stats = analyze_log("  Array
    #indexOf()
      ✓ should return the index

  3 passing (25ms)
  1 pending
  1 failing

  1) Array
       #indexOf()
         should return -1 when missing:
     AssertionError: expected 0 to equal -1
");
        assert_eq!(stats.analyzer, "javascript");
        assert_eq!(stats.frameworks, vec!["mocha"]);
        assert_eq!(stats.num_tests_run, Some(4));
        assert_eq!(stats.num_tests_failed, Some(1));
        assert_eq!(stats.num_tests_skipped, Some(1));
        assert_eq!(stats.num_tests_ok, Some(3));
        assert_eq!(stats.test_duration, Some(0.025));
        assert_eq!(stats.tests_failed, vec!["Array #indexOf() should return -1 when missing:"]);
        assert_eq!(stats.did_tests_fail, Some(true));
    }

    #[test]
    fn jest_summary() {
        let stats = analyze_log("PASS src/sum.test.js
FAIL src/app.test.js
  ● App › renders without crashing

    TypeError: Cannot read property 'x' of undefined

Tests:       1 failed, 2 skipped, 5 passed, 8 total
Time:        2.5s
");
        assert_eq!(stats.frameworks, vec!["jest"]);
        assert_eq!(stats.tests_failed, vec!["App › renders without crashing"]);
        assert_eq!(stats.num_tests_run, Some(6));
        assert_eq!(stats.num_tests_failed, Some(1));
        assert_eq!(stats.num_tests_skipped, Some(2));
        assert_eq!(stats.test_duration, Some(2.5));
        assert_eq!(stats.did_tests_fail, Some(true));
    }

    #[test]
    fn jest_without_tests() {
        let stats = analyze_log("Tests:       0 total\n");
        assert!(!stats.tests_run);
        assert!(stats.tests_failed.is_empty());
        assert_eq!(stats.did_tests_fail, None);
    }
}
