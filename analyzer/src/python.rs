//! unittest (and nose, which prints the same) and pytest output.

use crate::folds::{strip_ansi, Folds};
use crate::stats::LogStats;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref UNITTEST_RAN_ANY: Regex = Regex::new(r"Ran .* tests? in ").unwrap();
    static ref PYTEST_SECONDS_ANY: Regex = Regex::new(r"==+ (.+) in (.+) seconds ==+").unwrap();

    static ref SESSION_STARTS: Regex = Regex::new(r"test session starts").unwrap();
    static ref FAILURES_SECTION: Regex = Regex::new(r"==+ (FAILURES|ERRORS) ==+").unwrap();
    static ref XFAILURES_SECTION: Regex = Regex::new(r"==+ XFAILURES ==+").unwrap();
    static ref UNITTEST_RAN: Regex = Regex::new(r"Ran (\d+) tests? in (.+s)").unwrap();
    static ref PYTEST_SUMMARY: Regex = Regex::new(r"=+ (.+) in ([0-9\.]+)(?:s[ )(0-9:]*| seconds) =+").unwrap();
    static ref PYTEST_QUIET_SUMMARY: Regex = Regex::new(
        r"^((?:\d+ [a-z]+)(?:, \d+ [a-z]+)*) in ([0-9\.]+)(?:s( \([0-9:]+\))?| seconds)$").unwrap();
    static ref UNITTEST_OK: Regex = Regex::new(r"^OK( \((.+)\))?\s*$").unwrap();
    static ref UNITTEST_FAILED: Regex = Regex::new(r"^FAILED( \((.+)\))?\s*$").unwrap();

    static ref IMPORT_FAILURE: Regex = Regex::new(r"^(ERROR): (Failure:) ([^( ]+)").unwrap();
    static ref UNITTEST_TEST: Regex = Regex::new(r"^((FAIL)|(ERROR)): (\S+(\(.+\))? \(\S+\))").unwrap();
    static ref UNITTEST_DOCTEST: Regex = Regex::new(r"^(FAIL|ERROR):( Doctest:)? ([\w\.]+(\(.+\))?)$").unwrap();

    static ref SHORT_SUMMARY: Regex = Regex::new(r"=====+ short test summary info =====+").unwrap();
    static ref SHORT_SUMMARY_TEST: Regex = Regex::new(r"^(FAILED|ERROR) ([\w/.]+)\.py::([\w:]+)(\[.+\])?").unwrap();
    static ref SHORT_SUMMARY_FILE: Regex = Regex::new(r"^(FAILED|ERROR) ([\w/.]+)\.py").unwrap();

    static ref VERBOSE_FAILED: Regex = Regex::new(r"^([\w/]+)\.py((::\w+)+)(\[.+\])? FAILED(\s+\[\s*\d+%\])?$").unwrap();
    static ref VERBOSE_DOCTEST_FAILED: Regex = Regex::new(r"^([\w/]+)\.py::([\w\.]+)(\[.+\])? FAILED(\s+\[\s*\d+%\])?$").unwrap();
    static ref PROGRESS_FILE: Regex = Regex::new(r"^([\w/]+)\.py ([FEXxs.]+)").unwrap();
    static ref PROGRESS_PERCENT_FAILED: Regex = Regex::new(r"\[ \d+%\] (FAILED|ERROR) ([\w/.]+)\.py::([\w:]+)(\[.+\])?").unwrap();
    static ref PROGRESS_CONTINUED: Regex = Regex::new(r"^([FEXxs.]*F[FEXxs.]*)").unwrap();
    static ref FAILURE_HEADER: Regex = Regex::new(r"^_* ([\w\.]+(\[.+\])?) _*$").unwrap();
    static ref DOCTEST_HEADER: Regex = Regex::new(r"^_* \[doctest\] ([\w\.]+(\[.+\])?) _*$").unwrap();
    static ref COLLECT_ERROR: Regex = Regex::new(r"^_+ ERROR (\w+ )?([\w/.-]+?)(\.py)? _+$").unwrap();
}

/// Counters only python runners have.
#[derive(Debug, Default)]
struct PythonStats {
    has_summary: bool,
    force_failed: bool,
    xfailed: i64,
    xpassed: i64,
}

impl PythonStats {
    fn setup(&mut self, stats: &mut LogStats) {
        if !stats.tests_initialized() {
            stats.init_tests();
            stats.tests_run = true;
            self.force_failed = false;
            self.xfailed = 0;
            self.xpassed = 0;
        }
    }

    /// `2 failed, 10 passed, 1 skipped`
    fn pytest_counts(&mut self, s: &str, stats: &mut LogStats) {
        for item in s.split(", ") {
            let mut parts = item.split(' ');
            let (val, key) = match (parts.next(), parts.next(), parts.next()) {
                (Some(val), Some(key), None) => (val, key.to_lowercase()),
                // pytest prints `no tests ran` in place of counts
                _ => return,
            };
            let val = match val.parse::<i64>() {
                Ok(val) => val,
                Err(_) => return,
            };

            match key.as_str() {
                "passed" => stats.add_run(val),
                "failed" => {
                    stats.add_failed(val);
                    stats.add_run(val);
                },
                k if k.starts_with("error") => {
                    stats.add_failed(val);
                    stats.add_run(val);
                },
                "xfailed" => {
                    self.xfailed += val;
                    stats.add_run(val);
                },
                "xpassed" => {
                    self.xpassed += val;
                    stats.add_run(val);
                },
                "skipped" => stats.add_skipped(val),
                _ => (),
            }
        }
    }

    /// `failures=1, errors=2, skipped=3`
    fn unittest_counts(s: &str, stats: &mut LogStats) {
        for item in s.split(", ") {
            let (key, val) = match item.split_once('=') {
                Some((key, val)) => (key.to_lowercase(), val.parse::<i64>().unwrap_or(0)),
                None => continue,
            };
            match key.as_str() {
                "skip" | "skipped" => stats.add_skipped(val),
                "errors" | "failures" | "error" | "failure" => stats.add_failed(val),
                _ => (),
            }
        }
    }
}

fn dotted(path: &str) -> String {
    path.replace('/', ".")
}

fn analyze_tests(lines: &[String], py: &mut PythonStats, stats: &mut LogStats) {
    let mut short_summary_seen = false;
    // verbose failure sections are only trusted after `=== FAILURES ===`
    let mut ignore_failure_headers = true;
    let mut test_files: Vec<String> = Vec::new();
    let mut summary_tests_failed: Vec<String> = Vec::new();
    let mut last_test_file = String::new();

    for line in lines {
        if SESSION_STARTS.is_match(line) {
            py.setup(stats);
            stats.add_framework("pytest");
            continue;
        }
        if FAILURES_SECTION.is_match(line) && stats.tests_failed.is_empty() {
            ignore_failure_headers = false;
            continue;
        }
        if XFAILURES_SECTION.is_match(line) {
            ignore_failure_headers = true;
            continue;
        }

        if let Some(caps) = UNITTEST_RAN.captures(line) {
            py.setup(stats);
            stats.add_framework("unittest");
            stats.add_run(caps[1].parse().unwrap_or(0));
            let duration = caps[2].trim_end_matches('s');
            stats.add_test_duration(duration.parse().unwrap_or(0.0));
            py.has_summary = true;
            continue;
        }

        if let Some(caps) = PYTEST_SUMMARY.captures(line).or_else(|| PYTEST_QUIET_SUMMARY.captures(line)) {
            py.setup(stats);
            stats.add_framework("pytest");
            py.pytest_counts(&caps[1], stats);
            stats.add_test_duration(caps[2].parse().unwrap_or(0.0));
            py.has_summary = true;
            short_summary_seen = false;
            // the short summary is more accurate when it lists at least as many tests
            if stats.tests_failed.len() <= summary_tests_failed.len() {
                stats.tests_failed = summary_tests_failed.clone();
            }
            continue;
        }

        if py.has_summary {
            if let Some(caps) = UNITTEST_OK.captures(line) {
                py.setup(stats);
                if let Some(info) = caps.get(2) {
                    PythonStats::unittest_counts(info.as_str(), stats);
                }
                continue;
            }
            if let Some(caps) = UNITTEST_FAILED.captures(line) {
                py.setup(stats);
                py.force_failed = true;
                if let Some(info) = caps.get(2) {
                    PythonStats::unittest_counts(info.as_str(), stats);
                }
                continue;
            }
        }

        if let Some(caps) = IMPORT_FAILURE.captures(line) {
            py.setup(stats);
            stats.push_failed_test(&caps[3]);
            continue;
        }
        if let Some(caps) = UNITTEST_TEST.captures(line) {
            py.setup(stats);
            stats.push_failed_test(&caps[4]);
            continue;
        }
        if let Some(caps) = UNITTEST_DOCTEST.captures(line) {
            py.setup(stats);
            stats.push_failed_test(&caps[3]);
            continue;
        }

        if SHORT_SUMMARY.is_match(line) {
            short_summary_seen = true;
            summary_tests_failed.clear();
            continue;
        }

        if short_summary_seen {
            if let Some(caps) = SHORT_SUMMARY_TEST.captures(line) {
                let mut test = format!("{}::{}", dotted(&caps[2]), caps[3].replace('.', "::"));
                if let Some(params) = caps.get(4) {
                    test.push_str(params.as_str());
                }
                summary_tests_failed.push(test);
                continue;
            }
            if let Some(caps) = SHORT_SUMMARY_FILE.captures(line) {
                summary_tests_failed.push(format!("({})", dotted(&caps[2])));
            }
        }

        if let Some(caps) = VERBOSE_FAILED.captures(line) {
            py.setup(stats);
            let mut test = format!("{}{}", dotted(&caps[1]), &caps[2]);
            if let Some(params) = caps.get(4) {
                test.push_str(params.as_str());
            }
            stats.push_failed_test(test);
            continue;
        }

        if let Some(caps) = VERBOSE_DOCTEST_FAILED.captures(line) {
            py.setup(stats);
            let file = dotted(&caps[1]);
            let method = caps[2].get(file.len()..).unwrap_or("").replace('.', "::");
            let mut test = format!("{}{}", file, method);
            if let Some(params) = caps.get(3) {
                test.push_str(params.as_str());
            }
            stats.push_failed_test(test);
            continue;
        }

        if let Some(caps) = PROGRESS_FILE.captures(line) {
            last_test_file = dotted(&caps[1]);
            let failures = caps[2].matches('F').count();
            test_files.extend(std::iter::repeat(last_test_file.clone()).take(failures));
            continue;
        }

        if let Some(caps) = PROGRESS_PERCENT_FAILED.captures(line) {
            let mut test = format!("{}::{}", dotted(&caps[2]), caps[3].replace('.', "::"));
            if let Some(params) = caps.get(4) {
                test.push_str(params.as_str());
            }
            stats.push_failed_test(test);
            continue;
        }

        if !last_test_file.is_empty() {
            if let Some(caps) = PROGRESS_CONTINUED.captures(line) {
                let failures = caps[1].matches('F').count();
                test_files.extend(std::iter::repeat(last_test_file.clone()).take(failures));
                continue;
            }
        }

        if !ignore_failure_headers {
            if let Some(caps) = FAILURE_HEADER.captures(line) {
                let name = &caps[1];
                if !name.starts_with("summary") {
                    py.setup(stats);
                    if test_files.is_empty() {
                        stats.push_failed_test(name);
                    } else {
                        let file = test_files.remove(0);
                        stats.push_failed_test(format!("{}::{}", file, name.replace('.', "::")));
                    }
                    continue;
                }
            }

            if let Some(caps) = DOCTEST_HEADER.captures(line) {
                let name = &caps[1];
                if !name.starts_with("summary") {
                    py.setup(stats);
                    if test_files.is_empty() {
                        stats.push_failed_test(name);
                    } else {
                        let file = test_files.remove(0);
                        let method = name.get(file.len()..).unwrap_or("").replace('.', "::");
                        stats.push_failed_test(format!("{}{}", file, method));
                    }
                    continue;
                }
            }
        }

        if let Some(caps) = COLLECT_ERROR.captures(line) {
            py.setup(stats);
            stats.push_failed_test(format!("({})", dotted(&caps[2])));
        }
    }

    if stats.tests_initialized() {
        stats.finish_ok_tests();
        if let Some(ok) = stats.num_tests_ok.as_mut() {
            *ok -= py.xfailed + py.xpassed;
        }
    }
}

pub fn analyze(folds: &Folds, stats: &mut LogStats) {
    stats.analyzer = "python".to_string();

    let lines = folds.job_lines()
        .iter()
        .map(|l| strip_ansi(l).into_owned())
        .collect::<Vec<_>>();

    let mut py = PythonStats {
        has_summary: lines.iter().any(|l| UNITTEST_RAN_ANY.is_match(l) || PYTEST_SECONDS_ANY.is_match(l)),
        ..Default::default()
    };
    analyze_tests(&lines, &mut py, stats);

    stats.did_tests_fail = Some(py.force_failed || stats.any_test_failed());
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
        let mut stats = LogStats::new(1, "python");
        analyze(&folds, &mut stats);
        stats
    }

    #[test]
    fn unittest_failure() {
        let stats = analyze_log("test_add (tests.test_calc.TestCalc) ... ok
test_div (tests.test_calc.TestCalc) ... FAIL

======================================================================
FAIL: test_div (tests.test_calc.TestCalc)
----------------------------------------------------------------------
Traceback (most recent call last):
AssertionError: 1 != 2

----------------------------------------------------------------------
Ran 2 tests in 0.003s

FAILED (failures=1)
");
        assert_eq!(stats.analyzer, "python");
        assert_eq!(stats.frameworks, vec!["unittest"]);
        assert_eq!(stats.num_tests_run, Some(2));
        assert_eq!(stats.num_tests_failed, Some(1));
        assert_eq!(stats.num_tests_ok, Some(1));
        assert_eq!(stats.tests_failed, vec!["test_div (tests.test_calc.TestCalc)"]);
        assert_eq!(stats.test_duration, Some(0.003));
        assert_eq!(stats.did_tests_fail, Some(true));
    }

    #[test]
    fn unittest_ok_with_skips() {
        let stats = analyze_log("Ran 5 tests in 1.250s\n\nOK (skipped=2)\n");
        assert_eq!(stats.num_tests_run, Some(5));
        assert_eq!(stats.num_tests_skipped, Some(2));
        assert_eq!(stats.num_tests_ok, Some(5));
        assert_eq!(stats.did_tests_fail, Some(false));
    }

    #[test]
    fn pytest_with_short_summary() {
        let stats = analyze_log("============================= test session starts ==============================
platform linux -- Python 3.8.10, pytest-7.1.2
collected 13 items

tests/test_calc.py ..F.......s
tests/test_io.py .F

=================================== FAILURES ===================================
____________________________ TestCalc.test_divide _____________________________
    def test_divide(self):
>       assert 1 / 1 == 2
E       assert 1.0 == 2
______________________________ test_read_file _________________________________
E       FileNotFoundError
=========================== short test summary info ============================
FAILED tests/test_calc.py::TestCalc::test_divide - assert 1.0 == 2
FAILED tests/test_io.py::test_read_file - FileNotFoundError
=================== 2 failed, 10 passed, 1 skipped in 0.52s ====================
");
        assert_eq!(stats.frameworks, vec!["pytest"]);
        assert_eq!(stats.tests_failed, vec![
            "tests.test_calc::TestCalc::test_divide",
            "tests.test_io::test_read_file",
        ]);
        assert_eq!(stats.num_tests_run, Some(12));
        assert_eq!(stats.num_tests_failed, Some(2));
        assert_eq!(stats.num_tests_skipped, Some(1));
        assert_eq!(stats.num_tests_ok, Some(10));
        assert_eq!(stats.test_duration, Some(0.52));
    }

    #[test]
    fn pytest_verbose_and_quiet_summary() {
        let stats = analyze_log("tests/test_client.py::SSHClientTest::test_host_key_1[1_0_empty] FAILED    [ 65%]
tests/test_client.py::SSHClientTest::test_ok PASSED    [100%]
1 failed, 3 passed, 1 xfailed in 0.12s
");
        assert_eq!(stats.tests_failed, vec!["tests.test_client::SSHClientTest::test_host_key_1[1_0_empty]"]);
        assert_eq!(stats.num_tests_run, Some(5));
        assert_eq!(stats.num_tests_ok, Some(3));
    }

    #[test]
    fn collection_error() {
        let stats = analyze_log("_______________ ERROR collecting test/unittests/tts/test_tts.py ________________\n");
        assert_eq!(stats.tests_failed, vec!["(test.unittests.tts.test_tts)"]);
        assert!(stats.tests_run);
    }

    #[test]
    fn summary_header_is_not_a_test() {
        let stats = analyze_log("=================================== FAILURES ===================================
___________________________ summary_table ___________________________
");
        assert!(stats.tests_failed.is_empty());
    }
}
