use crate::folds::Folds;
use crate::stats::{round2, LogStats};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TEST_TASK: Regex = Regex::new(r"\[(junit|junitlauncher|testng|test.*)\] ").unwrap();
    static ref JUNIT5_REPORT: Regex = Regex::new(r"\[\w+\] Failures \(\d+\):|\[\w+\] Test run finished").unwrap();
    static ref TOTAL_TIME: Regex = Regex::new(r"Total time: (.+)").unwrap();

    static ref SECONDS: Regex = Regex::new(r"((\d+)(\.\d*)?) s").unwrap();
    static ref MINUTES: Regex = Regex::new(r"(\d+):(\d+) min").unwrap();
    static ref MILLIS: Regex = Regex::new(r"(\d+) ms").unwrap();

    static ref TESTCASE_FAILED: Regex = Regex::new(r"Testcase: (\w+)\(([\w.]+)\):\s(Caused an ERROR|FAILED)").unwrap();
    static ref FAILED_SUFFIX: Regex = Regex::new(r"\t(FAILED$|Caused an ERROR$)").unwrap();
    static ref TESTCASE_TOOK: Regex = Regex::new(r"Testcase: (\w+(\[.+\])?) took \d").unwrap();
    static ref TESTSUITE: Regex = Regex::new(r"Testsuite: ([\w.]+)$").unwrap();
    static ref FAILURES_HEADER: Regex = Regex::new(r"Failures \([0-9]+\):").unwrap();
    static ref METHOD_SOURCE: Regex = Regex::new(
        r"MethodSource \[className = '([\w.]+)', methodName = '(\w+)', methodParameterTypes = '.*'\]").unwrap();
    static ref CLASS_SOURCE: Regex = Regex::new(r"ClassSource \[className = '([\w.]+)'.*\]").unwrap();

    static ref LAUNCHER_FOUND: Regex = Regex::new(r"\[\s+(\d+) tests found\s+\]").unwrap();
    static ref LAUNCHER_SKIPPED: Regex = Regex::new(r"\[\s+(\d+) tests skipped\s+\]").unwrap();
    static ref LAUNCHER_ABORTED: Regex = Regex::new(r"\[\s+(\d+) tests aborted\s+\]").unwrap();
    static ref LAUNCHER_FAILED: Regex = Regex::new(r"\[\s+(\d+) tests failed\s+\]").unwrap();
    static ref LAUNCHER_ROW: Regex = Regex::new(r"\[\s+\d+").unwrap();

    static ref JUNIT4_SUMMARY: Regex = Regex::new(
        r"Tests run: (\d*), Failures: (\d*), Errors: (\d*), (Skipped: (\d*), )?Time elapsed: (.*)").unwrap();
    static ref JUNIT5_SUMMARY: Regex = Regex::new(
        r"Tests run: (\d*), Failures: (\d*), Aborted: (\d*), Skipped: (\d*), Time elapsed: (.*)").unwrap();
    static ref RUN_FINISHED: Regex = Regex::new(r"Test run finished after (.*)").unwrap();
    static ref TESTNG_SUMMARY: Regex = Regex::new(r"^Total tests run: (\d+), Failures: (\d+), Skips: (\d+)").unwrap();
}

/// Seconds from `1.5 s`, `1:05 min` or `250 ms`.
pub fn ant_time_to_seconds(s: &str) -> f64 {
    if let Some(caps) = SECONDS.captures(s) {
        return caps[1].parse::<f64>().map(round2).unwrap_or(0.0);
    }
    if let Some(caps) = MINUTES.captures(s) {
        let min = caps[1].parse::<f64>().unwrap_or(0.0);
        let sec = caps[2].parse::<f64>().unwrap_or(0.0);
        return min * 60.0 + sec;
    }
    if let Some(caps) = MILLIS.captures(s) {
        return caps[1].parse::<f64>().map(|ms| round2(ms * 0.001)).unwrap_or(0.0);
    }
    0.0
}

fn num(caps: &regex::Captures, idx: usize) -> i64 {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn extract_test_lines(folds: &Folds, stats: &mut LogStats) -> Vec<String> {
    let mut test_lines = Vec::new();
    let mut in_tests = false;

    for line in folds.out_of_fold() {
        if TEST_TASK.is_match(line) || JUNIT5_REPORT.is_match(line) {
            in_tests = true;
        }
        if let Some(caps) = TOTAL_TIME.captures(line) {
            stats.pure_build_duration = Some(ant_time_to_seconds(&caps[1]));
        }
        if in_tests {
            test_lines.push(line.clone());
        }
    }

    test_lines
}

fn analyze_tests(test_lines: &[String], stats: &mut LogStats) {
    let mut suite = String::new();
    let mut last_case = String::new();
    let mut in_failures = false;
    let mut in_launcher_summary = false;

    for (idx, line) in test_lines.iter().enumerate() {
        if let Some(caps) = TESTCASE_FAILED.captures(line) {
            if caps[2] == suite {
                stats.push_failed_test(format!("{}.{}", suite, &caps[1]));
            }
            continue;
        }

        if FAILED_SUFFIX.is_match(line) {
            if !last_case.is_empty() {
                stats.push_failed_test(format!("{}.{}", suite, last_case));
                continue;
            } else if !suite.is_empty() {
                // the log never named the method
                stats.push_failed_test(format!("({})", suite));
                continue;
            }
        }

        if let Some(caps) = TESTCASE_TOOK.captures(line) {
            last_case = caps[1].to_string();
            continue;
        }
        last_case.clear();

        if let Some(caps) = TESTSUITE.captures(line) {
            suite = caps[1].to_string();
            continue;
        }

        if FAILURES_HEADER.is_match(line) {
            in_failures = true;
            continue;
        }
        if in_failures {
            if let Some(caps) = METHOD_SOURCE.captures(line) {
                stats.push_failed_test(format!("{}.{}", &caps[1], &caps[2]));
                continue;
            }
            if let Some(caps) = CLASS_SOURCE.captures(line) {
                stats.push_failed_test(format!("({})", &caps[1]));
                continue;
            }
        }

        if in_launcher_summary {
            if let Some(caps) = LAUNCHER_FOUND.captures(line) {
                stats.add_run(num(&caps, 1));
                continue;
            }
            if let Some(caps) = LAUNCHER_SKIPPED.captures(line).or_else(|| LAUNCHER_ABORTED.captures(line)) {
                stats.add_skipped(num(&caps, 1));
                continue;
            }
            if let Some(caps) = LAUNCHER_FAILED.captures(line) {
                stats.add_failed(num(&caps, 1));
                continue;
            }
            if !LAUNCHER_ROW.is_match(line) {
                in_launcher_summary = false;
            }
        }

        if let Some(caps) = JUNIT4_SUMMARY.captures(line) {
            // some logs print the summary twice in a row
            if idx == 0 || test_lines[idx - 1] != *line {
                stats.init_tests();
                stats.add_framework("JUnit");
                let run = num(&caps, 1);
                let errors = num(&caps, 3);
                // a failing @BeforeClass reports `Tests run: 0, Failures: 0, Errors: 1`
                if !(run == 0 && errors == 1) {
                    stats.tests_run = true;
                    stats.add_run(run);
                    stats.add_failed(num(&caps, 2) + errors);
                }
                if caps.get(4).is_some() {
                    stats.add_skipped(num(&caps, 5));
                }
                stats.add_test_duration(ant_time_to_seconds(&caps[6]));
                continue;
            }
        }

        if let Some(caps) = JUNIT5_SUMMARY.captures(line) {
            stats.tests_run = true;
            stats.add_framework("JUnit");
            stats.add_run(num(&caps, 1));
            stats.add_failed(num(&caps, 2));
            stats.add_skipped(num(&caps, 3) + num(&caps, 4));
            stats.add_test_duration(ant_time_to_seconds(&caps[5]));
            continue;
        }

        if let Some(caps) = RUN_FINISHED.captures(line) {
            in_launcher_summary = true;
            stats.tests_run = true;
            stats.add_framework("JUnit");
            stats.add_test_duration(ant_time_to_seconds(&caps[1]));
        }

        if let Some(caps) = TESTNG_SUMMARY.captures(line) {
            stats.tests_run = true;
            stats.add_framework("testng");
            stats.add_run(num(&caps, 1));
            stats.add_failed(num(&caps, 2));
            stats.add_skipped(num(&caps, 3));
        }
    }

    stats.finish_ok_tests();
}

pub fn analyze(folds: &Folds, stats: &mut LogStats) {
    stats.analyzer = "java-ant".to_string();
    stats.build_system = Some("Ant".to_string());

    let test_lines = extract_test_lines(folds, stats);
    analyze_tests(&test_lines, stats);
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
    fn convert_times() {
        assert_eq!(ant_time_to_seconds("0.734 sec"), 0.73);
        assert_eq!(ant_time_to_seconds("1:30 min"), 90.0);
        assert_eq!(ant_time_to_seconds("250 ms"), 0.25);
    }

    #[test]
    fn junit4_suites() {
        let log = "compile:
    [junit] Testsuite: wyc.testing.AllInvalidTest
    [junit] Tests run: 3, Failures: 1, Errors: 0, Skipped: 1, Time elapsed: 0.5 sec
    [junit] Tests run: 3, Failures: 1, Errors: 0, Skipped: 1, Time elapsed: 0.5 sec
    [junit] Testcase: invalid[Import_Invalid_1] took 0.005 sec
    [junit] \tFAILED
    [junit] Testcase: testOther(wyc.testing.AllInvalidTest):\tCaused an ERROR
BUILD FAILED
Total time: 12 seconds
";
        let mut stats = LogStats::new(1, "java");
        analyze(&folds(log), &mut stats);
        assert_eq!(stats.analyzer, "java-ant");
        assert!(stats.tests_run);
        assert_eq!(stats.num_tests_run, Some(3));
        assert_eq!(stats.num_tests_failed, Some(1));
        assert_eq!(stats.num_tests_skipped, Some(1));
        assert_eq!(stats.tests_failed, vec![
            "wyc.testing.AllInvalidTest.invalid[Import_Invalid_1]",
            "wyc.testing.AllInvalidTest.testOther",
        ]);
        assert_eq!(stats.test_duration, Some(0.5));
        assert_eq!(stats.pure_build_duration, Some(12.0));
    }

    #[test]
    fn junit5_launcher() {
        let log = "    [junitlauncher] Failures (1):
    [junitlauncher]   JUnit Jupiter:CalcTest:adds()
    [junitlauncher]     MethodSource [className = 'org.example.CalcTest', methodName = 'adds', methodParameterTypes = '']
    [junitlauncher] Test run finished after 120 ms
    [junitlauncher] [         5 tests found           ]
    [junitlauncher] [         1 tests skipped         ]
    [junitlauncher] [         1 tests failed          ]
    [junitlauncher] done
";
        let mut stats = LogStats::new(1, "java");
        analyze(&folds(log), &mut stats);
        assert_eq!(stats.tests_failed, vec!["org.example.CalcTest.adds"]);
        assert_eq!(stats.num_tests_run, Some(5));
        assert_eq!(stats.num_tests_skipped, Some(1));
        assert_eq!(stats.num_tests_failed, Some(1));
        assert_eq!(stats.num_tests_ok, Some(4));
        assert_eq!(stats.test_duration, Some(0.12));
    }

    #[test]
    fn before_class_failure_is_not_a_test_run() {
        let log = "    [junit] Tests run: 0, Failures: 0, Errors: 1, Time elapsed: 0.1 sec\n";
        let mut stats = LogStats::new(1, "java");
        analyze(&folds(log), &mut stats);
        assert!(!stats.tests_run);
        assert_eq!(stats.num_tests_run, Some(0));
    }
}
