use crate::folds::{strip_ansi, Folds};
use crate::stats::{round2, LogStats};
use lazy_static::lazy_static;
use regex::Regex;

const SEPARATOR: &str = "-------------------------------------------------------";
const FULL_TRACE_HINT: &str = "To see the full stack trace of the errors";

lazy_static! {
    static ref REACTOR_SUMMARY: Regex = Regex::new(r"\[INFO\] Reactor Summary(:| for)").unwrap();
    static ref BRACKETED: Regex = Regex::new(r"\[.*\]").unwrap();
    static ref REACTOR_TEST_MODULE: Regex = Regex::new(r"(?i)\[INFO\] .*test.*? (\w+) \[ (.+)\]").unwrap();
    static ref TOTAL_TIME: Regex = Regex::new(r"(?i)Total time: (.+)").unwrap();
    static ref SECONDS: Regex = Regex::new(r"((\d+)(\.\d*)?) s").unwrap();
    static ref MINUTES: Regex = Regex::new(r"(\d+):(\d+) min").unwrap();

    static ref FAILED_BLOCK: Regex = Regex::new(r"(Failed tests:)|(Tests in error:)").unwrap();
    static ref TIME_ELAPSED: Regex = Regex::new(r"Tests run: .*? Time elapsed: (.* s(ec)?)").unwrap();
    static ref SUREFIRE_SUMMARY: Regex = Regex::new(r"Tests run: (\d*), Failures: (\d*), Errors: (\d*)(, Skipped: (\d*))?").unwrap();
    static ref TESTNG_SUMMARY: Regex = Regex::new(r"^Total tests run: (\d+), Failures: (\d+), Skips: (\d+)").unwrap();
    static ref CUCUMBER_SCENARIO: Regex = Regex::new(r"cucumber (.*) # Scenario:").unwrap();
    static ref TEST_METHOD: Regex = Regex::new(r"(\w+(\[.+\])?\([\w.$\[\]]+\))").unwrap();

    static ref FAILURE_IN_CLASS: Regex = Regex::new(r"<<< FAILURE! - in ([\w\.]+)").unwrap();
    static ref FAILURE_MARKER: Regex = Regex::new(r"(<<< FAILURE!|<<< ERROR!)\s*$").unwrap();
    static ref ELAPSED_METHOD: Regex = Regex::new(r"^(\[ERROR\] )?(\w+)  Time elapsed:").unwrap();
    static ref ELAPSED_CLASS: Regex = Regex::new(r"^(\[ERROR\] )?([\w.]+)  Time elapsed:").unwrap();
}

/// Seconds from `12.3 s` or `1:05 min`, 0 if neither form is present.
pub fn maven_time_to_seconds(s: &str) -> f64 {
    if let Some(caps) = SECONDS.captures(s) {
        return caps[1].parse::<f64>().map(round2).unwrap_or(0.0);
    }
    if let Some(caps) = MINUTES.captures(s) {
        let min = caps[1].parse::<f64>().unwrap_or(0.0);
        let sec = caps[2].parse::<f64>().unwrap_or(0.0);
        return min * 60.0 + sec;
    }
    0.0
}

/// `testFoo(org.example.FooTest)` out of a surefire failure line.
pub fn test_method_name(s: &str) -> Option<String> {
    TEST_METHOD.captures(s).map(|caps| caps[1].to_string())
}

fn num(caps: &regex::Captures, idx: usize) -> i64 {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

#[derive(Debug, Default)]
struct Sections {
    test_lines: Vec<String>,
    reactor_lines: Vec<String>,
    err_lines: Vec<String>,
    err_msg: Vec<String>,
}

fn extract_sections(folds: &Folds) -> Sections {
    let mut sections = Sections::default();
    let mut in_tests = false;
    let mut in_reactor = false;
    let mut marker = 0;

    for line in folds.out_of_fold() {
        let line = strip_ansi(line);
        let line = line.as_ref();

        if let Some(rest) = line.strip_prefix("[ERROR]") {
            sections.err_lines.push(rest.get(1..).unwrap_or("").to_string());
        }
        if line.contains("usr/local/bin/run.sh:") && line.contains("Killed") {
            sections.err_msg.push(line.to_string());
        }

        if line.contains(SEPARATOR) && marker == 0 {
            marker = 1;
        } else if REACTOR_SUMMARY.is_match(line) {
            in_reactor = true;
            in_tests = false;
        } else if in_reactor && !BRACKETED.is_match(line) {
            in_reactor = false;
        } else if line.contains(" T E S T S") && marker == 1 {
            marker = 2;
        } else if line.contains(SEPARATOR) && marker == 2 {
            marker = 3;
            in_tests = true;
        } else if line.contains(SEPARATOR) && marker == 3 {
            marker = 0;
            in_tests = false;
        } else {
            marker = 0;
        }

        if in_tests {
            sections.test_lines.push(line.to_string());
        } else if in_reactor {
            sections.reactor_lines.push(line.to_string());
        }
    }

    sections
}

/// Walk the surefire output, returns the lines of the `Failed tests:` blocks.
fn analyze_tests(test_lines: &[String], stats: &mut LogStats) -> Vec<String> {
    let mut failed_lines = Vec::new();
    let mut in_failed_block = false;
    let mut running = false;
    let mut current = String::new();

    for line in test_lines {
        if FAILED_BLOCK.is_match(line) {
            in_failed_block = true;
        }
        if in_failed_block {
            failed_lines.push(line.clone());
            if line.trim().is_empty() {
                in_failed_block = false;
            }
        }

        if let Some(caps) = TIME_ELAPSED.captures(line) {
            stats.tests_run = true;
            stats.add_framework("JUnit");
            stats.add_test_duration(maven_time_to_seconds(&caps[1]));
            continue;
        }

        if let Some(caps) = SUREFIRE_SUMMARY.captures(line) {
            running = false;
            stats.tests_run = true;
            stats.add_framework("JUnit");
            stats.add_run(num(&caps, 1));
            stats.add_failed(num(&caps, 2) + num(&caps, 3));
            if caps.get(4).is_some() {
                stats.add_skipped(num(&caps, 5));
            }
            continue;
        }

        if let Some(caps) = TESTNG_SUMMARY.captures(line) {
            stats.tests_run = true;
            stats.add_framework("testng");
            stats.add_run(num(&caps, 1));
            stats.add_failed(num(&caps, 2));
            stats.add_skipped(num(&caps, 3));
            continue;
        }

        if let Some(test) = line.strip_prefix("Running ") {
            running = true;
            current = test.to_string();
        }
        if running && line.contains("(See full trace by running task with --trace)") {
            stats.push_failed_test(current.clone());
        }

        if line.contains("exec rake cucumber") {
            stats.add_framework("cucumber");
        }
        if let Some(caps) = CUCUMBER_SCENARIO.captures(line) {
            stats.push_failed_test(&caps[1]);
        }
    }

    stats.finish_ok_tests();
    failed_lines
}

fn offending_tests(failed_lines: &[String], stats: &mut LogStats) {
    let mut has_indent = false;
    for line in failed_lines {
        if line.starts_with("  ") {
            has_indent = true;
        }
        if has_indent && !line.starts_with("  ") {
            continue;
        }
        if line.contains("Tests run:") {
            continue;
        }

        if line.contains("Failed tests:") || line.contains("Tests in error:") {
            let tests = line.split(':').nth(1).unwrap_or("").trim();
            if tests.len() > 1 {
                if let Some(test) = test_method_name(tests) {
                    stats.push_failed_test(test);
                }
            }
        } else if let Some(test) = test_method_name(line) {
            stats.push_failed_test(test);
        }
    }
}

fn analyze_reactor(reactor_lines: &[String], stats: &mut LogStats) {
    let mut reactor_time = 0.0;
    for line in reactor_lines {
        if let Some(caps) = REACTOR_TEST_MODULE.captures(line) {
            reactor_time += maven_time_to_seconds(&caps[2]);
        }
        if let Some(caps) = TOTAL_TIME.captures(line) {
            stats.pure_build_duration = Some(maven_time_to_seconds(&caps[1]));
        }
    }
    if stats.test_duration.map_or(true, |d| reactor_time > d) {
        stats.test_duration = Some(reactor_time);
    }
}

fn extract_err_msg(sections: Sections, stats: &mut LogStats) {
    let mut msg = sections.err_msg;
    for line in sections.err_lines {
        if line.len() > 49 && line.contains(FULL_TRACE_HINT) {
            break;
        }
        msg.push(line);
    }
    msg.retain(|l| l.len() >= 2 && l != "-> [Help 1]");
    stats.err_msg.extend(msg);
}

/// Fallback for logs without a `Failed tests:` block, names are taken from the per-test failure headers.
fn failed_tests_from_headers(test_lines: &[String], stats: &mut LogStats) {
    let mut class = String::new();
    for line in test_lines {
        if let Some(caps) = FAILURE_IN_CLASS.captures(line) {
            class = caps[1].to_string();
            continue;
        }
        if !FAILURE_MARKER.is_match(line) {
            continue;
        }

        let mut failed = test_method_name(line);
        if failed.is_none() {
            failed = ELAPSED_METHOD.captures(line)
                .map(|caps| format!("{}({})", &caps[2], class));
        }
        if failed.is_none() && !class.is_empty() {
            let qualified = format!(r"^(\[ERROR\] )?{}\.(\w+)  Time elapsed:", regex::escape(&class));
            if let Ok(re) = Regex::new(&qualified) {
                failed = re.captures(line)
                    .map(|caps| format!("{}({})", &caps[2], class));
            }
        }
        if failed.is_none() {
            failed = ELAPSED_CLASS.captures(line)
                .map(|caps| format!("({})", &caps[2]));
        }
        if let Some(test) = failed {
            stats.push_failed_test(test);
        }
    }
}

pub fn analyze(folds: &Folds, stats: &mut LogStats) {
    stats.analyzer = "java-maven".to_string();
    stats.build_system = Some("Maven".to_string());

    let sections = extract_sections(folds);
    let failed_lines = analyze_tests(&sections.test_lines, stats);
    offending_tests(&failed_lines, stats);
    analyze_reactor(&sections.reactor_lines, stats);

    let test_lines = sections.test_lines.clone();
    extract_err_msg(sections, stats);
    if stats.tests_failed.is_empty() {
        failed_tests_from_headers(&test_lines, stats);
    }
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

    const SUREFIRE: &str = "[INFO] Scanning for projects...
-------------------------------------------------------
 T E S T S
-------------------------------------------------------
Running org.example.FooTest
Tests run: 3, Failures: 1, Errors: 0, Skipped: 0, Time elapsed: 0.52 sec <<< FAILURE! - in org.example.FooTest
testBar(org.example.FooTest)  Time elapsed: 0.01 sec  <<< FAILURE!
java.lang.AssertionError: expected:<1> but was:<2>
Running org.example.BazTest
Tests run: 2, Failures: 0, Errors: 0, Skipped: 1, Time elapsed: 1.2 sec - in org.example.BazTest

Results :

Failed tests:
  FooTest.testBar:42 expected:<1> but was:<2>
  testQux(org.example.FooTest)

Tests run: 5, Failures: 1, Errors: 0, Skipped: 1

[INFO] ------------------------------------------------------------------------
[INFO] BUILD FAILURE
[INFO] ------------------------------------------------------------------------
[INFO] Total time: 12.345 s
[ERROR] Failed to execute goal org.apache.maven.plugins:maven-surefire-plugin:2.12.4:test
[ERROR] -> [Help 1]
[ERROR] To see the full stack trace of the errors, re-run Maven with the -e switch.
[ERROR] Re-run Maven using the -X switch to enable full debug logging.
";

    #[test]
    fn convert_times() {
        assert_eq!(maven_time_to_seconds("12.345 s"), 12.35);
        assert_eq!(maven_time_to_seconds("2:03 min"), 123.0);
        assert_eq!(maven_time_to_seconds("soon"), 0.0);
    }

    #[test]
    fn extract_method_names() {
        assert_eq!(test_method_name("  testQux(org.example.FooTest)").as_deref(), Some("testQux(org.example.FooTest)"));
        assert_eq!(test_method_name("  testP[1](org.example.P)").as_deref(), Some("testP[1](org.example.P)"));
        assert_eq!(test_method_name("no test here"), None);
    }

    #[test]
    fn surefire_results() {
        let mut stats = LogStats::new(1, "java");
        analyze(&folds(SUREFIRE), &mut stats);
        assert_eq!(stats.analyzer, "java-maven");
        assert!(stats.tests_run);
        assert_eq!(stats.num_tests_run, Some(5));
        assert_eq!(stats.num_tests_failed, Some(1));
        assert_eq!(stats.num_tests_skipped, Some(1));
        assert_eq!(stats.num_tests_ok, Some(4));
        assert_eq!(stats.tests_failed, vec!["testQux(org.example.FooTest)"]);
        assert_eq!(stats.test_duration.map(round2), Some(1.72));
        assert_eq!(stats.frameworks, vec!["JUnit"]);
        assert_eq!(stats.err_msg, vec!["Failed to execute goal org.apache.maven.plugins:maven-surefire-plugin:2.12.4:test"]);
    }

    #[test]
    fn failure_headers_without_summary_block() {
        let log = "-------------------------------------------------------
 T E S T S
-------------------------------------------------------
Tests run: 2, Failures: 2, Errors: 0, Skipped: 0, Time elapsed: 0.1 sec <<< FAILURE! - in path.to.TestCls
[ERROR] testMethod  Time elapsed: 0.011 sec  <<< FAILURE!
[ERROR] path.to.TestCls.otherMethod  Time elapsed: 0.011 sec  <<< ERROR!
";
        let mut stats = LogStats::new(1, "java");
        analyze(&folds(log), &mut stats);
        assert_eq!(stats.tests_failed, vec!["testMethod(path.to.TestCls)", "otherMethod(path.to.TestCls)"]);
    }

    #[test]
    fn reactor_total_time() {
        let log = "[INFO] Reactor Summary:
[INFO] core-tests ......................................... SUCCESS [ 3.5 s]
[INFO] Total time: 1:10 min
done
";
        let mut stats = LogStats::new(1, "java");
        analyze(&folds(log), &mut stats);
        assert_eq!(stats.pure_build_duration, Some(70.0));
        assert_eq!(stats.test_duration, Some(3.5));
    }
}
