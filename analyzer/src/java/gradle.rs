use crate::folds::{strip_ansi, Folds};
use crate::stats::LogStats;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TASK_START: Regex = Regex::new(r#"^:[^/\\:<>"?*|]"#).unwrap();
    static ref NEW_TASK_START: Regex = Regex::new(r"^> Task").unwrap();
    static ref BUILD_DONE: Regex = Regex::new(r"^BUILD (SUCCESSFUL|FAILED) in ").unwrap();

    static ref TESTS_COMPLETED: Regex = Regex::new(r"(\d*) tests completed(, (\d*) failed)?(, (\d*) skipped)?").unwrap();
    static ref TESTNG_SUMMARY: Regex = Regex::new(r"^Total tests run: (\d+), Failures: (\d+), Skips: (\d+)").unwrap();
    static ref TOTAL_TIME: Regex = Regex::new(r"Total time: (.*)").unwrap();
    static ref BUILD_TIME: Regex = Regex::new(r"BUILD (FAILED|SUCCESSFUL) in (.*)").unwrap();

    static ref SECS: Regex = Regex::new(r"((\d+) mins)? (\d+)(\.\d+) secs").unwrap();
    static ref SHORT_SECS: Regex = Regex::new(r"((\d+)m )?(\d+)s").unwrap();
}

lazy_static! {
    // `co.example.FiberTest > testThreadLocals[0] FAILED`
    static ref JUNIT4_FAILED: Regex = Regex::new(
        r"^(?P<class>[\w.]+) > (?P<method>[\w ]+(?P<params>\[.*\])?) FAILED$").unwrap();
    // `Outer > Inner > shouldThrow() FAILED` and `Test > isEven(int) > [2] 11 FAILED`
    static ref JUNIT5_FAILED: Regex = Regex::new(
        r"^(?P<class>[\w.]+(?: > [\w.]+)*) > (?P<method>[\w ]+\([\w, ]*\))(?: > (?P<paramindex>\[\d+\]) (?P<params>.*))? FAILED$").unwrap();
    // `Test > method(boolean) > org.example.Test.method(boolean)[10] FAILED`, gradle 7 and older
    static ref JUNIT5_OLD_FAILED: Regex = Regex::new(
        r"^\w+ > \w+\([\w, ]+\) > (?P<classandmethod>[\w. ]+(?P<params>\(.*\)\[\d+\])?) FAILED$").unwrap();
    // `Suite Foo > Test Bar > org.example.TestClass > shouldFail FAILED`
    static ref TESTNG_FAILED: Regex = Regex::new(
        r"^[\w\s]+ > [\w\s]+ > (?P<class>\w+\.[\w.]+) > (?P<method>[\w ]+(?P<params>\[\d+\]\(.*\))?) FAILED$").unwrap();
    // `TestNG > Regression2 > test.GroupSuiteTest.Regression2 FAILED`
    static ref TESTNG_OLD_FAILED: Regex = Regex::new(
        r"^[\w\s]+ > [\w\s]+ > (?P<classandmethod>[\w ]+\.[\w. ]+(?P<params>\[\d+\]\(.*\))?) FAILED$").unwrap();
    static ref QUALIFIED_FAILED: Regex = Regex::new(r"^(\w+\.[\w.]+) FAILED$").unwrap();
}

/// Seconds from `1 mins 3.2 secs` or `1m 3s`, 0 if neither form is present.
pub fn gradle_time_to_seconds(s: &str) -> f64 {
    let caps = SECS.captures(s).or_else(|| SHORT_SECS.captures(s));
    match caps {
        Some(caps) => {
            let secs = caps[3].parse::<f64>().unwrap_or(0.0);
            let mins = caps.get(2)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .unwrap_or(0.0);
            mins * 60.0 + secs
        },
        None => 0.0,
    }
}

fn num(caps: &regex::Captures, idx: usize) -> i64 {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Gradle never announces the test phase, everything from the first task on is a candidate.
fn extract_test_lines(folds: &Folds) -> Vec<String> {
    let mut test_lines = Vec::new();
    let mut in_tests = false;
    let mut marker = 0;

    for line in folds.job_lines() {
        let line = strip_ansi(line).into_owned();

        if TASK_START.is_match(&line) || NEW_TASK_START.is_match(&line) {
            marker = 1;
            in_tests = true;
        } else if line.starts_with(':') && marker == 1 {
            marker = 0;
            in_tests = false;
        } else if BUILD_DONE.is_match(&line) && marker == 1 {
            test_lines.push(line.clone());
            marker = 0;
            in_tests = false;
        }

        if in_tests {
            test_lines.push(line);
        }
    }

    test_lines
}

/// Name of the failed test if `line` is one of the `... FAILED` forms gradle prints.
pub fn failed_test(line: &str) -> Option<String> {
    if let Some(caps) = JUNIT4_FAILED.captures(line) {
        return Some(format!("{}.{}", &caps["class"], &caps["method"]));
    }
    if let Some(caps) = JUNIT5_FAILED.captures(line) {
        let class = caps["class"].replace(" > ", "$");
        let index = caps.name("paramindex").map_or("", |m| m.as_str());
        return Some(format!("{}.{}{}", class, &caps["method"], index));
    }
    if let Some(caps) = JUNIT5_OLD_FAILED.captures(line) {
        return Some(caps["classandmethod"].to_string());
    }
    if let Some(caps) = TESTNG_FAILED.captures(line) {
        return Some(format!("{}.{}", &caps["class"], &caps["method"]));
    }
    if let Some(caps) = TESTNG_OLD_FAILED.captures(line) {
        return Some(caps["classandmethod"].to_string());
    }
    QUALIFIED_FAILED.captures(line).map(|caps| caps[1].to_string())
}

fn analyze_tests(test_lines: &[String], stats: &mut LogStats) {
    for line in test_lines {
        if let Some(test) = failed_test(line) {
            stats.tests_run = true;
            stats.init_tests();
            stats.push_failed_test(test);
        }

        if let Some(caps) = TESTS_COMPLETED.captures(line) {
            stats.tests_run = true;
            stats.add_framework("JUnit");
            stats.add_run(num(&caps, 1));
            stats.add_failed(num(&caps, 3));
            stats.add_skipped(num(&caps, 5));
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

        if let Some(caps) = TOTAL_TIME.captures(line) {
            stats.pure_build_duration = Some(gradle_time_to_seconds(&caps[1]));
        }
        if let Some(caps) = BUILD_TIME.captures(line) {
            stats.pure_build_duration = Some(gradle_time_to_seconds(&caps[2]));
        }
    }

    stats.finish_ok_tests();
}

pub fn analyze(folds: &Folds, stats: &mut LogStats) {
    stats.analyzer = "java-gradle".to_string();
    stats.build_system = Some("Gradle".to_string());

    let test_lines = extract_test_lines(folds);
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
    fn failed_test_forms() {
        assert_eq!(failed_test("co.paralleluniverse.fibers.FiberTest > testSerialization[0] FAILED").as_deref(),
            Some("co.paralleluniverse.fibers.FiberTest.testSerialization[0]"));
        assert_eq!(failed_test("TestClass1 > shouldThrow() FAILED").as_deref(),
            Some("TestClass1.shouldThrow()"));
        assert_eq!(failed_test("TestClass1 > isEven(int, String) > [2] 11, orange FAILED").as_deref(),
            Some("TestClass1.isEven(int, String)[2]"));
        assert_eq!(failed_test("UserEndpointTest > GetUserDetail > shouldRespondError() FAILED").as_deref(),
            Some("UserEndpointTest$GetUserDetail.shouldRespondError()"));
        assert_eq!(failed_test("Suite Foo > Test Bar > org.bugswarm.TestClass1 > shouldFail FAILED").as_deref(),
            Some("org.bugswarm.TestClass1.shouldFail"));
        assert_eq!(failed_test("path.to.TestClass.testMethod FAILED").as_deref(),
            Some("path.to.TestClass.testMethod"));
        assert_eq!(failed_test("BUILD FAILED"), None);
    }

    #[test]
    fn convert_times() {
        assert_eq!(gradle_time_to_seconds("2 mins 3.52 secs"), 123.0);
        assert_eq!(gradle_time_to_seconds(" 7.1 secs"), 7.0);
        assert_eq!(gradle_time_to_seconds("1m 5s"), 65.0);
        assert_eq!(gradle_time_to_seconds("12s"), 12.0);
    }

    #[test]
    fn gradle_build() {
        let log = "Downloading https://services.gradle.org/distributions/gradle-7.4-bin.zip
> Task :compileJava
> Task :test

org.example.CalcTest > addsNumbers FAILED
    java.lang.AssertionError at CalcTest.java:12

12 tests completed, 1 failed, 2 skipped

FAILURE: Build failed with an exception.
BUILD FAILED in 1m 4s
";
        let mut stats = LogStats::new(1, "java");
        analyze(&folds(log), &mut stats);
        assert_eq!(stats.analyzer, "java-gradle");
        assert_eq!(stats.build_system.as_deref(), Some("Gradle"));
        assert!(stats.tests_run);
        assert_eq!(stats.tests_failed, vec!["org.example.CalcTest.addsNumbers"]);
        assert_eq!(stats.num_tests_run, Some(12));
        assert_eq!(stats.num_tests_failed, Some(1));
        assert_eq!(stats.num_tests_skipped, Some(2));
        assert_eq!(stats.num_tests_ok, Some(11));
        assert_eq!(stats.pure_build_duration, Some(64.0));
    }

    #[test]
    fn lines_before_first_task_are_ignored() {
        let log = "org.example.Early > test FAILED\n> Task :test\n";
        let mut stats = LogStats::new(1, "java");
        analyze(&folds(log), &mut stats);
        assert!(stats.tests_failed.is_empty());
        assert!(!stats.tests_run);
    }
}
