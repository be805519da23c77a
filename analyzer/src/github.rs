//! GitHub Actions flavored logs: timestamp prefixes and `##[group]` sections.

use crate::folds::{Folds, OUT_OF_FOLD};
use crate::stats::{round2, LogStats};
use bugswarm_common::errors::*;
use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

pub const CONNECTION_TERMS: &[&str] = &[
    "getRepositorySession()",
    "Can't get http",
    "404 Not Found",
    "Failed to fetch",
    "MockWebServer",
    "ssl.SSL",
    "Received request:",
    "Unauthorized.",
    "Failed to connect",
    "Connection refused",
    "SocketTimeOut",
    "failed to upload",
    "the requested URL returned error",
    "unknown host",
    "Server Error:",
];

pub const DEPENDENCY_TERMS: &[&str] = &[
    // java
    "could not resolve dependencies",
    "> could not find",
    "could not resolve plugin",
    "one of its dependencies could not be resolved",
    // javascript
    "could not resolve dependency",
    // python
    "non-resolvable import",
    "installing build dependencies ... error",
    "could not find a version that satisfies the requirement",
];

lazy_static! {
    static ref TIMESTAMP: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{7}Z ").unwrap();
    static ref GROUP: Regex = Regex::new(r"##\[group\](.*)").unwrap();
    static ref END_GROUP: Regex = Regex::new(r"##\[endgroup\]").unwrap();
    static ref SETUP_ACTION: Regex = Regex::new(r"Run actions/setup-(\w+)").unwrap();
    static ref PYTHON_HINT: Regex = Regex::new(r"(python|nosetest|pip|pytest)").unwrap();
    static ref JAVA_HINT: Regex = Regex::new(r"mvnw?|gradlew?").unwrap();
    static ref NODE_HINT: Regex = Regex::new(r"(nvm|npm) (run|test|install|build)").unwrap();
    static ref JAVA_BANNER: Regex = Regex::new(r"(Welcome to Gradle|Apache Maven) \d\.\d\.\d").unwrap();
    static ref EXIT_CODE: Regex = Regex::new(r"^##\[error\]Process completed with exit code (\d*)\.").unwrap();
    static ref STEP_FAILED: Regex = Regex::new(r"^##\[error\].*failed").unwrap();
    static ref RUN_FOLD: Regex = Regex::new(r"^Run ").unwrap();
    static ref RUN_ACTION: Regex = Regex::new(r"^Run [\w|-]+/[\w|-]+@v?\d+").unwrap();

    static ref MAVEN: [Regex; 2] = [
        Regex::new(r"mvn.*(install|compile|test)").unwrap(),
        Regex::new(r#"The command "mvn "#).unwrap(),
    ];
    static ref GRADLE: [Regex; 2] = [
        Regex::new(r"gradle(w)?.*(assemble|check|test)").unwrap(),
        Regex::new(r"\* Get more help at https://help\.gradle\.org").unwrap(),
    ];
    static ref ANT: [Regex; 2] = [
        Regex::new(r"ant (build-all|test)").unwrap(),
        Regex::new(r#"The command "ant "#).unwrap(),
    ];
    static ref PLAY: [Regex; 2] = [
        Regex::new(r"activator-\$\{ACTIVATOR_VERSION\}").unwrap(),
        Regex::new(r"export ACTIVATOR_VERSION=").unwrap(),
    ];
}

/// Split the log into lines, stripping the BOM and the per-line timestamps.
///
/// Returns the lines and the timestamps, the latter is empty for reproduced logs.
pub fn read_lines(text: &str) -> (Vec<String>, Vec<String>) {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let lines = text.lines().collect::<Vec<_>>();

    if lines.first().map(|l| TIMESTAMP.is_match(l)).unwrap_or(false) {
        let times = lines.iter()
            .map(|l| l.get(..26).unwrap_or("").to_string())
            .collect();
        let lines = lines.iter()
            .map(|l| l.get(29..).unwrap_or("").to_string())
            .collect();
        (lines, times)
    } else {
        (lines.into_iter().map(String::from).collect(), Vec::new())
    }
}

fn parse_time(s: &str) -> Option<f64> {
    let t = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Some(t.and_utc().timestamp_micros() as f64 / 1_000_000.0)
}

/// Split into `##[group]` sections. A section lasts until the next one starts.
pub fn split(lines: &[String], times: Option<&[String]>) -> Folds {
    let mut folds = Folds::new();
    let mut current = OUT_OF_FOLD.to_string();

    // reproduced logs carry no timestamps
    let times = times.filter(|t| t.len() == lines.len());
    let mut start_time: Option<f64> = None;
    let mut previous_group = String::new();

    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = GROUP.captures(line) {
            current = caps[1].to_string();
            folds.open(&current);

            if let Some(times) = times {
                let now = parse_time(&times[idx]);
                if let (Some(start), Some(end)) = (start_time, now) {
                    if !previous_group.is_empty() {
                        folds.set_duration(&previous_group, round2(end - start));
                    }
                }
                if now.is_some() {
                    start_time = now;
                    previous_group = current.clone();
                }
            }
            continue;
        }

        if END_GROUP.is_match(line) {
            current = OUT_OF_FOLD.to_string();
            continue;
        }

        folds.push(&current, line.clone());
    }

    folds
}

/// Guess the language from setup actions and commands, then from the job, then from the log text.
pub fn primary_language(folds: &Folds, job_language: Option<&str>) -> String {
    let mut candidates = BTreeSet::new();
    for name in folds.names() {
        if let Some(caps) = SETUP_ACTION.captures(name) {
            match caps[1].to_lowercase().as_str() {
                "node" => { candidates.insert("node_js"); },
                "java" => { candidates.insert("java"); },
                "python" => { candidates.insert("python"); },
                "ruby" => { candidates.insert("ruby"); },
                _ => (),
            }
        }
        if PYTHON_HINT.is_match(name) {
            candidates.insert("python");
        }
        if JAVA_HINT.is_match(name) {
            candidates.insert("java");
        }
        if NODE_HINT.is_match(name) {
            candidates.insert("node_js");
        }
    }
    if candidates.len() == 1 {
        if let Some(lang) = candidates.into_iter().next() {
            return lang.to_string();
        }
    }

    if let Some(lang) = job_language.map(str::to_lowercase) {
        if matches!(lang.as_str(), "javascript" | "node_js" | "typescript") {
            return "node_js".to_string();
        }
        if !lang.is_empty() && lang != "unknown" {
            return lang;
        }
    }

    let mut java = 0;
    let mut ruby = 0;
    for line in folds.job_lines() {
        if JAVA_BANNER.is_match(line) {
            return "java".to_string();
        }
        let lower = line.to_lowercase();
        if lower.contains("java") {
            java += 1;
        }
        if lower.contains("ruby") {
            ruby += 1;
        }
    }
    if java >= 10 {
        "java".to_string()
    } else if ruby >= 10 {
        "ruby".to_string()
    } else {
        "unknown".to_string()
    }
}

pub fn build_system_from_commands(lines: &[String]) -> String {
    for line in lines {
        if MAVEN.iter().any(|re| re.is_match(line)) {
            return "maven".to_string();
        } else if GRADLE.iter().any(|re| re.is_match(line)) {
            return "gradle".to_string();
        } else if ANT.iter().any(|re| re.is_match(line)) {
            return "ant".to_string();
        } else if PLAY.iter().any(|re| re.is_match(line)) {
            return "play".to_string();
        }
    }
    "NA".to_string()
}

fn os_codename(version: &str) -> Option<&'static str> {
    let codename = match version.get(..5)? {
        "14.04" => "trusty",
        "16.04" => "xenial",
        "18.04" => "bionic",
        "20.04" => "focal",
        "22.04" => "jammy",
        _ => return None,
    };
    Some(codename)
}

pub fn analyze(folds: &Folds, stats: &mut LogStats) {
    if let Some(os) = folds.get("Operating System") {
        if let Some(version) = os.content.get(1) {
            stats.os = os_codename(version).map(String::from);
        }
    }

    let mut setup_time = 0.0;
    for (name, fold) in folds.iter() {
        // setup lasts until the first custom command; gradle's build action counts as one
        if RUN_FOLD.is_match(name) && (!RUN_ACTION.is_match(name)
            || name.contains("gradle-build-action")
            || name.contains("gradle-command-action"))
        {
            break;
        }
        if let Some(duration) = fold.duration {
            setup_time += duration;
        }
    }
    if setup_time > 0.0 {
        stats.setup_time_before_build = Some(round2(setup_time));
    }

    if folds.is_empty() {
        error!("The log file is empty");
        stats.status = Some("unknown".to_string());
        stats.invalid_log = Some("empty log".to_string());
    } else {
        stats.status = Some(status(folds).to_string());
    }

    for line in folds.job_lines() {
        let lower = line.to_lowercase();
        if DEPENDENCY_TERMS.iter().any(|t| lower.contains(t)) {
            stats.could_not_resolve_dep = Some(line.trim().to_string());
        }
        for term in CONNECTION_TERMS {
            if lower.contains(&term.to_lowercase()) {
                stats.connection_lines.push(line.trim().to_string());
            }
        }
    }
}

fn status(folds: &Folds) -> &'static str {
    if folds.job_lines().iter().any(|l| l.contains("##[error]The operation was canceled.")) {
        return "cancelled";
    }

    // actions only print an exit code when something failed
    for line in folds.out_of_fold().iter().rev().filter(|l| !l.is_empty()) {
        if let Some(caps) = EXIT_CODE.captures(line) {
            return match caps[1].parse::<i64>() {
                Ok(0) => "ok",
                _ => "broken",
            };
        }
        if STEP_FAILED.is_match(line) {
            return "broken";
        }
    }

    "ok"
}
