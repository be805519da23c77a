//! Travis flavored logs: `travis_fold` sections and `travis_time` markers.

use crate::folds::{Folds, OUT_OF_FOLD};
use crate::stats::LogStats;
use bugswarm_common::errors::*;
use lazy_static::lazy_static;
use regex::Regex;

const LOG_NOT_FOUND: &str = "<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message><Key>";

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
];

lazy_static! {
    static ref FOLD_START: Regex = Regex::new(r"travis_fold:start:([\w\.]*)").unwrap();
    static ref FOLD_END: Regex = Regex::new(r"travis_fold:end:([\w\.]*)").unwrap();
    static ref TIME_END: Regex = Regex::new(r"travis_time:.*?,duration=(\d*)").unwrap();
    static ref BUILD_LANGUAGE: Regex = Regex::new(r"^Build language: (.*)").unwrap();
    static ref DONE_BUILD: Regex = Regex::new(r"^Done\. Your build exited with (\d*)").unwrap();
    static ref DONE_SCRIPT: Regex = Regex::new(r"^Done\. Build script exited with (\d*)").unwrap();
    static ref COMMAND_EXITED: Regex = Regex::new(r"^The command (.*) exited with (\d*)\.").unwrap();
    static ref SETUP_FOLD: Regex = Regex::new(r"(system_info|git.checkout|services|before.install)").unwrap();

    static ref MAVEN: [Regex; 3] = [
        Regex::new(r"(\[0K\$ )?mvn.*install.*").unwrap(),
        Regex::new(r"(\[0K\$ )?mvn.*compile test").unwrap(),
        Regex::new(r#"The command "mvn .*"#).unwrap(),
    ];
    static ref GRADLE: Regex = Regex::new(r"(\[0K\$ )?.*(\./)?gradle(w)?.*assemble").unwrap();
    static ref ANT: [Regex; 3] = [
        Regex::new(r"(\[0K\$ )?ant build-all.*").unwrap(),
        Regex::new(r"(\[0K\$ )?ant test.*").unwrap(),
        Regex::new(r#"The command "ant .*"#).unwrap(),
    ];
    static ref PLAY: [Regex; 2] = [
        Regex::new(r"(\[0K\$ )?(\./)?activator-\$\{ACTIVATOR_VERSION\}.*").unwrap(),
        Regex::new(r"(\$ )?export ACTIVATOR_VERSION=.*").unwrap(),
    ];
}

pub fn read_lines(text: &str) -> Vec<String> {
    text.lines().map(String::from).collect()
}

pub fn split(lines: &[String]) -> Folds {
    let mut folds = Folds::new();
    let mut current = OUT_OF_FOLD.to_string();

    for line in lines {
        if let Some(caps) = FOLD_START.captures(line) {
            current = caps[1].to_string();
            continue;
        }
        if FOLD_END.is_match(line) {
            current = OUT_OF_FOLD.to_string();
            continue;
        }

        folds.open(&current);

        if let Some(caps) = TIME_END.captures(line) {
            if let Ok(ns) = caps[1].parse::<f64>() {
                folds.set_duration(&current, (ns / 1_000_000_000.0).round());
            }
            continue;
        }
        folds.push(&current, line.clone());
    }

    folds
}

/// Language from the `Build language:` line, or a guess if the log has no system info.
pub fn primary_language(folds: &Folds) -> String {
    let mut language = "unknown".to_string();

    if let Some(info) = folds.get("system_info") {
        if let Some(caps) = info.content.iter().find_map(|l| BUILD_LANGUAGE.captures(l)) {
            language = caps[1].trim().to_string();
        }
    } else {
        let mut java = 0;
        let mut ruby = 0;
        for line in folds.job_lines() {
            if line.contains("java") {
                java += 1;
            }
            if line.contains("ruby") {
                ruby += 1;
            }
        }
        if java >= 3 {
            language = "java".to_string();
        } else if ruby >= 3 {
            language = "ruby".to_string();
        }
    }

    if let Some(idx) = language.find('\\') {
        language.truncate(idx);
    }
    if language.starts_with("[\"") && language.ends_with("\"]") && language.len() >= 4 {
        language = language[2..language.len() - 2].to_string();
    }

    language.to_lowercase()
}

pub fn build_system_from_commands(lines: &[String]) -> String {
    for line in lines {
        if MAVEN.iter().any(|re| re.is_match(line)) {
            return "maven".to_string();
        } else if GRADLE.is_match(line) {
            return "gradle".to_string();
        } else if ANT.iter().any(|re| re.is_match(line)) {
            return "ant".to_string();
        } else if PLAY.iter().any(|re| re.is_match(line)) {
            return "play".to_string();
        }
    }
    "NA".to_string()
}

/// Environment details, exit status and setup time of a travis log.
pub fn analyze(folds: &Folds, stats: &mut LogStats) {
    let out = folds.out_of_fold();

    if out.len() > 1 && out[1].contains(LOG_NOT_FOUND) {
        stats.invalid_log = Some(out[1].trim().to_string());
    }
    if let Some(first) = out.first() {
        if let Some(worker) = first.strip_prefix("Using worker: ") {
            stats.using_worker = Some(worker.trim().to_string());
        }
    }

    if let Some(info) = folds.get("worker_info") {
        stats.worker_instance = info.content.iter()
            .find(|l| l.contains("instance: "))
            .and_then(|l| l.trim().split(": ").nth(1))
            .map(String::from);
    }

    if let Some(info) = folds.get("system_info") {
        let content = &info.content;
        stats.build_image = line_after(content, "Build image provisioning date and time");
        stats.os = content.iter()
            .find(|l| l.contains("Codename:"))
            .map(|l| l.get(9..).unwrap_or("").trim().to_string());
        stats.cookbook = line_after(content, "Cookbooks Version");
    }

    stats.status = Some(status(folds).to_string());

    for (name, fold) in folds.iter() {
        if SETUP_FOLD.is_match(name) {
            if let Some(duration) = fold.duration {
                *stats.setup_time_before_build.get_or_insert(0.0) += duration;
            }
        }
    }

    for line in folds.job_lines() {
        let lower = line.to_lowercase();
        if lower.contains("could not resolve dependencies") {
            stats.could_not_resolve_dep = Some(line.trim().to_string());
        }
        for term in CONNECTION_TERMS {
            if lower.contains(&term.to_lowercase()) {
                stats.connection_lines.push(line.trim().to_string());
            }
        }
    }
}

fn line_after(content: &[String], marker: &str) -> Option<String> {
    content.iter()
        .skip_while(|l| !l.contains(marker))
        .nth(1)
        .map(|l| l.trim().to_string())
}

fn ok_or_broken(code: &str) -> &'static str {
    match code.parse::<i64>() {
        Ok(0) => "ok",
        _ => "broken",
    }
}

fn status(folds: &Folds) -> &'static str {
    let out = folds.out_of_fold();
    if out.is_empty() {
        error!("The log file is empty");
        return "unknown";
    }

    let tail = &out[out.len().saturating_sub(10)..];
    for line in tail {
        if let Some(caps) = DONE_BUILD.captures(line).or_else(|| DONE_SCRIPT.captures(line)) {
            return ok_or_broken(&caps[1]);
        }
    }

    for line in folds.job_lines() {
        if line.contains("Done: Job Cancelled") {
            return "cancelled";
        }
        if line.contains("Your build has been stopped") {
            return "stopped";
        }
        if line.contains("The build has been terminated") {
            return "terminated";
        }
    }

    // Some logs never print the final status line, the last command's exit code is the best we have.
    if let Some(last) = out.iter().rev().find(|l| !l.is_empty()) {
        if let Some(caps) = COMMAND_EXITED.captures(last) {
            return ok_or_broken(&caps[2]);
        }
    }

    "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<String> {
        read_lines(s)
    }

    const LOG: &str = "Using worker: worker-linux-docker-05.travis-ci.org:travis-linux-11
travis_fold:start:worker_info
Worker information
instance: ec2-54-211-27-101:travis:ruby
travis_fold:end:worker_info
travis_fold:start:system_info
Build system information
Build language: java
Build image provisioning date and time
Thu Feb  5 15:09:33 UTC 2015
Codename:\ttrusty
Cookbooks Version
a68419e
travis_time:end:0:start=1,finish=2,duration=3000000000
travis_fold:end:system_info
travis_fold:start:git.checkout
$ git clone --depth=50 https://github.com/foo/bar.git
travis_time:end:1:start=1,finish=2,duration=2000000000
travis_fold:end:git.checkout
$ mvn install -DskipTests=true
[ERROR] Failed to connect to repo.maven.apache.org
The command \"mvn test\" exited with 1.

Done. Your build exited with 1.
";

    #[test]
    fn split_into_folds() {
        let folds = split(&lines(LOG));
        assert!(folds.contains("worker_info"));
        assert!(folds.contains("system_info"));
        assert_eq!(folds.get("system_info").unwrap().duration, Some(3.0));
        assert_eq!(folds.get("git.checkout").unwrap().duration, Some(2.0));
        assert_eq!(folds.out_of_fold()[0], "Using worker: worker-linux-docker-05.travis-ci.org:travis-linux-11");
    }

    #[test]
    fn detect_language_and_build_system() {
        let l = lines(LOG);
        let folds = split(&l);
        assert_eq!(primary_language(&folds), "java");
        assert_eq!(build_system_from_commands(&l), "maven");
    }

    #[test]
    fn environment_and_status() {
        let folds = split(&lines(LOG));
        let mut stats = LogStats::new(1, "java");
        analyze(&folds, &mut stats);
        assert_eq!(stats.status.as_deref(), Some("broken"));
        assert_eq!(stats.worker_instance.as_deref(), Some("ec2-54-211-27-101:travis:ruby"));
        assert_eq!(stats.os.as_deref(), Some("trusty"));
        assert_eq!(stats.cookbook.as_deref(), Some("a68419e"));
        assert_eq!(stats.build_image.as_deref(), Some("Thu Feb  5 15:09:33 UTC 2015"));
        assert_eq!(stats.setup_time_before_build, Some(5.0));
        assert_eq!(stats.connection_lines.len(), 1);
    }

    #[test]
    fn no_done_line_is_unknown() {
        let folds = split(&lines("Build language: java\n$ mvn test\nTests run: 3\n"));
        assert_eq!(status(&folds), "unknown");
    }

    #[test]
    fn last_command_exit_code() {
        let folds = split(&lines("$ mvn test\nThe command \"mvn test\" exited with 0.\n\n"));
        assert_eq!(status(&folds), "ok");
    }

    #[test]
    fn cancelled_job() {
        let folds = split(&lines("$ mvn test\nDone: Job Cancelled\nsomething else\n"));
        assert_eq!(status(&folds), "cancelled");
    }

    #[test]
    fn bracketed_language() {
        let folds = split(&lines("travis_fold:start:system_info\nBuild language: [\"java\"]\ntravis_fold:end:system_info\n"));
        assert_eq!(primary_language(&folds), "java");
    }
}
