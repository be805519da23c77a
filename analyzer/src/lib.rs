use bugswarm_common::errors::*;
use bugswarm_common::CiService;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error;
use std::fmt;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::Path;

pub mod comparer;
pub mod exceptions;
pub mod folds;
pub mod github;
pub mod java;
pub mod javascript;
pub mod pylit;
pub mod python;
pub mod stats;
pub mod travis;

pub use comparer::{compare_attributes, Mismatch};

use crate::stats::LogStats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    UnsupportedLanguage(String),
    LogReadError(String),
}

impl fmt::Display for AnalyzerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzerError::UnsupportedLanguage(lang) => {
                write!(f, "Log was not generated from a job in a supported language: {:?}", lang)
            },
            AnalyzerError::LogReadError(msg) => write!(f, "Failed to read log: {}", msg),
        }
    }
}

impl error::Error for AnalyzerError {}

/// Attribute name to value, as extracted from one build log.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct AnalyzedLog {
    attrs: Map<String, Value>,
    exceptions: Vec<String>,
}

impl AnalyzedLog {
    pub fn with_exceptions(attrs: Map<String, Value>, exceptions: Vec<String>) -> AnalyzedLog {
        AnalyzedLog { attrs, exceptions }
    }

    pub fn status(&self) -> &str {
        self.attrs.get("tr_log_status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    pub fn set_status(&mut self, status: &str) {
        self.attrs.insert("tr_log_status".to_string(), Value::from(status));
    }

    pub fn language(&self) -> &str {
        self.attrs.get("tr_log_lan")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    pub fn tests_failed(&self) -> Vec<&str> {
        self.attrs.get("tr_log_tests_failed")
            .and_then(Value::as_str)
            .map(|s| s.split('#').filter(|t| !t.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn num_tests_failed(&self) -> Option<i64> {
        self.attrs.get("tr_log_num_tests_failed").and_then(Value::as_i64)
    }

    pub fn num_tests_run(&self) -> Option<i64> {
        self.attrs.get("tr_log_num_tests_run").and_then(Value::as_i64)
    }

    /// Exception class names found in the stack traces of failed java tests.
    pub fn exceptions(&self) -> &[String] {
        &self.exceptions
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.attrs.clone())
    }
}

impl Deref for AnalyzedLog {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.attrs
    }
}

impl DerefMut for AnalyzedLog {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.attrs
    }
}

impl From<Map<String, Value>> for AnalyzedLog {
    fn from(attrs: Map<String, Value>) -> AnalyzedLog {
        AnalyzedLog {
            attrs,
            exceptions: Vec::new(),
        }
    }
}

impl From<AnalyzedLog> for Map<String, Value> {
    fn from(log: AnalyzedLog) -> Map<String, Value> {
        log.attrs
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AnalyzeOptions {
    /// Skips build system inference for java logs when set.
    pub build_system: Option<String>,
    pub trigger_sha: Option<String>,
    pub repo: Option<String>,
    /// Language of the job as reported by the CI provider.
    pub language: Option<String>,
    /// Analyze as java no matter what the log looks like.
    pub force_java: bool,
}

/// The language families the analyzer knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Java,
    Python,
    JavaScript,
    Ruby,
    Other,
}

impl Family {
    pub fn from_language(lang: &str) -> Option<Family> {
        match lang.to_lowercase().as_str() {
            "" | "unknown" => None,
            "java" | "scala" | "groovy" | "clojure" => Some(Family::Java),
            "python" => Some(Family::Python),
            "node_js" | "node" | "javascript" | "typescript" => Some(Family::JavaScript),
            "ruby" => Some(Family::Ruby),
            _ => Some(Family::Other),
        }
    }
}

/// Read a log from disk, replacing invalid utf-8.
pub fn read_log<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let buf = fs::read(path)
        .map_err(|err| AnalyzerError::LogReadError(format!("{:?}: {}", path, err)))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub fn analyze<P: AsRef<Path>>(path: P, job_id: u64, ci_service: CiService, opts: &AnalyzeOptions) -> Result<AnalyzedLog> {
    let text = read_log(path)?;
    analyze_str(&text, job_id, ci_service, opts)
}

pub fn analyze_str(text: &str, job_id: u64, ci_service: CiService, opts: &AnalyzeOptions) -> Result<AnalyzedLog> {
    let (lines, folds, language) = match ci_service {
        CiService::Travis => {
            let lines = travis::read_lines(text);
            let folds = travis::split(&lines);
            let language = travis::primary_language(&folds);
            (lines, folds, language)
        },
        CiService::Github => {
            let (lines, times) = github::read_lines(text);
            let folds = github::split(&lines, Some(&times[..]));
            let language = github::primary_language(&folds, opts.language.as_deref());
            (lines, folds, language)
        },
    };

    let language = if opts.force_java {
        warn!("Forcing java analyzer for job {}", job_id);
        "java".to_string()
    } else {
        language
    };

    let family = Family::from_language(&language)
        .ok_or_else(|| AnalyzerError::UnsupportedLanguage(language.clone()))?;

    let mut stats = LogStats::new(job_id, &language);
    match ci_service {
        CiService::Travis => travis::analyze(&folds, &mut stats),
        CiService::Github => github::analyze(&folds, &mut stats),
    }

    match family {
        Family::Java => {
            let build_system = match &opts.build_system {
                Some(bs) if !bs.is_empty() && bs != "NA" => bs.to_lowercase(),
                _ => {
                    debug!("Inferring build system of job {} ({:?} at {:?}) from build commands",
                        job_id, opts.repo, opts.trigger_sha);
                    match ci_service {
                        CiService::Travis => travis::build_system_from_commands(&lines),
                        CiService::Github => github::build_system_from_commands(&lines),
                    }
                },
            };
            java::analyze(&build_system, &folds, &mut stats);
        },
        Family::Python => python::analyze(&folds, &mut stats),
        Family::JavaScript => javascript::analyze(&folds, &mut stats),
        Family::Ruby | Family::Other => {
            debug!("No test analyzer for {:?}, reporting status and durations only", language);
        },
    }

    Ok(stats.output())
}

/// Same lines the analyzer would see, used by callers that scan logs themselves.
pub fn log_lines(text: &str, ci_service: CiService) -> Vec<String> {
    match ci_service {
        CiService::Travis => travis::read_lines(text),
        CiService::Github => github::read_lines(text).0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_language_is_unsupported() {
        let err = analyze_str("hello\nworld\n", 1, CiService::Travis, &AnalyzeOptions::default()).unwrap_err();
        let err = err.downcast_ref::<AnalyzerError>().unwrap();
        assert!(matches!(err, AnalyzerError::UnsupportedLanguage(_)));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = analyze("/nonexistent/bugswarm.log", 1, CiService::Github, &AnalyzeOptions::default()).unwrap_err();
        let err = err.downcast_ref::<AnalyzerError>().unwrap();
        assert!(matches!(err, AnalyzerError::LogReadError(_)));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        fs::write(&path, b"Build language: ruby\n\xff\xfe broken\n").unwrap();
        let text = read_log(&path).unwrap();
        assert!(text.contains('\u{fffd}'));
    }

    #[test]
    fn github_falls_back_to_job_language() {
        let log = "2022-08-09T12:00:00.0000000Z ##[group]Run ./build.sh\n\
                   2022-08-09T12:00:01.0000000Z ./build.sh\n\
                   2022-08-09T12:00:02.0000000Z ##[endgroup]\n\
                   2022-08-09T12:00:03.0000000Z done\n";
        let opts = AnalyzeOptions {
            language: Some("ruby".to_string()),
            ..Default::default()
        };
        let out = analyze_str(log, 7, CiService::Github, &opts).unwrap();
        assert_eq!(out.language(), "ruby");
        assert_eq!(out.status(), "ok");
        assert_eq!(out["tr_log_analyzer"], "plain");
    }

    #[test]
    fn roundtrip_through_json_keeps_attributes() {
        let mut map = Map::new();
        map.insert("tr_log_status".to_string(), Value::from("ok"));
        let log = AnalyzedLog::from(map);
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json, serde_json::json!({"tr_log_status": "ok"}));
        let back: AnalyzedLog = serde_json::from_value(json).unwrap();
        assert_eq!(back.status(), "ok");
    }
}
