use crate::AnalyzedLog;
use serde_json::{Map, Value};

/// Everything learned about a log while it is being analyzed.
///
/// Optional fields are reported as `"NA"` when they were never found.
#[derive(Debug, Default, Clone)]
pub struct LogStats {
    pub job_id: u64,
    pub primary_language: String,
    pub status: Option<String>,
    pub setup_time_before_build: Option<f64>,
    pub analyzer: String,
    pub frameworks: Vec<String>,
    pub tests_run: bool,
    pub did_tests_fail: Option<bool>,
    pub num_tests_ok: Option<i64>,
    pub num_tests_failed: Option<i64>,
    pub num_tests_run: Option<i64>,
    pub num_tests_skipped: Option<i64>,
    pub tests_failed: Vec<String>,
    pub test_duration: Option<f64>,
    pub pure_build_duration: Option<f64>,
    pub err_msg: Vec<String>,
    pub build_image: Option<String>,
    pub worker_instance: Option<String>,
    pub using_worker: Option<String>,
    pub os: Option<String>,
    pub connection_lines: Vec<String>,
    pub could_not_resolve_dep: Option<String>,
    pub cookbook: Option<String>,
    pub invalid_log: Option<String>,
    pub build_system: Option<String>,
    pub exceptions: Vec<String>,
    initialized_tests: bool,
}

impl LogStats {
    pub fn new(job_id: u64, primary_language: &str) -> LogStats {
        LogStats {
            job_id,
            primary_language: primary_language.to_string(),
            analyzer: "plain".to_string(),
            ..Default::default()
        }
    }

    pub fn add_framework(&mut self, framework: &str) {
        if !self.frameworks.iter().any(|f| f == framework) {
            self.frameworks.push(framework.to_string());
        }
    }

    /// Start the counters at zero so several test sessions can be summed up.
    pub fn init_tests(&mut self) {
        if !self.initialized_tests {
            self.test_duration = Some(0.0);
            self.num_tests_run = Some(0);
            self.num_tests_failed = Some(0);
            self.num_tests_ok = Some(0);
            self.num_tests_skipped = Some(0);
            self.initialized_tests = true;
        }
    }

    pub fn tests_initialized(&self) -> bool {
        self.initialized_tests
    }

    pub fn add_run(&mut self, n: i64) {
        self.init_tests();
        *self.num_tests_run.get_or_insert(0) += n;
    }

    pub fn add_failed(&mut self, n: i64) {
        self.init_tests();
        *self.num_tests_failed.get_or_insert(0) += n;
    }

    pub fn add_skipped(&mut self, n: i64) {
        self.init_tests();
        *self.num_tests_skipped.get_or_insert(0) += n;
    }

    pub fn add_test_duration(&mut self, secs: f64) {
        self.init_tests();
        *self.test_duration.get_or_insert(0.0) += secs;
    }

    /// Derive the number of passing tests once all sessions were counted.
    pub fn finish_ok_tests(&mut self) {
        if let (Some(run), Some(failed)) = (self.num_tests_run, self.num_tests_failed) {
            *self.num_tests_ok.get_or_insert(0) += run - failed;
        }
    }

    pub fn any_test_failed(&self) -> bool {
        !self.tests_failed.is_empty() || self.num_tests_failed.unwrap_or(0) > 0
    }

    pub fn push_failed_test<I: Into<String>>(&mut self, name: I) {
        self.tests_failed.push(name.into());
    }

    fn sanitize(&mut self) {
        if let (Some(build), Some(test)) = (self.pure_build_duration, self.test_duration) {
            if build < test {
                self.pure_build_duration = None;
            }
        }
    }

    /// Collapse the raw status words into ok, broken, errored and unknown.
    fn normalized_status(&self) -> Option<String> {
        let status = self.status.as_deref()?;
        let status = match status {
            "ok" => "ok",
            "broken" | "failed" => {
                if !self.tests_run && !self.any_test_failed() {
                    "errored"
                } else {
                    "broken"
                }
            },
            "errored" | "cancelled" | "stopped" | "terminated" => "errored",
            _ => "unknown",
        };
        Some(status.to_string())
    }

    pub fn output(mut self) -> AnalyzedLog {
        self.sanitize();

        let mut out = Map::new();
        out.insert("tr_build_id".into(), na());
        out.insert("tr_job_id".into(), Value::from(self.job_id));
        out.insert("tr_log_lan".into(), Value::from(self.primary_language.clone()));
        out.insert("tr_log_status".into(), opt(self.normalized_status()));
        out.insert("tr_log_setup_time".into(), opt(self.setup_time_before_build.map(round2)));
        out.insert("tr_log_analyzer".into(), Value::from(self.analyzer.clone()));
        out.insert("tr_log_frameworks".into(), joined(&self.frameworks));
        out.insert("tr_log_bool_tests_ran".into(), Value::from(self.tests_run));
        out.insert("tr_log_bool_tests_failed".into(), opt(self.did_tests_fail));
        out.insert("tr_log_num_tests_ok".into(), opt(self.num_tests_ok));
        out.insert("tr_log_num_tests_failed".into(), Value::from(self.num_tests_failed.unwrap_or(0)));
        out.insert("tr_log_num_tests_run".into(), Value::from(self.num_tests_run.unwrap_or(0)));
        out.insert("tr_log_num_tests_skipped".into(), opt(self.num_tests_skipped));
        out.insert("tr_log_tests_failed".into(), joined(&self.tests_failed));
        out.insert("tr_log_testduration".into(), opt(self.test_duration.map(round2)));
        out.insert("tr_log_buildduration".into(), opt(self.pure_build_duration.map(round2)));
        out.insert("tr_err_msg".into(), joined(&self.err_msg));
        out.insert("tr_build_image".into(), opt(self.build_image));
        out.insert("tr_worker_instance".into(), opt(self.worker_instance));
        out.insert("tr_using_worker".into(), opt(self.using_worker));
        out.insert("tr_os".into(), opt(self.os));
        out.insert("tr_connection_lines".into(), joined(&self.connection_lines));
        out.insert("tr_could_not_resolve_dep".into(), opt(self.could_not_resolve_dep));
        out.insert("tr_cookbook".into(), opt(self.cookbook));
        out.insert("tr_invalid_log".into(), opt(self.invalid_log));
        out.insert("tr_build_system".into(), opt(self.build_system));

        AnalyzedLog::with_exceptions(out, self.exceptions)
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn na() -> Value {
    Value::from("NA")
}

fn opt<T: Into<Value>>(v: Option<T>) -> Value {
    v.map(Into::into).unwrap_or_else(na)
}

fn joined(list: &[String]) -> Value {
    Value::from(list.join("#"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_values_are_na() {
        let out = LogStats::new(42, "java").output();
        assert_eq!(out["tr_job_id"], 42);
        assert_eq!(out["tr_log_status"], "NA");
        assert_eq!(out["tr_log_num_tests_run"], 0);
        assert_eq!(out["tr_log_num_tests_failed"], 0);
        assert_eq!(out["tr_log_num_tests_ok"], "NA");
        assert_eq!(out["tr_log_tests_failed"], "");
        assert_eq!(out.len(), 26);
    }

    #[test]
    fn counts_ok_tests() {
        let mut stats = LogStats::new(1, "python");
        stats.add_run(10);
        stats.add_failed(3);
        stats.finish_ok_tests();
        assert_eq!(stats.num_tests_ok, Some(7));
    }

    #[test]
    fn build_shorter_than_tests_is_dropped() {
        let mut stats = LogStats::new(1, "java");
        stats.add_test_duration(20.0);
        stats.pure_build_duration = Some(10.0);
        let out = stats.output();
        assert_eq!(out["tr_log_buildduration"], "NA");
        assert_eq!(out["tr_log_testduration"], 20.0);
    }

    #[test]
    fn status_without_tests_is_errored() {
        let mut stats = LogStats::new(1, "java");
        stats.status = Some("broken".to_string());
        assert_eq!(stats.clone().output()["tr_log_status"], "errored");

        stats.tests_run = true;
        stats.push_failed_test("testFoo(a.B)");
        assert_eq!(stats.clone().output()["tr_log_status"], "broken");

        stats.status = Some("cancelled".to_string());
        assert_eq!(stats.output()["tr_log_status"], "errored");
    }
}
