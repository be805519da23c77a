use crate::pylit;
use crate::AnalyzedLog;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Attributes that legitimately differ between two runs of the same job.
pub const IGNORED_ATTRIBUTES: &[&str] = &[
    "tr_log_testduration",
    "tr_log_buildduration",
    "tr_log_setup_time",
    "tr_err_msg",
    "tr_build_image",
    "tr_worker_instance",
    "tr_connection_lines",
    "tr_using_worker",
    "tr_could_not_resolve_dep",
    "tr_os",
    "tr_cookbook",
];

const TESTS_FAILED: &str = "tr_log_tests_failed";
const STATUS: &str = "tr_log_status";

lazy_static! {
    static ref PARAMETERIZED: Regex = Regex::new(r"^(?P<method>[\w.]+)\((?P<params>.*?)\)(?P<rest>(?: \(\S+\))?)$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    pub attr: String,
    pub reproduced: Value,
    pub orig: Value,
}

/// Canonical spelling of a python test name, parameters are re-printed with sorted dict keys.
///
/// Names that aren't parameterized or whose parameters aren't plain literals are returned as is.
pub fn normalize_python_test(name: &str) -> String {
    let caps = match PARAMETERIZED.captures(name) {
        Some(caps) => caps,
        None => return name.to_string(),
    };
    match pylit::parse_args(&caps["params"]) {
        Ok(args) => {
            let args = args.iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}({}){}", &caps["method"], args, &caps["rest"])
        },
        Err(_) => name.to_string(),
    }
}

fn failed_tests(log: &AnalyzedLog, python: bool) -> BTreeSet<String> {
    log.tests_failed()
        .into_iter()
        .map(|t| if python { normalize_python_test(t) } else { t.to_string() })
        .collect()
}

fn difference(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Value {
    Value::from(a.difference(b).cloned().collect::<Vec<_>>())
}

/// Compare every attribute of `original` with the reproduced one.
///
/// Returns whether both logs match and the attributes that don't.
pub fn compare_attributes(reproduced: &AnalyzedLog, original: &AnalyzedLog, ignore_status: bool) -> (bool, Vec<Mismatch>) {
    let python = original.language() == "python";
    let mut mismatches = Vec::new();

    for (attr, orig) in original.iter() {
        if attr == TESTS_FAILED {
            let repr_set = failed_tests(reproduced, python);
            let orig_set = failed_tests(original, python);
            if repr_set != orig_set {
                mismatches.push(Mismatch {
                    attr: attr.clone(),
                    reproduced: difference(&repr_set, &orig_set),
                    orig: difference(&orig_set, &repr_set),
                });
            }
            continue;
        }

        if IGNORED_ATTRIBUTES.contains(&attr.as_str()) || (ignore_status && attr == STATUS) {
            continue;
        }

        let repr = reproduced.get(attr).unwrap_or(&Value::Null);
        if repr != orig {
            mismatches.push(Mismatch {
                attr: attr.clone(),
                reproduced: repr.clone(),
                orig: orig.clone(),
            });
        }
    }

    (mismatches.is_empty(), mismatches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log(value: Value) -> AnalyzedLog {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn identical_logs_match() {
        let a = log(json!({"tr_log_status": "broken", "tr_log_num_tests_failed": 2, "tr_log_tests_failed": "a#b"}));
        let b = log(json!({"tr_log_status": "broken", "tr_log_num_tests_failed": 2, "tr_log_tests_failed": "b#a"}));
        assert_eq!(compare_attributes(&a, &b, false), (true, vec![]));
    }

    #[test]
    fn failed_tests_are_compared_as_sets() {
        let repr = log(json!({"tr_log_lan": "java", "tr_log_tests_failed": "a#b#c"}));
        let orig = log(json!({"tr_log_lan": "java", "tr_log_tests_failed": "a#b#d"}));
        let (matched, mismatches) = compare_attributes(&repr, &orig, false);
        assert!(!matched);
        assert_eq!(mismatches, vec![Mismatch {
            attr: "tr_log_tests_failed".to_string(),
            reproduced: json!(["c"]),
            orig: json!(["d"]),
        }]);
    }

    #[test]
    fn empty_failed_tests_are_empty_sets() {
        let repr = log(json!({"tr_log_tests_failed": ""}));
        let orig = log(json!({"tr_log_tests_failed": ""}));
        assert!(compare_attributes(&repr, &orig, false).0);
    }

    #[test]
    fn ignored_attributes_and_status() {
        let repr = log(json!({"tr_log_status": "ok", "tr_log_testduration": 1.0, "tr_os": "focal"}));
        let orig = log(json!({"tr_log_status": "broken", "tr_log_testduration": 9.0, "tr_os": "trusty"}));
        assert!(compare_attributes(&repr, &orig, true).0);

        let (matched, mismatches) = compare_attributes(&repr, &orig, false);
        assert!(!matched);
        assert_eq!(mismatches, vec![Mismatch {
            attr: "tr_log_status".to_string(),
            reproduced: json!("ok"),
            orig: json!("broken"),
        }]);
    }

    #[test]
    fn unknown_status_on_both_sides_matches() {
        let repr = log(json!({"tr_log_status": "unknown", "tr_log_num_tests_run": 0}));
        let orig = log(json!({"tr_log_status": "unknown", "tr_log_num_tests_run": 0}));
        assert!(compare_attributes(&repr, &orig, false).0);
    }

    #[test]
    fn missing_reproduced_attribute_is_a_mismatch() {
        let repr = log(json!({}));
        let orig = log(json!({"tr_log_num_tests_run": 3}));
        let (matched, mismatches) = compare_attributes(&repr, &orig, false);
        assert!(!matched);
        assert_eq!(mismatches[0].reproduced, Value::Null);
    }

    #[test]
    fn python_parameters_are_normalized() {
        let repr = log(json!({"tr_log_lan": "python", "tr_log_tests_failed": "Test.t((1, {'b': 2, 'a': 1}))"}));
        let orig = log(json!({"tr_log_lan": "python", "tr_log_tests_failed": "Test.t((1, {'a': 1, 'b': 2}))"}));
        assert_eq!(compare_attributes(&repr, &orig, false), (true, vec![]));
    }

    #[test]
    fn normalize_names() {
        assert_eq!(normalize_python_test("test_a(1,2) (pkg.Test)"), "test_a(1, 2) (pkg.Test)");
        assert_eq!(normalize_python_test("test_plain (pkg.Test)"), "test_plain (pkg.Test)");
        assert_eq!(normalize_python_test("test_obj(<Foo object>)"), "test_obj(<Foo object>)");
    }
}
