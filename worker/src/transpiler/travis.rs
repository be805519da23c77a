//! Build scripts for Travis jobs.
//!
//! The generated script mimics the log layout of the hosted service closely
//! enough for the analyzer: `travis_fold`/`travis_time` markers around setup
//! phases, `$ <cmd>` echo lines and the final `Done. Your build exited with N.`

use bugswarm_common::errors::*;
use bugswarm_common::model::{JobPairJob, JobRecord};
use serde_json::Value;
use std::fmt::Write;

pub const BUILD_ROOT: &str = "/home/travis/build";
const IMAGE_REPO: &str = "quay.io/travisci";

/// Phases run before `script`, a failure stops the build.
const SETUP_PHASES: &[&str] = &["before_install", "install", "before_script"];

const PRELUDE: &str = r#"travis_start() {
  TRAVIS_TIMER_ID=$(printf %08x $((RANDOM * RANDOM)))
  TRAVIS_TIMER_START_TIME=$(date +%s%N)
  echo "travis_time:start:$TRAVIS_TIMER_ID"
}

travis_end() {
  local finish=$(date +%s%N)
  echo "travis_time:end:$TRAVIS_TIMER_ID:start=$TRAVIS_TIMER_START_TIME,finish=$finish,duration=$((finish - TRAVIS_TIMER_START_TIME))"
}

travis_cmd() {
  local cmd=$1 phase=$2
  echo "\$ $cmd"
  travis_start
  eval "$cmd"
  local result=$?
  travis_end
  if [ "$phase" = "script" ]; then
    echo "The command \"$cmd\" exited with $result."
    if [ $result -ne 0 ]; then TRAVIS_TEST_RESULT=1; fi
  elif [ $result -ne 0 ] && [ "$phase" != "after_script" ]; then
    echo "The command \"$cmd\" failed and exited with $result during $phase."
    echo ""
    echo "Your build has been stopped."
    exit $result
  fi
  return 0
}
"#;

fn language_image(language: &str) -> &str {
    match language {
        "clojure" | "scala" | "groovy" | "java" => "jvm",
        "elixir" => "erlang",
        "node_js" => "node-js",
        other => other,
    }
}

/// The image the job originally ran in, or the stock image of its language.
pub fn base_image(job: &JobRecord, jp_job: &JobPairJob) -> String {
    match &jp_job.heuristically_parsed_image_tag {
        Some(tag) if !tag.is_empty() => tag.clone(),
        _ => {
            let lang = job.language.to_lowercase();
            format!("{}/travis-{}:latest", IMAGE_REPO, language_image(&lang))
        },
    }
}

fn commands(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(cmd)) => vec![cmd.clone()],
        Some(Value::Array(cmds)) => cmds.iter()
            .filter_map(|c| match c {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn first_str(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(list) => first_str(list.first()),
        _ => None,
    }
}

/// `env:` entries, either a single string, a list or `global`/`matrix` sections.
fn env_vars(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).map(String::from).collect(),
        Some(Value::Object(sections)) => {
            let mut vars = env_vars(sections.get("global"));
            vars.extend(env_vars(sections.get("matrix")).into_iter().take(1));
            vars.extend(env_vars(sections.get("jobs")).into_iter().take(1));
            vars
        },
        _ => Vec::new(),
    }
}

/// Version selector invocations for the language runtimes set in `config`.
fn version_selectors(config: &Value) -> Vec<String> {
    let mut cmds = Vec::new();
    if let Some(jdk) = first_str(config.get("jdk")) {
        cmds.push(format!("jdk_switcher use {}", jdk));
    }
    if let Some(python) = first_str(config.get("python")) {
        cmds.push(format!("source ~/virtualenv/python{}/bin/activate", python));
    }
    if let Some(node) = first_str(config.get("node_js")) {
        cmds.push(format!("nvm install {}", node));
    }
    if let Some(ruby) = first_str(config.get("rvm")) {
        cmds.push(format!("rvm use {} --install --binary --fuzzy", ruby));
    }
    cmds
}

/// Commands Travis runs when a phase isn't configured.
fn default_commands(phase: &str, language: &str, build_system: Option<&str>) -> Vec<String> {
    let cmd = match (phase, language, build_system) {
        ("install", "java", Some("gradle")) => "gradle assemble",
        ("script", "java", Some("gradle")) => "gradle check",
        ("install", "java", Some("ant")) => return Vec::new(),
        ("script", "java", Some("ant")) => "ant test",
        ("install", "java", _) => "mvn install -DskipTests=true -Dmaven.javadoc.skip=true -B -V",
        ("script", "java", _) => "mvn test -B",
        ("install", "node_js" | "javascript", _) => "npm install",
        ("script", "node_js" | "javascript", _) => "npm test",
        ("install", "ruby", _) => "bundle install --jobs=3 --retry=3",
        ("script", "ruby", _) => "rake",
        ("install", "python", _) => "if [ -f requirements.txt ]; then pip install -r requirements.txt; fi",
        _ => return Vec::new(),
    };
    vec![cmd.to_string()]
}

fn quote(cmd: &str) -> String {
    shell_escape::unix::escape(cmd.into()).into_owned()
}

/// Generate `build.sh` for a Travis job checked out at `<BUILD_ROOT>/<repo>`.
pub fn build_script(repo: &str, job: &JobRecord, build_system: Option<&str>) -> Result<String> {
    let config = &job.config;
    if !config.is_object() {
        bail!("Travis config of job {} is not a mapping", job.job_id);
    }
    let language = config.get("language")
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .unwrap_or_else(|| job.language.to_lowercase());

    let mut script = String::from("#!/bin/bash\n\n");
    script.push_str("set -a\nsource /etc/environment\nset +a\n\n");
    script.push_str(PRELUDE);
    script.push('\n');
    writeln!(script, "export TRAVIS=true CI=true TRAVIS_BUILD_DIR={}/{} TRAVIS_JOB_ID={}", BUILD_ROOT, repo, job.job_id)?;
    script.push_str("TRAVIS_TEST_RESULT=0\n");
    writeln!(script, "cd {}/{}", BUILD_ROOT, repo)?;
    script.push('\n');

    script.push_str("echo \"travis_fold:start:system_info\"\n");
    writeln!(script, "echo \"Build language: {}\"", language)?;
    script.push_str("echo \"travis_fold:end:system_info\"\n\n");

    for var in env_vars(config.get("env")) {
        writeln!(script, "echo {}", quote(&format!("Setting environment variables from .travis.yml\n$ export {}", var)))?;
        writeln!(script, "export {}", var)?;
    }

    for cmd in version_selectors(config) {
        writeln!(script, "travis_cmd {} setup", quote(&cmd))?;
    }

    for phase in SETUP_PHASES.iter().chain(["script", "after_script"].iter()) {
        let mut cmds = commands(config.get(*phase));
        if cmds.is_empty() && config.get(*phase).is_none() {
            cmds = default_commands(phase, &language, build_system);
        }
        if *phase == "script" && cmds.is_empty() {
            bail!("Travis job {} has nothing to run in script", job.job_id);
        }

        let folded = *phase != "script";
        for (i, cmd) in cmds.iter().enumerate() {
            let fold = format!("{}.{}", phase, i + 1);
            if folded {
                writeln!(script, "echo \"travis_fold:start:{}\"", fold)?;
            }
            writeln!(script, "travis_cmd {} {}", quote(cmd), phase)?;
            if folded {
                writeln!(script, "echo \"travis_fold:end:{}\"", fold)?;
            }
        }
        script.push('\n');
    }

    script.push_str("echo \"\"\n");
    script.push_str("echo \"Done. Your build exited with $TRAVIS_TEST_RESULT.\"\n");
    script.push_str("exit $TRAVIS_TEST_RESULT\n");
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(config: Value) -> JobRecord {
        JobRecord {
            job_id: 303397545,
            build_job: "1234.2".to_string(),
            language: "java".to_string(),
            config,
            failed_step_index: None,
            steps: Vec::new(),
            extra: Default::default(),
        }
    }

    #[test]
    fn phases_in_order() {
        let job = job(json!({
            "language": "java",
            "jdk": ["oraclejdk8"],
            "env": {"global": ["MAVEN_OPTS=-Xmx1g"]},
            "before_install": "chmod +x mvnw",
            "install": ["./mvnw install -DskipTests"],
            "script": ["./mvnw test"],
            "after_script": "cat target/*.log",
        }));
        let script = build_script("square/okhttp", &job, Some("maven")).unwrap();

        assert!(script.contains("cd /home/travis/build/square/okhttp\n"));
        assert!(script.contains("echo \"Build language: java\"\n"));
        assert!(script.contains("export MAVEN_OPTS=-Xmx1g\n"));
        assert!(script.contains("travis_cmd 'jdk_switcher use oraclejdk8' setup\n"));

        let before = script.find("travis_cmd 'chmod +x mvnw' before_install").unwrap();
        let install = script.find("travis_cmd './mvnw install -DskipTests' install").unwrap();
        let test = script.find("travis_cmd './mvnw test' script").unwrap();
        let after = script.find("travis_cmd 'cat target/*.log' after_script").unwrap();
        assert!(before < install && install < test && test < after);

        assert!(script.contains("echo \"travis_fold:start:install.1\"\n"));
        assert!(!script.contains("travis_fold:start:script.1"));
        assert!(script.ends_with("echo \"Done. Your build exited with $TRAVIS_TEST_RESULT.\"\nexit $TRAVIS_TEST_RESULT\n"));
    }

    #[test]
    fn default_commands_by_build_system() {
        let script = build_script("a/b", &job(json!({"language": "java"})), Some("gradle")).unwrap();
        assert!(script.contains("travis_cmd 'gradle assemble' install\n"));
        assert!(script.contains("travis_cmd 'gradle check' script\n"));

        let script = build_script("a/b", &job(json!({"language": "java"})), None).unwrap();
        assert!(script.contains("travis_cmd 'mvn test -B' script\n"));
    }

    #[test]
    fn explicitly_empty_install() {
        let script = build_script("a/b", &job(json!({"language": "java", "install": true, "script": "mvn verify"})), Some("maven")).unwrap();
        assert!(!script.contains("mvn install"));
        assert!(script.contains("travis_cmd 'mvn verify' script\n"));
    }

    #[test]
    fn nothing_to_run() {
        let res = build_script("a/b", &job(json!({"language": "go"})), None);
        assert!(res.is_err());
    }

    #[test]
    fn image_from_log_or_language() {
        let record = job(json!({}));
        let mut jp_job: JobPairJob = serde_json::from_value(json!({"job_id": 303397545})).unwrap();
        assert_eq!(base_image(&record, &jp_job), "quay.io/travisci/travis-jvm:latest");

        jp_job.heuristically_parsed_image_tag = Some("travisci/ci-garnet:packer-1512502276-986baf0".to_string());
        assert_eq!(base_image(&record, &jp_job), "travisci/ci-garnet:packer-1512502276-986baf0");
    }
}
