//! Rendering of `build.sh` and the composite action scripts.

use super::env::WORKFLOW_DIR;
use super::expressions::step_var;
use bugswarm_common::errors::*;

/// One step of the generated script, every command field is a ready-to-use bash word.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// `3`, or `3.1` inside a composite action.
    pub number: String,
    pub name: String,
    pub id: Option<String>,
    pub setup_cmd: Option<String>,
    pub run_cmd: String,
    /// `K=V ` assignments passed through `env`.
    pub envs: String,
    pub working_dir: Option<String>,
    pub filename: String,
    /// Command running the script, `{}` is replaced with its path.
    pub exec_template: String,
    pub condition: String,
    pub continue_on_error: String,
}

#[derive(Debug, Clone, Copy)]
pub enum Header<'a> {
    /// Top level `build.sh` of a job.
    Job {
        job_id: u64,
        build_path: &'a str,
        /// Runner label like `ubuntu-22.04`.
        runs_on: Option<&'a str>,
    },
    /// Script of a composite action, run from inside `build.sh`.
    Composite,
}

/// Shell, script extension and command for `shell:`.
pub fn shell_template(shell: Option<&str>) -> (&'static str, String) {
    match shell {
        None => ("sh", "bash -e {}".to_string()),
        Some("bash") => ("sh", "bash --noprofile --norc -eo pipefail {}".to_string()),
        Some("python") => ("py", "python {}".to_string()),
        Some("sh") => ("sh", "sh -e {}".to_string()),
        Some("pwsh") => ("ps1", "pwsh -command \". '{}'\"".to_string()),
        Some(custom) => ("script", custom.to_string()),
    }
}

const UPDATE_CURRENT_ENV: &str = r#"update_current_env() {
  CURRENT_ENV=()
  unset CURRENT_ENV_MAP
  declare -gA CURRENT_ENV_MAP
  if [ -f /home/github/workflow/envs.txt ]; then
    local KEY=""
    local VALUE=""
    local DELIMITER=""
    local regex="(.*)<<(.*)"
    local regex2="(.*)=(.*)"

    while read line; do
      if [[ "$KEY" = "" && "$line" =~ $regex ]]; then
        KEY="${BASH_REMATCH[1]}"
        DELIMITER="${BASH_REMATCH[2]}"
      elif [[ "$KEY" != "" && "$line" = "$DELIMITER" ]]; then
        CURRENT_ENV_MAP["$KEY"]="$VALUE"
        KEY=""
        VALUE=""
        DELIMITER=""
      elif [[ "$KEY" != "" ]]; then
        if [[ $VALUE = "" ]]; then
          VALUE="$line"
        else
          VALUE="$VALUE
$line"
        fi
      elif [[ "$line" =~ $regex2 ]]; then
        CURRENT_ENV_MAP["${BASH_REMATCH[1]}"]="${BASH_REMATCH[2]}"
      fi
    done < /home/github/workflow/envs.txt

    for key in "${!CURRENT_ENV_MAP[@]}"; do
      val="${CURRENT_ENV_MAP["$key"]}"
      CURRENT_ENV+=("${key}=${val}")
    done
  else
    echo -n "" > /home/github/workflow/envs.txt
  fi
}"#;

/// Runner hooks called around every step that runs, the cacher snapshots the toolcache with them.
pub const STEP_STARTED_HOOK: &str = "ACTIONS_RUNNER_HOOK_STEP_STARTED";
pub const STEP_COMPLETED_HOOK: &str = "ACTIONS_RUNNER_HOOK_STEP_COMPLETED";

fn run_hook(var: &str) -> String {
    format!("if [ -n \"${{{var}:-}}\" ]; then bash \"${var}\" > /dev/null 2>&1; fi", var = var)
}

fn run_with_envs(envs: &str, command: &str) -> String {
    format!("env {}\\\n{}", envs, command)
}

fn push_header(lines: &mut Vec<String>, header: Header<'_>) {
    match header {
        Header::Job { job_id, build_path, runs_on } => {
            let release = runs_on
                .and_then(|label| label.get(7..))
                .filter(|release| !release.is_empty())
                .unwrap_or("Unknown");
            lines.extend([
                "#!/usr/bin/env bash".to_string(),
                format!("export GITHUB_WORKSPACE={}", build_path),
                String::new(),
                "set -o allexport".to_string(),
                "source /etc/environment".to_string(),
                "set +o allexport".to_string(),
                String::new(),
                "export _GITHUB_JOB_STATUS=success".to_string(),
                String::new(),
                "cd ${GITHUB_WORKSPACE}".to_string(),
                String::new(),
                // the analyzer reads the OS from this group
                "echo \"##[group]Operating System\"".to_string(),
                "echo \"Ubuntu\"".to_string(),
                format!("echo \"{}\"", release),
                "echo \"LTS\"".to_string(),
                "echo \"##[endgroup]\"".to_string(),
                String::new(),
                format!("mkdir -p {}/", WORKFLOW_DIR),
                String::new(),
                format!("cp /home/github/{}/event.json {}/event.json", job_id, WORKFLOW_DIR),
                format!("echo -n > {}/envs.txt", WORKFLOW_DIR),
                format!("echo -n > {}/paths.txt", WORKFLOW_DIR),
                String::new(),
                "CURRENT_ENV=()".to_string(),
            ]);
        },
        Header::Composite => {
            lines.extend([
                "#!/usr/bin/env bash".to_string(),
                String::new(),
                "set -o allexport".to_string(),
                "source /etc/environment".to_string(),
                "set +o allexport".to_string(),
                String::new(),
                "cd ${GITHUB_WORKSPACE}".to_string(),
                "CURRENT_ENV=()".to_string(),
            ]);
        },
    }
}

fn push_step(lines: &mut Vec<String>, step: &Step, steps_dir: &str) {
    let filepath = format!("{}/{}", steps_dir, step.filename);
    let exec = step.exec_template
        .replace("{0}", &filepath)
        .replace("{}", &filepath);
    let name = shell_escape::unix::escape(step.name.as_str().into());

    lines.extend([
        String::new(),
        "update_current_env".to_string(),
        format!("if [ -f {}/paths.txt ]; then", WORKFLOW_DIR),
        "   while read NEW_PATH".to_string(),
        "   do".to_string(),
        "      PATH=\"$(eval echo \"$NEW_PATH\"):$PATH\"".to_string(),
        format!("   done <<< \"$(cat {}/paths.txt)\"", WORKFLOW_DIR),
        "else".to_string(),
        format!("  echo -n '' > {}/paths.txt", WORKFLOW_DIR),
        "fi".to_string(),
        String::new(),
        format!("if [ ! -f {}/event.json ]; then", WORKFLOW_DIR),
        format!("  echo -n '{{}}' > {}/event.json", WORKFLOW_DIR),
        "fi".to_string(),
        String::new(),
        format!("STEP_CONDITION={}", step.condition),
        "if [[ \"$STEP_CONDITION\" = \"true\" ]]; then".to_string(),
        run_hook(STEP_STARTED_HOOK),
        String::new(),
        format!("echo \"##[group]\"{}", name),
        "echo \"##[endgroup]\"".to_string(),
    ]);

    if let Some(setup) = &step.setup_cmd {
        lines.extend([
            format!("printf '%s\\n' {} > {}", setup, filepath),
            format!("chmod u+x {}", filepath),
            run_with_envs(&step.envs, &exec),
        ]);
    }

    lines.extend([
        format!("printf '%s\\n' {} > {}", step.run_cmd, filepath),
        format!("chmod u+x {}", filepath),
        String::new(),
    ]);
    if let Some(dir) = &step.working_dir {
        lines.push(format!("pushd {} > /dev/null", dir));
    }
    lines.extend([
        "EXIT_CODE=0".to_string(),
        run_with_envs(&step.envs, &exec),
        "EXIT_CODE=$?".to_string(),
    ]);
    if step.working_dir.is_some() {
        lines.push("popd > /dev/null".to_string());
    }

    lines.extend([
        String::new(),
        "if [[ $EXIT_CODE != 0 ]]; then".to_string(),
        format!("  CONTINUE_ON_ERROR={}", step.continue_on_error),
        "  if [[ \"$CONTINUE_ON_ERROR\" != \"true\" ]]; then".to_string(),
        "    export _GITHUB_JOB_STATUS=failure".to_string(),
        "  fi".to_string(),
        "  echo \"\" && echo \"##[error]Process completed with exit code $EXIT_CODE.\"".to_string(),
    ]);

    if let Some(id) = &step.id {
        let outcome = step_var(id, "outcome");
        let conclusion = step_var(id, "conclusion");
        lines.extend([
            format!("  {}=failure", outcome),
            "  if [[ \"$CONTINUE_ON_ERROR\" != \"true\" ]]; then".to_string(),
            format!("    {}=failure", conclusion),
            "  else".to_string(),
            format!("    {}=success", conclusion),
            "  fi".to_string(),
            "else".to_string(),
            format!("  {}=success", outcome),
            format!("  {}=success", conclusion),
        ]);
    }

    lines.extend([
        "fi".to_string(),
        run_hook(STEP_COMPLETED_HOOK),
        "fi".to_string(),
    ]);
}

pub fn generate(header: Header<'_>, steps: &[Step], steps_dir: &str) -> String {
    let mut lines = Vec::new();
    push_header(&mut lines, header);
    lines.push(UPDATE_CURRENT_ENV.to_string());

    for step in steps {
        debug!("Generating build script for step {:?} (#{})", step.name, step.number);
        push_step(&mut lines, step, steps_dir);
    }

    lines.extend([
        String::new(),
        "if [[ $_GITHUB_JOB_STATUS != \"success\" ]]; then".to_string(),
        "   exit 1".to_string(),
        "fi".to_string(),
    ]);

    let mut script = lines.join("\n");
    script.push('\n');
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step() -> Step {
        Step {
            number: "1".to_string(),
            name: "Run mvn test".to_string(),
            id: None,
            setup_cmd: None,
            run_cmd: "'mvn test'".to_string(),
            envs: "CI=true \"${CURRENT_ENV[@]}\" ".to_string(),
            working_dir: None,
            filename: "bugswarm_1.sh".to_string(),
            exec_template: "bash -e {}".to_string(),
            condition: "true".to_string(),
            continue_on_error: "false".to_string(),
        }
    }

    #[test]
    fn job_header() {
        let script = generate(Header::Job {
            job_id: 42,
            build_path: "/home/github/build/alibaba/nacos",
            runs_on: Some("ubuntu-20.04"),
        }, &[], "/home/github/42/steps");
        assert!(script.starts_with("#!/usr/bin/env bash\nexport GITHUB_WORKSPACE=/home/github/build/alibaba/nacos\n"));
        assert!(script.contains("echo \"##[group]Operating System\"\necho \"Ubuntu\"\necho \"20.04\"\necho \"LTS\"\n"));
        assert!(script.contains("cp /home/github/42/event.json /home/github/workflow/event.json\n"));
        assert!(script.contains("export _GITHUB_JOB_STATUS=success\n"));
        assert!(script.ends_with("if [[ $_GITHUB_JOB_STATUS != \"success\" ]]; then\n   exit 1\nfi\n"));
    }

    #[test]
    fn unknown_release() {
        let script = generate(Header::Job {
            job_id: 1,
            build_path: "/home/github/build/a/b",
            runs_on: None,
        }, &[], "/home/github/1/steps");
        assert!(script.contains("echo \"Unknown\"\n"));
    }

    #[test]
    fn composite_header() {
        let script = generate(Header::Composite, &[step()], "/home/github/1/steps");
        assert!(script.starts_with("#!/usr/bin/env bash\n\nset -o allexport\nsource /etc/environment\nset +o allexport\n\ncd ${GITHUB_WORKSPACE}\nCURRENT_ENV=()\n"));
        assert!(!script.contains("Operating System"));
    }

    #[test]
    fn plain_step() {
        let script = generate(Header::Composite, &[step()], "/home/github/1/steps");
        assert!(script.contains("STEP_CONDITION=true\nif [[ \"$STEP_CONDITION\" = \"true\" ]]; then\n"));
        assert!(script.contains("echo \"##[group]\"'Run mvn test'\n"));
        assert!(script.contains("printf '%s\\n' 'mvn test' > /home/github/1/steps/bugswarm_1.sh\n"));
        assert!(script.contains("EXIT_CODE=0\nenv CI=true \"${CURRENT_ENV[@]}\" \\\nbash -e /home/github/1/steps/bugswarm_1.sh\nEXIT_CODE=$?\n"));
        assert!(script.contains("  CONTINUE_ON_ERROR=false\n"));
        assert!(!script.contains("pushd"));
        assert!(!script.contains("_CONTEXT_STEPS_"));
    }

    #[test]
    fn step_with_id_and_working_dir() {
        let mut step = step();
        step.id = Some("unit-tests".to_string());
        step.working_dir = Some("server".to_string());
        step.setup_cmd = Some("'node /x/pre.js'".to_string());
        let script = generate(Header::Composite, &[step], "/s");
        assert!(script.contains("printf '%s\\n' 'node /x/pre.js' > /s/bugswarm_1.sh\nchmod u+x /s/bugswarm_1.sh\nenv "));
        assert!(script.contains("pushd server > /dev/null\n"));
        assert!(script.contains("popd > /dev/null\n"));
        assert!(script.contains("  _CONTEXT_STEPS_UNIT_TESTS_OUTCOME=failure\n"));
        assert!(script.contains("else\n  _CONTEXT_STEPS_UNIT_TESTS_OUTCOME=success\n  _CONTEXT_STEPS_UNIT_TESTS_CONCLUSION=success\nfi\nif [ -n "));
    }

    #[test]
    fn step_hooks_wrap_each_step() {
        let script = generate(Header::Composite, &[step(), step()], "/s");
        let started = "if [ -n \"${ACTIONS_RUNNER_HOOK_STEP_STARTED:-}\" ]; then bash \"$ACTIONS_RUNNER_HOOK_STEP_STARTED\" > /dev/null 2>&1; fi\n";
        let completed = "if [ -n \"${ACTIONS_RUNNER_HOOK_STEP_COMPLETED:-}\" ]; then bash \"$ACTIONS_RUNNER_HOOK_STEP_COMPLETED\" > /dev/null 2>&1; fi\nfi\n";
        assert_eq!(script.matches(started).count(), 2);
        assert_eq!(script.matches(completed).count(), 2);
        // skipped steps run no hooks
        assert!(script.contains(&format!("if [[ \"$STEP_CONDITION\" = \"true\" ]]; then\n{}", started)));
        let group = script.find("echo \"##[group]\"'Run mvn test'").unwrap();
        assert!(script.find(started).unwrap() < group);
    }

    #[test]
    fn shells() {
        assert_eq!(shell_template(None), ("sh", "bash -e {}".to_string()));
        assert_eq!(shell_template(Some("python")).0, "py");
        assert_eq!(shell_template(Some("pwsh")).1, "pwsh -command \". '{}'\"");
        assert_eq!(shell_template(Some("perl {0}")), ("script", "perl {0}".to_string()));
    }
}
