//! Rewrites of the per side build scripts (`run_failed.sh`, `run_passed.sh`) of a cached image.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MAVEN: Regex = Regex::new(r"\bmvnw?\b").unwrap();
    static ref GRADLE: Regex = Regex::new(r"\bgradlew?\b").unwrap();
}

/// Insert `lines` right after the shebang of `script`.
pub fn prepend(script: &str, lines: &[String]) -> String {
    if lines.is_empty() {
        return script.to_string();
    }
    let (shebang, rest) = match script.split_once('\n') {
        Some((first, rest)) if first.starts_with("#!") => (Some(first), rest),
        _ => (None, script),
    };

    let mut out = String::new();
    if let Some(shebang) = shebang {
        out.push_str(shebang);
        out.push('\n');
    }
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(rest);
    out
}

/// Lines that unpack the dependency tarballs of a side before the build starts.
pub fn untar_lines(tarballs: &[String]) -> Vec<String> {
    if tarballs.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![
        "# Untar cached dependency files".to_string(),
        "echo \"Untarring dependencies (this may take a few seconds)\"".to_string(),
    ];
    for tarball in tarballs {
        lines.push(format!("sudo tar --directory / -xzf {}", tarball));
    }
    lines
}

/// Head of a build script in a cached image.
///
/// The job started hook activates the cache of `side`, the dependency
/// tarballs are unpacked next and the job completed hook runs on exit.
pub fn prelude(side: &str, tarballs: &[String]) -> Vec<String> {
    let mut lines = vec![
        format!("if [ -n \"${{ACTIONS_RUNNER_HOOK_JOB_STARTED:-}}\" ]; then source \"$ACTIONS_RUNNER_HOOK_JOB_STARTED\" {}; fi", side),
    ];
    lines.extend(untar_lines(tarballs));
    lines.push("if [ -n \"${ACTIONS_RUNNER_HOOK_JOB_COMPLETED:-}\" ]; then trap 'bash \"$ACTIONS_RUNNER_HOOK_JOB_COMPLETED\"' EXIT; fi".to_string());
    lines
}

fn is_word(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Append `flag` to every `tool` invocation in the user commands of a script.
///
/// User commands follow the `echo "##[group]"<name>` line of a step and end
/// with the `EXIT_CODE=0` right before the step is executed.
/// Occurrences right after another word (`run mvn`) are left alone.
fn add_flag(script: &str, tool: &Regex, flag: &str) -> String {
    let mut out = String::with_capacity(script.len());
    let mut in_user_command = false;

    for line in script.split_inclusive('\n') {
        if !in_user_command {
            if line.starts_with("echo \"##[group]\"") {
                in_user_command = true;
            }
            out.push_str(line);
            continue;
        }
        if line.starts_with("EXIT_CODE=0") {
            in_user_command = false;
            out.push_str(line);
            continue;
        }

        let bytes = line.as_bytes();
        let mut last = 0;
        for m in tool.find_iter(line) {
            let start = m.start();
            if start >= 2 && bytes[start - 1] == b' ' && is_word(bytes[start - 2]) {
                continue;
            }
            out.push_str(&line[last..m.end()]);
            out.push(' ');
            out.push_str(flag);
            last = m.end();
        }
        out.push_str(&line[last..]);
    }
    out
}

pub fn offline_maven(script: &str) -> String {
    add_flag(script, &MAVEN, "-o")
}

pub fn offline_gradle(script: &str) -> String {
    add_flag(script, &GRADLE, "--offline")
}
