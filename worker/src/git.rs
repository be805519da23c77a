use bugswarm_common::errors::*;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Run git, failing with its stderr if it exits non-zero.
pub async fn git<I, S>(cwd: Option<&Path>, args: I) -> Result<String>
    where I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new("git");
    cmd.args(args)
        .stdin(Stdio::null())
        .env("GIT_TERMINAL_PROMPT", "0");
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    debug!("Running {:?}", cmd);

    let output = cmd.output()
        .await
        .context("Failed to spawn git")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git exited with {:?}: {}", output.status.code(), stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn github_url(repo: &str) -> String {
    format!("https://github.com/{}.git", repo)
}

/// A full 40-digit commit id, as opposed to a branch or tag.
pub fn is_sha(rev: &str) -> bool {
    rev.len() == 40 && rev.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha_or_ref() {
        assert!(is_sha("a6b1d2e3f4a5b6c7d8e9f0a1b2c3d4e5f6a7b8c9"));
        assert!(!is_sha("v3"));
        assert!(!is_sha("main"));
        assert!(!is_sha("z6b1d2e3f4a5b6c7d8e9f0a1b2c3d4e5f6a7b8c9"));
    }

    #[tokio::test]
    async fn init_and_inspect() {
        let dir = tempfile::tempdir().unwrap();
        git(Some(dir.path()), ["init", "-q"]).await.unwrap();
        let out = git(Some(dir.path()), ["rev-parse", "--is-inside-work-tree"]).await.unwrap();
        assert_eq!(out.trim(), "true");
    }

    #[tokio::test]
    async fn failing_command() {
        let dir = tempfile::tempdir().unwrap();
        let err = git(Some(dir.path()), ["rev-parse", "HEAD"]).await.unwrap_err();
        assert!(err.to_string().starts_with("git exited with"));
    }
}
