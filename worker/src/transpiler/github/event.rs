use super::JobInfo;
use serde_json::{json, Value};

fn commit(job: &JobInfo) -> Value {
    json!({
        "author": {
            "email": "",
            "name": job.owner(),
            "username": job.owner(),
        },
        "committer": {
            "email": "noreply@github.com",
            "name": "GitHub",
            "username": "web-flow",
        },
        "distinct": true,
        "id": job.sha,
        "message": job.message,
        "timestamp": job.committed_at.clone().unwrap_or_default(),
        "tree_id": "",
        "url": format!("https://github.com/{}/commit/{}", job.repo, job.sha),
    })
}

fn owner(job: &JobInfo) -> Value {
    json!({
        "login": job.owner(),
        "name": job.owner(),
        "email": "",
        "html_url": format!("https://github.com/{}", job.owner()),
        "site_admin": false,
        "type": "User",
    })
}

/// Webhook payload the job's actions read from `GITHUB_EVENT_PATH`.
///
/// Only the head commit is known, so it's the single entry of `commits`.
pub fn payload(job: &JobInfo) -> Value {
    let name = job.repo.split('/').nth(1).unwrap_or_default();
    let base_ref = job.base_ref();
    let head = commit(job);

    let mut event = json!({
        "after": job.sha,
        "base_ref": if base_ref.is_empty() { Value::Null } else { Value::String(base_ref) },
        "before": "",
        "commits": [head.clone()],
        "compare": "",
        "created": false,
        "deleted": false,
        "forced": false,
        "head_commit": head,
        "pusher": {
            "email": "",
            "name": job.owner(),
        },
        "ref": job.git_ref(),
        "repository": {
            "allow_forking": true,
            "archived": false,
            "clone_url": format!("https://github.com/{}.git", job.repo),
            "default_branch": "master",
            "disabled": false,
            "fork": false,
            "full_name": job.repo,
            "git_url": format!("git://github.com/{}.git", job.repo),
            "html_url": format!("https://github.com/{}", job.repo),
            "master_branch": "master",
            "name": name,
            "owner": owner(job),
            "private": false,
            "ssh_url": format!("git@github.com:{}.git", job.repo),
            "svn_url": format!("https://github.com/{}", job.repo),
            "topics": [],
            "updated_at": job.committed_at.clone().unwrap_or_default(),
            "url": format!("https://api.github.com/repos/{}", job.repo),
            "visibility": "public",
        },
        "sender": owner(job),
    });

    if let (Some(number), Some(map)) = (job.pr_num, event.as_object_mut()) {
        map.insert("action".to_string(), json!("synchronize"));
        map.insert("number".to_string(), json!(number));
        map.insert("pull_request".to_string(), json!({
            "number": number,
            "head": {
                "ref": job.branch,
                "sha": job.sha,
            },
            "base": {
                "ref": job.base_branch,
                "sha": job.base_sha,
            },
        }));
    }

    event
}
