use bugswarm_common::config::ConfigFile;
use bugswarm_common::errors::*;
use std::path::{Path, PathBuf};

/// Where a task keeps its files.
///
/// ```text
/// intermediates/orig_logs/<job_id>-orig.log
/// intermediates/project_repos/<repo>/
/// intermediates/workspace/<task>/<job_id>/
/// output/tasks/<task>/<job_id>/
/// output/tasks/<task>_run<n>/<job_id>/
/// output/result_json/<task>.json
/// output/<task>.csv
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPaths {
    pub task: String,
    pub intermediates: PathBuf,
    pub output: PathBuf,
    /// Set when a task is repeated, every run keeps its own outputs.
    pub run: Option<u32>,
}

impl TaskPaths {
    pub fn new(config: &ConfigFile, task: &str) -> Result<TaskPaths> {
        if task.is_empty() || task.contains('/') || task == "." || task == ".." {
            bail!("Invalid task name: {:?}", task);
        }
        Ok(TaskPaths {
            task: task.to_string(),
            intermediates: config.paths.intermediates(),
            output: config.paths.output(),
            run: None,
        })
    }

    pub fn with_run(&self, run: u32) -> TaskPaths {
        TaskPaths {
            run: Some(run),
            ..self.clone()
        }
    }

    /// Paths of every run of a task that is repeated `runs` times.
    pub fn runs(&self, runs: u32) -> Vec<(u32, TaskPaths)> {
        if runs <= 1 {
            vec![(1, self.clone())]
        } else {
            (1..=runs).map(|run| (run, self.with_run(run))).collect()
        }
    }

    pub fn orig_logs(&self) -> PathBuf {
        self.intermediates.join("orig_logs")
    }

    pub fn orig_log(&self, job_id: u64) -> PathBuf {
        self.orig_logs().join(format!("{}-orig.log", job_id))
    }

    pub fn project_repos(&self) -> PathBuf {
        self.intermediates.join("project_repos")
    }

    pub fn project_repo(&self, repo: &str) -> PathBuf {
        self.project_repos().join(repo)
    }

    /// Tarball of the pristine clone, unpacked into every job workspace.
    pub fn project_tar(&self, repo: &str) -> PathBuf {
        self.project_repos().join(format!("{}.tar", repo))
    }

    pub fn archives(&self) -> PathBuf {
        self.intermediates.join("archives")
    }

    pub fn workspace(&self) -> PathBuf {
        self.intermediates.join("workspace").join(&self.task)
    }

    pub fn workspace_job(&self, job_id: u64) -> PathBuf {
        self.workspace().join(job_id.to_string())
    }

    /// Checkout of a job, the tar of the workspace puts it here.
    pub fn job_repo(&self, job_id: u64, repo: &str) -> PathBuf {
        self.workspace_job(job_id).join(repo)
    }

    pub fn task_output(&self) -> PathBuf {
        let name = match self.run {
            Some(run) => format!("{}_run{}", self.task, run),
            None => self.task.clone(),
        };
        self.output.join("tasks").join(name)
    }

    /// Build context and results of a single job.
    pub fn job_output(&self, job_id: u64) -> PathBuf {
        self.task_output().join(job_id.to_string())
    }

    /// Build context of the image holding both jobs of a pair.
    pub fn pair_output(&self, image_tag: &str) -> PathBuf {
        self.task_output().join(image_tag)
    }

    pub fn reproduced_log(&self, job_id: u64) -> PathBuf {
        self.job_output(job_id).join("reproduced.log")
    }

    pub fn error_reasons(&self) -> PathBuf {
        self.task_output().join("error_reasons.json")
    }

    pub fn result_json(&self) -> PathBuf {
        self.output.join("result_json").join(format!("{}.json", self.task))
    }

    pub fn csv(&self) -> PathBuf {
        self.output.join(format!("{}.csv", self.task))
    }

    /// Every directory that has to exist before workers are started.
    pub fn dirs(&self) -> Vec<PathBuf> {
        vec![
            self.orig_logs(),
            self.project_repos(),
            self.archives(),
            self.workspace(),
            self.task_output(),
            self.output.join("result_json"),
        ]
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in self.dirs() {
            std::fs::create_dir_all(&dir)
                .with_context(|| anyhow!("Failed to create directory {:?}", dir))?;
        }
        Ok(())
    }

    /// Filesystem the guardian watches besides docker's root.
    pub fn workspace_fs(&self) -> &Path {
        &self.intermediates
    }
}
