use bugswarm_common::errors::*;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Appends one line per image tag to `output/<task>.csv`, shared by all workers of a task.
#[derive(Debug)]
pub struct CsvOutput {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvOutput {
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<CsvOutput> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| anyhow!("Failed to create directory {:?}", parent))?;
        }
        Ok(CsvOutput {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, image_tag: &str, fields: &[&str]) -> Result<()> {
        let mut line = image_tag.to_string();
        for field in fields {
            line.push_str(", ");
            line.push_str(&field.replace(['\n', ','], " "));
        }
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| anyhow!("Failed to open {:?}", self.path))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Lines written so far, split into their fields.
    pub fn rows(&self) -> Result<Vec<Vec<String>>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.split(", ").map(String::from).collect())
            .collect())
    }
}
