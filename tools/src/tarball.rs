use bugswarm_common::errors::*;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Paths stored in a `.tgz`, directories included.
pub fn entries<P: AsRef<Path>>(path: P) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| anyhow!("Failed to open tarball {:?}", path))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut paths = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        paths.push(entry.path()?.into_owned());
    }
    Ok(paths)
}

/// A tarball without a single regular file is not worth unpacking.
pub fn is_empty<P: AsRef<Path>>(path: P) -> Result<bool> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| anyhow!("Failed to open tarball {:?}", path))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    for entry in archive.entries()? {
        if entry?.header().entry_type().is_file() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Every `<name>-<side>.tgz` in `workdir`, sorted by name.
pub fn side_tarballs(workdir: &Path, side: &str) -> Result<Vec<PathBuf>> {
    let pattern = workdir.join(format!("*-{}.tgz", side));
    let pattern = pattern.to_str()
        .context("Work directory contains invalid characters")?;
    let mut tarballs = glob::glob(pattern)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    tarballs.sort();
    Ok(tarballs)
}

pub fn remove_tarballs(workdir: &Path) -> Result<()> {
    let pattern = workdir.join("*.tgz");
    let pattern = pattern.to_str()
        .context("Work directory contains invalid characters")?;
    for path in glob::glob(pattern)? {
        let path = path?;
        debug!("Removing {:?}", path);
        fs::remove_file(&path)
            .with_context(|| anyhow!("Failed to remove {:?}", path))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn write_tgz(path: &Path, files: &[(&str, &[u8])], dirs: &[&str]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for dir in dirs {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, dir, &[][..]).unwrap();
        }
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn list_and_detect_empty() {
        let dir = tempfile::tempdir().unwrap();
        let full = dir.path().join("home-m2-failed.tgz");
        write_tgz(&full, &[("home/github/.m2/repository/junit.jar", b"PK")], &["home/github/.m2/"]);
        let empty = dir.path().join("proj-maven-failed.tgz");
        write_tgz(&empty, &[], &["home/github/build/failed/a/b/.mvn/"]);

        assert_eq!(entries(&full).unwrap(), vec![
            PathBuf::from("home/github/.m2/"),
            PathBuf::from("home/github/.m2/repository/junit.jar"),
        ]);
        assert!(!is_empty(&full).unwrap());
        assert!(is_empty(&empty).unwrap());
    }

    #[test]
    fn tarballs_per_side() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["home-m2-failed.tgz", "home-gradle-failed.tgz", "home-m2-passed.tgz", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let failed = side_tarballs(dir.path(), "failed").unwrap();
        assert_eq!(failed, vec![
            dir.path().join("home-gradle-failed.tgz"),
            dir.path().join("home-m2-failed.tgz"),
        ]);

        remove_tarballs(dir.path()).unwrap();
        assert!(side_tarballs(dir.path(), "passed").unwrap().is_empty());
        assert!(dir.path().join("notes.txt").exists());
    }
}
