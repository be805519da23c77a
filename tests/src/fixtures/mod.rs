pub mod docker;
pub mod fake_store;

use bugswarm_common::config::ConfigFile;
use rstest::fixture;
use tempfile::TempDir;

pub use self::docker::FakeDocker;
pub use self::fake_store::FakeStore;

/// Config pointing every path into a fresh temporary directory.
pub struct Workspace {
    pub dir: TempDir,
    pub config: ConfigFile,
}

#[fixture]
pub fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ConfigFile::default();
    config.paths.intermediates = Some(dir.path().join("intermediates"));
    config.paths.output = Some(dir.path().join("output"));
    config.docker.root = Some(dir.path().to_path_buf());
    config.http.retries = Some(0);
    Workspace { dir, config }
}

#[fixture]
pub fn store() -> FakeStore {
    FakeStore::default()
}
