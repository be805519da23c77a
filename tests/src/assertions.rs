use crate::fixtures::FakeDocker;
use bugswarm_tools::output::CsvOutput;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Csv lines keyed by image tag.
pub fn csv_rows(output: &CsvOutput) -> BTreeMap<String, Vec<String>> {
    output.rows()
        .unwrap()
        .into_iter()
        .map(|mut row| {
            let tag = row.remove(0);
            (tag, row)
        })
        .collect()
}

pub fn assert_no_leftovers(docker: &FakeDocker, workdir: &Path) {
    assert_eq!(docker.alive(), Vec::<String>::new());
    if let Ok(entries) = fs::read_dir(workdir) {
        let left = entries.map(|e| e.unwrap().file_name()).collect::<Vec<_>>();
        assert!(left.is_empty(), "left behind in {:?}: {:?}", workdir, left);
    }
}
