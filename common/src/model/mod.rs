mod artifact;
mod input;

pub use artifact::*;
pub use input::*;

use crate::errors::*;
use std::collections::BTreeMap;

/// Run number to outcome. Job pairs store their match type (0-3), jobs store 1 or 0.
pub type MatchHistory = BTreeMap<u32, u8>;

/// Name of the docker image (and artifact) for a job pair.
pub fn image_tag(repo: &str, failed_job_id: u64) -> Result<String> {
    if repo.matches('/').count() != 1 {
        bail!("Repository name must be of the form owner/name: {:?}", repo);
    }
    Ok(format!("{}-{}", repo.replace('/', "-"), failed_job_id))
}
