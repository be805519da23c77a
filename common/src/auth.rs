use crate::errors::*;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token: Option<String>,
}

impl AuthConfig {
    pub fn update(&mut self, c: AuthConfig) {
        if c.token.is_some() {
            self.token = c.token;
        }
    }
}

fn read_token_from_file<P: AsRef<Path>>(path: P) -> Result<String> {
    debug!("Attempting reading token from file: {:?}", path.as_ref());
    let token = fs::read_to_string(path.as_ref())?;
    debug!("Found token in file {:?}", path.as_ref());
    Ok(token.trim().to_string())
}

/// Locate the metadata store token: environment, then config, then a token file.
pub fn find_token(config: &AuthConfig) -> Result<String> {
    if let Ok(token) = env::var("BUGSWARM_TOKEN") {
        if !token.is_empty() {
            return Ok(token);
        }
    }

    if let Some(token) = &config.token {
        return Ok(token.clone());
    }

    if let Ok(path) = env::var("BUGSWARM_TOKEN_PATH") {
        return read_token_from_file(path);
    }

    if let Some(config_dir) = dirs_next::config_dir() {
        if let Ok(token) = read_token_from_file(config_dir.join("bugswarm-token")) {
            return Ok(token);
        }
    }

    bail!("Failed to find a metadata store token")
}
