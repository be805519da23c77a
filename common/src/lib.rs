use crate::errors::*;
use colored::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod http;
pub mod model;
pub mod utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CiService {
    Travis,
    Github,
}

impl Deref for CiService {
    type Target = str;

    fn deref(&self) -> &'static str {
        match self {
            CiService::Travis => "travis",
            CiService::Github => "github",
        }
    }
}

impl fmt::Display for CiService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self)
    }
}

impl FromStr for CiService {
    type Err = Error;

    fn from_str(s: &str) -> Result<CiService> {
        match s {
            "travis" => Ok(CiService::Travis),
            "github" => Ok(CiService::Github),
            _ => bail!("Unknown ci service: {:?}", s),
        }
    }
}

/// Reproducibility of a job pair, derived from its match history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Reproducible,
    Unreproducible,
    Flaky,
    Broken,
}

impl Classification {
    pub fn fancy(&self) -> String {
        match self {
            Classification::Reproducible   => "Reproducible  ".green().to_string(),
            Classification::Flaky          => "Flaky         ".yellow().to_string(),
            Classification::Unreproducible => "Unreproducible".red().to_string(),
            Classification::Broken         => "Broken        ".red().to_string(),
        }
    }

    /// Only reproducible pairs, and flaky ones on request, end up in the registry.
    pub fn is_publishable(&self, allow_flaky: bool) -> bool {
        match self {
            Classification::Reproducible => true,
            Classification::Flaky => allow_flaky,
            Classification::Unreproducible | Classification::Broken => false,
        }
    }
}

impl Deref for Classification {
    type Target = str;

    fn deref(&self) -> &'static str {
        match self {
            Classification::Reproducible   => "Reproducible",
            Classification::Unreproducible => "Unreproducible",
            Classification::Flaky          => "Flaky",
            Classification::Broken         => "Broken",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self)
    }
}

impl FromStr for Classification {
    type Err = Error;

    fn from_str(s: &str) -> Result<Classification> {
        match s {
            "Reproducible" => Ok(Classification::Reproducible),
            "Unreproducible" => Ok(Classification::Unreproducible),
            "Flaky" => Ok(Classification::Flaky),
            "Broken" => Ok(Classification::Broken),
            _ => bail!("Unknown classification: {:?}", s),
        }
    }
}
