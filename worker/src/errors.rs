//! Per-pair failure taxonomy.
//!
//! Anything that goes wrong while reproducing a single job ends up as a
//! [`ReproduceError`] inside an `anyhow::Error`. The dispatcher recovers it with
//! `downcast_ref`, records it in `error_reasons.json` and moves on to the next item.

use bugswarm_analyzer::AnalyzerError;
use bugswarm_common::errors::*;
use serde::{Deserialize, Serialize};
use std::error;
use std::fmt;
use std::ops::Deref;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    SetupError,
    TranspileError,
    ImageBuildError,
    RunError,
    LogCopyError,
    AnalysisError,
    CacheError,
    PushError,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::SetupError,
        Category::TranspileError,
        Category::ImageBuildError,
        Category::RunError,
        Category::LogCopyError,
        Category::AnalysisError,
        Category::CacheError,
        Category::PushError,
    ];
}

impl Deref for Category {
    type Target = str;

    fn deref(&self) -> &'static str {
        match self {
            Category::SetupError => "SetupError",
            Category::TranspileError => "TranspileError",
            Category::ImageBuildError => "ImageBuildError",
            Category::RunError => "RunError",
            Category::LogCopyError => "LogCopyError",
            Category::AnalysisError => "AnalysisError",
            Category::CacheError => "CacheError",
            Category::PushError => "PushError",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReproduceError {
    pub category: Category,
    pub stage: Option<String>,
    pub message: String,
}

impl ReproduceError {
    pub fn new<I: Into<String>>(category: Category, message: I) -> ReproduceError {
        ReproduceError {
            category,
            stage: None,
            message: message.into(),
        }
    }

    pub fn in_stage<I: Into<String>>(mut self, stage: I) -> ReproduceError {
        self.stage = Some(stage.into());
        self
    }
}

impl fmt::Display for ReproduceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(stage) = &self.stage {
            write!(f, "{} in {}: {}", self.category, stage, self.message)
        } else {
            write!(f, "{}: {}", self.category, self.message)
        }
    }
}

impl error::Error for ReproduceError {}

/// Problems with the workflow of a job, raised before anything is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranspileError {
    InvalidWorkflow(String),
    UnsupportedStep(String),
    UnsupportedAction(String),
    InvalidPredefinedAction(String),
    ActionFetchError(String),
    InvalidExpression(String),
}

impl fmt::Display for TranspileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranspileError::InvalidWorkflow(msg) => write!(f, "Invalid workflow: {}", msg),
            TranspileError::UnsupportedStep(msg) => write!(f, "Unsupported step: {}", msg),
            TranspileError::UnsupportedAction(msg) => write!(f, "Unsupported action: {}", msg),
            TranspileError::InvalidPredefinedAction(msg) => write!(f, "Invalid predefined action: {}", msg),
            TranspileError::ActionFetchError(msg) => write!(f, "Failed to fetch action: {}", msg),
            TranspileError::InvalidExpression(msg) => write!(f, "Could not parse expression: {}", msg),
        }
    }
}

impl error::Error for TranspileError {}

/// Best guess for errors that were raised without a category.
fn category_of(err: &Error, fallback: Category) -> Category {
    if err.downcast_ref::<TranspileError>().is_some() {
        Category::TranspileError
    } else if err.downcast_ref::<AnalyzerError>().is_some() {
        Category::AnalysisError
    } else {
        fallback
    }
}

pub trait WrapErrors<T> {
    /// Turn any error into a [`ReproduceError`] of `stage`.
    ///
    /// Errors that already carry a category keep it, only a missing stage is filled in.
    fn wrap_errors(self, category: Category, stage: &str) -> Result<T>;
}

impl<T, E> WrapErrors<T> for std::result::Result<T, E>
    where E: Into<Error>,
{
    fn wrap_errors(self, category: Category, stage: &str) -> Result<T> {
        self.map_err(|err| {
            let err = err.into();
            match err.downcast::<ReproduceError>() {
                Ok(mut err) => {
                    if err.stage.is_none() {
                        err.stage = Some(stage.to_string());
                    }
                    Error::new(err)
                },
                Err(err) => {
                    let category = category_of(&err, category);
                    Error::new(ReproduceError::new(category, format!("{:#}", err)).in_stage(stage))
                },
            }
        })
    }
}

/// The taxonomy entry of an error, everything unexpected is a setup problem.
pub fn reproduce_error(err: &Error) -> ReproduceError {
    if let Some(err) = err.downcast_ref::<ReproduceError>() {
        err.clone()
    } else {
        ReproduceError::new(category_of(err, Category::SetupError), format!("{:#}", err))
    }
}
