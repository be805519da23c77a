use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

pub const OUT_OF_FOLD: &str = "out_of_fold";

lazy_static! {
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1B[@-_][0-?]*[ -/]*[@-~]").unwrap();
}

/// Remove terminal color codes, they break most line patterns.
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(line, "")
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Fold {
    pub content: Vec<String>,
    /// Seconds, if the log carried timing for this fold.
    pub duration: Option<f64>,
}

/// A build log split into named sections.
///
/// Lines outside of any section land in [`OUT_OF_FOLD`], which always exists.
/// Sections keep the order in which they first appeared in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Folds {
    folds: IndexMap<String, Fold>,
    lines: Vec<String>,
}

impl Default for Folds {
    fn default() -> Folds {
        let mut folds = IndexMap::new();
        folds.insert(OUT_OF_FOLD.to_string(), Fold::default());
        Folds {
            folds,
            lines: Vec::new(),
        }
    }
}

impl Folds {
    pub fn new() -> Folds {
        Folds::default()
    }

    pub fn open(&mut self, name: &str) {
        self.folds.entry(name.to_string()).or_default();
    }

    pub fn push(&mut self, fold: &str, line: String) {
        self.lines.push(line.clone());
        self.folds.entry(fold.to_string()).or_default().content.push(line);
    }

    pub fn set_duration(&mut self, fold: &str, duration: f64) {
        self.folds.entry(fold.to_string()).or_default().duration = Some(duration);
    }

    pub fn get(&self, name: &str) -> Option<&Fold> {
        self.folds.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.folds.contains_key(name)
    }

    pub fn out_of_fold(&self) -> &[String] {
        self.folds.get(OUT_OF_FOLD)
            .map(|f| f.content.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Fold)> {
        self.folds.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.folds.keys()
    }

    /// Every content line in log order, regardless of the fold it belongs to.
    pub fn job_lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_colors() {
        let line = "\x1b[1;31m[ERROR]\x1b[0m Tests run: 1";
        assert_eq!(strip_ansi(line), "[ERROR] Tests run: 1");
    }

    #[test]
    fn keeps_fold_order_and_log_order() {
        let mut folds = Folds::new();
        folds.push(OUT_OF_FOLD, "a".to_string());
        folds.open("install");
        folds.push("install", "b".to_string());
        folds.push(OUT_OF_FOLD, "c".to_string());

        assert_eq!(folds.names().collect::<Vec<_>>(), vec!["out_of_fold", "install"]);
        assert_eq!(folds.out_of_fold(), &["a".to_string(), "c".to_string()]);
        assert_eq!(folds.job_lines(), &["a", "b", "c"]);
    }
}
