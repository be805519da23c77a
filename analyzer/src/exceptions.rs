//! Exception classes behind failed java tests.
//!
//! A stack trace is only followed when it is headed by a failure indicator
//! (`<<< FAILURE!`, `[junit] Caused an ERROR`, ...). The head exception and every
//! `Caused by:` link of that trace are counted. `java.lang.Exception` and
//! `java.lang.Error` are too generic to be useful, they only count when nothing
//! more specific follows them in the same trace.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;

const BASIC: &str = r"[A-Za-z\.\$]+(\.|\$)([A-Za-z]+)(: |; |:$|\s*$| at )";

struct Indicator {
    re: Regex,
    /// Ant prints a message line between the indicator and the exception.
    ant: bool,
}

lazy_static! {
    static ref INDICATORS: Vec<Indicator> = vec![
        Indicator { re: Regex::new(r"<<< ERROR!\s*$").unwrap(), ant: false },
        Indicator { re: Regex::new(r"<<< FAILURE!\s*$").unwrap(), ant: false },
        Indicator { re: Regex::new(r"\[junit\]\s+Caused an ERROR\s*$").unwrap(), ant: true },
        Indicator { re: Regex::new(r"\[junit\]\s+FAILED\s*$").unwrap(), ant: true },
        Indicator { re: Regex::new(r"\S+ FAILED\s*$").unwrap(), ant: false },
        Indicator { re: Regex::new(r"An exception has occurred in the compiler").unwrap(), ant: false },
    ];

    // (pattern, capture group holding the class name)
    static ref EXCEPTIONS: Vec<(Regex, usize)> = vec![
        (Regex::new(&format!(r"^\s*{}", BASIC)).unwrap(), 2),
        (Regex::new(r"(ThreadDeath)([^\w\.]|$)").unwrap(), 1),
        (Regex::new(&format!(r"^\s*Caused by: {}", BASIC)).unwrap(), 2),
        (Regex::new(&format!(r"\[[A-Za-z]+\]\s*{}", BASIC)).unwrap(), 2),
        (Regex::new(&format!(r"\[[A-Za-z]+\]\s*Caused by: {}", BASIC)).unwrap(), 2),
    ];
}

fn match_with(re: &Regex, group: usize, line: &str) -> Option<String> {
    re.captures(line)
        .and_then(|caps| caps.get(group))
        .map(|m| m.as_str().to_string())
}

/// Simple class name of the first exception on `line`, if any.
pub fn exception_name(line: &str) -> Option<String> {
    EXCEPTIONS.iter()
        .find_map(|(re, group)| match_with(re, *group, line))
}

fn is_generic(name: &str) -> bool {
    name == "Exception" || name == "Error"
}

#[derive(Debug, Default)]
struct Tally {
    found: IndexMap<String, usize>,
    pending: Option<String>,
}

impl Tally {
    fn add(&mut self, name: String) {
        *self.found.entry(name).or_insert(0) += 1;
    }

    fn flush(&mut self) {
        if let Some(name) = self.pending.take() {
            self.add(name);
        }
    }

    fn record(&mut self, name: String) {
        if is_generic(&name) {
            self.pending = Some(name);
        } else {
            self.pending = None;
            self.add(name);
        }
    }

    /// A new trace starts, a generic exception that ended the previous one counts.
    fn head(&mut self, name: String) {
        self.flush();
        self.record(name);
    }

    /// Another link in the current trace, a pending generic exception was not the last one.
    fn caused_by(&mut self, name: String) {
        self.pending = None;
        self.record(name);
    }
}

/// Exception class names with the number of times they headed or caused a test failure,
/// in the order they were first seen.
pub fn java_exceptions(lines: &[String]) -> IndexMap<String, usize> {
    let mut tally = Tally::default();
    let mut counting = false;
    let mut idx = 0;

    while idx < lines.len() {
        if idx + 1 < lines.len() {
            if let Some(indicator) = INDICATORS.iter().find(|i| i.re.is_match(&lines[idx])) {
                counting = true;
                let offset = if indicator.ant && idx + 2 < lines.len() { 2 } else { 1 };
                if let Some(name) = exception_name(&lines[idx + offset]) {
                    tally.head(name);
                    idx += offset + 1;
                }
            }
        }
        if idx >= lines.len() {
            break;
        }

        let line = &lines[idx];
        let caused = line.contains("Caused by:");
        for (re, group) in EXCEPTIONS.iter() {
            let mut name = match_with(re, *group, line);

            if counting && caused {
                // gradle prints the exception on the line after `Caused by:`
                if name.is_none() && idx + 1 < lines.len() {
                    name = match_with(re, *group, &lines[idx + 1]);
                    if name.is_some() {
                        idx += 1;
                    }
                }
                if let Some(name) = name {
                    tally.caused_by(name);
                    break;
                }
            } else if name.is_some() {
                // a trace without an indicator, its causes are not ours
                tally.flush();
                counting = false;
            }
        }

        idx += 1;
    }

    tally.flush();
    tally.found
}
