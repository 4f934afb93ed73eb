#![forbid(unsafe_code)]

//! Coverage figures reported by test tools in job output.
//!
//! Patterns come from project settings and are untrusted. The `regex` engine
//! runs in linear time, and the compiled program size is capped on top of that.

use regex::{Regex, RegexBuilder};

const UNTRUSTED_SIZE_LIMIT: usize = 1024 * 1024;
const UNTRUSTED_DFA_SIZE_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct CoverageRegex {
    pattern: Regex,
    number: Regex,
}

impl CoverageRegex {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(pattern)
            .size_limit(UNTRUSTED_SIZE_LIMIT)
            .dfa_size_limit(UNTRUSTED_DFA_SIZE_LIMIT)
            .build()?;
        let number = Regex::new(r"\d+(\.\d+)?")?;
        Ok(Self { pattern, number })
    }

    /// Coverage number reported on `line`, if any.
    ///
    /// The last match on the line wins. When the pattern has capture groups
    /// the last group of that match is used, otherwise the whole match. The
    /// first decimal number inside it is the result.
    pub fn scan_line(&self, line: &str) -> Option<String> {
        let captures = self.pattern.captures_iter(line).last()?;
        let matched = if captures.len() > 1 {
            captures.get(captures.len() - 1)?
        } else {
            captures.get(0)?
        };
        self.number
            .find(matched.as_str())
            .map(|number| number.as_str().to_string())
    }
}
