use colored::*;
use regex::{Regex, RegexBuilder};

/// Case-insensitive command matcher, compiled once per query.
///
/// Substring patterns are escaped into a regex so that filtering and
/// highlighting share one code path and report byte ranges on the original
/// text. A regex that fails to compile degrades to a literal substring match.
#[derive(Debug, Clone)]
pub struct CommandMatcher {
    pattern: String,
    regex: Option<Regex>,
    fell_back: bool,
}

impl CommandMatcher {
    pub fn new(pattern: &str, use_regex: bool) -> Self {
        if pattern.is_empty() {
            return Self {
                pattern: String::new(),
                regex: None,
                fell_back: false,
            };
        }

        if use_regex {
            match build(pattern) {
                Ok(regex) => {
                    return Self {
                        pattern: pattern.to_string(),
                        regex: Some(regex),
                        fell_back: false,
                    }
                }
                Err(e) => {
                    log::warn!("invalid regex {:?}, matching it literally: {}", pattern, e);
                    return Self {
                        pattern: pattern.to_string(),
                        regex: build(&regex::escape(pattern)).ok(),
                        fell_back: true,
                    };
                }
            }
        }

        Self {
            pattern: pattern.to_string(),
            regex: build(&regex::escape(pattern)).ok(),
            fell_back: false,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether a requested regex was invalid and is being matched literally.
    pub fn fell_back(&self) -> bool {
        self.fell_back
    }

    /// An empty pattern matches every command.
    pub fn is_match(&self, text: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(text),
            None => self.pattern.is_empty() || contains_ignore_case(text, &self.pattern),
        }
    }

    /// Byte ranges of every match in `text`.
    pub fn match_ranges(&self, text: &str) -> Vec<(usize, usize)> {
        match &self.regex {
            Some(regex) => regex
                .find_iter(text)
                .filter(|m| !m.is_empty())
                .map(|m| (m.start(), m.end()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Highlight matched text
    pub fn highlight(&self, text: &str) -> String {
        let ranges = self.match_ranges(text);
        if ranges.is_empty() {
            return text.to_string();
        }

        let mut result = String::new();
        let mut last_pos = 0;
        for (start, end) in ranges {
            result.push_str(&text[last_pos..start]);
            result.push_str(&text[start..end].red().bold().to_string());
            last_pos = end;
        }
        result.push_str(&text[last_pos..]);
        result
    }
}

fn build(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

pub fn contains_ignore_case(text: &str, needle: &str) -> bool {
    text.to_lowercase().contains(&needle.to_lowercase())
}
