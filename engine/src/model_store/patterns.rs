//! fnmatch-style include patterns, as understood by the hub tooling.

use regex::Regex;

#[derive(Debug, Clone)]
pub struct IncludePatterns {
    compiled: Vec<Regex>,
}

impl IncludePatterns {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|pattern| {
                let expr = glob_to_regex(pattern.as_ref());
                match Regex::new(&expr) {
                    Ok(re) => Some(re),
                    Err(err) => {
                        log::warn!("Ignoring include pattern {}: {err}", pattern.as_ref());
                        None
                    }
                }
            })
            .collect();
        Self { compiled }
    }

    pub fn inference() -> Self {
        Self::new(super::INFERENCE_ALLOW_PATTERNS)
    }

    pub fn matches(&self, path: &str) -> bool {
        self.compiled.iter().any(|re| re.is_match(path))
    }
}

// `*` spans path separators, like Python's fnmatch.
fn glob_to_regex(pattern: &str) -> String {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => {
                let mut buf = [0u8; 4];
                expr.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }
    expr.push('$');
    expr
}
