use std::time::Duration;

use regex::Regex;

/// Errors from building a pattern.
#[derive(Debug)]
pub enum PatternError {
    InvalidRegex(regex::Error),
}

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternError::InvalidRegex(err) => write!(f, "invalid pattern: {err}"),
        }
    }
}

impl std::error::Error for PatternError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PatternError::InvalidRegex(err) => Some(err),
        }
    }
}

impl From<regex::Error> for PatternError {
    fn from(err: regex::Error) -> Self {
        PatternError::InvalidRegex(err)
    }
}

/// A candidate pattern to look for in child output.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Plain substring.
    Literal(String),
    /// Regular expression.
    Regex(Regex),
}

impl Pattern {
    pub fn literal(text: impl Into<String>) -> Self {
        Pattern::Literal(text.into())
    }

    pub fn regex(source: &str) -> Result<Self, PatternError> {
        Ok(Pattern::Regex(Regex::new(source)?))
    }

    /// Find the first occurrence in `haystack`, as a byte range.
    pub fn find(&self, haystack: &str) -> Option<(usize, usize)> {
        match self {
            Pattern::Literal(text) => haystack
                .find(text.as_str())
                .map(|start| (start, start + text.len())),
            Pattern::Regex(re) => re.find(haystack).map(|m| (m.start(), m.end())),
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Literal(text) => write!(f, "{text:?}"),
            Pattern::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// An ordered list of patterns plus how long to wait for one of them.
///
/// Built fresh for every wait; earlier patterns win over later ones when
/// both match the same buffer state.
#[derive(Debug, Clone)]
pub struct Expectation {
    patterns: Vec<Pattern>,
    timeout: Duration,
}

impl Expectation {
    pub fn new(patterns: Vec<Pattern>, timeout: Duration) -> Self {
        Self { patterns, timeout }
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Test the patterns in list order against `haystack`.
    ///
    /// Returns the index of the first pattern that matches and its range.
    pub fn first_match(&self, haystack: &str) -> Option<(usize, usize, usize)> {
        self.patterns
            .iter()
            .enumerate()
            .find_map(|(index, pattern)| {
                pattern.find(haystack).map(|(start, end)| (index, start, end))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_find() {
        let p = Pattern::literal("Connection refused");
        assert_eq!(p.find("ssh: connect: Connection refused\r\n"), Some((14, 32)));
        assert_eq!(p.find("connection refused"), None);
    }

    #[test]
    fn test_regex_find() {
        let p = Pattern::regex("[Pp]assword:").unwrap();
        assert_eq!(p.find("alice@host's password: "), Some((13, 22)));
        assert!(p.find("Password:").is_some());
        assert!(p.find("passwd").is_none());
    }

    #[test]
    fn test_invalid_regex() {
        let err = Pattern::regex("([").unwrap_err();
        assert!(err.to_string().starts_with("invalid pattern"));
    }

    #[test]
    fn test_list_order_beats_text_order() {
        let exp = Expectation::new(
            vec![Pattern::literal("second"), Pattern::literal("first")],
            Duration::from_secs(1),
        );
        let (index, start, _) = exp.first_match("first then second").unwrap();
        assert_eq!(index, 0);
        assert_eq!(start, 11);
    }

    #[test]
    fn test_display() {
        assert_eq!(Pattern::literal("$").to_string(), "\"$\"");
        assert_eq!(Pattern::regex(r"\]\$").unwrap().to_string(), r"/\]\$/");
    }
}
