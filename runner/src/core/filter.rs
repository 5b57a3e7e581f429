//! Line filters applied to tool output before it reaches the console.
//!
//! A [`FilterChain`] folds each output line through its filters in order. The
//! first filter that suppresses a line ends the fold, so noise-reduction filters
//! belong before highlighting filters: nothing can un-suppress a line.
//!
//! Filters are plain data (no opaque closures except the optional capture
//! mapper) so chains can be inspected, built from script files, and tested.

use std::fmt;
use std::sync::Arc;

use regex::{Captures, NoExpand, Regex};
use tracing::warn;

/// Computes a replacement from the captures of one pattern match.
#[derive(Clone)]
pub struct CaptureMapper(Arc<dyn Fn(&Captures<'_>) -> String + Send + Sync>);

impl CaptureMapper {
    pub fn new(mapper: impl Fn(&Captures<'_>) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(mapper))
    }

    fn map(&self, captures: &Captures<'_>) -> String {
        (self.0)(captures)
    }
}

impl fmt::Debug for CaptureMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CaptureMapper(..)")
    }
}

/// What a pattern filter does with a line that matches.
#[derive(Debug, Clone)]
pub enum PatternReplacement {
    /// Drop the line.
    Suppress,
    /// Replace every match with this text, taken literally.
    Text(String),
    /// Replace every match with the mapper's output.
    Mapper(CaptureMapper),
}

/// A regular expression kept together with its source text.
///
/// A pattern that fails to compile is kept as a disabled pattern: it never
/// matches, so its filter passes every line through unchanged.
#[derive(Debug, Clone)]
pub struct LinePattern {
    source: String,
    regex: Option<Regex>,
}

impl LinePattern {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let regex = match Regex::new(&source) {
            Ok(regex) => Some(regex),
            Err(err) => {
                warn!(pattern = %source, error = %err, "invalid filter pattern, filter disabled");
                None
            }
        };
        Self { source, regex }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_enabled(&self) -> bool {
        self.regex.is_some()
    }
}

/// One line-rewriting or suppression rule.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Lines containing `needle` are replaced as a whole by `replacement`,
    /// or suppressed when there is none.
    Literal {
        needle: String,
        replacement: Option<String>,
    },
    /// Lines matching `pattern` are suppressed or have their matches replaced.
    Pattern {
        pattern: LinePattern,
        replacement: PatternReplacement,
    },
}

impl Filter {
    pub fn suppress_containing(needle: impl Into<String>) -> Self {
        Filter::Literal {
            needle: needle.into(),
            replacement: None,
        }
    }

    pub fn replace_containing(needle: impl Into<String>, replacement: impl Into<String>) -> Self {
        Filter::Literal {
            needle: needle.into(),
            replacement: Some(replacement.into()),
        }
    }

    pub fn suppress_matching(pattern: impl Into<String>) -> Self {
        Filter::Pattern {
            pattern: LinePattern::new(pattern),
            replacement: PatternReplacement::Suppress,
        }
    }

    pub fn replace_matching(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Filter::Pattern {
            pattern: LinePattern::new(pattern),
            replacement: PatternReplacement::Text(replacement.into()),
        }
    }

    pub fn map_matching(
        pattern: impl Into<String>,
        mapper: impl Fn(&Captures<'_>) -> String + Send + Sync + 'static,
    ) -> Self {
        Filter::Pattern {
            pattern: LinePattern::new(pattern),
            replacement: PatternReplacement::Mapper(CaptureMapper::new(mapper)),
        }
    }

    /// Apply this filter to one line. `None` means the line is suppressed.
    pub fn apply(&self, line: &str) -> Option<String> {
        match self {
            Filter::Literal {
                needle,
                replacement,
            } => {
                if line.contains(needle.as_str()) {
                    replacement.clone()
                } else {
                    Some(line.to_string())
                }
            }
            Filter::Pattern {
                pattern,
                replacement,
            } => {
                let Some(regex) = &pattern.regex else {
                    return Some(line.to_string());
                };
                if !regex.is_match(line) {
                    return Some(line.to_string());
                }
                match replacement {
                    PatternReplacement::Suppress => None,
                    PatternReplacement::Text(text) => {
                        Some(regex.replace_all(line, NoExpand(text)).into_owned())
                    }
                    PatternReplacement::Mapper(mapper) => Some(
                        regex
                            .replace_all(line, |caps: &Captures<'_>| mapper.map(caps))
                            .into_owned(),
                    ),
                }
            }
        }
    }
}

/// Ordered sequence of filters.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn push(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Fold `line` through every filter in order, stopping at the first suppression.
    pub fn apply(&self, line: &str) -> Option<String> {
        let mut current = line.to_string();
        for filter in &self.filters {
            current = filter.apply(&current)?;
        }
        Some(current)
    }
}

impl From<Vec<Filter>> for FilterChain {
    fn from(filters: Vec<Filter>) -> Self {
        Self::new(filters)
    }
}

impl FromIterator<Filter> for FilterChain {
    fn from_iter<I: IntoIterator<Item = Filter>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
