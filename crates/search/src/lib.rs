//! Text search used by the RustBook page editor and command line tools.
//!
//! The engine works on a single plain-text buffer. It supports literal and
//! regex patterns, case sensitivity, whole-word matching and forward/backward
//! traversal from a byte offset. Wrap-around is left to the caller so that it
//! can report the wrap to the user before retrying from the opposite end.

use std::ops::Range;

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Error conditions raised by the search engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("search pattern cannot be empty")]
    EmptyPattern,
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Determines how the search pattern is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchMode {
    #[default]
    Plain,
    Regex,
}

/// Direction for iterative searches (`Find Next` / `Find Previous`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchDirection {
    #[default]
    Forward,
    Backward,
}

/// Options supplied to the search engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchOptions {
    pub pattern: String,
    pub mode: SearchMode,
    pub case_sensitive: bool,
    pub whole_word: bool,
    pub direction: SearchDirection,
}

impl SearchOptions {
    /// Creates a new option set for the specified pattern with sensible defaults.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            mode: SearchMode::Plain,
            case_sensitive: false,
            whole_word: false,
            direction: SearchDirection::Forward,
        }
    }

    /// Returns a copy of the options pointing in the given direction.
    pub fn with_direction(mut self, direction: SearchDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.pattern.is_empty() {
            return Err(SearchError::EmptyPattern);
        }
        Ok(())
    }
}

/// Represents a single match produced by a search query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchMatch {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
    pub matched: String,
    pub line_text: String,
}

impl SearchMatch {
    /// Byte range of the match inside the searched text.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Search engine bound to a particular text buffer.
pub struct SearchEngine<'a> {
    text: &'a str,
    line_index: LineIndex<'a>,
}

impl<'a> SearchEngine<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            line_index: LineIndex::new(text),
        }
    }

    /// Finds the nearest match from `start_pos` in the configured direction.
    ///
    /// Forward searches return the leftmost match starting at or after
    /// `start_pos`. Backward searches return the last match starting before
    /// it; that match may extend past `start_pos`. Occurrences may overlap,
    /// so "aa" is found at 1 in "aaa". Returns `Ok(None)` when the end (or
    /// start) of the text is reached without a match.
    pub fn find(
        &self,
        start_pos: usize,
        options: &SearchOptions,
    ) -> Result<Option<SearchMatch>, SearchError> {
        options.validate()?;
        let regex = build_regex(options)?;
        let mut cursor = start_pos.min(self.text.len());
        while !self.text.is_char_boundary(cursor) {
            cursor -= 1;
        }

        let found = match options.direction {
            SearchDirection::Forward => self.candidates(&regex, options, cursor).next(),
            SearchDirection::Backward => self
                .candidates(&regex, options, 0)
                .take_while(|range| range.start < cursor)
                .last(),
        };
        Ok(found.map(|range| self.build_match(range.start, range.end)))
    }

    /// Returns every match in the text, in document order.
    pub fn find_all(&self, options: &SearchOptions) -> Result<Vec<SearchMatch>, SearchError> {
        options.validate()?;
        let regex = build_regex(options)?;
        let matches = self
            .collect_prepared_matches(&regex, options)
            .into_iter()
            .map(|entry| self.build_match(entry.start, entry.end))
            .collect();
        Ok(matches)
    }

    fn build_match(&self, start: usize, end: usize) -> SearchMatch {
        let (line, column) = self.line_index.line_and_column(start);
        let line_text = self.line_index.line_text(line);
        SearchMatch {
            start,
            end,
            line,
            column,
            matched: self.text[start..end].to_string(),
            line_text,
        }
    }

    /// Leftmost match at each successive start position from `from`,
    /// including matches that overlap the previous one.
    fn candidates<'s>(
        &'s self,
        regex: &'s Regex,
        options: &'s SearchOptions,
        from: usize,
    ) -> impl Iterator<Item = Range<usize>> + 's {
        let mut next = Some(from);
        std::iter::from_fn(move || loop {
            let found = regex.find_at(self.text, next.take()?)?;
            next = self.text[found.start()..]
                .chars()
                .next()
                .map(|ch| found.start() + ch.len_utf8());
            if !found.is_empty()
                && (!options.whole_word || self.is_whole_word(found.start(), found.end()))
            {
                return Some(found.range());
            }
        })
    }

    fn collect_prepared_matches(&self, regex: &Regex, options: &SearchOptions) -> Vec<Range<usize>> {
        regex
            .find_iter(self.text)
            .filter(|m| !m.is_empty())
            .filter(|m| !options.whole_word || self.is_whole_word(m.start(), m.end()))
            .map(|m| m.start()..m.end())
            .collect()
    }

    fn is_whole_word(&self, start: usize, end: usize) -> bool {
        let is_word = |ch: char| ch.is_alphanumeric() || ch == '_';
        let left = self.text[..start].chars().next_back().map_or(false, is_word);
        let right = self.text[end..].chars().next().map_or(false, is_word);
        !(left || right)
    }
}

fn build_regex(options: &SearchOptions) -> Result<Regex, SearchError> {
    let mut builder = RegexBuilder::new(&translate_pattern(options));
    builder.case_insensitive(!options.case_sensitive);
    builder.multi_line(true);
    builder
        .build()
        .map_err(|err| SearchError::InvalidPattern(err.to_string()))
}

fn translate_pattern(options: &SearchOptions) -> String {
    match options.mode {
        SearchMode::Plain => regex::escape(&options.pattern),
        SearchMode::Regex => options.pattern.clone(),
    }
}

#[derive(Clone)]
struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(idx, _)| idx + 1));
        Self { text, starts }
    }

    fn line_and_column(&self, index: usize) -> (usize, usize) {
        let pos = match self.starts.binary_search(&index) {
            Ok(line_zero) => line_zero,
            Err(insert) => insert.saturating_sub(1),
        };
        let line_start = self.starts.get(pos).copied().unwrap_or(0);
        let column = self.text[line_start..index]
            .chars()
            .count()
            .saturating_add(1);
        (pos + 1, column)
    }

    fn line_text(&self, line: usize) -> String {
        let zero_based = line.saturating_sub(1);
        let start = *self.starts.get(zero_based).unwrap_or(&0);
        let end = self
            .starts
            .get(zero_based + 1)
            .copied()
            .unwrap_or(self.text.len());
        self.text[start..end]
            .trim_end_matches(|c| c == '\n' || c == '\r')
            .to_string()
    }
}
