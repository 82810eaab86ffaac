use std::ops::Range;

use thiserror::Error;

use crate::markup::{self, MarkupError};

/// Character attributes a run of text can carry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CharFormat {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

impl CharFormat {
    pub fn is_plain(&self) -> bool {
        *self == CharFormat::default()
    }
}

/// Partial format merged into existing text; `None` keeps the attribute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FormatChange {
    pub bold: Option<bool>,
    pub italic: Option<bool>,
    pub underline: Option<bool>,
}

impl FormatChange {
    pub fn bold(value: bool) -> Self {
        Self {
            bold: Some(value),
            ..Self::default()
        }
    }

    pub fn italic(value: bool) -> Self {
        Self {
            italic: Some(value),
            ..Self::default()
        }
    }

    pub fn underline(value: bool) -> Self {
        Self {
            underline: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == FormatChange::default()
    }

    /// Later values win.
    pub fn merge(self, other: FormatChange) -> Self {
        Self {
            bold: other.bold.or(self.bold),
            italic: other.italic.or(self.italic),
            underline: other.underline.or(self.underline),
        }
    }

    pub fn apply(&self, format: CharFormat) -> CharFormat {
        CharFormat {
            bold: self.bold.unwrap_or(format.bold),
            italic: self.italic.unwrap_or(format.italic),
            underline: self.underline.unwrap_or(format.underline),
        }
    }
}

/// Contiguous bytes sharing one format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatRun {
    pub len: usize,
    pub format: CharFormat,
}

/// Ordered byte range (start <= end).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    start: usize,
    end: usize,
}

impl Selection {
    /// Creates a selection with automatically ordered bounds.
    pub fn new(a: usize, b: usize) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("position {position} is not a character boundary in a buffer of length {len}")]
    InvalidPosition { position: usize, len: usize },
}

/// Editable rich text: plain characters plus format runs, a caret and an
/// optional selection. Offsets are bytes on character boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RichTextBuffer {
    text: String,
    runs: Vec<FormatRun>,
    caret: usize,
    selection: Option<Selection>,
    typing_format: CharFormat,
}

impl RichTextBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an unformatted buffer with the caret at the start.
    pub fn from_plain(text: impl Into<String>) -> Self {
        let mut buffer = Self::new();
        buffer.append(&text.into(), CharFormat::default());
        buffer
    }

    /// Parses persisted page markup.
    pub fn from_markup(markup: &str) -> Result<Self, MarkupError> {
        markup::parse(markup)
    }

    /// Serialises the text and formats to page markup.
    pub fn to_markup(&self) -> String {
        markup::render(self)
    }

    pub fn plain_text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn runs(&self) -> &[FormatRun] {
        &self.runs
    }

    /// Text slices paired with their format, in order.
    pub fn segments(&self) -> impl Iterator<Item = (&str, CharFormat)> + '_ {
        let mut offset = 0;
        self.runs.iter().map(move |run| {
            let slice = &self.text[offset..offset + run.len];
            offset += run.len;
            (slice, run.format)
        })
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn caret(&self) -> usize {
        self.caret
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection
    }

    pub fn selected_text(&self) -> &str {
        self.selection
            .map(|selection| &self.text[selection.range()])
            .unwrap_or("")
    }

    /// Moves the caret, dropping the selection.
    pub fn set_caret(&mut self, position: usize) -> Result<(), BufferError> {
        self.check_position(position)?;
        self.caret = position;
        self.selection = None;
        self.typing_format = self.format_before(position);
        Ok(())
    }

    /// Selects from `anchor` to `head`; the caret ends on `head`.
    pub fn select(&mut self, anchor: usize, head: usize) -> Result<(), BufferError> {
        self.check_position(anchor)?;
        self.check_position(head)?;
        if anchor == head {
            return self.set_caret(head);
        }
        let selection = Selection::new(anchor, head);
        self.caret = head;
        self.selection = Some(selection);
        self.typing_format = self.format_at(selection.start);
        Ok(())
    }

    pub fn select_all(&mut self) {
        let len = self.len();
        // Both ends are always boundaries.
        let _ = self.select(0, len);
    }

    pub fn move_to_start(&mut self) {
        let _ = self.set_caret(0);
    }

    pub fn move_to_end(&mut self) {
        let len = self.len();
        let _ = self.set_caret(len);
    }

    /// Replaces the selection (or inserts at the caret) using the typing format.
    pub fn insert_text(&mut self, text: &str) {
        let range = self.edit_range();
        let format = self.typing_format;
        self.splice(range.clone(), text, format);
        self.caret = range.start + text.len();
        self.selection = None;
    }

    /// Deletes the selection or the character before the caret.
    pub fn delete_backward(&mut self) {
        let range = self.edit_range();
        let range = if range.is_empty() {
            match prev_char_boundary(&self.text, range.start) {
                Some(prev) => prev..range.start,
                None => return,
            }
        } else {
            range
        };
        self.splice(range.clone(), "", self.typing_format);
        self.caret = range.start;
        self.selection = None;
    }

    /// Deletes the selection or the character after the caret.
    pub fn delete_forward(&mut self) {
        let range = self.edit_range();
        let range = if range.is_empty() {
            match next_char_boundary(&self.text, range.start) {
                Some(next) => range.start..next,
                None => return,
            }
        } else {
            range
        };
        self.splice(range.clone(), "", self.typing_format);
        self.caret = range.start;
        self.selection = None;
    }

    /// Replaces `range` with `text` in the given format; the caret moves to
    /// the end of the inserted text.
    pub fn replace_range(
        &mut self,
        range: Range<usize>,
        text: &str,
        format: CharFormat,
    ) -> Result<(), BufferError> {
        self.check_position(range.start)?;
        self.check_position(range.end)?;
        let range = range.start.min(range.end)..range.start.max(range.end);
        self.splice(range.clone(), text, format);
        self.caret = range.start + text.len();
        self.selection = None;
        Ok(())
    }

    /// Reconciles the buffer with plain text edited elsewhere (e.g. a
    /// widget that only understands strings). The changed middle section
    /// takes the format of the character preceding it, so formatting
    /// outside the edit survives. Returns `false` when nothing changed.
    pub fn sync_plain_text(&mut self, updated: &str) -> bool {
        if updated == self.text {
            return false;
        }
        let prefix = common_prefix(&self.text, updated);
        let suffix = common_suffix(&self.text[prefix..], &updated[prefix..]);
        let removed = prefix..self.text.len() - suffix;
        let inserted = &updated[prefix..updated.len() - suffix];
        let format = if self.selection.is_some() || removed.start == self.caret {
            self.typing_format
        } else {
            self.format_before(removed.start)
        };
        self.splice(removed, inserted, format);
        self.caret = prefix + inserted.len();
        self.selection = None;
        true
    }

    /// Format of the character starting at `position` (the last character
    /// when `position` is the end).
    pub fn format_at(&self, position: usize) -> CharFormat {
        let mut offset = 0;
        for run in &self.runs {
            if position < offset + run.len {
                return run.format;
            }
            offset += run.len;
        }
        self.runs.last().map(|run| run.format).unwrap_or_default()
    }

    fn format_before(&self, position: usize) -> CharFormat {
        if position == 0 {
            self.format_at(0)
        } else {
            self.format_at(position - 1)
        }
    }

    /// Format reported to toolbar toggles.
    pub fn current_format(&self) -> CharFormat {
        match self.selection {
            Some(selection) => self.format_at(selection.start),
            None => self.typing_format,
        }
    }

    /// Whether every selected character (or the typing format) satisfies `predicate`.
    pub fn covers(&self, predicate: impl Fn(&CharFormat) -> bool) -> bool {
        let Some(selection) = self.selection else {
            return predicate(&self.typing_format);
        };
        let mut offset = 0;
        for run in &self.runs {
            let run_range = offset..offset + run.len;
            offset += run.len;
            if run_range.end <= selection.start || run_range.start >= selection.end {
                continue;
            }
            if !predicate(&run.format) {
                return false;
            }
        }
        true
    }

    /// Applies `change` to the selection, or to the typing format when
    /// nothing is selected.
    pub fn merge_format(&mut self, change: FormatChange) {
        match self.selection {
            Some(selection) => {
                let first = self.split_at(selection.start);
                let last = self.split_at(selection.end);
                for run in &mut self.runs[first..last] {
                    run.format = change.apply(run.format);
                }
                self.normalize();
                self.typing_format = change.apply(self.typing_format);
            }
            None => self.typing_format = change.apply(self.typing_format),
        }
    }

    pub(crate) fn append(&mut self, text: &str, format: CharFormat) {
        if text.is_empty() {
            return;
        }
        self.text.push_str(text);
        match self.runs.last_mut() {
            Some(last) if last.format == format => last.len += text.len(),
            _ => self.runs.push(FormatRun {
                len: text.len(),
                format,
            }),
        }
    }

    fn edit_range(&self) -> Range<usize> {
        match self.selection {
            Some(selection) => selection.range(),
            None => self.caret..self.caret,
        }
    }

    fn check_position(&self, position: usize) -> Result<(), BufferError> {
        if position > self.text.len() || !self.text.is_char_boundary(position) {
            return Err(BufferError::InvalidPosition {
                position,
                len: self.text.len(),
            });
        }
        Ok(())
    }

    fn splice(&mut self, range: Range<usize>, text: &str, format: CharFormat) {
        let first = self.split_at(range.start);
        let last = self.split_at(range.end);
        self.runs.drain(first..last);
        if !text.is_empty() {
            self.runs.insert(
                first,
                FormatRun {
                    len: text.len(),
                    format,
                },
            );
        }
        self.text.replace_range(range, text);
        self.normalize();
    }

    /// Ensures a run boundary at `position`; returns the index of the run
    /// starting there.
    fn split_at(&mut self, position: usize) -> usize {
        let mut offset = 0;
        for index in 0..self.runs.len() {
            let run = self.runs[index];
            if position == offset {
                return index;
            }
            if position < offset + run.len {
                let head = position - offset;
                self.runs[index].len = head;
                self.runs.insert(
                    index + 1,
                    FormatRun {
                        len: run.len - head,
                        format: run.format,
                    },
                );
                return index + 1;
            }
            offset += run.len;
        }
        self.runs.len()
    }

    fn normalize(&mut self) {
        let mut merged: Vec<FormatRun> = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..).filter(|run| run.len > 0) {
            match merged.last_mut() {
                Some(last) if last.format == run.format => last.len += run.len,
                _ => merged.push(run),
            }
        }
        self.runs = merged;
    }
}

fn common_prefix(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, left), right)| left != right)
        .map(|((idx, _), _)| idx)
        .unwrap_or_else(|| a.len().min(b.len()))
}

fn common_suffix(a: &str, b: &str) -> usize {
    a.chars()
        .rev()
        .zip(b.chars().rev())
        .take_while(|(left, right)| left == right)
        .map(|(ch, _)| ch.len_utf8())
        .sum()
}

fn prev_char_boundary(text: &str, index: usize) -> Option<usize> {
    if index == 0 || index > text.len() {
        return None;
    }
    text[..index].char_indices().last().map(|(idx, _)| idx)
}

fn next_char_boundary(text: &str, index: usize) -> Option<usize> {
    text.get(index..)?
        .chars()
        .next()
        .map(|ch| index + ch.len_utf8())
}
