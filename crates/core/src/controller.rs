//! Selection state machine tying the book tree to the live page buffer.
//!
//! The controller is the single owner of the open [`BookDocument`] and the
//! [`RichTextBuffer`] shown to the user. Moving the tree selection away from
//! a page writes the buffer back into the content store before anything else
//! is loaded, so the store is always current except for the page being
//! edited right now.

use std::ops::Range;
use std::path::Path;

use rustbook_search::{SearchDirection, SearchEngine, SearchError, SearchMode, SearchOptions};
use thiserror::Error;

use crate::buffer::{CharFormat, FormatChange, RichTextBuffer};
use crate::codec::FormatVersion;
use crate::document::{BookDocument, DefaultLabels, DocumentError};
use crate::tree::{NodeId, NodeKind, TreeDiff};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Search(#[from] SearchError),
}

/// Which kind of content the buffer currently mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorState {
    NoSelection,
    PageSelected(NodeId),
}

/// Result of a find action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindOutcome {
    /// The query is empty; nothing happened.
    Skipped,
    Found(Range<usize>),
    /// The search ran off the end (or start) of the page and was retried
    /// once from the opposite end. Holds the match of the retry, if any.
    Wrapped(Option<Range<usize>>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchSettings {
    pub case_sensitive: bool,
    pub whole_word: bool,
}

/// Labels for new nodes and the header written for new books.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerOptions {
    pub labels: DefaultLabels,
    pub format: FormatVersion,
}

#[derive(Debug)]
pub struct EditorController {
    document: BookDocument,
    buffer: RichTextBuffer,
    selection: Option<NodeId>,
    active_page: Option<NodeId>,
    query: String,
    search: SearchSettings,
    options: ControllerOptions,
}

impl EditorController {
    /// Starts with an empty book.
    pub fn new(options: ControllerOptions) -> Self {
        let mut document = BookDocument::new(options.labels.book.clone());
        document.set_format(options.format);
        Self::with_document(document, options)
    }

    /// Wraps an existing document with nothing selected.
    pub fn with_document(document: BookDocument, options: ControllerOptions) -> Self {
        Self {
            document,
            buffer: RichTextBuffer::new(),
            selection: None,
            active_page: None,
            query: String::new(),
            search: SearchSettings::default(),
            options,
        }
    }

    pub fn document(&self) -> &BookDocument {
        &self.document
    }

    pub fn buffer(&self) -> &RichTextBuffer {
        &self.buffer
    }

    /// The live buffer, available only while a page is selected.
    pub fn buffer_mut(&mut self) -> Option<&mut RichTextBuffer> {
        match self.active_page {
            Some(_) => Some(&mut self.buffer),
            None => None,
        }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn state(&self) -> EditorState {
        match self.active_page {
            Some(page) => EditorState::PageSelected(page),
            None => EditorState::NoSelection,
        }
    }

    /// Selected tree node of any kind; also the anchor for insertions.
    pub fn selection(&self) -> Option<NodeId> {
        self.selection
    }

    /// Current markup of a page, including unflushed edits of the active one.
    pub fn page_markup(&self, id: NodeId) -> String {
        if self.active_page == Some(id) {
            self.buffer.to_markup()
        } else {
            self.document.content(id).to_string()
        }
    }

    /// Moves the tree selection, flushing the previous page and loading the
    /// next one. Chapters and the book clear the buffer.
    pub fn select(&mut self, target: Option<NodeId>) -> Result<EditorState, ControllerError> {
        if let Some(id) = target {
            if !self.document.tree().contains(id) {
                return Err(DocumentError::UnknownNode(id).into());
            }
        }
        if target == self.selection {
            return Ok(self.state());
        }
        self.flush();
        self.selection = target;
        self.active_page =
            target.filter(|id| self.document.tree().kind(*id) == Some(NodeKind::Page));
        self.load_active_page();
        log::debug!("selection changed to {:?}", self.state());
        Ok(self.state())
    }

    /// Writes the buffer into the store if a page is active.
    pub fn flush(&mut self) {
        let Some(page) = self.active_page else {
            return;
        };
        if let Err(err) = self.document.set_content(page, self.buffer.to_markup()) {
            log::warn!("could not store page {page}: {err}");
        }
    }

    /// Flushes the active page and hands the document back.
    pub fn close(mut self) -> BookDocument {
        self.flush();
        self.document
    }

    fn load_active_page(&mut self) {
        let Some(page) = self.active_page else {
            self.buffer.clear();
            return;
        };
        let markup = self.document.content(page);
        self.buffer = match RichTextBuffer::from_markup(markup) {
            Ok(buffer) => buffer,
            Err(err) => {
                log::warn!("page {page} holds unreadable markup, showing it as text: {err}");
                RichTextBuffer::from_plain(markup)
            }
        };
    }

    fn forget_selection(&mut self) {
        self.selection = None;
        self.active_page = None;
        self.buffer.clear();
    }

    /// Replaces the document with an empty book.
    pub fn new_document(&mut self) {
        self.forget_selection();
        self.document.reset(self.options.labels.book.clone());
        self.document.set_format(self.options.format);
    }

    /// Loads a book file. On failure the current document, selection and
    /// buffer are left as they were.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<(), ControllerError> {
        let document = BookDocument::open(path)?;
        self.forget_selection();
        self.document = document;
        Ok(())
    }

    pub fn save(&mut self) -> Result<(), ControllerError> {
        self.flush();
        self.document.save()?;
        Ok(())
    }

    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<(), ControllerError> {
        self.flush();
        let format = self.document.format();
        self.document.save_as(path, format)?;
        Ok(())
    }

    pub fn add_chapter(&mut self) -> Result<NodeId, ControllerError> {
        self.add(NodeKind::Chapter)
    }

    pub fn add_page(&mut self) -> Result<NodeId, ControllerError> {
        self.add(NodeKind::Page)
    }

    fn add(&mut self, kind: NodeKind) -> Result<NodeId, ControllerError> {
        let label = self.options.labels.for_kind(kind).to_string();
        Ok(self.document.insert(kind, self.selection, label)?)
    }

    /// Removes the selected subtree. Nothing happens without a selection or
    /// when the book itself is selected. Edits in the live buffer belong to
    /// the removed page and are dropped.
    pub fn remove_selected(&mut self) -> Option<TreeDiff> {
        let target = self.selection?;
        let diff = self.document.remove(target)?;
        self.forget_selection();
        Some(diff)
    }

    pub fn rename(&mut self, id: NodeId, label: impl Into<String>) -> Result<(), ControllerError> {
        self.document.rename(id, label)?;
        Ok(())
    }

    pub fn current_format(&self) -> CharFormat {
        self.buffer.current_format()
    }

    /// Each toggle returns the new state of its attribute.
    pub fn toggle_bold(&mut self) -> bool {
        self.toggle(|format| format.bold, FormatChange::bold)
    }

    pub fn toggle_italic(&mut self) -> bool {
        self.toggle(|format| format.italic, FormatChange::italic)
    }

    pub fn toggle_underline(&mut self) -> bool {
        self.toggle(|format| format.underline, FormatChange::underline)
    }

    fn toggle(&mut self, has: impl Fn(&CharFormat) -> bool, change: fn(bool) -> FormatChange) -> bool {
        let enable = !self.buffer.covers(has);
        self.buffer.merge_format(change(enable));
        enable
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    pub fn search_settings(&self) -> SearchSettings {
        self.search
    }

    pub fn set_search_settings(&mut self, settings: SearchSettings) {
        self.search = settings;
    }

    /// The Find action; behaves like [`EditorController::find_next`].
    pub fn search(&mut self) -> Result<FindOutcome, ControllerError> {
        self.find(SearchDirection::Forward)
    }

    pub fn find_next(&mut self) -> Result<FindOutcome, ControllerError> {
        self.find(SearchDirection::Forward)
    }

    pub fn find_previous(&mut self) -> Result<FindOutcome, ControllerError> {
        self.find(SearchDirection::Backward)
    }

    fn find(&mut self, direction: SearchDirection) -> Result<FindOutcome, ControllerError> {
        if self.query.is_empty() {
            return Ok(FindOutcome::Skipped);
        }
        let options = SearchOptions {
            pattern: self.query.clone(),
            mode: SearchMode::Plain,
            case_sensitive: self.search.case_sensitive,
            whole_word: self.search.whole_word,
            direction,
        };
        let caret = self.buffer.caret();
        let (start, restart) = match direction {
            SearchDirection::Forward => (
                self.buffer
                    .selection()
                    .map_or(caret, |selection| selection.end()),
                0,
            ),
            SearchDirection::Backward => (
                self.buffer
                    .selection()
                    .map_or(caret, |selection| selection.start()),
                self.buffer.len(),
            ),
        };

        let (found, wrapped) = {
            let engine = SearchEngine::new(self.buffer.plain_text());
            match engine.find(start, &options)? {
                Some(found) => (Some(found.range()), false),
                None => (engine.find(restart, &options)?.map(|found| found.range()), true),
            }
        };

        match &found {
            Some(range) => {
                let (anchor, head) = match direction {
                    SearchDirection::Forward => (range.start, range.end),
                    SearchDirection::Backward => (range.end, range.start),
                };
                // Ranges come from the engine and lie on char boundaries.
                let _ = self.buffer.select(anchor, head);
            }
            None => {
                let _ = self.buffer.set_caret(restart);
            }
        }

        if wrapped {
            log::debug!("search for {:?} wrapped ({direction:?})", self.query);
            Ok(FindOutcome::Wrapped(found))
        } else {
            Ok(found.map_or(FindOutcome::Wrapped(None), FindOutcome::Found))
        }
    }
}

impl Default for EditorController {
    fn default() -> Self {
        Self::new(ControllerOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_with_page(text: &str) -> (EditorController, NodeId) {
        let mut controller = EditorController::default();
        let page = controller.add_page().unwrap();
        controller.select(Some(page)).unwrap();
        controller.buffer_mut().unwrap().insert_text(text);
        controller.buffer_mut().unwrap().move_to_start();
        (controller, page)
    }

    #[test]
    fn chapters_clear_the_buffer_but_anchor_insertions() {
        let mut controller = EditorController::default();
        let chapter = controller.add_chapter().unwrap();
        assert_eq!(controller.select(Some(chapter)).unwrap(), EditorState::NoSelection);
        assert!(controller.buffer_mut().is_none());

        let page = controller.add_page().unwrap();
        assert_eq!(controller.document().tree().parent(page), Some(chapter));
    }

    #[test]
    fn unknown_selection_is_rejected_without_side_effects() {
        let (mut controller, page) = controller_with_page("keep");
        let stray = {
            let mut other = EditorController::default();
            other.add_page().unwrap()
        };
        assert!(controller.select(Some(stray)).is_err());
        assert_eq!(controller.state(), EditorState::PageSelected(page));
        assert_eq!(controller.buffer().plain_text(), "keep");
    }

    #[test]
    fn toggles_follow_the_selection() {
        let (mut controller, page) = controller_with_page("hello world");
        controller.buffer_mut().unwrap().select(0, 5).unwrap();
        assert!(controller.toggle_bold());
        assert!(controller.current_format().bold);
        assert!(!controller.toggle_bold());
        assert!(controller.toggle_italic());
        assert!(controller.toggle_underline());
        assert_eq!(controller.page_markup(page), "<i><u>hello</u></i> world");
        // Not stored until the page is left.
        assert_eq!(controller.document().content(page), "");
    }

    #[test]
    fn toggle_without_selection_sets_typing_format() {
        let (mut controller, page) = controller_with_page("ab");
        controller.buffer_mut().unwrap().move_to_end();
        assert!(controller.toggle_bold());
        controller.buffer_mut().unwrap().insert_text("c");
        assert_eq!(controller.page_markup(page), "ab<b>c</b>");
    }

    #[test]
    fn backward_search_wraps_to_the_end() {
        let (mut controller, _) = controller_with_page("abcXabc");
        controller.set_query("abc");
        assert_eq!(controller.find_previous().unwrap(), FindOutcome::Wrapped(Some(4..7)));
        assert_eq!(controller.buffer().caret(), 4);
        assert_eq!(controller.find_previous().unwrap(), FindOutcome::Found(0..3));
        assert_eq!(controller.buffer().caret(), 0);
    }

    #[test]
    fn find_next_after_find_previous_moves_forward() {
        let (mut controller, _) = controller_with_page("abc abc abc");
        controller.buffer_mut().unwrap().move_to_end();
        controller.set_query("abc");
        assert_eq!(controller.find_previous().unwrap(), FindOutcome::Found(8..11));
        assert_eq!(controller.find_previous().unwrap(), FindOutcome::Found(4..7));
        assert_eq!(controller.find_next().unwrap(), FindOutcome::Found(8..11));
        assert_eq!(controller.buffer().caret(), 11);
    }

    #[test]
    fn search_honours_settings_and_empty_query() {
        let (mut controller, _) = controller_with_page("Word sword word");
        assert_eq!(controller.search().unwrap(), FindOutcome::Skipped);

        controller.set_query("word");
        controller.set_search_settings(SearchSettings {
            case_sensitive: true,
            whole_word: true,
        });
        assert_eq!(controller.search().unwrap(), FindOutcome::Found(11..15));
        assert_eq!(controller.buffer().selected_text(), "word");

        controller.set_query("absent");
        assert_eq!(controller.find_next().unwrap(), FindOutcome::Wrapped(None));
        assert_eq!(controller.buffer().caret(), 0);
    }

    #[test]
    fn carriage_returns_survive_navigation() {
        let (mut controller, page) = controller_with_page("a\r\nb");
        let other = controller.add_page().unwrap();
        controller.select(Some(other)).unwrap();
        controller.select(Some(page)).unwrap();
        assert_eq!(controller.buffer().plain_text(), "a\r\nb");
    }

    #[test]
    fn failed_open_keeps_everything() {
        let (mut controller, page) = controller_with_page("draft");
        let dir = tempfile::tempdir().unwrap();
        assert!(controller.open(dir.path().join("missing.ebk")).is_err());
        assert_eq!(controller.state(), EditorState::PageSelected(page));
        assert_eq!(controller.buffer().plain_text(), "draft");
    }

    #[test]
    fn save_flushes_the_active_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.ebk");
        let (mut controller, page) = controller_with_page("saved text");
        assert!(matches!(
            controller.save(),
            Err(ControllerError::Document(DocumentError::NoPath))
        ));
        controller.save_as(&path).unwrap();
        assert_eq!(controller.document().content(page), "saved text");

        let mut reopened = EditorController::default();
        reopened.open(&path).unwrap();
        let page = reopened.document().tree().pages().next().unwrap();
        reopened.select(Some(page)).unwrap();
        assert_eq!(reopened.buffer().plain_text(), "saved text");
    }

    #[test]
    fn new_document_uses_configured_labels_and_format() {
        let options = ControllerOptions {
            labels: DefaultLabels {
                book: "Atlas".into(),
                chapter: "Part".into(),
                page: "Leaf".into(),
            },
            format: FormatVersion::Legacy,
        };
        let mut controller = EditorController::new(options);
        let chapter = controller.add_chapter().unwrap();
        controller.select(Some(chapter)).unwrap();
        let page = controller.add_page().unwrap();
        let tree = controller.document().tree();
        assert_eq!(tree.get(chapter).unwrap().label(), "Part");
        assert_eq!(tree.get(page).unwrap().label(), "Leaf");

        controller.new_document();
        let tree = controller.document().tree();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(tree.root()).unwrap().label(), "Atlas");
        assert_eq!(controller.selection(), None);
        assert_eq!(controller.document().format(), FormatVersion::Legacy);
    }

    #[test]
    fn unreadable_markup_falls_back_to_text() {
        let mut document = BookDocument::new("Book");
        let page = document.insert(NodeKind::Page, None, "P").unwrap();
        document.set_content(page, "a &bogus; b").unwrap();
        let mut controller = EditorController::with_document(document, ControllerOptions::default());
        controller.select(Some(page)).unwrap();
        assert_eq!(controller.buffer().plain_text(), "a &bogus; b");
    }

    #[test]
    fn close_flushes() {
        let (controller, page) = controller_with_page("last words");
        let document = controller.close();
        assert_eq!(document.content(page), "last words");
    }
}
