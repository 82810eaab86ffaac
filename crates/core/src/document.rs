use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::codec::{self, CodecError, FormatVersion};
use crate::content::ContentStore;
use crate::tree::{DocumentTree, NodeDraft, NodeId, NodeKind, TreeDiff, TreeError};

/// Errors that can occur while editing, loading or saving a book.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed book file: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("document has no associated path")]
    NoPath,
    #[error("node {0} is not a page")]
    NotAPage(NodeId),
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),
}

/// Placeholder labels used for new books and new nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultLabels {
    pub book: String,
    pub chapter: String,
    pub page: String,
}

impl Default for DefaultLabels {
    fn default() -> Self {
        Self {
            book: "My Book".to_string(),
            chapter: "New Chapter".to_string(),
            page: "New Page".to_string(),
        }
    }
}

impl DefaultLabels {
    pub fn for_kind(&self, kind: NodeKind) -> &str {
        match kind {
            NodeKind::Book => &self.book,
            NodeKind::Chapter => &self.chapter,
            NodeKind::Page => &self.page,
        }
    }
}

/// A book tree, the markup of its pages and the file it is bound to.
///
/// Page entries are created together with their page and removed together
/// with it, so the store never holds keys for chapters, the book, or nodes
/// that no longer exist.
#[derive(Debug, Clone)]
pub struct BookDocument {
    tree: DocumentTree,
    contents: ContentStore,
    path: Option<PathBuf>,
    format: FormatVersion,
}

impl BookDocument {
    /// Creates an unsaved book holding only its root.
    pub fn new(root_label: impl Into<String>) -> Self {
        Self {
            tree: DocumentTree::new(root_label),
            contents: ContentStore::new(),
            path: None,
            format: FormatVersion::default(),
        }
    }

    /// The document shown when the editor starts: one chapter with two pages.
    pub fn sample(labels: &DefaultLabels) -> Self {
        let mut document = Self::new(labels.book.clone());
        let root = document.tree.root();
        // Inserting below a fresh root cannot fail.
        if let Ok(chapter) = document.insert(NodeKind::Chapter, Some(root), "Chapter 1") {
            for label in ["Page 1.1", "Page 1.2"] {
                let _ = document.insert(NodeKind::Page, Some(chapter), label);
            }
        }
        document
    }

    /// Starts over with an empty book and forgets the backing file.
    pub fn reset(&mut self, root_label: impl Into<String>) -> TreeDiff {
        self.contents.clear();
        self.path = None;
        self.format = FormatVersion::default();
        self.tree.reset(root_label)
    }

    pub fn tree(&self) -> &DocumentTree {
        &self.tree
    }

    pub fn contents(&self) -> &ContentStore {
        &self.contents
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Header variant used by [`BookDocument::save`].
    pub fn format(&self) -> FormatVersion {
        self.format
    }

    pub fn set_format(&mut self, format: FormatVersion) {
        self.format = format;
    }

    /// Adds a node relative to `anchor` (see [`DocumentTree::insert_sibling`]).
    /// New pages start with an empty entry.
    pub fn insert(
        &mut self,
        kind: NodeKind,
        anchor: Option<NodeId>,
        label: impl Into<String>,
    ) -> Result<NodeId, DocumentError> {
        let (id, _) = self.tree.insert_sibling(kind, anchor, label)?;
        if kind.is_page() {
            self.contents.set(id, String::new());
        }
        Ok(id)
    }

    /// Removes the subtree at `id` and every page entry inside it.
    ///
    /// The root and unknown ids are ignored and yield `None`.
    pub fn remove(&mut self, id: NodeId) -> Option<TreeDiff> {
        let Some(diff) = self.tree.remove(id) else {
            log::debug!("ignored removal of node {id}");
            return None;
        };
        for page in diff.removed_pages() {
            self.contents.remove(page);
        }
        Some(diff)
    }

    /// Markup of a page; empty for pages without an entry and for other nodes.
    pub fn content(&self, id: NodeId) -> &str {
        self.contents.get(id)
    }

    pub fn set_content(&mut self, id: NodeId, markup: impl Into<String>) -> Result<(), DocumentError> {
        match self.tree.kind(id) {
            Some(NodeKind::Page) => {
                self.contents.set(id, markup);
                Ok(())
            }
            Some(_) => Err(DocumentError::NotAPage(id)),
            None => Err(DocumentError::UnknownNode(id)),
        }
    }

    pub fn rename(&mut self, id: NodeId, label: impl Into<String>) -> Result<(), DocumentError> {
        if !self.tree.contains(id) {
            return Err(DocumentError::UnknownNode(id));
        }
        self.tree.set_label(id, label)?;
        Ok(())
    }

    /// Reads a book from `reader`. The result has no backing path.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, DocumentError> {
        let decoded = codec::read_book(reader)?;
        Ok(Self {
            tree: decoded.tree,
            contents: decoded.contents,
            path: None,
            format: decoded.format,
        })
    }

    /// Serialises the book with the given header variant.
    pub fn write_to<W: Write>(&self, writer: &mut W, format: FormatVersion) -> Result<(), DocumentError> {
        codec::write_book(writer, &self.tree, &self.contents, format)?;
        Ok(())
    }

    /// Loads a book file and binds the document to it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path_ref = path.as_ref();
        let mut reader = BufReader::new(File::open(path_ref)?);
        let mut document = Self::read_from(&mut reader)?;
        document.path = Some(path_ref.to_path_buf());
        log::info!(
            "opened {} ({} nodes, {:?})",
            path_ref.display(),
            document.tree.len(),
            document.format
        );
        Ok(document)
    }

    /// Writes the book back to its current path; fails if no path is set.
    pub fn save(&mut self) -> Result<(), DocumentError> {
        let path = self.path.clone().ok_or(DocumentError::NoPath)?;
        let format = self.format;
        self.save_as(path, format)
    }

    /// Writes the book to `path` and binds the document to it.
    ///
    /// The previous path is kept when the write fails.
    pub fn save_as(&mut self, path: impl AsRef<Path>, format: FormatVersion) -> Result<(), DocumentError> {
        let path_ref = path.as_ref();
        let encoded = codec::encode(&self.tree, &self.contents, format)?;
        write_atomic(path_ref, &encoded)?;
        self.path = Some(path_ref.to_path_buf());
        self.format = format;
        log::info!("saved {} ({} bytes)", path_ref.display(), encoded.len());
        Ok(())
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension("ebk.tmp");
    let result = (|| {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        writer.write_all(data)?;
        writer.into_inner().map_err(|err| err.into_error())?.sync_all()?;
        fs::rename(&tmp_path, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(document: &BookDocument) -> Vec<String> {
        document
            .tree()
            .preorder()
            .map(|id| document.tree().get(id).unwrap().label().to_string())
            .collect()
    }

    #[test]
    fn sample_matches_startup_document() {
        let document = BookDocument::sample(&DefaultLabels::default());
        assert_eq!(labels(&document), ["My Book", "Chapter 1", "Page 1.1", "Page 1.2"]);
        assert_eq!(document.contents().len(), 2);
        assert!(document.path().is_none());
    }

    #[test]
    fn pages_get_eager_entries_and_chapters_none() {
        let mut document = BookDocument::new("Book");
        let chapter = document.insert(NodeKind::Chapter, None, "C").unwrap();
        let page = document.insert(NodeKind::Page, Some(chapter), "P").unwrap();
        assert!(document.contents().contains(page));
        assert!(!document.contents().contains(chapter));
        assert!(matches!(
            document.set_content(chapter, "x"),
            Err(DocumentError::NotAPage(id)) if id == chapter
        ));
        assert!(matches!(
            document.set_content(document.root(), "x"),
            Err(DocumentError::NotAPage(_))
        ));
    }

    #[test]
    fn remove_cascades_and_protects_root() {
        let mut document = BookDocument::sample(&DefaultLabels::default());
        let root = document.root();
        assert!(document.remove(root).is_none());
        assert_eq!(document.tree().len(), 4);

        let chapter = document.tree().children(root)[0];
        let pages = document.tree().children(chapter).to_vec();
        document.set_content(pages[0], "<b>one</b>").unwrap();
        let diff = document.remove(chapter).unwrap();
        assert_eq!(diff.removed.len(), 3);
        assert!(document.contents().is_empty());
        assert_eq!(document.content(pages[0]), "");
        assert!(matches!(
            document.set_content(pages[0], "again"),
            Err(DocumentError::UnknownNode(_))
        ));
    }

    #[test]
    fn reset_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.ebk");
        let mut document = BookDocument::sample(&DefaultLabels::default());
        document.save_as(&path, FormatVersion::Legacy).unwrap();

        document.reset("Fresh");
        assert_eq!(labels(&document), ["Fresh"]);
        assert!(document.contents().is_empty());
        assert!(document.path().is_none());
        assert_eq!(document.format(), FormatVersion::Tagged);
    }

    #[test]
    fn save_without_path_fails() {
        let mut document = BookDocument::new("Book");
        assert!(matches!(document.save(), Err(DocumentError::NoPath)));
    }

    #[test]
    fn save_and_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.ebk");
        let mut document = BookDocument::sample(&DefaultLabels::default());
        let page = document.tree().pages().next().unwrap();
        document.set_content(page, "<i>hello</i>").unwrap();
        document.rename(page, "Intro").unwrap();
        document.save_as(&path, FormatVersion::Tagged).unwrap();
        assert_eq!(document.path(), Some(path.as_path()));
        assert!(!dir.path().join("book.ebk.tmp").exists());

        let reopened = BookDocument::open(&path).unwrap();
        assert_eq!(labels(&reopened), ["My Book", "Chapter 1", "Intro", "Page 1.2"]);
        let first = reopened.tree().pages().next().unwrap();
        assert_eq!(reopened.content(first), "<i>hello</i>");
        assert_eq!(reopened.format(), FormatVersion::Tagged);
        assert_eq!(reopened.path(), Some(path.as_path()));
    }

    #[test]
    fn save_keeps_the_format_it_was_opened_with() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.ebk");
        let mut document = BookDocument::new("Old");
        document.save_as(&path, FormatVersion::Legacy).unwrap();

        let mut reopened = BookDocument::open(&path).unwrap();
        assert_eq!(reopened.format(), FormatVersion::Legacy);
        reopened.insert(NodeKind::Chapter, None, "Added").unwrap();
        reopened.save().unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_ne!(&bytes[..4], &codec::FORMAT_MAGIC);
    }

    #[test]
    fn failed_save_as_keeps_previous_path() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.ebk");
        let mut document = BookDocument::new("Book");
        document.save_as(&good, FormatVersion::Tagged).unwrap();

        let bad = dir.path().join("missing").join("bad.ebk");
        assert!(matches!(
            document.save_as(&bad, FormatVersion::Tagged),
            Err(DocumentError::Io(_))
        ));
        assert_eq!(document.path(), Some(good.as_path()));
    }

    #[test]
    fn open_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BookDocument::open(dir.path().join("nope.ebk")),
            Err(DocumentError::Io(_))
        ));
        let junk = dir.path().join("junk.ebk");
        fs::write(&junk, [0, 0, 0, 1, 0, 0]).unwrap();
        assert!(matches!(
            BookDocument::open(&junk),
            Err(DocumentError::Codec(_))
        ));
    }
}
