//! Binary persistence of a book tree and its page contents.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! File     := [Magic Version] TopLevelCount:i32 Node*
//! Node     := Label:str Kind:str [Content:str] ChildCount:i32 Child*
//! str      := ByteLen:u32 UTF-16BE units   (0xFFFF_FFFF is the null string)
//! ```
//!
//! `Content` is present only for pages. Legacy files carry no magic; the
//! reader detects both forms.

use std::io::{self, ErrorKind, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::content::ContentStore;
use crate::tree::{DocumentTree, NodeDraft, NodeId, NodeKind, TreeError};

pub use crate::tree::MAX_DEPTH;

/// Marker opening a tagged file.
pub const FORMAT_MAGIC: [u8; 4] = *b"EBK\0";
/// Version written after [`FORMAT_MAGIC`].
pub const FORMAT_VERSION: u32 = 1;

const NULL_STRING: u32 = u32::MAX;

/// Which header variant to emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FormatVersion {
    /// No header; the layout of the Qt `QDataStream` files.
    Legacy,
    /// Magic plus [`FORMAT_VERSION`].
    #[default]
    Tagged,
}

/// Errors produced while encoding or decoding a book stream.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(io::Error),
    #[error("stream ended unexpectedly")]
    Truncated,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("invalid count {0}")]
    InvalidCount(i32),
    #[error("invalid string payload")]
    InvalidString,
    #[error("unknown node kind `{0}`")]
    UnknownKind(String),
    #[error("document has no root node")]
    MissingRoot,
    #[error("first top-level node is a {0}, expected a book")]
    RootNotBook(NodeKind),
    #[error("book node found below the root")]
    UnexpectedBook,
    #[error("page `{0}` declares children")]
    PageWithChildren(String),
    #[error("nesting deeper than {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("unexpected data after the document")]
    TrailingData,
    #[error("{0} does not fit in the format")]
    TooLarge(&'static str),
    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl From<io::Error> for CodecError {
    fn from(err: io::Error) -> Self {
        if err.kind() == ErrorKind::UnexpectedEof {
            CodecError::Truncated
        } else {
            CodecError::Io(err)
        }
    }
}

/// Result of a successful read.
#[derive(Debug, Clone)]
pub struct DecodedBook {
    pub tree: DocumentTree,
    pub contents: ContentStore,
    pub format: FormatVersion,
}

/// Serialises `tree` in pre-order, pulling page markup from `contents`.
pub fn write_book<W: Write>(
    writer: &mut W,
    tree: &DocumentTree,
    contents: &ContentStore,
    format: FormatVersion,
) -> Result<(), CodecError> {
    if format == FormatVersion::Tagged {
        writer.write_all(&FORMAT_MAGIC)?;
        writer.write_u32::<BigEndian>(FORMAT_VERSION)?;
    }
    write_count(writer, 1)?;

    let mut stack = vec![tree.root()];
    while let Some(id) = stack.pop() {
        let Some(node) = tree.get(id) else {
            continue;
        };
        write_string(writer, node.label())?;
        write_string(writer, node.kind().as_str())?;
        if node.is_page() {
            write_string(writer, contents.get(id))?;
        }
        write_count(writer, node.children().len())?;
        stack.extend(node.children().iter().rev().copied());
    }
    Ok(())
}

/// Encodes into an in-memory buffer.
pub fn encode(
    tree: &DocumentTree,
    contents: &ContentStore,
    format: FormatVersion,
) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::new();
    write_book(&mut buffer, tree, contents, format)?;
    Ok(buffer)
}

/// Rebuilds a tree and its contents from a stream.
///
/// The first top-level node must be the book. Further top-level nodes, which
/// older files may contain, are attached under the book in read order.
pub fn read_book<R: Read>(reader: &mut R) -> Result<DecodedBook, CodecError> {
    let mut input = BookReader { inner: reader };
    let (format, top_level) = input.read_preamble()?;
    if top_level == 0 {
        return Err(CodecError::MissingRoot);
    }

    let (label, kind) = input.read_header()?;
    if kind != NodeKind::Book {
        return Err(CodecError::RootNotBook(kind));
    }
    let mut tree = DocumentTree::new(label);
    let mut contents = ContentStore::new();
    let root = tree.root();
    let count = input.read_count()?;
    if count > 0 {
        tree.set_expanded(root, true)?;
    }
    input.read_children(&mut tree, &mut contents, root, count, 0)?;

    for _ in 1..top_level {
        let (id, count) = input.read_node(&mut tree, &mut contents, root)?;
        log::debug!("attached stray top-level node {id} under the book root");
        input.read_children(&mut tree, &mut contents, id, count, 1)?;
    }

    if input.has_trailing_data()? {
        return Err(CodecError::TrailingData);
    }
    log::debug!(
        "decoded {} node(s), {} page(s) ({format:?})",
        tree.len(),
        contents.len()
    );
    Ok(DecodedBook {
        tree,
        contents,
        format,
    })
}

/// Decodes from an in-memory buffer.
pub fn decode(bytes: &[u8]) -> Result<DecodedBook, CodecError> {
    let mut cursor = bytes;
    read_book(&mut cursor)
}

fn write_count<W: Write>(writer: &mut W, count: usize) -> Result<(), CodecError> {
    let count = i32::try_from(count).map_err(|_| CodecError::TooLarge("child count"))?;
    writer.write_i32::<BigEndian>(count)?;
    Ok(())
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<(), CodecError> {
    let units: Vec<u16> = value.encode_utf16().collect();
    let byte_len = units
        .len()
        .checked_mul(2)
        .and_then(|len| u32::try_from(len).ok())
        .filter(|len| *len != NULL_STRING)
        .ok_or(CodecError::TooLarge("string"))?;
    writer.write_u32::<BigEndian>(byte_len)?;
    for unit in units {
        writer.write_u16::<BigEndian>(unit)?;
    }
    Ok(())
}

struct BookReader<'r, R> {
    inner: &'r mut R,
}

impl<R: Read> BookReader<'_, R> {
    fn read_preamble(&mut self) -> Result<(FormatVersion, usize), CodecError> {
        let mut head = [0u8; 4];
        self.inner.read_exact(&mut head)?;
        if head == FORMAT_MAGIC {
            let version = self.inner.read_u32::<BigEndian>()?;
            if version != FORMAT_VERSION {
                return Err(CodecError::UnsupportedVersion(version));
            }
            return Ok((FormatVersion::Tagged, self.read_count()?));
        }
        Ok((FormatVersion::Legacy, count_from_raw(i32::from_be_bytes(head))?))
    }

    fn read_count(&mut self) -> Result<usize, CodecError> {
        count_from_raw(self.inner.read_i32::<BigEndian>()?)
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let byte_len = self.inner.read_u32::<BigEndian>()?;
        if byte_len == NULL_STRING {
            return Ok(String::new());
        }
        if byte_len % 2 != 0 {
            return Err(CodecError::InvalidString);
        }
        // Bounded read: a corrupt length must not trigger a huge allocation.
        let mut bytes = Vec::new();
        self.inner
            .by_ref()
            .take(u64::from(byte_len))
            .read_to_end(&mut bytes)?;
        if bytes.len() as u64 != u64::from(byte_len) {
            return Err(CodecError::Truncated);
        }
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| CodecError::InvalidString)
    }

    fn read_header(&mut self) -> Result<(String, NodeKind), CodecError> {
        let label = self.read_string()?;
        let kind = self.read_string()?;
        let kind = kind
            .parse::<NodeKind>()
            .map_err(|_| CodecError::UnknownKind(kind))?;
        Ok((label, kind))
    }

    /// Reads one node below `parent` and returns it with its declared child count.
    fn read_node(
        &mut self,
        tree: &mut DocumentTree,
        contents: &mut ContentStore,
        parent: NodeId,
    ) -> Result<(NodeId, usize), CodecError> {
        let (label, kind) = self.read_header()?;
        if kind == NodeKind::Book {
            return Err(CodecError::UnexpectedBook);
        }
        let content = if kind.is_page() {
            Some(self.read_string()?)
        } else {
            None
        };
        let count = self.read_count()?;
        if kind.is_page() && count > 0 {
            return Err(CodecError::PageWithChildren(label));
        }

        let (id, _) = tree.append_child(parent, NodeDraft::new(label, kind))?;
        if let Some(content) = content {
            contents.set(id, content);
        }
        if count > 0 {
            tree.set_expanded(id, true)?;
        }
        Ok((id, count))
    }

    fn read_children(
        &mut self,
        tree: &mut DocumentTree,
        contents: &mut ContentStore,
        parent: NodeId,
        count: usize,
        parent_depth: usize,
    ) -> Result<(), CodecError> {
        let mut pending: Vec<(NodeId, usize)> = vec![(parent, count)];
        while let Some(top) = pending.last_mut() {
            if top.1 == 0 {
                pending.pop();
                continue;
            }
            top.1 -= 1;
            let owner = top.0;
            if parent_depth + pending.len() > MAX_DEPTH {
                return Err(CodecError::TooDeep);
            }
            let child = self.read_node(tree, contents, owner)?;
            pending.push(child);
        }
        Ok(())
    }

    fn has_trailing_data(&mut self) -> Result<bool, CodecError> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(read) => return Ok(read > 0),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn count_from_raw(raw: i32) -> Result<usize, CodecError> {
    usize::try_from(raw).map_err(|_| CodecError::InvalidCount(raw))
}
