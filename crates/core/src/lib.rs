pub mod buffer;
pub mod codec;
pub mod content;
pub mod controller;
pub mod document;
mod markup;
pub mod tree;

pub use buffer::{BufferError, CharFormat, FormatChange, FormatRun, RichTextBuffer, Selection};
pub use codec::{CodecError, DecodedBook, FormatVersion};
pub use content::ContentStore;
pub use controller::{
    ControllerError, ControllerOptions, EditorController, EditorState, FindOutcome, SearchSettings,
};
pub use document::{BookDocument, DefaultLabels, DocumentError};
pub use markup::MarkupError;
pub use tree::{
    format_path, parse_path, DocumentTree, Node, NodeDraft, NodeId, NodeKind, RemovedNode,
    TreeDiff, TreeError, MAX_DEPTH,
};
