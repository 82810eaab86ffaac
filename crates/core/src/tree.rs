use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Deepest level a node may sit at, counting the root as level 0.
pub const MAX_DEPTH: usize = 512;

/// Process-local identifier assigned to every node when it is created.
///
/// Identifiers are never reused, so a stale id simply stops resolving once
/// its node has been removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Kind of a book node. Fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Book,
    Chapter,
    Page,
}

impl NodeKind {
    /// Literal used in the persisted format.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Book => "book",
            NodeKind::Chapter => "chapter",
            NodeKind::Page => "page",
        }
    }

    pub fn is_page(self) -> bool {
        matches!(self, NodeKind::Page)
    }

    /// Pages are leaves; books and chapters hold children.
    pub fn accepts_children(self) -> bool {
        !self.is_page()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = TreeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "book" => Ok(NodeKind::Book),
            "chapter" => Ok(NodeKind::Chapter),
            "page" => Ok(NodeKind::Page),
            other => Err(TreeError::UnknownKind(other.to_string())),
        }
    }
}

/// A node stored in the tree arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    id: NodeId,
    label: String,
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    editable: bool,
    expanded: bool,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Non-owning back-reference, `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Whether the label was marked user-editable at creation.
    pub fn is_editable(&self) -> bool {
        self.editable
    }

    /// Presentation hint: the node was expanded by an insertion or a load.
    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn is_page(&self) -> bool {
        self.kind.is_page()
    }
}

/// Describes a node before it is inserted.
#[derive(Debug, Clone)]
pub struct NodeDraft {
    pub label: String,
    pub kind: NodeKind,
    pub editable: bool,
}

impl NodeDraft {
    pub fn new(label: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            label: label.into(),
            kind,
            editable: false,
        }
    }

    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }

    fn build(self, parent: Option<NodeId>) -> Node {
        Node {
            id: NodeId::next(),
            label: self.label,
            kind: self.kind,
            parent,
            children: Vec::new(),
            editable: self.editable,
            expanded: false,
        }
    }
}

/// Captures differences after a tree mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    pub added: Vec<NodeId>,
    pub removed: Vec<RemovedNode>,
    pub updated: Vec<NodeId>,
}

impl TreeDiff {
    /// Identifiers of removed pages, used to cascade content deletion.
    pub fn removed_pages(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.removed
            .iter()
            .filter(|node| node.kind.is_page())
            .map(|node| node.id)
    }
}

/// Identity and kind of a node dropped by [`DocumentTree::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovedNode {
    pub id: NodeId,
    pub kind: NodeKind,
}

/// Tree-manipulation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    #[error("node {0} cannot accept children")]
    InvalidParent(NodeId),
    #[error("a book node can only be the root")]
    BookNotAllowed,
    #[error("unknown node kind `{0}`")]
    UnknownKind(String),
    #[error("no node at position `{0}`")]
    InvalidPath(String),
    #[error("node {0} is already nested {} levels deep", MAX_DEPTH)]
    TooDeep(NodeId),
}

/// Ordered, rooted tree of book nodes stored as a flat arena.
///
/// The root is always a [`NodeKind::Book`]; it cannot be removed and no
/// other node may be a book.
#[derive(Debug, Clone)]
pub struct DocumentTree {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    revision: u64,
}

impl DocumentTree {
    /// Creates a tree holding only a book root with the given label.
    pub fn new(root_label: impl Into<String>) -> Self {
        let root = NodeDraft::new(root_label, NodeKind::Book).build(None);
        let root_id = root.id;
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Self {
            nodes,
            root: root_id,
            revision: 0,
        }
    }

    /// Drops every node and installs a fresh root in the same step.
    pub fn reset(&mut self, root_label: impl Into<String>) -> TreeDiff {
        let removed = self
            .preorder()
            .filter_map(|id| self.nodes.get(&id))
            .map(|node| RemovedNode {
                id: node.id,
                kind: node.kind,
            })
            .collect();
        let revision = self.revision.wrapping_add(1);
        *self = Self::new(root_label);
        self.revision = revision;
        TreeDiff {
            added: vec![self.root],
            removed,
            updated: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Monotonic counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        // A tree always carries its root.
        false
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(&id).ok_or(TreeError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.nodes.get_mut(&id).ok_or(TreeError::NodeNotFound(id))
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.get(id).map(Node::kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(Node::parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(Node::children).unwrap_or(&[])
    }

    pub fn set_label(&mut self, id: NodeId, label: impl Into<String>) -> Result<(), TreeError> {
        self.node_mut(id)?.label = label.into();
        self.revision = self.revision.wrapping_add(1);
        Ok(())
    }

    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) -> Result<(), TreeError> {
        self.node_mut(id)?.expanded = expanded;
        Ok(())
    }

    /// Resolves the node that receives an insertion anchored at `anchor`.
    ///
    /// Pages cannot hold children, so a selected page redirects to its
    /// parent. No anchor targets the root.
    pub fn insertion_parent(&self, anchor: Option<NodeId>) -> Result<NodeId, TreeError> {
        let Some(anchor) = anchor else {
            return Ok(self.root);
        };
        let node = self.node(anchor)?;
        if node.is_page() {
            node.parent.ok_or(TreeError::InvalidParent(anchor))
        } else {
            Ok(anchor)
        }
    }

    /// Appends an editable node of `kind` under the parent resolved from
    /// `anchor` and expands that parent.
    pub fn insert_sibling(
        &mut self,
        kind: NodeKind,
        anchor: Option<NodeId>,
        label: impl Into<String>,
    ) -> Result<(NodeId, TreeDiff), TreeError> {
        let parent = self.insertion_parent(anchor)?;
        let draft = NodeDraft::new(label, kind).editable();
        let (id, diff) = self.append_child(parent, draft)?;
        self.node_mut(parent)?.expanded = true;
        Ok((id, diff))
    }

    /// Appends a node built from `draft` as the last child of `parent`.
    pub fn append_child(
        &mut self,
        parent: NodeId,
        draft: NodeDraft,
    ) -> Result<(NodeId, TreeDiff), TreeError> {
        if draft.kind == NodeKind::Book {
            return Err(TreeError::BookNotAllowed);
        }
        if !self.node(parent)?.kind.accepts_children() {
            return Err(TreeError::InvalidParent(parent));
        }
        if self.depth(parent).unwrap_or(0) >= MAX_DEPTH {
            return Err(TreeError::TooDeep(parent));
        }
        let node = draft.build(Some(parent));
        let id = node.id;
        self.nodes.insert(id, node);
        self.node_mut(parent)?.children.push(id);
        self.revision = self.revision.wrapping_add(1);
        log::debug!("added node {id} under {parent}");
        Ok((
            id,
            TreeDiff {
                added: vec![id],
                removed: Vec::new(),
                updated: vec![parent],
            },
        ))
    }

    /// Detaches and drops the subtree rooted at `id`.
    ///
    /// Returns `None` without touching the tree when `id` is the root or is
    /// not part of this tree.
    pub fn remove(&mut self, id: NodeId) -> Option<TreeDiff> {
        if id == self.root {
            return None;
        }
        let parent = self.get(id)?.parent?;
        let doomed: Vec<NodeId> = self.subtree(id).collect();

        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.retain(|child| *child != id);
        }
        let removed = doomed
            .into_iter()
            .filter_map(|node_id| self.nodes.remove(&node_id))
            .map(|node| RemovedNode {
                id: node.id,
                kind: node.kind,
            })
            .collect::<Vec<_>>();
        self.revision = self.revision.wrapping_add(1);
        log::debug!("removed {} node(s) rooted at {id}", removed.len());
        Some(TreeDiff {
            added: Vec::new(),
            removed,
            updated: vec![parent],
        })
    }

    /// Pre-order walk of the whole tree starting at the root.
    pub fn preorder(&self) -> Preorder<'_> {
        self.subtree(self.root)
    }

    /// Pre-order walk of the subtree rooted at `id` (empty if unknown).
    pub fn subtree(&self, id: NodeId) -> Preorder<'_> {
        let stack = if self.contains(id) { vec![id] } else { Vec::new() };
        Preorder { tree: self, stack }
    }

    /// Every page in document order.
    pub fn pages(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.preorder().filter(|id| self.kind(*id) == Some(NodeKind::Page))
    }

    /// Whether `id` equals `ancestor` or lies beneath it.
    pub fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Number of edges between the root and `id`.
    pub fn depth(&self, id: NodeId) -> Option<usize> {
        let mut depth = 0;
        let mut cursor = self.get(id)?.parent;
        while let Some(current) = cursor {
            depth += 1;
            cursor = self.parent(current);
        }
        Some(depth)
    }

    /// Zero-based child indices leading from the root to `id`.
    pub fn position_path(&self, id: NodeId) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut current = id;
        while let Some(parent) = self.get(current)?.parent {
            let index = self.children(parent).iter().position(|c| *c == current)?;
            path.push(index);
            current = parent;
        }
        path.reverse();
        Some(path)
    }

    /// Follows zero-based child indices from the root.
    pub fn resolve_path(&self, path: &[usize]) -> Result<NodeId, TreeError> {
        let mut current = self.root;
        for (depth, index) in path.iter().enumerate() {
            current = *self.children(current).get(*index).ok_or_else(|| {
                TreeError::InvalidPath(format_path(&path[..=depth]))
            })?;
        }
        Ok(current)
    }
}

/// Renders a position path as `a/b/c`; the root is the empty string.
pub fn format_path(path: &[usize]) -> String {
    path.iter()
        .map(|index| index.to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parses `a/b/c` (leading or trailing slashes allowed) into child indices.
pub fn parse_path(text: &str) -> Result<Vec<usize>, TreeError> {
    text.split('/')
        .filter(|segment| !segment.trim().is_empty())
        .map(|segment| {
            segment
                .trim()
                .parse::<usize>()
                .map_err(|_| TreeError::InvalidPath(text.to_string()))
        })
        .collect()
}

/// Iterator returned by [`DocumentTree::preorder`].
pub struct Preorder<'a> {
    tree: &'a DocumentTree,
    stack: Vec<NodeId>,
}

impl Iterator for Preorder<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.children(id).iter().rev().copied());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(tree: &DocumentTree, parent: NodeId) -> Vec<String> {
        tree.children(parent)
            .iter()
            .map(|id| tree.get(*id).unwrap().label().to_string())
            .collect()
    }

    #[test]
    fn new_tree_has_single_book_root() {
        let tree = DocumentTree::new("My book");
        let root = tree.get(tree.root()).unwrap();
        assert_eq!(root.kind(), NodeKind::Book);
        assert_eq!(root.label(), "My book");
        assert!(root.parent().is_none());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn insert_without_anchor_targets_root() {
        let mut tree = DocumentTree::new("Book");
        let (chapter, diff) = tree
            .insert_sibling(NodeKind::Chapter, None, "New chapter")
            .unwrap();
        assert_eq!(diff.added, vec![chapter]);
        assert_eq!(diff.updated, vec![tree.root()]);
        assert_eq!(tree.parent(chapter), Some(tree.root()));
        assert!(tree.get(chapter).unwrap().is_editable());
        assert!(tree.get(tree.root()).unwrap().is_expanded());
    }

    #[test]
    fn insert_with_page_anchor_targets_page_parent() {
        let mut tree = DocumentTree::new("Book");
        let (chapter, _) = tree.insert_sibling(NodeKind::Chapter, None, "Ch").unwrap();
        let (page, _) = tree
            .insert_sibling(NodeKind::Page, Some(chapter), "P")
            .unwrap();
        let (second, _) = tree
            .insert_sibling(NodeKind::Chapter, Some(page), "Nested")
            .unwrap();
        assert_eq!(tree.parent(second), Some(chapter));
        assert_eq!(tree.children(chapter), &[page, second]);
        assert!(tree.children(page).is_empty());
    }

    #[test]
    fn append_rejects_page_parent_and_books() {
        let mut tree = DocumentTree::new("Book");
        let (page, _) = tree.insert_sibling(NodeKind::Page, None, "P").unwrap();
        let err = tree
            .append_child(page, NodeDraft::new("x", NodeKind::Page))
            .unwrap_err();
        assert_eq!(err, TreeError::InvalidParent(page));
        let err = tree
            .append_child(tree.root(), NodeDraft::new("b", NodeKind::Book))
            .unwrap_err();
        assert_eq!(err, TreeError::BookNotAllowed);
    }

    #[test]
    fn nesting_stops_at_max_depth() {
        let mut tree = DocumentTree::new("Book");
        let mut anchor = None;
        for level in 0..MAX_DEPTH {
            let (id, _) = tree
                .insert_sibling(NodeKind::Chapter, anchor, format!("c{level}"))
                .unwrap();
            anchor = Some(id);
        }
        let deepest = anchor.unwrap();
        assert_eq!(tree.depth(deepest), Some(MAX_DEPTH));

        let revision = tree.revision();
        let err = tree
            .insert_sibling(NodeKind::Page, Some(deepest), "too deep")
            .unwrap_err();
        assert_eq!(err, TreeError::TooDeep(deepest));
        assert_eq!(tree.len(), MAX_DEPTH + 1);
        assert_eq!(tree.revision(), revision);
    }

    #[test]
    fn remove_drops_whole_subtree() {
        let mut tree = DocumentTree::new("Book");
        let (chapter, _) = tree.insert_sibling(NodeKind::Chapter, None, "Ch").unwrap();
        let (p1, _) = tree.insert_sibling(NodeKind::Page, Some(chapter), "1").unwrap();
        let (p2, _) = tree.insert_sibling(NodeKind::Page, Some(chapter), "2").unwrap();
        let revision = tree.revision();

        let diff = tree.remove(chapter).unwrap();
        let mut pages: Vec<_> = diff.removed_pages().collect();
        pages.sort();
        let mut expected = vec![p1, p2];
        expected.sort();
        assert_eq!(pages, expected);
        assert_eq!(diff.removed.len(), 3);
        assert!(!tree.contains(chapter) && !tree.contains(p1) && !tree.contains(p2));
        assert!(tree.children(tree.root()).is_empty());
        assert!(tree.revision() > revision);
    }

    #[test]
    fn root_and_unknown_nodes_are_not_removed() {
        let mut tree = DocumentTree::new("Book");
        let (chapter, _) = tree.insert_sibling(NodeKind::Chapter, None, "Ch").unwrap();
        let revision = tree.revision();
        assert!(tree.remove(tree.root()).is_none());
        assert_eq!(tree.revision(), revision);
        assert_eq!(tree.len(), 2);

        tree.remove(chapter).unwrap();
        assert!(tree.remove(chapter).is_none());
    }

    #[test]
    fn preorder_follows_child_order() {
        let mut tree = DocumentTree::new("Book");
        let (a, _) = tree.insert_sibling(NodeKind::Chapter, None, "A").unwrap();
        let (a1, _) = tree.insert_sibling(NodeKind::Page, Some(a), "A1").unwrap();
        let (b, _) = tree.insert_sibling(NodeKind::Chapter, None, "B").unwrap();
        let (a2, _) = tree.insert_sibling(NodeKind::Page, Some(a1), "A2").unwrap();
        let order: Vec<_> = tree.preorder().collect();
        assert_eq!(order, vec![tree.root(), a, a1, a2, b]);
        assert_eq!(labels(&tree, a), vec!["A1", "A2"]);
        assert_eq!(tree.pages().collect::<Vec<_>>(), vec![a1, a2]);
    }

    #[test]
    fn paths_round_trip() {
        let mut tree = DocumentTree::new("Book");
        let (a, _) = tree.insert_sibling(NodeKind::Chapter, None, "A").unwrap();
        let (b, _) = tree.insert_sibling(NodeKind::Chapter, None, "B").unwrap();
        let (b1, _) = tree.insert_sibling(NodeKind::Page, Some(b), "B1").unwrap();

        assert_eq!(tree.position_path(b1), Some(vec![1, 0]));
        assert_eq!(tree.resolve_path(&[1, 0]), Ok(b1));
        assert_eq!(tree.resolve_path(&[]), Ok(tree.root()));
        assert_eq!(tree.resolve_path(&[0]), Ok(a));
        assert_eq!(
            tree.resolve_path(&[0, 3]),
            Err(TreeError::InvalidPath("0/3".into()))
        );
        assert_eq!(parse_path("/1/0/").unwrap(), vec![1, 0]);
        assert!(parse_path("x").is_err());
        assert_eq!(tree.depth(b1), Some(2));
        assert!(tree.is_within(b1, b));
        assert!(!tree.is_within(a, b));
    }

    #[test]
    fn reset_leaves_fresh_root() {
        let mut tree = DocumentTree::new("Book");
        let old_root = tree.root();
        tree.insert_sibling(NodeKind::Page, None, "P").unwrap();
        let diff = tree.reset("Other");
        assert_eq!(diff.removed.len(), 2);
        assert_ne!(tree.root(), old_root);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(tree.root()).unwrap().label(), "Other");
    }

    #[test]
    fn kind_parses_literals() {
        assert_eq!("page".parse::<NodeKind>(), Ok(NodeKind::Page));
        assert_eq!(NodeKind::Chapter.as_str(), "chapter");
        assert_eq!(
            "volume".parse::<NodeKind>(),
            Err(TreeError::UnknownKind("volume".into()))
        );
    }
}
