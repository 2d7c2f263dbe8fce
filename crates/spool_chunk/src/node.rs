//! Arena backed chunk tree.
//!
//! Every node lives in a single [`ChunkTree`] and is addressed through a [`NodeId`]. Parents are
//! stored as ids, so a child can find its container without the tree holding reference cycles.

use binrw::Endian;
use derive_more::derive::Display;
use std::fmt;
use tracing::warn;

use crate::error::{Error, Result};
use crate::tag::Tag;
use crate::types::{Alignment, CONTAINER_REVISION};

/// Handle to a node inside a [`ChunkTree`]
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("#{_0}")]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in its arena
    pub const fn index(self) -> usize {
        self.0
    }
}

/// What a node carries
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// An undecoded chunk payload
    Leaf(Vec<u8>),

    /// Nested chunks, in file order
    Container {
        /// Children of the container
        children: Vec<NodeId>,
        /// Format revision found in the container header
        revision: u32,
    },
}

/// One chunk of the tree
#[derive(Debug, Clone)]
pub struct Node {
    /// Opaque type identifier
    pub tag: Tag,
    /// Format revision, only meaningful to the code decoding the chunk
    pub version: i32,
    /// Free text used for diagnostics, never stored in the file
    pub description: String,
    /// Directory flags other than the container bit
    pub flags: u16,
    alignment: Alignment,
    parent: Option<NodeId>,
    kind: NodeKind,
    offset: Option<u64>,
    size: Option<u64>,
}

impl Node {
    fn new(tag: Tag, version: i32, alignment: Alignment, kind: NodeKind) -> Node {
        Node {
            tag,
            version,
            description: String::new(),
            flags: 0,
            alignment,
            parent: None,
            kind,
            offset: None,
            size: None,
        }
    }

    /// Required alignment of this node's payload
    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// Change the alignment of this node's payload
    pub fn set_alignment(&mut self, alignment: Alignment) {
        self.alignment = alignment;
    }

    /// The container holding this node, [`None`] for the root
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// What the node carries
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Whether the node holds children
    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Container { .. })
    }

    /// The raw payload of a leaf
    pub fn buffer(&self) -> Option<&[u8]> {
        match &self.kind {
            NodeKind::Leaf(buffer) => Some(buffer),
            NodeKind::Container { .. } => None,
        }
    }

    /// Children of a container, empty for a leaf
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Leaf(_) => &[],
            NodeKind::Container { children, .. } => children,
        }
    }

    /// Absolute offset of the payload as of the last read
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Payload size as of the last read
    pub fn size_hint(&self) -> Option<u64> {
        self.size
    }
}

/// A tree of chunks
///
/// The root is always a container with tag `0`. Nodes removed with [`ChunkTree::detach`] stay in
/// the arena but can no longer be reached from the root.
#[derive(Debug, Clone)]
pub struct ChunkTree {
    nodes: Vec<Node>,
    endian: Endian,
}

impl Default for ChunkTree {
    fn default() -> Self {
        ChunkTree::new(Endian::Little)
    }
}

impl ChunkTree {
    /// Create a tree holding only an empty root container
    pub fn new(endian: Endian) -> ChunkTree {
        let root = Node::new(
            Tag::default(),
            0,
            Alignment::default(),
            NodeKind::Container {
                children: Vec::new(),
                revision: CONTAINER_REVISION,
            },
        );
        ChunkTree {
            nodes: vec![root],
            endian,
        }
    }

    /// Byte order the tree was read with, used by default when writing
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Change the byte order used when writing
    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    /// The root container
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes in the arena, detached ones included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree holds nothing besides its root
    pub fn is_empty(&self) -> bool {
        self.node_ref(self.root()).children().next().is_none()
    }

    /// Get a node
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(Error::InvalidNode(id))
    }

    /// Get a node for editing
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(Error::InvalidNode(id))
    }

    /// Read-only view of a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this tree.
    pub fn node_ref(&self, id: NodeId) -> NodeRef<'_> {
        assert!(id.0 < self.nodes.len(), "node {id} does not exist in this tree");
        NodeRef { tree: self, id }
    }

    /// Read-only view of a node, if it exists
    pub fn get(&self, id: NodeId) -> Option<NodeRef<'_>> {
        (id.0 < self.nodes.len()).then_some(NodeRef { tree: self, id })
    }

    /// Whether `id` is still reachable from the root
    ///
    /// Detached nodes and everything below them stay in the arena, but are not written.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root() {
                return true;
            }
            match self.nodes.get(current.0).and_then(|n| n.parent) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// The container holding `id`
    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    /// Children of `id` in file order
    pub fn children(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(self.node(id)?.children())
    }

    /// Raw payload of a leaf
    pub fn buffer(&self, id: NodeId) -> Result<&[u8]> {
        let node = self.node(id)?;
        node.buffer().ok_or(Error::NotALeaf(node.tag))
    }

    /// Replace the payload of a leaf
    pub fn set_buffer(&mut self, id: NodeId, buffer: Vec<u8>) -> Result<()> {
        let node = self.node_mut(id)?;
        match &mut node.kind {
            NodeKind::Leaf(current) => {
                *current = buffer;
                Ok(())
            }
            NodeKind::Container { .. } => Err(Error::NotALeaf(node.tag)),
        }
    }

    /// Absolute offset of the payload of `id` as of the last read
    pub fn offset_of(&self, id: NodeId) -> Result<Option<u64>> {
        Ok(self.node(id)?.offset)
    }

    pub(crate) fn set_layout(&mut self, id: NodeId, offset: u64, size: u64) -> Result<()> {
        let node = self.node_mut(id)?;
        node.offset = Some(offset);
        node.size = Some(size);
        Ok(())
    }

    pub(crate) fn set_revision(&mut self, id: NodeId, value: u32) -> Result<()> {
        let node = self.node_mut(id)?;
        let tag = node.tag;
        match &mut node.kind {
            NodeKind::Container { revision, .. } => {
                *revision = value;
                Ok(())
            }
            NodeKind::Leaf(_) => Err(Error::NotAContainer(tag)),
        }
    }

    fn attach(&mut self, parent: NodeId, mut node: Node) -> Result<NodeId> {
        let id = NodeId(self.nodes.len());
        let container = self.node_mut(parent)?;
        match &mut container.kind {
            NodeKind::Container { children, .. } => children.push(id),
            NodeKind::Leaf(_) => return Err(Error::NotAContainer(container.tag)),
        }
        node.parent = Some(parent);
        self.nodes.push(node);
        Ok(id)
    }

    /// Append a leaf to the end of `parent`
    pub fn add_leaf(
        &mut self,
        parent: NodeId,
        tag: Tag,
        version: i32,
        alignment: Alignment,
        buffer: Vec<u8>,
    ) -> Result<NodeId> {
        self.attach(
            parent,
            Node::new(tag, version, alignment, NodeKind::Leaf(buffer)),
        )
    }

    /// Append an empty container to the end of `parent`
    pub fn add_container(
        &mut self,
        parent: NodeId,
        tag: Tag,
        version: i32,
        alignment: Alignment,
    ) -> Result<NodeId> {
        self.attach(
            parent,
            Node::new(
                tag,
                version,
                alignment,
                NodeKind::Container {
                    children: Vec::new(),
                    revision: CONTAINER_REVISION,
                },
            ),
        )
    }

    /// Remove `id` from its parent. The root cannot be detached.
    pub fn detach(&mut self, id: NodeId) -> Result<()> {
        let Some(parent) = self.node(id)?.parent else {
            return Err(Error::CustomError("the root node cannot be detached".into()));
        };
        if let NodeKind::Container { children, .. } = &mut self.node_mut(parent)?.kind {
            children.retain(|child| *child != id);
        }
        self.node_mut(id)?.parent = None;
        Ok(())
    }

    /// First child of `parent` carrying `tag`
    ///
    /// Later children with the same tag are ignored, but reported as a warning.
    pub fn find_child(&self, parent: NodeId, tag: Tag) -> Result<Option<NodeId>> {
        self.node(parent)?;
        Ok(self.node_ref(parent).child(tag).map(|c| c.id()))
    }

    /// Every child of `parent` carrying `tag`, in file order
    pub fn find_children(&self, parent: NodeId, tag: Tag) -> Result<Vec<NodeId>> {
        Ok(self
            .children(parent)?
            .iter()
            .copied()
            .filter(|child| self.nodes[child.0].tag == tag)
            .collect())
    }

    /// Walk every reachable node depth first, parents before their children
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            tree: self,
            stack: vec![(self.root(), 0)],
        }
    }
}

/// Depth first iterator over a [`ChunkTree`], yielding each node with its depth
pub struct Walk<'a> {
    tree: &'a ChunkTree,
    stack: Vec<(NodeId, usize)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, NodeRef<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let (id, depth) = self.stack.pop()?;
        let node = self.tree.node_ref(id);
        self.stack
            .extend(node.node().children().iter().rev().map(|c| (*c, depth + 1)));
        Some((depth, node))
    }
}

/// Read-only view of one node together with the tree it lives in
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a ChunkTree,
    id: NodeId,
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NodeRef({} {})", self.id, self.tag())
    }
}

impl<'a> NodeRef<'a> {
    /// The id of this node
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The tree this node lives in
    pub fn tree(&self) -> &'a ChunkTree {
        self.tree
    }

    /// The node itself
    pub fn node(&self) -> &'a Node {
        &self.tree.nodes[self.id.0]
    }

    pub fn tag(&self) -> Tag {
        self.node().tag
    }

    pub fn version(&self) -> i32 {
        self.node().version
    }

    pub fn alignment(&self) -> Alignment {
        self.node().alignment
    }

    pub fn is_container(&self) -> bool {
        self.node().is_container()
    }

    /// Raw payload, failing for containers
    pub fn buffer(&self) -> Result<&'a [u8]> {
        self.node().buffer().ok_or(Error::NotALeaf(self.tag()))
    }

    /// The container holding this node
    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.node().parent.map(|id| NodeRef {
            tree: self.tree,
            id,
        })
    }

    /// Children in file order
    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let tree = self.tree;
        self.node()
            .children()
            .iter()
            .map(move |id| NodeRef { tree, id: *id })
    }

    /// First child carrying `tag`, warning when more than one does
    pub fn child(&self, tag: Tag) -> Option<NodeRef<'a>> {
        let mut matches = self.children().filter(|c| c.tag() == tag);
        let first = matches.next()?;
        let duplicates = matches.count();
        if duplicates > 0 {
            warn!(
                parent = %self.tag(),
                %tag,
                duplicates,
                "container holds several chunks with the same tag, using the first"
            );
        }
        Some(first)
    }

    /// The other children of this node's parent
    pub fn siblings(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let id = self.id;
        self.parent()
            .into_iter()
            .flat_map(|p| p.children())
            .filter(move |c| c.id != id)
    }
}

#[cfg(test)]
mod test {
    use binrw::Endian;
    use tracing_test::traced_test;

    use crate::error::{Error, Result};
    use crate::node::{ChunkTree, NodeId};
    use crate::tag::Tag;
    use crate::types::Alignment;

    #[test]
    fn build_and_navigate() -> Result<()> {
        let mut tree = ChunkTree::new(Endian::Little);
        let root = tree.root();
        let model = tree.add_container(root, Tag::new(0x10), 1, Alignment::new(16)?)?;
        let header = tree.add_leaf(model, Tag::new(0x11), 0, Alignment::MIN, vec![1, 2, 3])?;
        let table = tree.add_leaf(model, Tag::new(0x12), 0, Alignment::MIN, vec![4])?;

        assert_eq!(tree.parent(header)?, Some(model));
        assert_eq!(tree.parent(root)?, None);
        assert_eq!(tree.children(model)?, &[header, table]);
        assert_eq!(tree.buffer(header)?, &[1, 2, 3]);
        assert_eq!(tree.find_child(model, Tag::new(0x12))?, Some(table));

        let view = tree.node_ref(header);
        let siblings = view.siblings().map(|s| s.id()).collect::<Vec<_>>();
        assert_eq!(siblings, vec![table]);

        let walked = tree
            .walk()
            .map(|(depth, n)| (depth, n.tag().value()))
            .collect::<Vec<_>>();
        assert_eq!(walked, vec![(0, 0), (1, 0x10), (2, 0x11), (2, 0x12)]);

        Ok(())
    }

    #[test]
    fn leaves_cannot_hold_children() -> Result<()> {
        let mut tree = ChunkTree::default();
        let leaf = tree.add_leaf(tree.root(), Tag::new(1), 0, Alignment::MIN, vec![])?;

        assert!(matches!(
            tree.add_leaf(leaf, Tag::new(2), 0, Alignment::MIN, vec![]),
            Err(Error::NotAContainer(_))
        ));
        assert!(matches!(
            tree.set_buffer(tree.root(), vec![]),
            Err(Error::NotALeaf(_))
        ));

        Ok(())
    }

    #[test]
    fn detach_removes_node_from_parent() -> Result<()> {
        let mut tree = ChunkTree::default();
        let root = tree.root();
        let first = tree.add_leaf(root, Tag::new(1), 0, Alignment::MIN, vec![1])?;
        let second = tree.add_leaf(root, Tag::new(2), 0, Alignment::MIN, vec![2])?;

        tree.detach(first)?;

        assert_eq!(tree.children(root)?, &[second]);
        assert_eq!(tree.parent(first)?, None);
        assert!(tree.detach(root).is_err());

        Ok(())
    }

    #[test]
    fn detached_subtrees_are_unreachable() -> Result<()> {
        let mut tree = ChunkTree::default();
        let root = tree.root();
        let model = tree.add_container(root, Tag::new(0x10), 0, Alignment::MIN)?;
        let mesh = tree.add_container(model, Tag::new(0x11), 0, Alignment::MIN)?;
        let vertices = tree.add_leaf(mesh, Tag::new(0x12), 0, Alignment::MIN, vec![1])?;

        assert!(tree.is_attached(root));
        assert!(tree.is_attached(vertices));

        tree.detach(mesh)?;

        assert!(tree.is_attached(model));
        assert!(!tree.is_attached(mesh));
        assert!(!tree.is_attached(vertices));
        assert!(!tree.is_attached(NodeId(99)));

        Ok(())
    }

    #[traced_test]
    #[test]
    fn duplicate_tags_resolve_to_first_match() -> Result<()> {
        let mut tree = ChunkTree::default();
        let root = tree.root();
        let first = tree.add_leaf(root, Tag::new(7), 0, Alignment::MIN, vec![1])?;
        let second = tree.add_leaf(root, Tag::new(7), 0, Alignment::MIN, vec![2])?;

        assert_eq!(tree.find_child(root, Tag::new(7))?, Some(first));
        assert_eq!(tree.find_children(root, Tag::new(7))?, vec![first, second]);
        assert!(logs_contain("several chunks with the same tag"));

        Ok(())
    }
}
