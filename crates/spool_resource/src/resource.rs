//! Typed resources bound to a single chunk.
//!
//! A [`Spooled`] resource starts out unloaded and only decodes its chunk the first time it is
//! needed. Mutable access marks it dirty, and [`Spooled::commit_changes`] encodes it back into
//! the tree. The tree owns the chunk; the resource only remembers which node it is bound to.

use spool_chunk::{ChunkTree, NodeId, NodeRef, Tag};
use std::any::Any;
use std::fmt;
use tracing::{debug, instrument, trace};

use crate::context::FormatContext;
use crate::error::{Error, Result};

/// A domain type that can be decoded from, and encoded back into, a chunk
pub trait Resource: Sized + 'static {
    /// Human readable name used in diagnostics
    const KIND: &'static str;

    /// Decode the resource from its chunk
    fn load(node: NodeRef<'_>, context: &FormatContext) -> Result<Self>;

    /// Encode the resource
    ///
    /// Return an error if the current state cannot be represented; the bound chunk is then left
    /// untouched.
    fn save(&self, context: &FormatContext) -> Result<Payload>;
}

/// New contents for the chunk a resource is bound to
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Replace the buffer of the bound leaf
    Buffer(Vec<u8>),

    /// Replace the buffers of children of the bound container
    Children(Vec<ChildPayload>),
}

/// New buffer for one child of a composite resource
#[derive(Debug, Clone, PartialEq)]
pub struct ChildPayload {
    /// The first child carrying this tag is replaced
    pub tag: Tag,
    /// What the child holds, used when it is missing
    pub name: &'static str,
    /// The new buffer
    pub buffer: Vec<u8>,
}

impl ChildPayload {
    pub fn new(tag: Tag, name: &'static str, buffer: Vec<u8>) -> ChildPayload {
        ChildPayload { tag, name, buffer }
    }
}

/// Lifecycle of a [`Spooled`] resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceState {
    /// Nothing has been decoded yet
    #[default]
    Unloaded,
    /// Decoded and identical to the chunk
    Loaded,
    /// Decoded and changed since the last commit
    Dirty,
}

/// Look up a child a composite resource cannot do without
///
/// The first child carrying `tag` wins.
pub fn require_child<'a>(
    node: NodeRef<'a>,
    resource: &'static str,
    tag: Tag,
    name: &'static str,
) -> Result<NodeRef<'a>> {
    node.child(tag).ok_or(Error::MissingChild {
        resource,
        tag,
        name,
    })
}

/// A lazily decoded resource bound to one chunk
pub struct Spooled<T> {
    node: NodeId,
    tag: Tag,
    state: ResourceState,
    value: Option<T>,
    loads: usize,
}

impl<T> fmt::Debug for Spooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Spooled")
            .field("node", &self.node)
            .field("tag", &self.tag)
            .field("state", &self.state)
            .finish()
    }
}

impl<T: Resource> Spooled<T> {
    /// Bind to a chunk without decoding it
    pub fn bind(node: NodeRef<'_>) -> Spooled<T> {
        Spooled {
            node: node.id(),
            tag: node.tag(),
            state: ResourceState::Unloaded,
            value: None,
            loads: 0,
        }
    }

    /// The chunk this resource is bound to
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Number of times the chunk has been decoded
    pub fn load_count(&self) -> usize {
        self.loads
    }

    /// Decode the chunk unless that already happened
    ///
    /// A failed decode leaves the resource unloaded. It is not retried on its own.
    #[instrument(skip_all, fields(resource = T::KIND, tag = %self.tag))]
    pub fn ensure_loaded(&mut self, tree: &ChunkTree, context: &FormatContext) -> Result<&T> {
        match self.value {
            Some(ref value) => Ok(value),
            None => {
                let node = self.attached_node(tree)?;
                let value = T::load(node, context).map_err(|e| self.decode_error(e))?;

                self.loads += 1;
                self.state = ResourceState::Loaded;
                debug!(node = %self.node, "decoded resource");

                Ok(self.value.insert(value))
            }
        }
    }

    fn attached_node<'t>(&self, tree: &'t ChunkTree) -> Result<NodeRef<'t>> {
        let node = tree
            .get(self.node)
            .ok_or(spool_chunk::error::Error::InvalidNode(self.node))?;
        if !tree.is_attached(self.node) {
            return Err(spool_chunk::error::Error::Detached(self.node).into());
        }
        Ok(node)
    }

    fn decode_error(&self, error: Error) -> Error {
        match error {
            Error::MissingChild { .. } | Error::ResourceDecode { .. } => error,
            other => Error::ResourceDecode {
                resource: T::KIND,
                tag: self.tag,
                source: Box::new(other),
            },
        }
    }

    /// The decoded value, if it has been loaded
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Mutable access to the decoded value, marking the resource dirty
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.mark_dirty();
        self.value.as_mut()
    }

    /// Decode if needed, then change the value and mark the resource dirty
    pub fn modify<F, O>(&mut self, tree: &ChunkTree, context: &FormatContext, f: F) -> Result<O>
    where
        F: FnOnce(&mut T) -> O,
    {
        self.ensure_loaded(tree, context)?;
        match self.get_mut() {
            Some(value) => Ok(f(value)),
            None => Err(Error::CustomError(format!("{} is not loaded", T::KIND))),
        }
    }

    /// Flag the decoded value as changed. Does nothing while unloaded.
    pub fn mark_dirty(&mut self) {
        match self.state {
            ResourceState::Loaded => {
                trace!(resource = T::KIND, tag = %self.tag, "resource marked dirty");
                self.state = ResourceState::Dirty;
            }
            ResourceState::Dirty | ResourceState::Unloaded => {}
        }
    }

    /// Encode a dirty resource back into its chunk
    ///
    /// Returns whether anything was written. If encoding fails, the bound chunk was detached, or
    /// any chunk the payload targets is missing, the tree is left as it was and the resource
    /// stays dirty.
    #[instrument(skip_all, fields(resource = T::KIND, tag = %self.tag), err)]
    pub fn commit_changes(&mut self, tree: &mut ChunkTree, context: &FormatContext) -> Result<bool> {
        if self.state != ResourceState::Dirty {
            return Ok(false);
        }
        let Some(value) = self.value.as_ref() else {
            return Ok(false);
        };
        self.attached_node(tree)?;

        let payload = value.save(context).map_err(|e| Error::ResourceEncode {
            resource: T::KIND,
            tag: self.tag,
            source: Box::new(e),
        })?;

        match payload {
            Payload::Buffer(buffer) => {
                tree.buffer(self.node)?;
                tree.set_buffer(self.node, buffer)?;
            }
            Payload::Children(children) => {
                let targets = {
                    let node = self.attached_node(tree)?;
                    children
                        .iter()
                        .map(|child| -> Result<NodeId> {
                            let target = require_child(node, T::KIND, child.tag, child.name)?;
                            target.buffer()?;
                            Ok(target.id())
                        })
                        .collect::<Result<Vec<_>>>()?
                };

                for (target, child) in targets.into_iter().zip(children) {
                    tree.set_buffer(target, child.buffer)?;
                }
            }
        }

        self.state = ResourceState::Loaded;
        debug!(node = %self.node, "committed resource");

        Ok(true)
    }
}

/// Type erased view of a [`Spooled`] resource
pub trait AnyResource: Any {
    /// Kind of the underlying resource
    fn kind(&self) -> &'static str;

    /// The chunk the resource is bound to
    fn node(&self) -> NodeId;

    fn state(&self) -> ResourceState;

    /// See [`Spooled::ensure_loaded`]
    fn ensure_loaded(&mut self, tree: &ChunkTree, context: &FormatContext) -> Result<()>;

    /// See [`Spooled::commit_changes`]
    fn commit_changes(&mut self, tree: &mut ChunkTree, context: &FormatContext) -> Result<bool>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn AnyResource {
    /// Get the typed resource back
    pub fn downcast_ref<T: Resource>(&self) -> Option<&Spooled<T>> {
        self.as_any().downcast_ref()
    }

    /// Get the typed resource back for editing
    pub fn downcast_mut<T: Resource>(&mut self) -> Option<&mut Spooled<T>> {
        self.as_any_mut().downcast_mut()
    }
}

impl fmt::Debug for dyn AnyResource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({} {:?})", self.kind(), self.node(), self.state())
    }
}

impl<T: Resource> AnyResource for Spooled<T> {
    fn kind(&self) -> &'static str {
        T::KIND
    }

    fn node(&self) -> NodeId {
        self.node
    }

    fn state(&self) -> ResourceState {
        self.state
    }

    fn ensure_loaded(&mut self, tree: &ChunkTree, context: &FormatContext) -> Result<()> {
        Spooled::ensure_loaded(self, tree, context).map(|_| ())
    }

    fn commit_changes(&mut self, tree: &mut ChunkTree, context: &FormatContext) -> Result<bool> {
        Spooled::commit_changes(self, tree, context)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;

    use pretty_assertions::assert_eq;
    use spool_chunk::{Alignment, ChunkTree, NodeRef, Tag};
    use tracing_test::traced_test;

    use crate::context::{read_value, FormatContext};
    use crate::error::{Error, Result};
    use crate::resource::{
        require_child, AnyResource, ChildPayload, Payload, Resource, ResourceState, Spooled,
    };

    thread_local! {
        static DECODES: Cell<usize> = const { Cell::new(0) };
    }

    /// A leaf holding a little list of bytes, at most four of them
    #[derive(Debug, PartialEq)]
    struct Palette(Vec<u8>);

    impl Resource for Palette {
        const KIND: &'static str = "Palette";

        fn load(node: NodeRef<'_>, _: &FormatContext) -> Result<Self> {
            DECODES.with(|d| d.set(d.get() + 1));
            Ok(Palette(node.buffer()?.to_vec()))
        }

        fn save(&self, _: &FormatContext) -> Result<Payload> {
            if self.0.len() > 4 {
                return Err(Error::InvalidPayload("palettes hold at most four entries".into()));
            }
            Ok(Payload::Buffer(self.0.clone()))
        }
    }

    /// A container with a count chunk and a table chunk
    #[derive(Debug, PartialEq)]
    struct Table {
        rows: Vec<u8>,
    }

    const HEADER: Tag = Tag::new(0x10);
    const ROWS: Tag = Tag::new(0x20);

    impl Resource for Table {
        const KIND: &'static str = "Table";

        fn load(node: NodeRef<'_>, context: &FormatContext) -> Result<Self> {
            let header = require_child(node, Self::KIND, HEADER, "header")?;
            let rows = require_child(node, Self::KIND, ROWS, "table")?;

            let count: u32 =
                read_value(&mut std::io::Cursor::new(header.buffer()?), context)?;
            let rows = rows.buffer()?.to_vec();
            if count as usize != rows.len() {
                return Err(Error::InvalidPayload(format!(
                    "header counts {count} rows, table holds {}",
                    rows.len()
                )));
            }
            Ok(Table { rows })
        }

        fn save(&self, _: &FormatContext) -> Result<Payload> {
            Ok(Payload::Children(vec![
                ChildPayload::new(HEADER, "header", (self.rows.len() as u32).to_le_bytes().to_vec()),
                ChildPayload::new(ROWS, "table", self.rows.clone()),
            ]))
        }
    }

    fn palette_tree() -> Result<(ChunkTree, spool_chunk::NodeId)> {
        let mut tree = ChunkTree::default();
        let leaf = tree.add_leaf(tree.root(), Tag::new(0x40), 0, Alignment::MIN, vec![1, 2, 3])?;
        Ok((tree, leaf))
    }

    fn table_tree(rows: &[u8], count: u32) -> Result<(ChunkTree, spool_chunk::NodeId)> {
        let mut tree = ChunkTree::default();
        let table = tree.add_container(tree.root(), Tag::new(0x30), 0, Alignment::MIN)?;
        tree.add_leaf(table, HEADER, 0, Alignment::MIN, count.to_le_bytes().to_vec())?;
        tree.add_leaf(table, ROWS, 0, Alignment::MIN, rows.to_vec())?;
        Ok((tree, table))
    }

    #[traced_test]
    #[test]
    fn ensure_loaded_decodes_once() -> Result<()> {
        let (tree, leaf) = palette_tree()?;
        let context = FormatContext::default();
        DECODES.with(|d| d.set(0));

        let mut palette = Spooled::<Palette>::bind(tree.node_ref(leaf));
        assert_eq!(palette.state(), ResourceState::Unloaded);
        assert_eq!(palette.get(), None);

        assert_eq!(palette.ensure_loaded(&tree, &context)?, &Palette(vec![1, 2, 3]));
        assert_eq!(palette.ensure_loaded(&tree, &context)?, &Palette(vec![1, 2, 3]));

        assert_eq!(palette.state(), ResourceState::Loaded);
        assert_eq!(palette.load_count(), 1);
        assert_eq!(DECODES.with(Cell::get), 1);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn commit_writes_back_what_was_changed() -> Result<()> {
        let (mut tree, leaf) = palette_tree()?;
        let context = FormatContext::default();

        let mut palette = Spooled::<Palette>::bind(tree.node_ref(leaf));
        palette.modify(&tree, &context, |p| p.0.push(4))?;
        assert_eq!(palette.state(), ResourceState::Dirty);

        assert!(palette.commit_changes(&mut tree, &context)?);
        assert_eq!(palette.state(), ResourceState::Loaded);
        assert_eq!(tree.buffer(leaf)?, &[1, 2, 3, 4]);

        let mut fresh = Spooled::<Palette>::bind(tree.node_ref(leaf));
        assert_eq!(fresh.ensure_loaded(&tree, &context)?, palette.get().expect("loaded above"));

        assert!(!palette.commit_changes(&mut tree, &context)?);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn failed_commit_leaves_chunk_untouched() -> Result<()> {
        let (mut tree, leaf) = palette_tree()?;
        let context = FormatContext::default();

        let mut palette = Spooled::<Palette>::bind(tree.node_ref(leaf));
        palette.modify(&tree, &context, |p| p.0.extend([4, 5, 6]))?;

        let result = palette.commit_changes(&mut tree, &context);
        assert!(matches!(
            result,
            Err(Error::ResourceEncode { resource: "Palette", .. })
        ));
        assert_eq!(tree.buffer(leaf)?, &[1, 2, 3]);
        assert_eq!(palette.state(), ResourceState::Dirty);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn detached_chunks_are_not_written() -> Result<()> {
        let (mut tree, leaf) = palette_tree()?;
        let context = FormatContext::default();

        let mut palette = Spooled::<Palette>::bind(tree.node_ref(leaf));
        palette.modify(&tree, &context, |p| p.0.push(4))?;
        tree.detach(leaf)?;

        let result = palette.commit_changes(&mut tree, &context);
        assert!(matches!(
            result,
            Err(Error::Chunk(spool_chunk::error::Error::Detached(node))) if node == leaf
        ));
        assert_eq!(tree.buffer(leaf)?, &[1, 2, 3]);
        assert_eq!(palette.state(), ResourceState::Dirty);

        let mut stale = Spooled::<Palette>::bind(tree.node_ref(leaf));
        assert!(stale.ensure_loaded(&tree, &context).is_err());
        assert_eq!(stale.state(), ResourceState::Unloaded);

        Ok(())
    }

    #[test]
    fn mark_dirty_needs_a_loaded_value() -> Result<()> {
        let (tree, leaf) = palette_tree()?;
        let mut palette = Spooled::<Palette>::bind(tree.node_ref(leaf));

        palette.mark_dirty();
        assert_eq!(palette.state(), ResourceState::Unloaded);
        assert!(palette.get_mut().is_none());

        palette.ensure_loaded(&tree, &FormatContext::default())?;
        palette.mark_dirty();
        palette.mark_dirty();
        assert_eq!(palette.state(), ResourceState::Dirty);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn composite_missing_child() -> Result<()> {
        let mut tree = ChunkTree::default();
        let table = tree.add_container(tree.root(), Tag::new(0x30), 0, Alignment::MIN)?;
        tree.add_leaf(table, HEADER, 0, Alignment::MIN, vec![0; 4])?;

        let mut resource = Spooled::<Table>::bind(tree.node_ref(table));
        let result = resource.ensure_loaded(&tree, &FormatContext::default());

        assert!(matches!(
            result,
            Err(Error::MissingChild { resource: "Table", tag, name: "table" }) if tag == ROWS
        ));
        assert_eq!(resource.state(), ResourceState::Unloaded);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn composite_count_mismatch() -> Result<()> {
        let (tree, table) = table_tree(&[1, 2, 3], 2)?;

        let mut resource = Spooled::<Table>::bind(tree.node_ref(table));
        let result = resource.ensure_loaded(&tree, &FormatContext::default());

        assert!(matches!(
            result,
            Err(Error::ResourceDecode { resource: "Table", tag, .. }) if tag == Tag::new(0x30)
        ));
        assert_eq!(resource.state(), ResourceState::Unloaded);
        assert_eq!(resource.load_count(), 0);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn composite_commit_updates_every_child() -> Result<()> {
        let (mut tree, table) = table_tree(&[1, 2], 2)?;
        let context = FormatContext::default();

        let mut resource = Spooled::<Table>::bind(tree.node_ref(table));
        resource.modify(&tree, &context, |t| t.rows.push(3))?;
        resource.commit_changes(&mut tree, &context)?;

        let header = tree.find_child(table, HEADER)?.expect("header is present");
        let rows = tree.find_child(table, ROWS)?.expect("rows are present");
        assert_eq!(tree.buffer(header)?, &3u32.to_le_bytes());
        assert_eq!(tree.buffer(rows)?, &[1, 2, 3]);

        let mut fresh = Spooled::<Table>::bind(tree.node_ref(table));
        assert_eq!(fresh.ensure_loaded(&tree, &context)?.rows, vec![1, 2, 3]);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn composite_commit_is_all_or_nothing() -> Result<()> {
        let (mut tree, table) = table_tree(&[1, 2], 2)?;
        let context = FormatContext::default();

        let mut resource = Spooled::<Table>::bind(tree.node_ref(table));
        resource.modify(&tree, &context, |t| t.rows.push(3))?;

        let rows = tree.find_child(table, ROWS)?.expect("rows are present");
        tree.detach(rows)?;

        assert!(matches!(
            resource.commit_changes(&mut tree, &context),
            Err(Error::MissingChild { name: "table", .. })
        ));
        let header = tree.find_child(table, HEADER)?.expect("header is present");
        assert_eq!(tree.buffer(header)?, &2u32.to_le_bytes());

        Ok(())
    }

    #[test]
    fn type_erased_round_trip() -> Result<()> {
        let (tree, leaf) = palette_tree()?;
        let mut erased: Box<dyn AnyResource> = Box::new(Spooled::<Palette>::bind(tree.node_ref(leaf)));

        assert_eq!(erased.kind(), "Palette");
        erased.ensure_loaded(&tree, &FormatContext::default())?;
        assert_eq!(erased.state(), ResourceState::Loaded);

        let typed = erased
            .downcast_ref::<Palette>()
            .expect("resource is a palette");
        assert_eq!(typed.get(), Some(&Palette(vec![1, 2, 3])));
        assert!(erased.downcast_ref::<Table>().is_none());

        Ok(())
    }
}
