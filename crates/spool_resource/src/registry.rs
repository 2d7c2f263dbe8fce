//! Maps chunk tags to the resource types decoding them.

use indexmap::IndexMap;
use spool_chunk::{NodeRef, Tag};
use std::fmt;
use tracing::{debug, trace};

use crate::resource::{AnyResource, Resource, Spooled};

/// Builds an unloaded resource bound to the given chunk
pub type Factory = Box<dyn Fn(NodeRef<'_>) -> Box<dyn AnyResource> + Send + Sync>;

/// Tag to resource factory table
///
/// Registering a tag a second time replaces the earlier factory.
#[derive(Default)]
pub struct ResourceRegistry {
    factories: IndexMap<Tag, Factory>,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set()
            .entries(self.factories.keys().map(ToString::to_string))
            .finish()
    }
}

impl ResourceRegistry {
    pub fn new() -> ResourceRegistry {
        ResourceRegistry::default()
    }

    /// Use `factory` for every chunk carrying `tag`
    pub fn register<F>(&mut self, tag: Tag, factory: F)
    where
        F: Fn(NodeRef<'_>) -> Box<dyn AnyResource> + Send + Sync + 'static,
    {
        if self.factories.insert(tag, Box::new(factory)).is_some() {
            debug!(%tag, "replacing resource factory");
        }
    }

    /// Decode every chunk carrying `tag` as a `T`
    pub fn register_type<T: Resource>(&mut self, tag: Tag) {
        self.register(tag, |node| Box::new(Spooled::<T>::bind(node)) as Box<dyn AnyResource>);
    }

    /// An unloaded resource for `node`, or [`None`] when its tag is unknown
    pub fn materialize(&self, node: NodeRef<'_>) -> Option<Box<dyn AnyResource>> {
        let Some(factory) = self.factories.get(&node.tag()) else {
            trace!(tag = %node.tag(), "no resource registered, keeping chunk opaque");
            return None;
        };
        Some(factory(node))
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.factories.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Registered tags in registration order
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.factories.keys().copied()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use spool_chunk::{Alignment, ChunkTree, NodeRef, Tag};

    use crate::context::FormatContext;
    use crate::error::Result;
    use crate::registry::ResourceRegistry;
    use crate::resource::{Payload, Resource};

    struct Raw;

    impl Resource for Raw {
        const KIND: &'static str = "Raw";

        fn load(_: NodeRef<'_>, _: &FormatContext) -> Result<Self> {
            Ok(Raw)
        }

        fn save(&self, _: &FormatContext) -> Result<Payload> {
            Ok(Payload::Buffer(Vec::new()))
        }
    }

    struct Text;

    impl Resource for Text {
        const KIND: &'static str = "Text";

        fn load(_: NodeRef<'_>, _: &FormatContext) -> Result<Self> {
            Ok(Text)
        }

        fn save(&self, _: &FormatContext) -> Result<Payload> {
            Ok(Payload::Buffer(Vec::new()))
        }
    }

    #[test]
    fn last_registration_wins() -> Result<()> {
        let mut tree = ChunkTree::default();
        let leaf = tree.add_leaf(tree.root(), Tag::new(5), 0, Alignment::MIN, vec![])?;

        let mut registry = ResourceRegistry::new();
        registry.register_type::<Raw>(Tag::new(5));
        registry.register_type::<Text>(Tag::new(5));

        assert_eq!(registry.len(), 1);
        let resource = registry
            .materialize(tree.node_ref(leaf))
            .expect("tag is registered");
        assert_eq!(resource.kind(), "Text");
        assert_eq!(resource.node(), leaf);

        Ok(())
    }

    #[test]
    fn unknown_tag_stays_opaque() -> Result<()> {
        let mut tree = ChunkTree::default();
        let leaf = tree.add_leaf(tree.root(), Tag::new(6), 0, Alignment::MIN, vec![])?;

        let mut registry = ResourceRegistry::new();
        registry.register_type::<Raw>(Tag::new(5));

        assert!(registry.materialize(tree.node_ref(leaf)).is_none());
        assert!(!registry.contains(Tag::new(6)));
        assert_eq!(registry.tags().collect::<Vec<_>>(), vec![Tag::new(5)]);

        Ok(())
    }
}
