//! A chunk file together with the resources bound to its chunks.

use bon::Builder;
use indexmap::IndexMap;
use spool_chunk::{ChunkReader, ChunkTree, ChunkWriter, ChunkWriterOptions, NodeId, NodeRef};
use std::io::{Read, Seek, Write};
use tracing::{debug, info, instrument, warn};

use crate::context::FormatContext;
use crate::error::{Error, Result};
use crate::registry::ResourceRegistry;
use crate::resource::{AnyResource, Resource, ResourceState, Spooled};

/// Options for how a chunk file should be loaded
#[derive(Debug, Clone, Copy, Builder)]
pub struct LoadOptions {
    /// Decode every registered resource while reading instead of on first use
    #[builder(default)]
    pub eager: bool,

    /// Keep loading when an eagerly decoded resource fails, leaving it unloaded
    #[builder(default)]
    pub tolerate_decode_errors: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions::builder().build()
    }
}

/// A chunk tree and the typed resources bound to its chunks
///
/// Chunks whose tag is not registered stay opaque and are written back exactly as they were read.
#[derive(Debug)]
pub struct ChunkFile {
    tree: ChunkTree,
    context: FormatContext,
    resources: IndexMap<NodeId, Box<dyn AnyResource>>,
}

impl ChunkFile {
    /// Start a session over an existing tree, nothing bound yet
    pub fn new(mut tree: ChunkTree, context: FormatContext) -> ChunkFile {
        tree.set_endian(context.endian);
        ChunkFile {
            tree,
            context,
            resources: IndexMap::new(),
        }
    }

    /// Read a chunk file, binding a resource to every chunk with a registered tag
    ///
    /// The byte order of `context` is replaced with the one the file was written in. The platform,
    /// version and flags are kept as given, even when the file's byte order is not the one the
    /// platform builds with.
    pub fn load<R: Read + Seek>(
        reader: R,
        registry: &ResourceRegistry,
        options: &LoadOptions,
        context: FormatContext,
    ) -> Result<ChunkFile> {
        ChunkFile::load_with(reader, registry, options, context, |_, _| Ok(()))
    }

    /// Like [`ChunkFile::load`], also calling `hook` for every chunk once it is complete
    ///
    /// Chunks arrive children first. The hook gets the resource bound to the chunk, if any,
    /// already decoded in eager mode. This is where shared resources get published.
    #[instrument(skip_all, fields(eager = options.eager))]
    pub fn load_with<R, F>(
        reader: R,
        registry: &ResourceRegistry,
        options: &LoadOptions,
        context: FormatContext,
        mut hook: F,
    ) -> Result<ChunkFile>
    where
        R: Read + Seek,
        F: FnMut(NodeRef<'_>, Option<&mut dyn AnyResource>) -> Result<()>,
    {
        let mut resources = IndexMap::new();

        let tree = ChunkReader::new(reader).read_with(|node| -> Result<()> {
            let context = context.with_endian(node.tree().endian());
            let mut resource = registry.materialize(node);

            if let Some(resource) = resource.as_mut().filter(|_| options.eager) {
                if let Err(e) = resource.ensure_loaded(node.tree(), &context) {
                    if !options.tolerate_decode_errors {
                        return Err(e);
                    }
                    warn!(
                        kind = resource.kind(),
                        tag = %node.tag(),
                        error = %e,
                        "unable to decode resource, leaving it unloaded"
                    );
                }
            }

            hook(node, resource.as_mut().map(|r| &mut **r as &mut dyn AnyResource))?;

            if let Some(resource) = resource {
                resources.insert(node.id(), resource);
            }
            Ok(())
        })?;

        if tree.endian() != context.platform.endian() {
            debug!(
                platform = ?context.platform,
                endian = ?tree.endian(),
                "file byte order differs from the platform's"
            );
        }
        let context = context.with_endian(tree.endian());
        info!(
            chunks = tree.walk().count(),
            resources = resources.len(),
            "loaded chunk file"
        );

        Ok(ChunkFile {
            tree,
            context,
            resources,
        })
    }

    pub fn tree(&self) -> &ChunkTree {
        &self.tree
    }

    /// Direct access to the tree
    ///
    /// Resources stay bound by node id. Detaching a chunk that has a resource makes that
    /// resource fail with [`Detached`](spool_chunk::error::Error::Detached) on its next load or
    /// commit, and the commit keeps it dirty.
    pub fn tree_mut(&mut self) -> &mut ChunkTree {
        &mut self.tree
    }

    pub fn context(&self) -> &FormatContext {
        &self.context
    }

    /// The resource bound to `id`
    pub fn resource(&self, id: NodeId) -> Option<&dyn AnyResource> {
        self.resources.get(&id).map(|r| &**r)
    }

    pub fn resource_mut(&mut self, id: NodeId) -> Option<&mut dyn AnyResource> {
        self.resources
            .get_mut(&id)
            .map(|r| &mut **r as &mut dyn AnyResource)
    }

    /// Every bound resource, in the order their chunks completed loading
    pub fn resources(&self) -> impl Iterator<Item = &dyn AnyResource> + '_ {
        self.resources.values().map(|r| &**r)
    }

    /// The resource bound to `id` as a `T`
    pub fn typed<T: Resource>(&self, id: NodeId) -> Result<&Spooled<T>> {
        let resource = self.resources.get(&id).ok_or(Error::Unbound(id))?;
        resource
            .downcast_ref::<T>()
            .ok_or(Error::WrongResource {
                node: id,
                expected: T::KIND,
                found: resource.kind(),
            })
    }

    pub fn typed_mut<T: Resource>(&mut self, id: NodeId) -> Result<&mut Spooled<T>> {
        let resource = self.resources.get_mut(&id).ok_or(Error::Unbound(id))?;
        let found = resource.kind();
        resource
            .downcast_mut::<T>()
            .ok_or(Error::WrongResource {
                node: id,
                expected: T::KIND,
                found,
            })
    }

    /// Bind a `T` to `id`, replacing whatever was bound before
    ///
    /// Uncommitted changes of the replaced resource are dropped.
    pub fn bind<T: Resource>(&mut self, id: NodeId) -> Result<&mut Spooled<T>> {
        let node = self
            .tree
            .get(id)
            .ok_or(spool_chunk::error::Error::InvalidNode(id))?;
        let resource: Box<dyn AnyResource> = Box::new(Spooled::<T>::bind(node));
        match self.resources.insert(id, resource) {
            Some(previous) if previous.state() == ResourceState::Dirty => {
                warn!(
                    node = %id,
                    kind = T::KIND,
                    previous = previous.kind(),
                    "replacing a resource with uncommitted changes"
                );
            }
            Some(_) => debug!(node = %id, kind = T::KIND, "replacing bound resource"),
            None => {}
        }
        self.typed_mut::<T>(id)
    }

    /// Bind whatever `registry` knows for the tag of `id`, unless something is bound already
    ///
    /// Returns whether a resource is bound afterwards.
    pub fn materialize(&mut self, registry: &ResourceRegistry, id: NodeId) -> Result<bool> {
        if self.resources.contains_key(&id) {
            return Ok(true);
        }
        let node = self
            .tree
            .get(id)
            .ok_or(spool_chunk::error::Error::InvalidNode(id))?;
        match registry.materialize(node) {
            Some(resource) => {
                self.resources.insert(id, resource);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Decode the `T` bound to `id` unless that already happened
    pub fn ensure_loaded<T: Resource>(&mut self, id: NodeId) -> Result<&T> {
        let resource = self.resources.get_mut(&id).ok_or(Error::Unbound(id))?;
        let found = resource.kind();
        let resource = resource.downcast_mut::<T>().ok_or(Error::WrongResource {
            node: id,
            expected: T::KIND,
            found,
        })?;
        resource.ensure_loaded(&self.tree, &self.context)
    }

    /// Decode the `T` bound to `id` if needed, then change it
    pub fn modify<T, O, F>(&mut self, id: NodeId, f: F) -> Result<O>
    where
        T: Resource,
        F: FnOnce(&mut T) -> O,
    {
        let resource = self.resources.get_mut(&id).ok_or(Error::Unbound(id))?;
        let found = resource.kind();
        let resource = resource.downcast_mut::<T>().ok_or(Error::WrongResource {
            node: id,
            expected: T::KIND,
            found,
        })?;
        resource.modify(&self.tree, &self.context, f)
    }

    /// Encode every dirty resource into the tree, returning how many were written
    ///
    /// Stops at the first resource that fails to encode. Resources committed before it keep
    /// their changes.
    #[instrument(skip_all, err)]
    pub fn commit_all(&mut self) -> Result<usize> {
        let mut committed = 0;
        for resource in self.resources.values_mut() {
            if resource.commit_changes(&mut self.tree, &self.context)? {
                committed += 1;
            }
        }
        debug!(committed, "committed resources");
        Ok(committed)
    }

    /// Commit every dirty resource and write the file in the byte order of the context
    #[instrument(skip_all, err)]
    pub fn save<W: Write + Seek>(&mut self, writer: W) -> Result<W> {
        self.commit_all()?;

        let options = ChunkWriterOptions::builder()
            .endian(self.context.endian)
            .build();
        Ok(ChunkWriter::with_options(writer, options).write(&self.tree)?)
    }

    /// Drop every resource and keep the tree
    pub fn into_tree(self) -> ChunkTree {
        self.tree
    }
}
