//! Typed, lazily decoded resources on top of [`spool_chunk`] trees.
//!
//! A chunk tree only knows about tags and bytes. This library binds domain types to those bytes:
//!
//! - A [`Resource`] knows how to decode itself from a chunk and encode itself back.
//! - A [`Spooled`] resource is bound to one chunk. It decodes on first use, tracks whether it was
//!   changed, and writes itself back into the tree on commit.
//! - A [`ResourceRegistry`] says which resource type decodes which tag. Chunks with unknown tags
//!   are kept as opaque bytes.
//! - A [`SharedCache`] holds resources referenced by identifier from several files. The first one
//!   registered under a key is kept.
//! - A [`ChunkFile`] ties a tree, its resources and a [`FormatContext`] together.
//!
//! ```
//! use spool_chunk::{NodeRef, Tag};
//! use spool_resource::{ChunkFile, FormatContext, LoadOptions, Payload, Resource, ResourceRegistry};
//!
//! struct Label(String);
//!
//! impl Resource for Label {
//!     const KIND: &'static str = "Label";
//!
//!     fn load(node: NodeRef<'_>, _: &FormatContext) -> spool_resource::error::Result<Self> {
//!         Ok(Label(String::from_utf8_lossy(node.buffer()?).into_owned()))
//!     }
//!
//!     fn save(&self, _: &FormatContext) -> spool_resource::error::Result<Payload> {
//!         Ok(Payload::Buffer(self.0.as_bytes().to_vec()))
//!     }
//! }
//!
//! fn rename(file: impl std::io::Read + std::io::Seek) -> spool_resource::error::Result<Vec<u8>> {
//!     let mut registry = ResourceRegistry::new();
//!     registry.register_type::<Label>(Tag::from_fourcc(b"LABL"));
//!
//!     let mut file = ChunkFile::load(file, &registry, &LoadOptions::default(), FormatContext::default())?;
//!     let labels = file
//!         .resources()
//!         .map(|r| r.node())
//!         .collect::<Vec<_>>();
//!     for id in labels {
//!         file.modify::<Label, _, _>(id, |label| label.0.make_ascii_uppercase())?;
//!     }
//!     Ok(file.save(std::io::Cursor::new(Vec::new()))?.into_inner())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod error;
pub mod registry;
pub mod resource;
pub mod session;

pub use cache::{SharedCache, SharedKey};
pub use context::{Detail, EndianGuard, FormatContext, Platform};
pub use registry::ResourceRegistry;
pub use resource::{require_child, AnyResource, ChildPayload, Payload, Resource, ResourceState, Spooled};
pub use session::{ChunkFile, LoadOptions};
