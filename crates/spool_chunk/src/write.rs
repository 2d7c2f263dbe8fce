//! Types for writing chunk files
//!

use binrw::{BinWrite, Endian};
use bon::Builder;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, instrument, trace};

use crate::error::{Error, Result};
use crate::node::{ChunkTree, NodeId, NodeKind};
use crate::types::{
    ContainerHeader, DirectoryEntry, CONTAINER_MAGIC, DEFAULT_FILLER, FLAG_CONTAINER, MAX_DEPTH,
};

/// Options for how the chunk file should be written
#[derive(Debug, Clone, Copy, Builder)]
pub struct ChunkWriterOptions {
    /// Byte order of the output, defaults to the byte order the tree was read with
    pub endian: Option<Endian>,

    /// Byte used to pad chunks onto their alignment
    #[builder(default = DEFAULT_FILLER)]
    pub filler: u8,
}

impl Default for ChunkWriterOptions {
    fn default() -> Self {
        ChunkWriterOptions::builder().build()
    }
}

/// Chunk file generator
///
/// Sizes are not known until the children of a container are written, so every container header
/// and directory is written as a placeholder first and patched once its children are done.
/// A failed write leaves the output in an undefined state; write to a temporary location and
/// swap it in on success.
///
/// ```
/// # fn doit() -> spool_chunk::error::Result<()>
/// # {
/// use spool_chunk::{Alignment, ChunkTree, ChunkWriter, Tag};
///
/// let mut tree = ChunkTree::default();
/// tree.add_leaf(tree.root(), Tag::from_fourcc(b"DATA"), 1, Alignment::new(16)?, b"Hello, World!".to_vec())?;
///
/// let output = ChunkWriter::new(std::io::Cursor::new(Vec::new())).write(&tree)?;
/// assert_eq!(output.get_ref().len(), 16 + 20 + 12 + 13);
///
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct ChunkWriter<W: Write + Seek> {
    inner: W,
    options: ChunkWriterOptions,
}

impl<W: Write + Seek> ChunkWriter<W> {
    /// Create a writer with the default options
    pub fn new(inner: W) -> ChunkWriter<W> {
        Self::with_options(inner, ChunkWriterOptions::default())
    }

    /// Create a writer with explicit options
    pub fn with_options(inner: W, options: ChunkWriterOptions) -> ChunkWriter<W> {
        ChunkWriter { inner, options }
    }

    /// Serialize every node reachable from the root of `tree`
    ///
    /// This will return the writer positioned at the end of the written data.
    #[instrument(skip_all, err)]
    pub fn write(mut self, tree: &ChunkTree) -> Result<W> {
        let endian = self.options.endian.unwrap_or(tree.endian());
        let start = self.inner.stream_position()?;

        let size = self.write_container(tree, tree.root(), start, endian, 0)?;
        debug!(size, ?endian, "wrote chunk file");

        Ok(self.inner)
    }

    fn write_padding(&mut self, count: u64) -> Result<()> {
        io::copy(
            &mut io::repeat(self.options.filler).take(count),
            &mut self.inner,
        )?;
        Ok(())
    }

    fn write_container(
        &mut self,
        tree: &ChunkTree,
        id: NodeId,
        base: u64,
        endian: Endian,
        depth: usize,
    ) -> Result<u64> {
        if depth > MAX_DEPTH {
            return Err(Error::NestingTooDeep {
                offset: base,
                limit: MAX_DEPTH,
            });
        }

        let node = tree.node(id)?;
        let NodeKind::Container { children, revision } = node.kind() else {
            return Err(Error::NotAContainer(node.tag));
        };

        let directory_end = ContainerHeader::SIZE + DirectoryEntry::SIZE * children.len() as u64;
        self.write_padding(directory_end)?;

        let mut cursor = directory_end;
        let mut entries = Vec::with_capacity(children.len());
        for child_id in children {
            let child = tree.node(*child_id)?;

            let padding = child.alignment().padding(cursor);
            self.write_padding(padding)?;
            cursor += padding;

            let offset = cursor;
            let size = match child.kind() {
                NodeKind::Leaf(buffer) => {
                    self.inner.write_all(buffer)?;
                    buffer.len() as u64
                }
                NodeKind::Container { .. } => {
                    self.write_container(tree, *child_id, base + offset, endian, depth + 1)?
                }
            };
            cursor += size;

            trace!(tag = %child.tag, offset = base + offset, size, "wrote chunk");

            let flags = if child.is_container() {
                child.flags | FLAG_CONTAINER
            } else {
                child.flags & !FLAG_CONTAINER
            };
            entries.push(DirectoryEntry {
                tag: child.tag.value(),
                version: child.version,
                offset: to_u32(offset)?,
                size: to_u32(size)?,
                alignment: child.alignment().get() as u16,
                flags,
            });
        }

        let header = ContainerHeader {
            magic: CONTAINER_MAGIC,
            size: to_u32(cursor)?,
            count: to_u32(entries.len() as u64)?,
            revision: *revision,
        };

        let end = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(base))?;
        header.write_options(&mut self.inner, endian, ())?;
        for entry in &entries {
            entry.write_options(&mut self.inner, endian, ())?;
        }
        self.inner.seek(SeekFrom::Start(end))?;

        Ok(cursor)
    }
}

fn to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::PayloadTooLarge(value))
}
