//! Types for reading chunk files
//!

use binrw::{BinRead, Endian};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, instrument, trace, warn};

use crate::error::{Error, Result};
use crate::node::{ChunkTree, NodeId, NodeRef};
use crate::tag::Tag;
use crate::types::{
    Alignment, ContainerHeader, DirectoryEntry, CONTAINER_MAGIC, FLAG_CONTAINER, MAX_DEPTH,
};

/// Chunk file reader
///
/// Parses a whole stream into a [`ChunkTree`]. Every node is handed to an optional callback as
/// soon as it has been parsed; a container is reported after all of its children, and the root
/// last. Any error aborts the load, no partial tree is returned.
///
/// ```no_run
/// use std::io::prelude::*;
///
/// fn list_chunks(reader: impl Read + Seek) -> spool_chunk::error::Result<()> {
///     let tree = spool_chunk::ChunkReader::new(reader).read()?;
///
///     for (depth, node) in tree.walk() {
///         println!("{:indent$}{}", "", node.tag(), indent = depth * 2);
///     }
///
///     Ok(())
/// }
/// ```
pub struct ChunkReader<R> {
    reader: R,
}

impl<R: Read + Seek> ChunkReader<R> {
    /// Wrap a stream positioned at the start of a chunk file
    pub fn new(reader: R) -> ChunkReader<R> {
        ChunkReader { reader }
    }

    /// Unwrap and return the inner reader object
    ///
    /// The position of the reader is undefined.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Parse the stream into a tree
    pub fn read(self) -> Result<ChunkTree> {
        self.read_with(|_| Ok(()))
    }

    /// Parse the stream into a tree, calling `notify` with every node once it is complete
    ///
    /// The callback runs on the parsing call stack and only gets a read-only view of the tree.
    /// Returning an error from it aborts the load.
    #[instrument(skip_all)]
    pub fn read_with<E, F>(mut self, mut notify: F) -> core::result::Result<ChunkTree, E>
    where
        E: From<Error>,
        F: FnMut(NodeRef<'_>) -> core::result::Result<(), E>,
    {
        let start = self.reader.stream_position().map_err(Error::from)?;
        let end = self.reader.seek(SeekFrom::End(0)).map_err(Error::from)?;
        self.reader
            .seek(SeekFrom::Start(start))
            .map_err(Error::from)?;

        let available = end.saturating_sub(start);
        let endian = self.read_signature(start, available)?;
        debug!(?endian, available, "reading chunk file");

        let mut tree = ChunkTree::new(endian);
        let root = tree.root();
        self.read_container(&mut tree, root, start, available, endian, 0, &mut notify)?;
        notify(tree.node_ref(root))?;

        Ok(tree)
    }

    fn read_signature(&mut self, offset: u64, available: u64) -> Result<Endian> {
        if available < ContainerHeader::SIZE {
            return Err(Error::TruncatedData {
                offset,
                declared: ContainerHeader::SIZE,
                available,
            });
        }

        let mut signature = [0u8; 4];
        self.reader.read_exact(&mut signature)?;
        self.reader.seek(SeekFrom::Start(offset))?;

        if LittleEndian::read_u32(&signature) == CONTAINER_MAGIC {
            Ok(Endian::Little)
        } else if BigEndian::read_u32(&signature) == CONTAINER_MAGIC {
            Ok(Endian::Big)
        } else {
            Err(Error::Format {
                offset,
                found: LittleEndian::read_u32(&signature),
            })
        }
    }

    fn read_container<E, F>(
        &mut self,
        tree: &mut ChunkTree,
        id: NodeId,
        base: u64,
        available: u64,
        endian: Endian,
        depth: usize,
        notify: &mut F,
    ) -> core::result::Result<(), E>
    where
        E: From<Error>,
        F: FnMut(NodeRef<'_>) -> core::result::Result<(), E>,
    {
        if depth > MAX_DEPTH {
            return Err(Error::NestingTooDeep {
                offset: base,
                limit: MAX_DEPTH,
            }
            .into());
        }
        if available < ContainerHeader::SIZE {
            return Err(Error::TruncatedData {
                offset: base,
                declared: ContainerHeader::SIZE,
                available,
            }
            .into());
        }

        self.reader.seek(SeekFrom::Start(base)).map_err(Error::from)?;
        let header =
            ContainerHeader::read_options(&mut self.reader, endian, ()).map_err(Error::from)?;

        if header.magic != CONTAINER_MAGIC {
            return Err(Error::Format {
                offset: base,
                found: header.magic,
            }
            .into());
        }

        let size = header.size as u64;
        let directory_end = ContainerHeader::SIZE + DirectoryEntry::SIZE * header.count as u64;
        if size > available || directory_end > size {
            return Err(Error::TruncatedData {
                offset: base,
                declared: size.max(directory_end),
                available: available.min(size),
            }
            .into());
        }
        if size != available {
            trace!(size, available, "container is smaller than the space reserved for it");
        }

        tree.set_revision(id, header.revision)?;
        tree.set_layout(id, base, size)?;

        let entries = (0..header.count)
            .map(|_| DirectoryEntry::read_options(&mut self.reader, endian, ()))
            .collect::<binrw::BinResult<Vec<_>>>()
            .map_err(Error::from)?;

        for entry in entries {
            let tag = Tag::new(entry.tag);
            let alignment = Alignment::new(entry.alignment as u32)?;
            let offset = entry.offset as u64;
            let length = entry.size as u64;

            if offset < directory_end || offset + length > size {
                return Err(Error::TruncatedData {
                    offset: base + offset,
                    declared: length,
                    available: size.saturating_sub(offset),
                }
                .into());
            }
            if !alignment.is_aligned(offset) {
                warn!(%tag, offset, alignment = alignment.get(), "chunk is not stored on its alignment");
            }

            let child_base = base + offset;
            let child = if entry.is_container() {
                let child = tree.add_container(id, tag, entry.version, alignment)?;
                tree.node_mut(child)?.flags = entry.flags & !FLAG_CONTAINER;
                self.read_container(tree, child, child_base, length, endian, depth + 1, notify)?;
                child
            } else {
                let mut buffer = vec![0u8; length as usize];
                self.reader
                    .seek(SeekFrom::Start(child_base))
                    .map_err(Error::from)?;
                self.reader.read_exact(&mut buffer).map_err(Error::from)?;

                let child = tree.add_leaf(id, tag, entry.version, alignment, buffer)?;
                tree.node_mut(child)?.flags = entry.flags & !FLAG_CONTAINER;
                child
            };
            tree.set_layout(child, child_base, length)?;

            trace!(%tag, version = entry.version, offset = child_base, size = length, "parsed chunk");
            notify(tree.node_ref(child))?;
        }

        Ok(())
    }
}
