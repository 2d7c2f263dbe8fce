//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

use crate::node::NodeId;
use crate::tag::Tag;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// A container did not start with the expected signature
    #[error("bad container signature {found:#010x} at offset {offset:#x}")]
    #[diagnostic(help("chunk containers start with \"CHNK\" (little endian) or \"KNHC\" (big endian)"))]
    Format {
        /// Absolute offset of the container
        offset: u64,
        /// The value found instead of the signature
        found: u32,
    },

    /// A size field points past the end of the data available to it
    #[error("chunk at offset {offset:#x} declares {declared} bytes but only {available} are available")]
    TruncatedData {
        /// Absolute offset of the chunk
        offset: u64,
        /// Size declared by the chunk
        declared: u64,
        /// Bytes actually available
        available: u64,
    },

    /// Alignment is not one of the supported powers of two
    #[error("unsupported alignment {0}, expected a power of two between 4 and 4096")]
    InvalidAlignment(u32),

    /// Containers are nested deeper than [`MAX_DEPTH`](crate::types::MAX_DEPTH)
    #[error("container at offset {offset:#x} is nested more than {limit} levels deep")]
    NestingTooDeep {
        /// Absolute offset of the offending container in the stream
        offset: u64,
        /// The nesting limit
        limit: usize,
    },

    /// A serialized chunk does not fit in the 32 bit size field
    #[error("chunk payload of {0} bytes is too large to be written")]
    PayloadTooLarge(u64),

    /// The node holds children, not a buffer
    #[error("chunk {0} is a container and has no buffer")]
    NotALeaf(Tag),

    /// The node holds a buffer, not children
    #[error("chunk {0} is a leaf and cannot hold children")]
    NotAContainer(Tag),

    /// The id does not belong to this tree
    #[error("node {0} does not exist in this tree")]
    InvalidNode(NodeId),

    /// The node was detached and is no longer written with the tree
    #[error("node {0} is not attached to the tree")]
    Detached(NodeId),

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
