//! Error types that can be emitted from this library

use miette::Diagnostic;
use spool_chunk::{NodeId, Tag};
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent warpper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent warpper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// Transparent warpper for [`spool_chunk::error::Error`]
    #[error(transparent)]
    #[diagnostic(transparent)]
    Chunk(#[from] spool_chunk::error::Error),

    /// A resource could not be decoded from its chunk
    #[error("unable to decode {resource} from chunk {tag}")]
    ResourceDecode {
        /// Kind of the resource
        resource: &'static str,
        /// Tag of the chunk the resource is bound to
        tag: Tag,
        /// What went wrong
        #[source]
        source: Box<Error>,
    },

    /// A resource could not be encoded back into its chunk
    #[error("unable to encode {resource} into chunk {tag}")]
    ResourceEncode {
        /// Kind of the resource
        resource: &'static str,
        /// Tag of the chunk the resource is bound to
        tag: Tag,
        /// What went wrong
        #[source]
        source: Box<Error>,
    },

    /// A composite resource is missing one of the chunks it is made of
    #[error("{resource} requires a {name} chunk with tag {tag}")]
    MissingChild {
        /// Kind of the resource
        resource: &'static str,
        /// Tag that could not be found
        tag: Tag,
        /// What the missing chunk holds
        name: &'static str,
    },

    /// Nothing loaded so far provides the referenced shared resource
    #[error("no shared {kind} has been registered as {identifier:#x}")]
    MissingSharedReference {
        /// Kind of the shared resource
        kind: &'static str,
        /// Identifier it was looked up by
        identifier: u64,
    },

    /// A shared resource exists but holds a different type than requested
    #[error("shared {kind} {identifier:#x} holds a different type")]
    SharedTypeMismatch {
        /// Kind of the shared resource
        kind: &'static str,
        /// Identifier it was looked up by
        identifier: u64,
    },

    /// No resource is bound to the chunk
    #[error("no resource is bound to chunk {0}")]
    Unbound(NodeId),

    /// The resource bound to a chunk is not of the requested kind
    #[error("chunk {node} holds a {found}, not a {expected}")]
    WrongResource {
        /// The chunk the resource is bound to
        node: NodeId,
        /// Kind that was asked for
        expected: &'static str,
        /// Kind that is bound
        found: &'static str,
    },

    /// A payload disagrees with itself
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
