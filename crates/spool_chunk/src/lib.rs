//! This library handles reading from and creating hierarchical **chunk** container files.
//!
//! # Chunk Container Format Documentation
//!
//! A chunk file stores a tree of chunks. Every chunk carries an opaque tag, a version and an
//! alignment, and is either a **leaf** holding raw bytes or a **container** holding more chunks.
//! The library does not know what any tag means; that is left to whoever reads the tree.
//!
//! ## File Structure
//!
//! The file itself is the payload of the root container. A container payload consists of a header,
//! a directory with one entry per child, and the child payloads.
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: 0x4B4E4843 ("CHNK" little endian)                 |
//! | 0x0004         | Size                   | 4 bytes: Size of the container payload                     |
//! | 0x0008         | Count                  | 4 bytes: Number of children                                |
//! | 0x000C         | Revision               | 4 bytes: Container format revision, currently 3            |
//! | 0x0010         | Directory              | Count * 20 bytes                                           |
//!
//! ### Directory
//!
//! | Offset (bytes) | Field                  | Description                                             |
//! |----------------|------------------------|---------------------------------------------------------|
//! | 0x0000         | Tag                    | 4 bytes: Opaque type identifier                         |
//! | 0x0004         | Version                | 4 bytes: Format revision of the chunk                   |
//! | 0x0008         | Offset                 | 4 bytes: Offset from the start of the parent payload    |
//! | 0x000C         | Size                   | 4 bytes: Size of the payload, without padding           |
//! | 0x0010         | Alignment              | 2 bytes: Power of two between 4 and 4096                |
//! | 0x0012         | Flags                  | 2 bytes: Bit 0 marks a nested container                 |
//!
//! ### Payloads
//!
//! Payloads follow the directory in directory order. Each payload starts on a multiple of its
//! alignment, counted from the start of the parent payload. Gaps are filled with `0xA1`.
//! The size of a container never includes the padding after its last child.
//!
//! ## Additional Information
//!
//! - **Endianness**: Either. The signature reads "CHNK" in little endian files and "KNHC" in big
//!   endian files, and every other field follows the signature.
//! - **Round trips**: Reading a file and writing the tree back reproduces the file byte for byte,
//!   as long as it was laid out following the rules above.
//! - **Nesting**: Containers may be nested up to [`types::MAX_DEPTH`] levels below the root.
//!

pub mod error;
pub mod node;
pub mod read;
pub mod tag;
pub mod types;
pub mod write;

pub use binrw::Endian;
pub use node::{ChunkTree, Node, NodeId, NodeKind, NodeRef};
pub use read::ChunkReader;
pub use tag::Tag;
pub use types::Alignment;
pub use write::{ChunkWriter, ChunkWriterOptions};
