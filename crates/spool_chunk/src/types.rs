//! Base types for the structure of a chunk file.

use binrw::{BinRead, BinWrite};

use crate::error::{Error, Result};

/// Signature at the start of every container, `"CHNK"` when stored little endian
pub const CONTAINER_MAGIC: u32 = 0x4B4E4843;

/// Revision written into every container header
pub const CONTAINER_REVISION: u32 = 3;

/// Byte used to fill the gaps left by alignment
pub const DEFAULT_FILLER: u8 = 0xA1;

/// Directory entry flag marking a child as a nested container
pub const FLAG_CONTAINER: u16 = 0x0001;

/// Deepest container nesting accepted when reading or writing, the root being level 0
pub const MAX_DEPTH: usize = 256;

/// Container header
///
/// Starts every container payload, including the root of the file. The signature is checked by
/// the reader rather than through a binrw magic so a mismatch can be reported with its offset.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
pub struct ContainerHeader {
    /// Always [`CONTAINER_MAGIC`]
    pub magic: u32,

    /// Size of the container payload including this header and its directory
    pub size: u32,

    /// Number of directory entries following the header
    pub count: u32,

    /// Format revision of the container
    pub revision: u32,
}

impl ContainerHeader {
    /// Size of the header on disk
    pub const SIZE: u64 = 16;
}

impl Default for ContainerHeader {
    fn default() -> Self {
        Self {
            magic: CONTAINER_MAGIC,
            size: Self::SIZE as u32,
            count: 0,
            revision: CONTAINER_REVISION,
        }
    }
}

/// Container directory entry
///
/// Describes where one child payload lives inside its parent.
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
pub struct DirectoryEntry {
    /// Opaque type identifier of the child
    pub tag: i32,

    /// Format revision of the child
    pub version: i32,

    /// Offset of the child payload from the start of the parent payload
    pub offset: u32,

    /// Size of the child payload, without padding
    pub size: u32,

    /// Required alignment of the child payload
    pub alignment: u16,

    /// See [`FLAG_CONTAINER`], other bits are kept as they are
    pub flags: u16,
}

impl DirectoryEntry {
    /// Size of a directory entry on disk
    pub const SIZE: u64 = 20;

    /// Whether the entry points at a nested container
    pub fn is_container(&self) -> bool {
        self.flags & FLAG_CONTAINER != 0
    }
}

/// Byte boundary a chunk payload starts on, relative to its parent's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alignment(u16);

impl Alignment {
    /// Smallest supported alignment
    pub const MIN: Alignment = Alignment(4);

    /// Largest supported alignment
    pub const MAX: Alignment = Alignment(4096);

    /// Create an alignment, rejecting anything outside of `4..=4096` or not a power of two
    pub fn new(value: u32) -> Result<Alignment> {
        if value.is_power_of_two()
            && value >= Self::MIN.get()
            && value <= Self::MAX.get()
        {
            Ok(Alignment(value as u16))
        } else {
            Err(Error::InvalidAlignment(value))
        }
    }

    /// The alignment in bytes
    pub const fn get(self) -> u32 {
        self.0 as u32
    }

    /// Round `offset` up to the next multiple of this alignment
    pub fn align(self, offset: u64) -> u64 {
        let mask = self.get() as u64 - 1;
        (offset + mask) & !mask
    }

    /// Number of filler bytes needed to bring `offset` onto this alignment
    pub fn padding(self, offset: u64) -> u64 {
        self.align(offset) - offset
    }

    /// Whether `offset` already sits on this alignment
    pub fn is_aligned(self, offset: u64) -> bool {
        offset % self.get() as u64 == 0
    }
}

impl Default for Alignment {
    fn default() -> Self {
        Self::MIN
    }
}

impl TryFrom<u32> for Alignment {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Alignment::new(value)
    }
}

impl From<Alignment> for u32 {
    fn from(value: Alignment) -> Self {
        value.get()
    }
}
