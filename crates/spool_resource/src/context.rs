//! Format context and the detail serialization contract.
//!
//! The same record layouts are stored little endian on PC builds and big endian on console
//! builds, and some records change shape between format versions. Rather than flipping a global
//! switch, every read and write takes a [`FormatContext`] describing the data at hand.

use binrw::{BinRead, BinWrite};
use spool_chunk::Endian;
use std::io::{Cursor, Read, Seek, Write};
use std::ops::{Deref, DerefMut};
use tracing::trace;

use crate::error::{Error, Result};

/// Platform a file was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    #[default]
    Pc,
    Ps2,
    Xbox,
    Xbox360,
    Ps3,
    Wii,
}

impl Platform {
    /// Byte order used by builds for this platform
    pub const fn endian(self) -> Endian {
        match self {
            Platform::Pc | Platform::Ps2 | Platform::Xbox => Endian::Little,
            Platform::Xbox360 | Platform::Ps3 | Platform::Wii => Endian::Big,
        }
    }
}

/// Describes how the bytes of a payload are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatContext {
    /// Platform the data was built for
    pub platform: Platform,
    /// Byte order of every multi-byte field
    pub endian: Endian,
    /// Format version of the data
    pub version: i32,
    /// Format specific flags
    pub flags: u32,
}

impl Default for FormatContext {
    fn default() -> Self {
        FormatContext::new(Platform::default(), 0)
    }
}

impl FormatContext {
    /// Context for `platform`, using that platform's byte order
    pub const fn new(platform: Platform, version: i32) -> FormatContext {
        FormatContext {
            platform,
            endian: platform.endian(),
            version,
            flags: 0,
        }
    }

    /// Replace the flags
    pub fn with_flags(mut self, flags: u32) -> FormatContext {
        self.flags = flags;
        self
    }

    /// Replace the byte order
    ///
    /// The platform is kept, so afterwards [`Platform::endian`] may disagree with
    /// [`FormatContext::endian`]. Payload codecs should read the byte order from the context.
    pub fn with_endian(mut self, endian: Endian) -> FormatContext {
        self.endian = endian;
        self
    }

    pub const fn endian(&self) -> Endian {
        self.endian
    }

    /// Whether every bit of `mask` is set
    pub const fn has_flag(&self, mask: u32) -> bool {
        self.flags & mask == mask
    }

    /// Temporarily use another byte order, restored when the guard goes out of scope
    pub fn override_endian(&mut self, endian: Endian) -> EndianGuard<'_> {
        EndianGuard::new(self, endian)
    }
}

/// Scoped byte order override for a [`FormatContext`]
///
/// ```
/// use spool_chunk::Endian;
/// use spool_resource::context::{FormatContext, Platform};
///
/// let mut context = FormatContext::new(Platform::Pc, 1);
/// {
///     let guard = context.override_endian(Endian::Big);
///     assert_eq!(guard.endian(), Endian::Big);
/// }
/// assert_eq!(context.endian(), Endian::Little);
/// ```
pub struct EndianGuard<'a> {
    context: &'a mut FormatContext,
    previous: Endian,
}

impl<'a> EndianGuard<'a> {
    pub fn new(context: &'a mut FormatContext, endian: Endian) -> EndianGuard<'a> {
        let previous = context.endian;
        context.endian = endian;
        trace!(?previous, ?endian, "overriding byte order");
        EndianGuard { context, previous }
    }
}

impl Deref for EndianGuard<'_> {
    type Target = FormatContext;

    fn deref(&self) -> &Self::Target {
        self.context
    }
}

impl DerefMut for EndianGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context
    }
}

impl Drop for EndianGuard<'_> {
    fn drop(&mut self) {
        self.context.endian = self.previous;
    }
}

/// A structured record stored inside a leaf payload
///
/// Implementations decide from the context how the record is laid out, so a single type can
/// cover every platform and version of a format.
pub trait Detail: Sized {
    /// Read one record
    fn deserialize<R: Read + Seek>(reader: &mut R, context: &FormatContext) -> Result<Self>;

    /// Write one record
    fn serialize<W: Write + Seek>(&self, writer: &mut W, context: &FormatContext) -> Result<()>;
}

/// Read a primitive using the byte order of `context`
pub fn read_value<T, R>(reader: &mut R, context: &FormatContext) -> Result<T>
where
    R: Read + Seek,
    T: for<'a> BinRead<Args<'a> = ()>,
{
    Ok(T::read_options(reader, context.endian, ())?)
}

/// Write a primitive using the byte order of `context`
pub fn write_value<T, W>(value: &T, writer: &mut W, context: &FormatContext) -> Result<()>
where
    W: Write + Seek,
    T: for<'a> BinWrite<Args<'a> = ()>,
{
    Ok(value.write_options(writer, context.endian, ())?)
}

/// Decode `count` consecutive records from `buffer`
pub fn read_details<T: Detail>(
    buffer: &[u8],
    count: usize,
    context: &FormatContext,
) -> Result<Vec<T>> {
    let mut reader = Cursor::new(buffer);
    let records = (0..count)
        .map(|_| T::deserialize(&mut reader, context))
        .collect::<Result<Vec<_>>>()?;

    let consumed = reader.position() as usize;
    if consumed != buffer.len() {
        return Err(Error::InvalidPayload(format!(
            "{count} records use {consumed} bytes but the payload holds {}",
            buffer.len()
        )));
    }

    Ok(records)
}

/// Encode records back to back
pub fn write_details<T: Detail>(records: &[T], context: &FormatContext) -> Result<Vec<u8>> {
    let mut writer = Cursor::new(Vec::new());
    for record in records {
        record.serialize(&mut writer, context)?;
    }
    Ok(writer.into_inner())
}
