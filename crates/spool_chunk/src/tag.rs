//! Opaque chunk type identifiers.

use derive_more::derive::{Deref, From, Into};
use std::fmt;

/// Identifies how a chunk is meant to be interpreted.
///
/// Tags are either small integers or packed four character codes. The container itself never
/// looks at them, they only matter to whoever registered an interpretation for them.
#[derive(Deref, From, Into, Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(i32);

impl Tag {
    pub const fn new(value: i32) -> Tag {
        Tag(value)
    }

    /// Pack a four character code, first character in the lowest byte
    pub const fn from_fourcc(code: &[u8; 4]) -> Tag {
        Tag(i32::from_le_bytes(*code))
    }

    /// The raw integer value
    pub const fn value(self) -> i32 {
        self.0
    }

    /// The tag as four bytes, first character first
    pub const fn to_fourcc(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    fn is_printable(self) -> bool {
        self.to_fourcc()
            .iter()
            .all(|c| c.is_ascii_alphanumeric() || *c == b' ' || *c == b'_')
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_printable() {
            let code = self.to_fourcc();
            write!(f, "'{}'", String::from_utf8_lossy(&code))
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}
