//! The four access-discipline tags tracked per byte of guest address space,
//! and the restricted subset of them a range-paint operation may install.

use crate::deps::serde;

/// Two-bit access-discipline tag carried for every byte of tracked address
/// space. Bit layout mirrors the shadow encoding directly: the numeric value
/// of each variant *is* the two bits stored per byte in a page's shadow
/// bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Tag {
    /// No access discipline is enforced on this byte.
    NoCheck = 0b00,
    /// Stores to this byte are reported as errors.
    Unwritable = 0b01,
    /// This byte holds a value that must not itself be used as the address
    /// of a `RefCheck` store.
    Unreferable = 0b10,
    /// A store through this byte, interpreted as a pointer, checks whether
    /// the pointee is tagged `Unreferable`.
    RefCheck = 0b11,
}

impl Tag {
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Tag::NoCheck,
            0b01 => Tag::Unwritable,
            0b10 => Tag::Unreferable,
            _ => Tag::RefCheck,
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Tag::NoCheck => "nocheck",
            Tag::Unwritable => "unwritable",
            Tag::Unreferable => "unreferable",
            Tag::RefCheck => "refcheck",
        }
    }
}

/// The subset of [`Tag`] a range paint may install. `RefCheck` is a
/// per-field annotation laid down one byte at a time by the client-request
/// dispatcher, never a bulk-range fill, so it has no place here.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PaintTag {
    NoCheck,
    Unwritable,
    Unreferable,
}

impl PaintTag {
    pub const fn as_tag(self) -> Tag {
        match self {
            PaintTag::NoCheck => Tag::NoCheck,
            PaintTag::Unwritable => Tag::Unwritable,
            PaintTag::Unreferable => Tag::Unreferable,
        }
    }

    pub const fn mnemonic(self) -> &'static str {
        self.as_tag().mnemonic()
    }

    /// The shadow byte value produced by packing this tag into all four of
    /// the 2-bit slots a shadow byte holds.
    pub(crate) const fn repeat8(self) -> u8 {
        match self {
            PaintTag::NoCheck => 0x00,
            PaintTag::Unwritable => 0x55,
            PaintTag::Unreferable => 0xaa,
        }
    }

    /// The native-endian 16-bit word produced by packing this tag into the
    /// eight 2-bit slots spanned by two adjacent shadow bytes.
    pub(crate) const fn repeat16(self) -> u16 {
        match self {
            PaintTag::NoCheck => 0x0000,
            PaintTag::Unwritable => 0x5555,
            PaintTag::Unreferable => 0xaaaa,
        }
    }
}
