//! Item header layout.
//!
//! | Field          | Size | Contents                                             |
//! |----------------|------|------------------------------------------------------|
//! | Sync marker    | 4    | `0xD41F8A37`, top-level blocks only                  |
//! | Type word      | 4    | bits 0-15 type, 16 user flag, 17 extended, 20-31 version |
//! | Ident          | 4    | signed                                               |
//! | Length word    | 4    | bits 0-29 length, 30 sub-items only                  |
//! | Extension word | 4    | only if extended: length bits 30-41                  |

use crate::codec::Scalar;
use crate::types::{Endian, Error, ItemHeader, Result};

pub const SYNC_MARKER: u32 = 0xD41F_8A37;

pub const MAX_TYPE: u32 = 0xFFFF;
pub const MAX_VERSION: u16 = 0x0FFF;
pub const MAX_NORMAL_LENGTH: u64 = (1 << 30) - 1;
pub const MAX_EXTENDED_LENGTH: u64 = (1 << 42) - 1;

pub(crate) const SYNC_SIZE: usize = 4;
const BASE_SIZE: usize = 12;
pub(crate) const EXTENSION_SIZE: usize = 4;

const TYPE_MASK: u32 = 0xFFFF;
const USER_FLAG: u32 = 1 << 16;
const EXTENDED_FLAG: u32 = 1 << 17;
const RESERVED_TYPE_BITS: u32 = 0b11 << 18;
const VERSION_SHIFT: u32 = 20;
const LENGTH_MASK: u32 = (1 << 30) - 1;
const SEARCHABLE_FLAG: u32 = 1 << 30;
const RESERVED_LENGTH_BIT: u32 = 1 << 31;
const EXTENSION_MASK: u32 = 0x0FFF;

/// Size of an encoded header.
pub fn header_size(top_level: bool, extended: bool) -> usize {
    let mut size = BASE_SIZE;
    if top_level {
        size += SYNC_SIZE;
    }
    if extended {
        size += EXTENSION_SIZE;
    }
    size
}

/// Determine the byte order of a block from its first four bytes.
pub(crate) fn detect_order(bytes: [u8; 4]) -> Option<Endian> {
    if u32::from_le_bytes(bytes) == SYNC_MARKER {
        Some(Endian::Little)
    } else if u32::from_be_bytes(bytes) == SYNC_MARKER {
        Some(Endian::Big)
    } else {
        None
    }
}

pub(crate) fn is_extended(type_word: u32) -> bool {
    type_word & EXTENDED_FLAG != 0
}

pub(crate) fn type_word(h: &ItemHeader) -> Result<u32> {
    if h.type_code > MAX_TYPE {
        return Err(Error::range(h.type_code, "item type (16 bits)"));
    }
    if h.version > MAX_VERSION {
        return Err(Error::range(h.version, "item version (12 bits)"));
    }
    let mut word = h.type_code | ((h.version as u32) << VERSION_SHIFT);
    if h.user_flag {
        word |= USER_FLAG;
    }
    if h.extended {
        word |= EXTENDED_FLAG;
    }
    Ok(word)
}

fn length_words(length: u64, searchable: bool, extended: bool) -> Result<(u32, u32)> {
    let max = if extended {
        MAX_EXTENDED_LENGTH
    } else {
        MAX_NORMAL_LENGTH
    };
    if length > max {
        return Err(Error::LengthMismatch {
            declared: max,
            actual: length,
        });
    }
    let mut low = (length as u32) & LENGTH_MASK;
    if searchable {
        low |= SEARCHABLE_FLAG;
    }
    Ok((low, (length >> 30) as u32))
}

/// Encode `h` into `out`, which must be exactly `header_size` bytes long.
pub(crate) fn encode(h: &ItemHeader, top_level: bool, order: Endian, out: &mut [u8]) -> Result<()> {
    debug_assert_eq!(out.len(), header_size(top_level, h.extended));
    let tw = type_word(h)?;
    let (lw, ew) = length_words(h.length, h.can_search, h.extended)?;
    let mut at = 0;
    if top_level {
        SYNC_MARKER.write_to(order, &mut out[..4]);
        at = SYNC_SIZE;
    }
    tw.write_to(order, &mut out[at..at + 4]);
    h.ident.write_to(order, &mut out[at + 4..at + 8]);
    lw.write_to(order, &mut out[at + 8..at + 12]);
    if h.extended {
        ew.write_to(order, &mut out[at + 12..at + 16]);
    }
    Ok(())
}

/// Decode a header from the start of `bytes`, returning it together with
/// its encoded size.
pub(crate) fn decode(
    bytes: &[u8],
    order: Endian,
    top_level: bool,
    level: usize,
) -> Result<(ItemHeader, usize)> {
    let mut size = header_size(top_level, false);
    if bytes.len() < size {
        return Err(Error::TruncatedInput {
            needed: size,
            available: bytes.len(),
        });
    }

    let mut at = 0;
    if top_level {
        if u32::read_from(order, &bytes[..4]) != SYNC_MARKER {
            return Err(Error::CorruptHeader("missing sync marker".into()));
        }
        at = SYNC_SIZE;
    }
    let tw = u32::read_from(order, &bytes[at..at + 4]);
    let ident = i32::read_from(order, &bytes[at + 4..at + 8]);
    let lw = u32::read_from(order, &bytes[at + 8..at + 12]);

    if tw & RESERVED_TYPE_BITS != 0 {
        return Err(Error::CorruptHeader(format!(
            "reserved bits set in type word {tw:#010x}"
        )));
    }
    if lw & RESERVED_LENGTH_BIT != 0 {
        return Err(Error::CorruptHeader(format!(
            "reserved bit set in length word {lw:#010x}"
        )));
    }

    let extended = is_extended(tw);
    let mut length = (lw & LENGTH_MASK) as u64;
    if extended {
        size += EXTENSION_SIZE;
        if bytes.len() < size {
            return Err(Error::TruncatedInput {
                needed: size,
                available: bytes.len(),
            });
        }
        let ew = u32::read_from(order, &bytes[at + 12..at + 16]);
        if ew & !EXTENSION_MASK != 0 {
            return Err(Error::CorruptHeader(format!(
                "reserved bits set in extension word {ew:#010x}"
            )));
        }
        length |= (ew as u64) << 30;
    }

    let header = ItemHeader {
        type_code: tw & TYPE_MASK,
        version: (tw >> VERSION_SHIFT) as u16,
        ident,
        user_flag: tw & USER_FLAG != 0,
        extended,
        can_search: lw & SEARCHABLE_FLAG != 0,
        length,
        level,
    };
    Ok((header, size))
}
