//! The nested item protocol.
//!
//! Every open item occupies one level on the buffer's stack. Levels
//! open and close in strict LIFO order; a handle that does not refer to the
//! innermost open item is rejected with [`Error::ProtocolMisuse`].

use crate::buffer::IoBuffer;
use crate::header::{self, EXTENSION_SIZE, MAX_NORMAL_LENGTH, SYNC_SIZE};
use crate::types::{Direction, Endian, Error, ItemHeader, Result};

/// Maximum number of nested items that can be open at once.
pub const MAX_LEVEL: usize = 20;

/// State of one open item.
#[derive(Debug, Clone)]
pub(crate) struct Level {
    pub header: ItemHeader,
    pub direction: Direction,
    /// Offset of the item header.
    pub start: usize,
    /// Offset of the first data byte.
    pub data_start: usize,
    /// End of the data area (reading only).
    pub end: usize,
    pub serial: u64,
    /// Raw scalar data was written directly into this item.
    pub raw_data: bool,
    pub fault: Option<Error>,
}

/// Identifies one open item on a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHandle {
    level: usize,
    serial: u64,
    direction: Direction,
    header: ItemHeader,
}

impl ItemHandle {
    /// The header as it was when the item was opened.
    pub fn header(&self) -> &ItemHeader {
        &self.header
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl IoBuffer {
    // --- Writing ---

    /// Start a new item at the write position: top-level if no item is
    /// open, otherwise a sub-item of the innermost open item.
    ///
    /// Only the type, version, ident, user flag and extended flag of
    /// `header` are used; the length is filled in by
    /// [`put_item_end`](Self::put_item_end).
    pub fn put_item_begin(&mut self, header: &ItemHeader) -> Result<ItemHandle> {
        self.check_open()?;
        self.check_writable()?;
        let depth = self.levels.len();
        if depth >= MAX_LEVEL {
            return Err(Error::DepthExceeded(MAX_LEVEL));
        }
        header::type_word(header)?;

        let size = header::header_size(depth == 0, header.extended);
        let start = match self.grow(size) {
            Ok(at) => at,
            Err(err) => {
                if let Some(parent) = self.levels.last_mut() {
                    parent.fault = Some(err.clone());
                }
                return Err(err);
            }
        };
        let header = ItemHeader {
            level: depth,
            can_search: false,
            length: 0,
            ..*header
        };
        Ok(self.push_level(header, Direction::Writing, start, start + size, 0))
    }

    /// Finish the innermost item being written: patch its length into the
    /// header and, for a top-level block, write it to the output channel
    /// if auto flush is enabled.
    ///
    /// An item that ran into an error is removed from the buffer and the
    /// error is returned.
    pub fn put_item_end(&mut self, handle: ItemHandle) -> Result<ItemHeader> {
        let level = self.pop_level(&handle, Direction::Writing)?;
        if let Some(err) = level.fault.clone().or_else(|| self.poison.clone()) {
            self.data.truncate(level.start);
            log::debug!(
                "rolled back item of type {} after error: {err}",
                level.header.type_code
            );
            return Err(err);
        }

        let header = match self.finish_write(&level, MAX_NORMAL_LENGTH) {
            Ok(header) => header,
            Err(err) => {
                self.data.truncate(level.start);
                return Err(err);
            }
        };
        log::trace!(
            "put item end: type {} level {} length {}",
            header.type_code,
            header.level,
            header.length
        );
        if header.level == 0 && self.config.auto_flush && self.has_output() {
            self.flush()?;
        }
        Ok(header)
    }

    fn finish_write(&mut self, level: &Level, max_normal: u64) -> Result<ItemHeader> {
        let top = level.header.level == 0;
        let mut header = level.header;
        header.length = (self.data.len() - level.data_start) as u64;
        header.can_search = !level.raw_data;

        if !header.extended && header.length > max_normal {
            if !self.config.extended {
                return Err(Error::LengthMismatch {
                    declared: max_normal,
                    actual: header.length,
                });
            }
            let len = self.data.len();
            self.ensure_capacity(len + EXTENSION_SIZE)?;
            self.data.resize(len + EXTENSION_SIZE, 0);
            self.data
                .copy_within(level.data_start..len, level.data_start + EXTENSION_SIZE);
            header.extended = true;
            log::debug!(
                "promoted item of type {} with {} bytes to extended header",
                header.type_code,
                header.length
            );
        }

        let size = header::header_size(top, header.extended);
        header::encode(
            &header,
            top,
            self.order,
            &mut self.data[level.start..level.start + size],
        )?;
        Ok(header)
    }

    /// Abandon the innermost item being written, as if it had never been
    /// started.
    pub fn unput_item(&mut self, handle: ItemHandle) -> Result<()> {
        let level = self.pop_level(&handle, Direction::Writing)?;
        self.data.truncate(level.start);
        Ok(())
    }

    // --- Reading ---

    /// Open the item at the read position. At the top level, the next block
    /// is loaded from the input channel if the buffer holds no more data.
    ///
    /// If `expected` is given and the item has another type, the call fails
    /// with [`Error::TypeMismatch`] and the read position is unchanged.
    pub fn get_item_begin(&mut self, expected: Option<u32>) -> Result<ItemHandle> {
        self.get_item_begin_versioned(expected, None)
    }

    /// Like [`get_item_begin`](Self::get_item_begin), but warn if the item
    /// has a newer version than `max_version`.
    pub fn get_item_begin_versioned(
        &mut self,
        expected: Option<u32>,
        max_version: Option<u16>,
    ) -> Result<ItemHandle> {
        self.check_open()?;
        let depth = self.levels.len();
        if depth >= MAX_LEVEL {
            return Err(Error::DepthExceeded(MAX_LEVEL));
        }
        if depth == 0 && self.read_pos >= self.data.len() {
            if !self.has_input() {
                return Err(Error::EndOfStream);
            }
            self.fill()?;
        }

        let limit = self.read_limit()?;
        let (header, size, order) = self.decode_at(self.read_pos, limit, depth, self.order)?;
        if let Some(expected) = expected {
            if header.type_code != expected {
                return Err(Error::TypeMismatch {
                    expected,
                    found: header.type_code,
                });
            }
        }
        if let Some(max) = max_version {
            if header.version > max {
                log::warn!(
                    "item of type {} has version {}, newer than supported version {max}",
                    header.type_code,
                    header.version
                );
            }
        }

        self.order = order;
        let start = self.read_pos;
        let data_start = start + size;
        let end = data_start + header.length as usize;
        self.read_pos = data_start;
        Ok(self.push_level(header, Direction::Reading, start, data_start, end))
    }

    /// Finish the innermost item being read, leaving the read position just
    /// past its end. Unread data is discarded.
    pub fn get_item_end(&mut self, handle: ItemHandle) -> Result<ItemHeader> {
        let level = self.pop_level(&handle, Direction::Reading)?;
        if self.read_pos > level.end {
            let err = Error::LengthMismatch {
                declared: level.header.length,
                actual: (self.read_pos - level.data_start) as u64,
            };
            return Err(self.poison(err));
        }
        if self.read_pos < level.end && level.fault.is_none() {
            let unread = level.end - self.read_pos;
            if level.header.can_search {
                log::debug!(
                    "skipping {unread} bytes of sub-items of type {}",
                    level.header.type_code
                );
            } else {
                log::warn!(
                    "discarding {unread} unread bytes of item type {}",
                    level.header.type_code
                );
            }
        }
        self.read_pos = level.end;
        log::trace!(
            "get item end: type {} level {}",
            level.header.type_code,
            level.header.level
        );
        match level.fault.or_else(|| self.poison.clone()) {
            Some(err) => Err(err),
            None => Ok(level.header),
        }
    }

    /// Finish the innermost item in whichever direction it was opened.
    pub fn end_item(&mut self, handle: ItemHandle) -> Result<ItemHeader> {
        match handle.direction {
            Direction::Writing => self.put_item_end(handle),
            Direction::Reading => self.get_item_end(handle),
        }
    }

    /// Abandon the innermost item being read and move back to its header,
    /// as if it had never been opened.
    pub fn unget_item(&mut self, handle: ItemHandle) -> Result<()> {
        let level = self.pop_level(&handle, Direction::Reading)?;
        self.read_pos = level.start;
        Ok(())
    }

    /// Move back to the start of the data of the item being read.
    pub fn rewind_item(&mut self, handle: ItemHandle) -> Result<()> {
        self.resolve(&handle, Direction::Reading)?;
        self.read_pos = self.levels[handle.level].data_start;
        Ok(())
    }

    /// Discard the rest of the item being read. The item stays open.
    pub fn skip_item(&mut self, handle: ItemHandle) -> Result<()> {
        self.resolve(&handle, Direction::Reading)?;
        let end = self.levels[handle.level].end;
        log::debug!("skipping {} bytes", end - self.read_pos);
        self.read_pos = end;
        Ok(())
    }

    /// Skip over the next sub-item of the item being read without entering
    /// it, returning its header.
    pub fn skip_sub_item(&mut self, handle: ItemHandle) -> Result<ItemHeader> {
        self.resolve(&handle, Direction::Reading)?;
        let depth = handle.level + 1;
        self.guarded(|buf| {
            let limit = buf.read_limit()?;
            let (header, size, _) = buf.decode_at(buf.read_pos, limit, depth, buf.order)?;
            buf.read_pos += size + header.length as usize;
            Ok(header)
        })
    }

    /// Search the remaining sub-items of the item being read for one of
    /// type `type_code`. On success the read position is at the header of
    /// the match. If the end of the item is reached without a match the
    /// result is `false` and the position is unchanged.
    ///
    /// Inside items that consist of sub-items only, siblings are skipped by
    /// their declared length. Otherwise every sibling header is validated
    /// and sub-item-only siblings are walked recursively, so that payload
    /// bytes that merely look like a header are not matched. A malformed
    /// sibling fails the search and puts the item into error, leaving the
    /// position unchanged.
    pub fn search_sub_item(&mut self, handle: ItemHandle, type_code: u32) -> Result<bool> {
        self.resolve(&handle, Direction::Reading)?;
        let (end, hop) = {
            let level = &self.levels[handle.level];
            (level.end, level.header.can_search)
        };
        let depth = handle.level + 1;
        self.guarded(|buf| {
            let mut pos = buf.read_pos;
            while pos < end {
                let (header, size, _) = buf.decode_at(pos, end, depth, buf.order)?;
                if header.type_code == type_code {
                    buf.read_pos = pos;
                    return Ok(true);
                }
                let data_end = pos + size + header.length as usize;
                if !hop && header.can_search {
                    buf.walk_sub_items(pos + size, data_end, depth + 1)?;
                }
                pos = data_end;
            }
            Ok(false)
        })
    }

    /// Check that `start..end` is exactly tiled by well-formed items.
    fn walk_sub_items(&self, start: usize, end: usize, depth: usize) -> Result<()> {
        if depth > MAX_LEVEL {
            return Err(Error::CorruptHeader(format!(
                "sub-items nested deeper than {MAX_LEVEL} levels"
            )));
        }
        let mut pos = start;
        while pos < end {
            let (header, size, _) = self.decode_at(pos, end, depth, self.order)?;
            let data_end = pos + size + header.length as usize;
            if header.can_search {
                self.walk_sub_items(pos + size, data_end, depth + 1)?;
            }
            pos = data_end;
        }
        Ok(())
    }

    // --- Lookahead ---

    /// Header of the next item at the read position, without consuming it.
    /// Returns `None` at the end of the innermost item.
    pub fn peek_sub_item(&self) -> Result<Option<ItemHeader>> {
        self.check_poison()?;
        let limit = self.read_limit()?;
        if self.read_pos >= limit {
            return Ok(None);
        }
        let (header, _, _) = self.decode_at(self.read_pos, limit, self.levels.len(), self.order)?;
        Ok(Some(header))
    }

    pub fn next_sub_item_type(&self) -> Result<Option<u32>> {
        Ok(self.peek_sub_item()?.map(|h| h.type_code))
    }

    pub fn next_sub_item_length(&self) -> Result<Option<u64>> {
        Ok(self.peek_sub_item()?.map(|h| h.length))
    }

    pub fn next_sub_item_ident(&self) -> Result<Option<i32>> {
        Ok(self.peek_sub_item()?.map(|h| h.ident))
    }

    // --- Copying blocks ---

    /// Embed a complete top-level block, e.g. the contents of another
    /// buffer, as a sub-item of the item being written.
    pub fn append_block_as_item(&mut self, block: &[u8]) -> Result<ItemHeader> {
        self.guarded(|buf| {
            if buf.levels.is_empty() {
                return Err(Error::ProtocolMisuse(
                    "a block can only be embedded into an open item",
                ));
            }
            buf.check_writable()?;
            let depth = buf.levels.len();
            if depth >= MAX_LEVEL {
                return Err(Error::DepthExceeded(MAX_LEVEL));
            }
            let order = sync_order(block)?;
            if order != buf.order {
                return Err(Error::ProtocolMisuse(
                    "cannot embed a block of different byte order",
                ));
            }
            let (mut header, size) = header::decode(block, order, true, 0)?;
            let payload = &block[size..];
            if payload.len() as u64 != header.length {
                return Err(Error::LengthMismatch {
                    declared: header.length,
                    actual: payload.len() as u64,
                });
            }
            header.level = depth;
            let nested = header::header_size(false, header.extended);
            let at = buf.grow(nested + payload.len())?;
            header::encode(&header, false, order, &mut buf.data[at..at + nested])?;
            buf.data[at + nested..].copy_from_slice(payload);
            Ok(header)
        })
    }

    /// Copy an item being read into `target` as a new top-level block.
    pub fn copy_item_to_block(&self, handle: &ItemHandle, target: &mut IoBuffer) -> Result<ItemHeader> {
        let level = self
            .levels
            .get(handle.level)
            .filter(|l| l.serial == handle.serial && l.direction == Direction::Reading)
            .ok_or(Error::ProtocolMisuse("item is not open for reading"))?;
        target.check_poison()?;
        if !target.levels.is_empty() {
            return Err(Error::ProtocolMisuse("target buffer has open items"));
        }

        let payload = &self.data[level.data_start..level.end];
        let header = ItemHeader {
            level: 0,
            ..level.header
        };
        let size = header::header_size(true, header.extended);
        let at = target.grow(size + payload.len())?;
        if let Err(err) = header::encode(&header, true, self.order, &mut target.data[at..at + size]) {
            target.data.truncate(at);
            return Err(err);
        }
        target.data[at + size..].copy_from_slice(payload);
        target.order = self.order;
        if target.config.auto_flush && target.has_output() {
            target.flush()?;
        }
        Ok(header)
    }

    // --- Internal helpers ---

    /// Fail if the buffer is poisoned or the innermost item is in error.
    fn check_open(&self) -> Result<()> {
        self.check_poison()?;
        match self.levels.last().and_then(|l| l.fault.as_ref()) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn push_level(
        &mut self,
        header: ItemHeader,
        direction: Direction,
        start: usize,
        data_start: usize,
        end: usize,
    ) -> ItemHandle {
        let serial = self.next_serial;
        self.next_serial += 1;
        log::trace!(
            "{direction:?} item begin: type {} level {} at {start}",
            header.type_code,
            header.level
        );
        self.levels.push(Level {
            header,
            direction,
            start,
            data_start,
            end,
            serial,
            raw_data: false,
            fault: None,
        });
        ItemHandle {
            level: header.level,
            serial,
            direction,
            header,
        }
    }

    /// Check that `handle` is the innermost open item and was opened in
    /// `direction`.
    pub(crate) fn resolve(&self, handle: &ItemHandle, direction: Direction) -> Result<()> {
        match self.levels.get(handle.level) {
            Some(level) if level.serial == handle.serial => {}
            _ => return Err(Error::ProtocolMisuse("item is not open")),
        }
        if handle.level + 1 != self.levels.len() {
            return Err(Error::ProtocolMisuse("a sub-item is still open"));
        }
        if handle.direction != direction {
            return Err(match direction {
                Direction::Reading => Error::ProtocolMisuse("item is not open for reading"),
                Direction::Writing => Error::ProtocolMisuse("item is not open for writing"),
            });
        }
        Ok(())
    }

    fn pop_level(&mut self, handle: &ItemHandle, direction: Direction) -> Result<Level> {
        self.resolve(handle, direction)?;
        self.levels
            .pop()
            .ok_or(Error::ProtocolMisuse("item is not open"))
    }

    /// The error recorded for an open item, if any.
    pub(crate) fn item_fault(&self, handle: &ItemHandle) -> Option<&Error> {
        self.poison.as_ref().or_else(|| {
            self.levels
                .get(handle.level)
                .filter(|l| l.serial == handle.serial)
                .and_then(|l| l.fault.as_ref())
        })
    }

    /// Decode the header of the item at `pos`, nested `depth` levels deep,
    /// and check that the item ends before `limit`. Top-level items carry
    /// their own byte order; nested ones use `order`.
    pub(crate) fn decode_at(
        &self,
        pos: usize,
        limit: usize,
        depth: usize,
        order: Endian,
    ) -> Result<(ItemHeader, usize, Endian)> {
        let top = depth == 0;
        let bytes = &self.data[pos..limit];
        let order = if top { sync_order(bytes)? } else { order };
        let (header, size) = header::decode(bytes, order, top, depth)?;
        let total = size as u64 + header.length;
        if total > bytes.len() as u64 {
            return Err(if top {
                Error::TruncatedInput {
                    needed: usize::try_from(total).unwrap_or(usize::MAX),
                    available: bytes.len(),
                }
            } else {
                Error::CorruptHeader(format!(
                    "item of type {} with {} bytes exceeds its enclosing item",
                    header.type_code, header.length
                ))
            });
        }
        Ok((header, size, order))
    }
}

fn sync_order(bytes: &[u8]) -> Result<Endian> {
    let sync: [u8; SYNC_SIZE] = bytes
        .get(..SYNC_SIZE)
        .and_then(|b| b.try_into().ok())
        .ok_or(Error::TruncatedInput {
            needed: SYNC_SIZE,
            available: bytes.len(),
        })?;
    header::detect_order(sync).ok_or_else(|| Error::CorruptHeader("missing sync marker".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConfig;
    use assert_matches::assert_matches;

    fn small_buffer(extended: bool) -> IoBuffer {
        IoBuffer::new(
            BufferConfig::default()
                .with_sizes(64, 4096)
                .with_extended(extended),
        )
    }

    #[test]
    fn test_promotion_to_extended_header() {
        let mut buf = small_buffer(true);
        let item = buf.put_item_begin(&ItemHeader::new(7, 0, 1)).unwrap();
        buf.put_bytes(&[0xAB; 20]).unwrap();
        let level = buf.levels.pop().unwrap();
        let header = buf.finish_write(&level, 10).unwrap();
        assert!(header.extended);
        assert_eq!(header.length, 20);
        assert_eq!(buf.len(), 20 + 20);
        let _ = item;

        let (back, size, _) = buf.decode_at(0, buf.len(), 0, Endian::Little).unwrap();
        assert_eq!(size, 20);
        assert_eq!(back, header);
        assert_eq!(&buf.as_bytes()[size..], &[0xAB; 20]);
    }

    #[test]
    fn test_too_long_without_extension() {
        let mut buf = small_buffer(false);
        buf.put_item_begin(&ItemHeader::new(7, 0, 1)).unwrap();
        buf.put_bytes(&[0; 20]).unwrap();
        let level = buf.levels.pop().unwrap();
        assert_matches!(
            buf.finish_write(&level, 10),
            Err(Error::LengthMismatch {
                declared: 10,
                actual: 20
            })
        );
    }

    #[test]
    fn test_stale_handle_is_rejected() {
        let mut buf = small_buffer(false);
        let top = buf.put_item_begin(&ItemHeader::new(1, 0, 0)).unwrap();
        let child = buf.put_item_begin(&ItemHeader::new(2, 0, 0)).unwrap();
        buf.unput_item(child).unwrap();
        let again = buf.put_item_begin(&ItemHeader::new(2, 0, 0)).unwrap();
        assert_matches!(buf.put_item_end(child), Err(Error::ProtocolMisuse(_)));
        buf.put_item_end(again).unwrap();
        buf.put_item_end(top).unwrap();
    }

    #[test]
    fn test_wrong_direction() {
        let mut buf = small_buffer(false);
        let item = buf.put_item_begin(&ItemHeader::new(1, 0, 0)).unwrap();
        assert_matches!(buf.get_item_end(item), Err(Error::ProtocolMisuse(_)));
        assert_matches!(buf.rewind_item(item), Err(Error::ProtocolMisuse(_)));
        assert_matches!(buf.get::<u8>(), Err(Error::ProtocolMisuse(_)));
    }

    #[test]
    fn test_sub_items_only_flag() {
        let mut buf = small_buffer(false);
        let top = buf.put_item_begin(&ItemHeader::new(1, 0, 0)).unwrap();
        let child = buf.put_item_begin(&ItemHeader::new(2, 0, 0)).unwrap();
        buf.put::<u32>(5).unwrap();
        let child = buf.put_item_end(child).unwrap();
        let top = buf.put_item_end(top).unwrap();
        assert!(!child.can_search);
        assert!(top.can_search);
        assert_eq!(top.length, 12 + 4);
    }

    #[test]
    fn test_truncated_top_level_block() {
        let mut buf = small_buffer(false);
        let top = buf.put_item_begin(&ItemHeader::new(1, 0, 0)).unwrap();
        buf.put::<u64>(0).unwrap();
        buf.put_item_end(top).unwrap();
        let mut bytes = buf.into_bytes();
        bytes.truncate(bytes.len() - 3);

        let mut r = IoBuffer::from_bytes(bytes, BufferConfig::default()).unwrap();
        assert_matches!(
            r.get_item_begin(None),
            Err(Error::TruncatedInput {
                needed: 24,
                available: 21
            })
        );
    }
}
