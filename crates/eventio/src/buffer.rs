use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::codec::Scalar;
use crate::config::BufferConfig;
use crate::framer::Level;
use crate::header::{self, SYNC_SIZE};
use crate::registry::TypeRegistry;
use crate::types::{Direction, Endian, Error, ItemHeader, Result};

/// A top-level block whose header has been read from the input channel but
/// whose data has not been loaded yet.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingBlock {
    pub header: ItemHeader,
    pub remaining: u64,
}

/// An owned, growable byte store with read and write cursors, the nesting
/// level stack of the items open on it, and optional input and output
/// channels.
///
/// Writes append at the end of the stored bytes; reads consume from the
/// read position. The store never grows beyond the configured maximum size.
pub struct IoBuffer {
    pub(crate) data: Vec<u8>,
    pub(crate) read_pos: usize,
    pub(crate) order: Endian,
    pub(crate) config: BufferConfig,
    pub(crate) levels: Vec<Level>,
    pub(crate) next_serial: u64,
    pub(crate) poison: Option<Error>,
    pending: Option<PendingBlock>,
    input: Option<Box<dyn Read + Send>>,
    output: Option<Box<dyn Write + Send>>,
    registry: Option<Arc<TypeRegistry>>,
}

impl fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoBuffer")
            .field("len", &self.data.len())
            .field("capacity", &self.data.capacity())
            .field("read_pos", &self.read_pos)
            .field("order", &self.order)
            .field("depth", &self.levels.len())
            .field("poison", &self.poison)
            .field("has_input", &self.input.is_some())
            .field("has_output", &self.output.is_some())
            .finish()
    }
}

impl Default for IoBuffer {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}

impl IoBuffer {
    pub fn new(config: BufferConfig) -> Self {
        let initial = config.initial_size.min(config.max_size);
        IoBuffer {
            data: Vec::with_capacity(initial),
            read_pos: 0,
            order: config.byte_order,
            config,
            levels: Vec::new(),
            next_serial: 0,
            poison: None,
            pending: None,
            input: None,
            output: None,
            registry: None,
        }
    }

    /// Create a buffer with the given initial and maximum sizes and
    /// otherwise default configuration.
    pub fn with_capacity(initial_size: usize, max_size: usize) -> Self {
        Self::new(BufferConfig::default().with_sizes(initial_size, max_size))
    }

    /// Create a buffer for reading already loaded bytes, such as a complete
    /// file or a block received from elsewhere.
    pub fn from_bytes(data: Vec<u8>, config: BufferConfig) -> Result<Self> {
        if data.len() > config.max_size {
            return Err(Error::BufferOverflow {
                requested: data.len(),
                max: config.max_size,
            });
        }
        let mut buf = Self::new(config);
        buf.data = data;
        Ok(buf)
    }

    // --- Accessors ---

    /// Number of bytes stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    pub fn write_position(&self) -> usize {
        self.data.len()
    }

    /// Number of currently open items.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Byte order of the current block.
    pub fn byte_order(&self) -> Endian {
        self.order
    }

    /// Set the byte order used for subsequently written blocks.
    /// Reading a top-level item replaces it with the order of that block.
    pub fn set_byte_order(&mut self, order: Endian) {
        self.order = order;
    }

    /// Whether items may be promoted to the extended header.
    pub fn extended(&self) -> bool {
        self.config.extended
    }

    pub fn set_extended(&mut self, extended: bool) {
        self.config.extended = extended;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// The error that poisoned the buffer, if any.
    pub fn error(&self) -> Option<&Error> {
        self.poison.as_ref()
    }

    pub fn set_registry(&mut self, registry: Arc<TypeRegistry>) {
        self.registry = Some(registry);
    }

    pub fn registry(&self) -> Option<&TypeRegistry> {
        self.registry.as_deref()
    }

    // --- Capacity and state ---

    /// Make sure the buffer can hold `total` bytes, growing geometrically.
    pub fn ensure_capacity(&mut self, total: usize) -> Result<()> {
        if total > self.config.max_size {
            return Err(Error::BufferOverflow {
                requested: total,
                max: self.config.max_size,
            });
        }
        let cap = self.data.capacity();
        if total > cap {
            let target = total.max(cap.saturating_mul(2)).min(self.config.max_size);
            self.data.reserve_exact(target - self.data.len());
        }
        Ok(())
    }

    /// Logically empty the buffer without releasing its memory. Open items
    /// are abandoned and a poisoning error is cleared. Bound channels stay.
    pub fn reset(&mut self) {
        if !self.levels.is_empty() {
            log::debug!("reset abandons {} open items", self.levels.len());
        }
        self.data.clear();
        self.read_pos = 0;
        self.levels.clear();
        self.poison = None;
        self.pending = None;
    }

    /// Move the read position back to the first stored byte so that the
    /// loaded blocks can be read again.
    pub fn rewind_to_start(&mut self) -> Result<()> {
        if !self.levels.is_empty() {
            return Err(Error::ProtocolMisuse("cannot rewind a buffer with open items"));
        }
        self.read_pos = 0;
        Ok(())
    }

    // --- Channels ---

    pub fn bind_input(&mut self, input: impl Read + Send + 'static) {
        self.input = Some(Box::new(input));
        self.pending = None;
    }

    pub fn bind_output(&mut self, output: impl Write + Send + 'static) {
        self.output = Some(Box::new(output));
    }

    pub fn take_input(&mut self) -> Option<Box<dyn Read + Send>> {
        self.pending = None;
        self.input.take()
    }

    pub fn take_output(&mut self) -> Option<Box<dyn Write + Send>> {
        self.output.take()
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Write all stored bytes to the output channel and empty the buffer.
    pub fn flush(&mut self) -> Result<()> {
        self.check_poison()?;
        if self
            .levels
            .iter()
            .any(|l| l.direction == Direction::Writing)
        {
            return Err(Error::ProtocolMisuse("cannot flush while items are being written"));
        }
        let output = self
            .output
            .as_mut()
            .ok_or(Error::ProtocolMisuse("no output channel bound"))?;
        let res = output
            .write_all(&self.data)
            .and_then(|()| output.flush());
        if let Err(err) = res {
            return Err(self.poison(err.into()));
        }
        log::debug!("flushed {} bytes", self.data.len());
        self.data.clear();
        self.read_pos = 0;
        Ok(())
    }

    /// Locate the next top-level block on the input channel and load its
    /// header, skipping over any garbage before the next sync marker.
    /// The block data stays on the channel until [`read_block`] or
    /// [`skip_block`] is called.
    ///
    /// Returns [`Error::EndOfStream`] if the input ends at a block boundary.
    ///
    /// [`read_block`]: Self::read_block
    /// [`skip_block`]: Self::skip_block
    pub fn find_block(&mut self) -> Result<ItemHeader> {
        self.check_poison()?;
        if !self.levels.is_empty() {
            return Err(Error::ProtocolMisuse("cannot load a block while items are open"));
        }
        if let Some(pending) = self.pending {
            log::debug!(
                "discarding unread block of type {}",
                pending.header.type_code
            );
            self.skip_block()?;
        }
        self.data.clear();
        self.read_pos = 0;

        let mut window = [0u8; SYNC_SIZE];
        match self.read_exact_or_eof(&mut window)? {
            0 => return Err(Error::EndOfStream),
            SYNC_SIZE => {}
            n => {
                log::warn!("{n} trailing bytes at end of input");
                return Err(Error::EndOfStream);
            }
        }
        let mut skipped = 0usize;
        let order = loop {
            if let Some(order) = header::detect_order(window) {
                break order;
            }
            let mut next = [0u8; 1];
            if self.read_exact_or_eof(&mut next)? == 0 {
                log::warn!("no sync marker in the last {} bytes of input", skipped + SYNC_SIZE);
                return Err(Error::EndOfStream);
            }
            window.rotate_left(1);
            window[SYNC_SIZE - 1] = next[0];
            skipped += 1;
        };
        if skipped > 0 {
            log::warn!("skipped {skipped} bytes of garbage before the next sync marker");
        }

        self.order = order;
        self.ensure_capacity(header::header_size(true, false))?;
        self.data.extend_from_slice(&window);
        self.read_channel(header::header_size(true, false) - SYNC_SIZE)?;
        let tw = u32::read_from(order, &self.data[SYNC_SIZE..SYNC_SIZE + 4]);
        if header::is_extended(tw) {
            self.read_channel(header::EXTENSION_SIZE)?;
        }
        let (header, size) = header::decode(&self.data, order, true, 0)?;
        log::trace!(
            "found block of type {} with {} bytes of data",
            header.type_code,
            header.length
        );
        self.pending = Some(PendingBlock {
            header,
            remaining: header.length,
        });
        if let Err(err) = self.ensure_capacity(size.saturating_add(header.length as usize)) {
            log::warn!(
                "block of type {} exceeds the maximum buffer size",
                header.type_code
            );
            return Err(err);
        }
        Ok(header)
    }

    /// Load the data of the block found by [`find_block`](Self::find_block).
    pub fn read_block(&mut self) -> Result<ItemHeader> {
        self.check_poison()?;
        let pending = self
            .pending
            .ok_or(Error::ProtocolMisuse("no block header has been found"))?;
        let remaining = usize::try_from(pending.remaining)
            .map_err(|_| Error::range(pending.remaining, "block length"))?;
        self.ensure_capacity(self.data.len().saturating_add(remaining))?;
        self.read_channel(remaining)?;
        self.pending = None;
        Ok(pending.header)
    }

    /// Discard the data of the block found by [`find_block`](Self::find_block)
    /// without loading it.
    pub fn skip_block(&mut self) -> Result<()> {
        self.check_poison()?;
        let pending = self
            .pending
            .take()
            .ok_or(Error::ProtocolMisuse("no block header has been found"))?;
        let input = self
            .input
            .as_mut()
            .ok_or(Error::ProtocolMisuse("no input channel bound"))?;
        let res = io::copy(&mut input.take(pending.remaining), &mut io::sink());
        let copied = match res {
            Ok(n) => n,
            Err(err) => return Err(self.poison(err.into())),
        };
        self.data.clear();
        self.read_pos = 0;
        if copied < pending.remaining {
            return Err(Error::TruncatedInput {
                needed: pending.remaining as usize,
                available: copied as usize,
            });
        }
        log::debug!(
            "skipped block of type {} ({} bytes)",
            pending.header.type_code,
            pending.remaining
        );
        Ok(())
    }

    /// Load the next complete top-level block from the input channel.
    pub fn fill(&mut self) -> Result<ItemHeader> {
        self.find_block()?;
        self.read_block()
    }

    // --- Internal helpers ---

    pub(crate) fn check_poison(&self) -> Result<()> {
        match &self.poison {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Record a fatal error; it is returned by every later operation until
    /// the buffer is reset.
    pub(crate) fn poison(&mut self, err: Error) -> Error {
        log::debug!("buffer poisoned: {err}");
        self.poison = Some(err.clone());
        err
    }

    /// Run a codec operation on behalf of the innermost open item. A failure
    /// is recorded on that item and every later operation on it fails with
    /// the same error.
    pub(crate) fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.check_poison()?;
        if let Some(err) = self.levels.last().and_then(|l| l.fault.clone()) {
            return Err(err);
        }
        let res = f(self);
        if let Err(err) = &res {
            if matches!(err, Error::Channel(_)) {
                self.poison = Some(err.clone());
            }
            if let Some(level) = self.levels.last_mut() {
                level.fault = Some(err.clone());
            }
        }
        res
    }

    /// Append `n` zero bytes without attributing them to the innermost item,
    /// returning the offset of the first one.
    pub(crate) fn grow(&mut self, n: usize) -> Result<usize> {
        let at = self.data.len();
        let total = at.checked_add(n).ok_or(Error::BufferOverflow {
            requested: usize::MAX,
            max: self.config.max_size,
        })?;
        self.ensure_capacity(total)?;
        self.data.resize(total, 0);
        Ok(at)
    }

    /// Append `n` bytes of raw data to the innermost item and return them
    /// for filling in.
    pub(crate) fn append_slot(&mut self, n: usize) -> Result<&mut [u8]> {
        self.check_writable()?;
        let at = self.grow(n)?;
        if n > 0 {
            if let Some(level) = self.levels.last_mut() {
                level.raw_data = true;
            }
        }
        Ok(&mut self.data[at..])
    }

    /// Consume `n` bytes at the read position.
    pub(crate) fn take(&mut self, n: usize) -> Result<&[u8]> {
        let limit = self.read_limit()?;
        let available = limit - self.read_pos;
        if n > available {
            return Err(Error::TruncatedInput {
                needed: n,
                available,
            });
        }
        let at = self.read_pos;
        self.read_pos += n;
        Ok(&self.data[at..at + n])
    }

    /// The bytes that remain readable in the innermost item.
    pub(crate) fn unread(&self) -> Result<&[u8]> {
        let limit = self.read_limit()?;
        Ok(&self.data[self.read_pos..limit])
    }

    /// End of the region readable at the current level.
    pub(crate) fn read_limit(&self) -> Result<usize> {
        match self.levels.last() {
            Some(level) if level.direction == Direction::Writing => Err(Error::ProtocolMisuse(
                "cannot read from an item opened for writing",
            )),
            Some(level) => Ok(level.end),
            None => Ok(self.data.len()),
        }
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        match self.levels.last() {
            Some(level) if level.direction == Direction::Reading => Err(Error::ProtocolMisuse(
                "cannot write to an item opened for reading",
            )),
            _ => Ok(()),
        }
    }

    /// Read exactly `n` more bytes from the input channel into the store.
    fn read_channel(&mut self, n: usize) -> Result<()> {
        let at = self.data.len();
        self.ensure_capacity(at.saturating_add(n))?;
        self.data.resize(at + n, 0);
        let mut chunk = std::mem::take(&mut self.data);
        let res = self.read_exact_or_eof(&mut chunk[at..]);
        self.data = chunk;
        match res? {
            got if got == n => Ok(()),
            got => {
                self.data.truncate(at + got);
                Err(Error::TruncatedInput {
                    needed: n,
                    available: got,
                })
            }
        }
    }

    /// Fill `out` from the input channel, returning fewer bytes only at the
    /// end of input.
    fn read_exact_or_eof(&mut self, out: &mut [u8]) -> Result<usize> {
        let input = self
            .input
            .as_mut()
            .ok_or(Error::ProtocolMisuse("no input channel bound"))?;
        let mut filled = 0;
        while filled < out.len() {
            match input.read(&mut out[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(self.poison(err.into())),
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_growth_is_capped() {
        let mut buf = IoBuffer::with_capacity(8, 100);
        assert!(buf.capacity() >= 8);
        buf.ensure_capacity(20).unwrap();
        assert!(buf.capacity() >= 20);
        assert!(buf.capacity() <= 100);
        buf.ensure_capacity(100).unwrap();
        assert_matches!(
            buf.ensure_capacity(101),
            Err(Error::BufferOverflow {
                requested: 101,
                max: 100
            })
        );
    }

    #[test]
    fn test_reset_keeps_memory() {
        let mut buf = IoBuffer::with_capacity(16, 1024);
        buf.put_bytes(&[1; 200]).unwrap();
        let cap = buf.capacity();
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.read_position(), 0);
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn test_from_bytes_respects_max_size() {
        let cfg = BufferConfig::default().with_sizes(4, 4);
        assert_matches!(
            IoBuffer::from_bytes(vec![0; 5], cfg),
            Err(Error::BufferOverflow { .. })
        );
    }

    #[test]
    fn test_flush_without_output() {
        let mut buf = IoBuffer::default();
        assert_matches!(buf.flush(), Err(Error::ProtocolMisuse(_)));
    }

    #[test]
    fn test_find_block_needs_input() {
        let mut buf = IoBuffer::default();
        assert_matches!(buf.find_block(), Err(Error::ProtocolMisuse(_)));
    }

    #[test]
    fn test_empty_input_is_end_of_stream() {
        let mut buf = IoBuffer::default();
        buf.bind_input(io::empty());
        assert_matches!(buf.find_block(), Err(Error::EndOfStream));
    }

    #[test]
    fn test_garbage_only_input_is_end_of_stream() {
        let mut buf = IoBuffer::default();
        buf.bind_input(io::Cursor::new(vec![0x55u8; 37]));
        assert_matches!(buf.find_block(), Err(Error::EndOfStream));
    }

    #[test]
    fn test_block_header_respects_max_size() {
        let mut block = IoBuffer::default();
        let item = block.put_item_begin(&ItemHeader::new(5, 0, 0)).unwrap();
        block.put_item_end(item).unwrap();

        let mut buf = IoBuffer::with_capacity(8, 12);
        buf.bind_input(io::Cursor::new(block.into_bytes()));
        assert_matches!(
            buf.find_block(),
            Err(Error::BufferOverflow {
                requested: 16,
                max: 12
            })
        );
        assert!(buf.len() <= 12);
        assert!(buf.capacity() <= 12);
    }

    #[test]
    fn test_channel_error_poisons() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "device gone"))
            }
        }

        let mut buf = IoBuffer::default();
        buf.bind_input(Failing);
        assert_matches!(buf.find_block(), Err(Error::Channel(_)));
        assert_matches!(buf.put::<u8>(1), Err(Error::Channel(_)));
        buf.reset();
        buf.put::<u8>(1).unwrap();
    }
}
