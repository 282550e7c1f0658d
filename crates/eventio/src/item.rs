//! Scoped item handles.
//!
//! An [`Item`] borrows its buffer (or its parent item) mutably, so items
//! can only be finished in LIFO order and never outlive their buffer. An
//! item that goes out of scope without [`Item::end`] is ended on drop.
//!
//! The error policy decides how failures of data operations reach the
//! caller. With [`Raise`] every operation returns a [`Result`]. With
//! [`Sticky`] operations return plain values, zero or empty once the item
//! is in error, and the error is observed through [`Item::status`] or the
//! [`Closed`] value returned by [`Item::end`].

use std::fmt;
use std::marker::PhantomData;

use crate::buffer::IoBuffer;
use crate::codec::{LengthPrefix, Scalar};
use crate::framer::ItemHandle;
use crate::types::{Direction, Error, ItemHeader, Result, Status};

/// How an item reports the outcome of its operations.
pub trait ErrorPolicy {
    type Out<T>;

    fn deliver<T: Default>(res: Result<T>) -> Self::Out<T>;
}

/// Operations return `Result<T>`.
#[derive(Debug)]
pub enum Raise {}

impl ErrorPolicy for Raise {
    type Out<T> = Result<T>;

    fn deliver<T: Default>(res: Result<T>) -> Result<T> {
        res
    }
}

/// Operations return `T`; errors are kept on the item.
#[derive(Debug)]
pub enum Sticky {}

impl ErrorPolicy for Sticky {
    type Out<T> = T;

    fn deliver<T: Default>(res: Result<T>) -> T {
        res.unwrap_or_default()
    }
}

pub type RaisingItem<'b> = Item<'b, Raise>;
pub type StatusItem<'b> = Item<'b, Sticky>;

/// Outcome of ending an item.
#[derive(Debug, Clone)]
pub enum Closed {
    /// The item was finished; for written items the header carries the
    /// final length.
    Clean(ItemHeader),
    /// The item ran into an error. Written items are removed from the
    /// buffer; read items are skipped.
    AfterError(Error),
}

impl Closed {
    pub fn is_clean(&self) -> bool {
        matches!(self, Closed::Clean(_))
    }

    /// Final status of the item: [`Status::Done`] or the error it ended with.
    pub fn status(&self) -> Status {
        match self {
            Closed::Clean(_) => Status::Done,
            Closed::AfterError(err) => Status::Error(err.kind()),
        }
    }

    pub fn into_result(self) -> Result<ItemHeader> {
        match self {
            Closed::Clean(header) => Ok(header),
            Closed::AfterError(err) => Err(err),
        }
    }
}

/// An open item on an [`IoBuffer`].
pub struct Item<'b, P: ErrorPolicy = Raise> {
    buf: &'b mut IoBuffer,
    handle: ItemHandle,
    open: bool,
    policy: PhantomData<P>,
}

impl<P: ErrorPolicy> fmt::Debug for Item<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("header", self.handle.header())
            .field("direction", &self.handle.direction())
            .field("open", &self.open)
            .finish()
    }
}

macro_rules! forward {
    ($($(#[$meta:meta])* fn $name:ident(&mut self $(, $arg:ident: $ty:ty)*) -> $ret:ty;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self $(, $arg: $ty)*) -> P::Out<$ret> {
                P::deliver(self.buf.$name($($arg),*))
            }
        )*
    };
}

impl<'b, P: ErrorPolicy> Item<'b, P> {
    /// Start writing an item on `buf`.
    pub fn write(buf: &'b mut IoBuffer, header: &ItemHeader) -> Result<Self> {
        let handle = buf.put_item_begin(header)?;
        Ok(Self::wrap(buf, handle))
    }

    /// Open the next item on `buf` for reading.
    pub fn read(buf: &'b mut IoBuffer, expected: Option<u32>) -> Result<Self> {
        Self::read_versioned(buf, expected, None)
    }

    /// Open the next item on `buf` for reading, warning if it is newer than
    /// `max_version`.
    pub fn read_versioned(
        buf: &'b mut IoBuffer,
        expected: Option<u32>,
        max_version: Option<u16>,
    ) -> Result<Self> {
        let handle = buf.get_item_begin_versioned(expected, max_version)?;
        Ok(Self::wrap(buf, handle))
    }

    fn wrap(buf: &'b mut IoBuffer, handle: ItemHandle) -> Self {
        Item {
            buf,
            handle,
            open: true,
            policy: PhantomData,
        }
    }

    /// Start writing a sub-item. The parent cannot be used until the
    /// sub-item is ended.
    pub fn write_sub(&mut self, header: &ItemHeader) -> Result<Item<'_, P>> {
        Item::write(&mut *self.buf, header)
    }

    /// Open the next sub-item for reading.
    pub fn read_sub(&mut self, expected: Option<u32>) -> Result<Item<'_, P>> {
        Item::read(&mut *self.buf, expected)
    }

    pub fn read_sub_versioned(
        &mut self,
        expected: Option<u32>,
        max_version: Option<u16>,
    ) -> Result<Item<'_, P>> {
        Item::read_versioned(&mut *self.buf, expected, max_version)
    }

    pub fn header(&self) -> &ItemHeader {
        self.handle.header()
    }

    pub fn handle(&self) -> ItemHandle {
        self.handle
    }

    pub fn direction(&self) -> Direction {
        self.handle.direction()
    }

    pub fn buffer(&self) -> &IoBuffer {
        &*self.buf
    }

    pub fn status(&self) -> Status {
        match self.buf.item_fault(&self.handle) {
            Some(err) => Status::Error(err.kind()),
            None => Status::Active,
        }
    }

    /// The error this item ran into, if any.
    pub fn error(&self) -> Option<&Error> {
        self.buf.item_fault(&self.handle)
    }

    /// Finish the item.
    pub fn end(mut self) -> Closed {
        self.open = false;
        match self.buf.end_item(self.handle) {
            Ok(header) => Closed::Clean(header),
            Err(err) => Closed::AfterError(err),
        }
    }

    /// Abandon an item being read, leaving the read position at its header.
    pub fn unget(mut self) -> Result<()> {
        let res = self.buf.unget_item(self.handle);
        self.open = res.is_err();
        res
    }

    /// Abandon an item being written, removing everything written so far.
    pub fn unput(mut self) -> Result<()> {
        let res = self.buf.unput_item(self.handle);
        self.open = res.is_err();
        res
    }

    // --- Navigation ---

    pub fn rewind(&mut self) -> P::Out<()> {
        P::deliver(self.buf.rewind_item(self.handle))
    }

    /// Discard the rest of the item's data.
    pub fn skip_rest(&mut self) -> P::Out<()> {
        P::deliver(self.buf.skip_item(self.handle))
    }

    pub fn skip_sub(&mut self) -> P::Out<ItemHeader> {
        P::deliver(self.buf.skip_sub_item(self.handle))
    }

    /// Position at the next sub-item of type `type_code`, see
    /// [`IoBuffer::search_sub_item`].
    pub fn search(&mut self, type_code: u32) -> P::Out<bool> {
        P::deliver(self.buf.search_sub_item(self.handle, type_code))
    }

    pub fn peek_sub(&self) -> P::Out<Option<ItemHeader>> {
        P::deliver(self.buf.peek_sub_item())
    }

    pub fn next_sub_type(&self) -> P::Out<Option<u32>> {
        P::deliver(self.buf.next_sub_item_type())
    }

    pub fn next_sub_length(&self) -> P::Out<Option<u64>> {
        P::deliver(self.buf.next_sub_item_length())
    }

    pub fn next_sub_ident(&self) -> P::Out<Option<i32>> {
        P::deliver(self.buf.next_sub_item_ident())
    }

    /// Embed a complete top-level block as a sub-item.
    pub fn append_block(&mut self, block: &[u8]) -> P::Out<ItemHeader> {
        P::deliver(self.buf.append_block_as_item(block))
    }

    /// Copy this item into `target` as a new top-level block.
    pub fn copy_to_block(&self, target: &mut IoBuffer) -> Result<ItemHeader> {
        self.buf.copy_item_to_block(&self.handle, target)
    }

    // --- Data ---

    pub fn put<T: Scalar>(&mut self, v: T) -> P::Out<()> {
        P::deliver(self.buf.put(v))
    }

    pub fn put_slice<T: Scalar>(&mut self, values: &[T]) -> P::Out<()> {
        P::deliver(self.buf.put_slice(values))
    }

    /// See [`IoBuffer::put_checked`].
    pub fn put_checked<T, V>(&mut self, v: V) -> P::Out<()>
    where
        T: Scalar + TryFrom<V>,
        V: Copy + fmt::Display,
    {
        P::deliver(self.buf.put_checked::<T, V>(v))
    }

    pub fn get<T: Scalar>(&mut self) -> P::Out<T> {
        P::deliver(self.buf.get::<T>())
    }

    pub fn get_into<T: Scalar>(&mut self, out: &mut [T]) -> P::Out<()> {
        P::deliver(self.buf.get_into(out))
    }

    pub fn get_vec<T: Scalar>(&mut self, n: usize) -> P::Out<Vec<T>> {
        P::deliver(self.buf.get_vec::<T>(n))
    }

    pub fn put_counts<T: Copy + Into<u64>>(&mut self, values: &[T]) -> P::Out<()> {
        P::deliver(self.buf.put_counts(values))
    }

    pub fn put_scounts<T: Copy + Into<i64>>(&mut self, values: &[T]) -> P::Out<()> {
        P::deliver(self.buf.put_scounts(values))
    }

    pub fn put_diff_scounts<T: Copy + Into<i64>>(&mut self, values: &[T]) -> P::Out<()> {
        P::deliver(self.buf.put_diff_scounts(values))
    }

    forward! {
        fn put_bytes(&mut self, bytes: &[u8]) -> ();
        fn get_bytes(&mut self, n: usize) -> Vec<u8>;
        fn put_bool(&mut self, flag: bool) -> ();
        fn get_bool(&mut self) -> bool;
        /// Booleans packed eight to a byte.
        fn put_bools(&mut self, flags: &[bool]) -> ();
        fn get_bools(&mut self, n: usize) -> Vec<bool>;
        fn put_count(&mut self, v: u64) -> ();
        fn put_count16(&mut self, v: u16) -> ();
        fn put_count32(&mut self, v: u32) -> ();
        fn get_count(&mut self) -> u64;
        fn get_count16(&mut self) -> u16;
        fn get_count32(&mut self) -> u32;
        fn get_counts(&mut self, n: usize) -> Vec<u64>;
        fn put_scount(&mut self, v: i64) -> ();
        fn put_scount16(&mut self, v: i16) -> ();
        fn put_scount32(&mut self, v: i32) -> ();
        fn get_scount(&mut self) -> i64;
        fn get_scount16(&mut self) -> i16;
        fn get_scount32(&mut self) -> i32;
        fn get_scounts(&mut self, n: usize) -> Vec<i64>;
        fn get_diff_scounts(&mut self, n: usize) -> Vec<i64>;
        fn put_sfloat(&mut self, v: f32) -> ();
        fn put_sfloats(&mut self, values: &[f32]) -> ();
        fn get_sfloat(&mut self) -> f32;
        fn get_sfloats(&mut self, n: usize) -> Vec<f32>;
        fn put_prefixed(&mut self, prefix: LengthPrefix, bytes: &[u8]) -> ();
        fn get_prefixed(&mut self, prefix: LengthPrefix) -> Vec<u8>;
        /// Bounded string copy, see [`IoBuffer::get_prefixed_into`].
        fn get_prefixed_into(&mut self, prefix: LengthPrefix, out: &mut [u8]) -> usize;
        fn put_string(&mut self, s: &str) -> ();
        fn put_long_string(&mut self, s: &str) -> ();
        fn put_var_string(&mut self, s: &str) -> ();
        fn get_string(&mut self) -> String;
        fn get_long_string(&mut self) -> String;
        fn get_var_string(&mut self) -> String;
    }
}

impl<P: ErrorPolicy> Drop for Item<'_, P> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        log::warn!(
            "item of type {} dropped without end",
            self.handle.header().type_code
        );
        if let Err(err) = self.buf.end_item(self.handle) {
            log::warn!(
                "item of type {} ended with error: {err}",
                self.handle.header().type_code
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConfig;
    use crate::types::ErrorKind;
    use assert_matches::assert_matches;

    #[test]
    fn test_sticky_item_returns_defaults_after_error() {
        let mut buf = IoBuffer::default();
        {
            let mut item = RaisingItem::write(&mut buf, &ItemHeader::new(10, 0, 0)).unwrap();
            item.put(7u16).unwrap();
            item.end().into_result().unwrap();
        }
        let mut r = IoBuffer::from_bytes(buf.into_bytes(), BufferConfig::default()).unwrap();
        let mut item = StatusItem::read(&mut r, Some(10)).unwrap();
        assert_eq!(item.get::<u16>(), 7);
        assert_eq!(item.status(), Status::Active);
        assert_eq!(item.get::<u32>(), 0);
        assert_eq!(item.status(), Status::Error(ErrorKind::TruncatedInput));
        // Further reads fail with the same error even if they would fit.
        assert_eq!(item.get_bytes(0), Vec::<u8>::new());
        let closed = item.end();
        assert_eq!(closed.status(), Status::Error(ErrorKind::TruncatedInput));
        assert_matches!(closed, Closed::AfterError(Error::TruncatedInput { .. }));
    }

    #[test]
    fn test_clean_end_is_done() {
        let mut buf = IoBuffer::default();
        let mut item = StatusItem::write(&mut buf, &ItemHeader::new(10, 0, 0)).unwrap();
        item.put(3u8);
        assert_eq!(item.status(), Status::Active);
        let closed = item.end();
        assert_eq!(closed.status(), Status::Done);
        assert_eq!(closed.into_result().unwrap().length, 1);
    }

    #[test]
    fn test_raising_item_propagates() {
        let mut buf = IoBuffer::default();
        let mut item = RaisingItem::write(&mut buf, &ItemHeader::new(10, 0, 0)).unwrap();
        assert_matches!(
            item.put_checked::<u16, _>(70000u32),
            Err(Error::RangeError { .. })
        );
        assert_matches!(item.put(1u8), Err(Error::RangeError { .. }));
        assert!(!item.end().is_clean());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drop_ends_item() {
        let mut buf = IoBuffer::default();
        {
            let mut item = RaisingItem::write(&mut buf, &ItemHeader::new(10, 0, 0)).unwrap();
            let mut sub = item.write_sub(&ItemHeader::new(11, 0, 0)).unwrap();
            sub.put(1i32).unwrap();
        }
        assert_eq!(buf.depth(), 0);
        assert_eq!(buf.len(), 16 + 12 + 4);
    }

    #[test]
    fn test_unget_restores_position() {
        let mut buf = IoBuffer::default();
        {
            let mut item = RaisingItem::write(&mut buf, &ItemHeader::new(10, 0, 5)).unwrap();
            item.put(1u8).unwrap();
            item.end().into_result().unwrap();
        }
        let mut r = IoBuffer::from_bytes(buf.into_bytes(), BufferConfig::default()).unwrap();
        let item = RaisingItem::read(&mut r, None).unwrap();
        assert_eq!(item.header().ident, 5);
        item.unget().unwrap();
        assert_eq!(r.read_position(), 0);
        assert_eq!(r.depth(), 0);
        let again = RaisingItem::read(&mut r, Some(10)).unwrap();
        assert_eq!(again.end().into_result().unwrap().length, 1);
    }

    #[test]
    fn test_unget_on_written_item_fails() {
        let mut buf = IoBuffer::default();
        let item = RaisingItem::write(&mut buf, &ItemHeader::new(10, 0, 0)).unwrap();
        assert_matches!(item.unget(), Err(Error::ProtocolMisuse(_)));
        // The failed unget left the item to be ended on drop.
        assert_eq!(buf.depth(), 0);
        assert_eq!(buf.len(), 16);
    }
}
