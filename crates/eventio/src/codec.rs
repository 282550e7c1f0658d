//! Scalar codec: fixed-width values, vectors, variable-length integers,
//! 16-bit floats, packed booleans and strings.
//!
//! All operations act at the buffer's cursors: puts append at the write
//! position, gets consume from the read position and are bounded by the
//! innermost open item. A failing operation puts the innermost item into an
//! error state; every later operation on that item fails with the same error.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::buffer::IoBuffer;
use crate::sfloat;
use crate::types::{Endian, Error, Result};
use crate::varint::{self, MAX_COUNT_LEN};

/// A fixed-width value that is stored in the block's byte order.
pub trait Scalar: Copy + Default + PartialEq + fmt::Debug {
    const WIDTH: usize;

    fn write_to(self, order: Endian, out: &mut [u8]);
    fn read_from(order: Endian, bytes: &[u8]) -> Self;
}

impl Scalar for u8 {
    const WIDTH: usize = 1;

    fn write_to(self, _order: Endian, out: &mut [u8]) {
        out[0] = self;
    }

    fn read_from(_order: Endian, bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl Scalar for i8 {
    const WIDTH: usize = 1;

    fn write_to(self, _order: Endian, out: &mut [u8]) {
        out[0] = self as u8;
    }

    fn read_from(_order: Endian, bytes: &[u8]) -> Self {
        bytes[0] as i8
    }
}

macro_rules! impl_scalar {
    ($($t:ty => $width:expr, $read:ident, $write:ident;)*) => {
        $(
            impl Scalar for $t {
                const WIDTH: usize = $width;

                #[inline]
                fn write_to(self, order: Endian, out: &mut [u8]) {
                    match order {
                        Endian::Little => LittleEndian::$write(out, self),
                        Endian::Big => BigEndian::$write(out, self),
                    }
                }

                #[inline]
                fn read_from(order: Endian, bytes: &[u8]) -> Self {
                    match order {
                        Endian::Little => LittleEndian::$read(bytes),
                        Endian::Big => BigEndian::$read(bytes),
                    }
                }
            }
        )*
    };
}

impl_scalar! {
    u16 => 2, read_u16, write_u16;
    i16 => 2, read_i16, write_i16;
    u32 => 4, read_u32, write_u32;
    i32 => 4, read_i32, write_i32;
    u64 => 8, read_u64, write_u64;
    i64 => 8, read_i64, write_i64;
    f32 => 4, read_f32, write_f32;
    f64 => 8, read_f64, write_f64;
}

/// How the length of a string is stored in front of its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthPrefix {
    /// Unsigned 16-bit length.
    U16,
    /// Signed 32-bit length.
    I32,
    /// Variable-length count.
    Count,
}

impl IoBuffer {
    // --- Fixed-width values ---

    /// Put a single fixed-width value.
    pub fn put<T: Scalar>(&mut self, v: T) -> Result<()> {
        self.put_slice(std::slice::from_ref(&v))
    }

    /// Put a sequence of fixed-width values.
    pub fn put_slice<T: Scalar>(&mut self, values: &[T]) -> Result<()> {
        self.guarded(|buf| {
            let order = buf.order;
            let out = buf.append_slot(values.len() * T::WIDTH)?;
            for (chunk, v) in out.chunks_exact_mut(T::WIDTH).zip(values) {
                v.write_to(order, chunk);
            }
            Ok(())
        })
    }

    /// Put a value into a narrower fixed-width field, failing instead of
    /// truncating when it does not fit. Nothing is written on failure.
    pub fn put_checked<T, V>(&mut self, v: V) -> Result<()>
    where
        T: Scalar + TryFrom<V>,
        V: Copy + fmt::Display,
    {
        self.guarded(|buf| {
            let narrow = T::try_from(v).map_err(|_| Error::range(v, std::any::type_name::<T>()))?;
            let order = buf.order;
            narrow.write_to(order, buf.append_slot(T::WIDTH)?);
            Ok(())
        })
    }

    /// Get a single fixed-width value.
    pub fn get<T: Scalar>(&mut self) -> Result<T> {
        self.guarded(|buf| {
            let order = buf.order;
            Ok(T::read_from(order, buf.take(T::WIDTH)?))
        })
    }

    /// Fill `out` with fixed-width values.
    pub fn get_into<T: Scalar>(&mut self, out: &mut [T]) -> Result<()> {
        self.guarded(|buf| {
            let order = buf.order;
            let bytes = buf.take(out.len() * T::WIDTH)?;
            for (v, chunk) in out.iter_mut().zip(bytes.chunks_exact(T::WIDTH)) {
                *v = T::read_from(order, chunk);
            }
            Ok(())
        })
    }

    /// Get `n` fixed-width values.
    pub fn get_vec<T: Scalar>(&mut self, n: usize) -> Result<Vec<T>> {
        self.guarded(|buf| {
            let order = buf.order;
            let available = buf.unread()?.len();
            let needed = n.checked_mul(T::WIDTH).ok_or(Error::TruncatedInput {
                needed: usize::MAX,
                available,
            })?;
            let bytes = buf.take(needed)?;
            Ok(bytes
                .chunks_exact(T::WIDTH)
                .map(|chunk| T::read_from(order, chunk))
                .collect())
        })
    }

    // --- Raw bytes ---

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.guarded(|buf| {
            buf.append_slot(bytes.len())?.copy_from_slice(bytes);
            Ok(())
        })
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.guarded(|buf| Ok(buf.take(n)?.to_vec()))
    }

    // --- Booleans ---

    /// Put a single boolean as one byte.
    pub fn put_bool(&mut self, flag: bool) -> Result<()> {
        self.put(u8::from(flag))
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get::<u8>()? != 0)
    }

    /// Put a vector of booleans packed eight to a byte, first element in
    /// the least significant bit. This is not the same as putting each
    /// boolean on its own.
    pub fn put_bools(&mut self, flags: &[bool]) -> Result<()> {
        let mut packed = vec![0u8; flags.len().div_ceil(8)];
        for (i, &flag) in flags.iter().enumerate() {
            if flag {
                packed[i / 8] |= 1 << (i % 8);
            }
        }
        self.put_bytes(&packed)
    }

    /// Get `n` booleans stored with [`put_bools`](Self::put_bools).
    pub fn get_bools(&mut self, n: usize) -> Result<Vec<bool>> {
        let packed = self.get_bytes(n.div_ceil(8))?;
        Ok((0..n).map(|i| packed[i / 8] & (1 << (i % 8)) != 0).collect())
    }

    // --- Variable-length integers ---

    /// Put an unsigned variable-length integer.
    pub fn put_count(&mut self, v: u64) -> Result<()> {
        let mut scratch = [0u8; MAX_COUNT_LEN];
        let n = varint::encode_count(v, &mut scratch);
        self.put_bytes(&scratch[..n])
    }

    /// Put a count whose value is known to fit 16 bits.
    pub fn put_count16(&mut self, v: u16) -> Result<()> {
        self.put_count(v.into())
    }

    /// Put a count whose value is known to fit 32 bits.
    pub fn put_count32(&mut self, v: u32) -> Result<()> {
        self.put_count(v.into())
    }

    pub fn get_count(&mut self) -> Result<u64> {
        self.guarded(|buf| {
            let (v, n) = varint::decode_count(buf.unread()?)?;
            buf.take(n)?;
            Ok(v)
        })
    }

    pub fn get_count16(&mut self) -> Result<u16> {
        self.get_narrow_count("count16")
    }

    pub fn get_count32(&mut self) -> Result<u32> {
        self.get_narrow_count("count32")
    }

    fn get_narrow_count<T: TryFrom<u64>>(&mut self, target: &'static str) -> Result<T> {
        self.guarded(|buf| {
            let (v, n) = varint::decode_count(buf.unread()?)?;
            let narrow = T::try_from(v).map_err(|_| Error::range(v, target))?;
            buf.take(n)?;
            Ok(narrow)
        })
    }

    /// Put a sequence of counts.
    pub fn put_counts<T: Copy + Into<u64>>(&mut self, values: &[T]) -> Result<()> {
        values.iter().try_for_each(|&v| self.put_count(v.into()))
    }

    pub fn get_counts(&mut self, n: usize) -> Result<Vec<u64>> {
        (0..n).map(|_| self.get_count()).collect()
    }

    /// Put a signed variable-length integer.
    pub fn put_scount(&mut self, v: i64) -> Result<()> {
        self.put_count(varint::zigzag_encode_i64(v))
    }

    pub fn put_scount16(&mut self, v: i16) -> Result<()> {
        self.put_scount(v.into())
    }

    pub fn put_scount32(&mut self, v: i32) -> Result<()> {
        self.put_scount(v.into())
    }

    pub fn get_scount(&mut self) -> Result<i64> {
        Ok(varint::zigzag_decode_i64(self.get_count()?))
    }

    pub fn get_scount16(&mut self) -> Result<i16> {
        self.get_narrow_scount("scount16")
    }

    pub fn get_scount32(&mut self) -> Result<i32> {
        self.get_narrow_scount("scount32")
    }

    fn get_narrow_scount<T: TryFrom<i64>>(&mut self, target: &'static str) -> Result<T> {
        self.guarded(|buf| {
            let (u, n) = varint::decode_count(buf.unread()?)?;
            let v = varint::zigzag_decode_i64(u);
            let narrow = T::try_from(v).map_err(|_| Error::range(v, target))?;
            buf.take(n)?;
            Ok(narrow)
        })
    }

    pub fn put_scounts<T: Copy + Into<i64>>(&mut self, values: &[T]) -> Result<()> {
        values.iter().try_for_each(|&v| self.put_scount(v.into()))
    }

    pub fn get_scounts(&mut self, n: usize) -> Result<Vec<i64>> {
        (0..n).map(|_| self.get_scount()).collect()
    }

    /// Put a slowly varying sequence as signed differences to the
    /// previous element (the first one relative to zero).
    pub fn put_diff_scounts<T: Copy + Into<i64>>(&mut self, values: &[T]) -> Result<()> {
        let mut prev = 0i64;
        for &v in values {
            let v = v.into();
            self.put_scount(v.wrapping_sub(prev))?;
            prev = v;
        }
        Ok(())
    }

    pub fn get_diff_scounts(&mut self, n: usize) -> Result<Vec<i64>> {
        let mut prev = 0i64;
        (0..n)
            .map(|_| {
                prev = prev.wrapping_add(self.get_scount()?);
                Ok(prev)
            })
            .collect()
    }

    // --- 16-bit floats ---

    pub fn put_sfloat(&mut self, v: f32) -> Result<()> {
        self.put(sfloat::f32_to_sfloat(v))
    }

    pub fn put_sfloats(&mut self, values: &[f32]) -> Result<()> {
        let bits: Vec<u16> = values.iter().map(|&v| sfloat::f32_to_sfloat(v)).collect();
        self.put_slice(&bits)
    }

    pub fn get_sfloat(&mut self) -> Result<f32> {
        Ok(sfloat::sfloat_to_f32(self.get::<u16>()?))
    }

    pub fn get_sfloats(&mut self, n: usize) -> Result<Vec<f32>> {
        Ok(self
            .get_vec::<u16>(n)?
            .into_iter()
            .map(sfloat::sfloat_to_f32)
            .collect())
    }

    // --- Strings ---

    /// Put a length-prefixed byte string. If the length does not fit the
    /// prefix, nothing is written.
    pub fn put_prefixed(&mut self, prefix: LengthPrefix, bytes: &[u8]) -> Result<()> {
        let len = bytes.len();
        match prefix {
            LengthPrefix::U16 => self.put_checked::<u16, _>(len)?,
            LengthPrefix::I32 => self.put_checked::<i32, _>(len)?,
            LengthPrefix::Count => self.put_count(len as u64)?,
        }
        self.put_bytes(bytes)
    }

    /// Get a length-prefixed byte string.
    pub fn get_prefixed(&mut self, prefix: LengthPrefix) -> Result<Vec<u8>> {
        let len = self.get_prefix_len(prefix)?;
        self.get_bytes(len)
    }

    /// Get a length-prefixed byte string into `out`. At most `out.len()`
    /// bytes are copied; the rest of the string is consumed and discarded.
    /// Returns the number of bytes copied.
    pub fn get_prefixed_into(&mut self, prefix: LengthPrefix, out: &mut [u8]) -> Result<usize> {
        let len = self.get_prefix_len(prefix)?;
        self.guarded(|buf| {
            let bytes = buf.take(len)?;
            let n = len.min(out.len());
            out[..n].copy_from_slice(&bytes[..n]);
            if n < len {
                log::debug!("string of {len} bytes truncated to {n}");
            }
            Ok(n)
        })
    }

    fn get_prefix_len(&mut self, prefix: LengthPrefix) -> Result<usize> {
        match prefix {
            LengthPrefix::U16 => Ok(self.get::<u16>()? as usize),
            LengthPrefix::I32 => {
                let len = self.get::<i32>()?;
                self.guarded(|_| usize::try_from(len).map_err(|_| Error::range(len, "string length")))
            }
            LengthPrefix::Count => {
                let len = self.get_count()?;
                self.guarded(|_| usize::try_from(len).map_err(|_| Error::range(len, "string length")))
            }
        }
    }

    /// Put a string with a 16-bit length.
    pub fn put_string(&mut self, s: &str) -> Result<()> {
        self.put_prefixed(LengthPrefix::U16, s.as_bytes())
    }

    /// Put a string with a 32-bit length.
    pub fn put_long_string(&mut self, s: &str) -> Result<()> {
        self.put_prefixed(LengthPrefix::I32, s.as_bytes())
    }

    /// Put a string with a variable-length count as length.
    pub fn put_var_string(&mut self, s: &str) -> Result<()> {
        self.put_prefixed(LengthPrefix::Count, s.as_bytes())
    }

    /// Get a string with a 16-bit length. Invalid UTF-8 is replaced.
    pub fn get_string(&mut self) -> Result<String> {
        self.get_lossy(LengthPrefix::U16)
    }

    pub fn get_long_string(&mut self) -> Result<String> {
        self.get_lossy(LengthPrefix::I32)
    }

    pub fn get_var_string(&mut self) -> Result<String> {
        self.get_lossy(LengthPrefix::Count)
    }

    fn get_lossy(&mut self, prefix: LengthPrefix) -> Result<String> {
        let bytes = self.get_prefixed(prefix)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
