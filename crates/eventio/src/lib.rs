//! Reader and writer for the eventio container format.
//!
//! Eventio data is a sequence of self-describing, nested items. Each item
//! starts with a header carrying its type, version, ident and the length of
//! its data; the data may consist of scalar values, further items, or both.
//! Items can be skipped by length without understanding their contents.
//!
//! # Item header
//!
//! | Offset | Size | Field                                                     |
//! |--------|------|-----------------------------------------------------------|
//! | 0      | 4    | Sync marker `0xD41F8A37` (top-level blocks only)          |
//! | 4      | 4    | Type (16 bits), user flag, extended flag, version (12 bits) |
//! | 8      | 4    | Ident                                                     |
//! | 12     | 4    | Length (30 bits), sub-items-only flag                     |
//! | 16     | 4    | Extended length bits (only with the extended flag)        |
//!
//! The byte order of a block is detected from its sync marker.
//!
//! # Usage
//!
//! ```
//! use eventio::{BufferConfig, IoBuffer, ItemHeader, RaisingItem};
//!
//! let mut buf = IoBuffer::new(BufferConfig::default());
//! let mut item = RaisingItem::write(&mut buf, &ItemHeader::new(99, 0, 123))?;
//! item.put(0x01020304i32)?;
//! item.put_string("hello")?;
//! item.end().into_result()?;
//!
//! let mut input = IoBuffer::from_bytes(buf.into_bytes(), BufferConfig::default())?;
//! let mut item = RaisingItem::read(&mut input, Some(99))?;
//! assert_eq!(item.get::<i32>()?, 0x01020304);
//! assert_eq!(item.get_string()?, "hello");
//! item.end().into_result()?;
//! # Ok::<(), eventio::Error>(())
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
mod framer;
pub mod header;
pub mod item;
mod list;
pub mod registry;
pub mod sfloat;
pub mod types;
pub mod varint;

pub use buffer::IoBuffer;
pub use codec::{LengthPrefix, Scalar};
pub use config::BufferConfig;
pub use framer::{ItemHandle, MAX_LEVEL};
pub use item::{Closed, ErrorPolicy, Item, Raise, RaisingItem, StatusItem, Sticky};
pub use registry::TypeRegistry;
pub use types::{Direction, Endian, Error, ErrorKind, ItemHeader, Result, Status};
