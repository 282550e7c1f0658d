use serde::{Deserialize, Serialize};

use crate::types::Endian;

/// Default initial allocation of a buffer.
pub const DEFAULT_INITIAL_SIZE: usize = 32 * 1024;
/// Default hard ceiling of a buffer.
pub const DEFAULT_MAX_SIZE: usize = 32 * 1024 * 1024;

/// Configuration of an [`IoBuffer`](crate::IoBuffer).
///
/// All fields have defaults, so a partial JSON document such as
/// `{"max_size": 1048576}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Number of bytes allocated up front.
    pub initial_size: usize,
    /// Writes that would grow the buffer beyond this size fail.
    pub max_size: usize,
    /// Byte order used for new top-level blocks.
    pub byte_order: Endian,
    /// Allow items to be promoted to the extended header when their
    /// length does not fit into the normal length field.
    pub extended: bool,
    /// Write each finished top-level block to the bound output channel.
    pub auto_flush: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_INITIAL_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            byte_order: Endian::Little,
            extended: false,
            auto_flush: true,
        }
    }
}

impl BufferConfig {
    pub fn with_sizes(self, initial_size: usize, max_size: usize) -> Self {
        Self {
            initial_size,
            max_size,
            ..self
        }
    }

    pub fn with_byte_order(self, byte_order: Endian) -> Self {
        Self { byte_order, ..self }
    }

    pub fn with_extended(self, extended: bool) -> Self {
        Self { extended, ..self }
    }

    pub fn with_auto_flush(self, auto_flush: bool) -> Self {
        Self { auto_flush, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_config() {
        let cfg: BufferConfig =
            serde_json::from_str(r#"{"max_size": 4096, "byte_order": "big"}"#).unwrap();
        assert_eq!(cfg.max_size, 4096);
        assert_eq!(cfg.byte_order, Endian::Big);
        assert_eq!(cfg.initial_size, DEFAULT_INITIAL_SIZE);
        assert!(cfg.auto_flush);
        assert!(!cfg.extended);
    }

    #[test]
    fn test_builders() {
        let cfg = BufferConfig::default()
            .with_sizes(16, 64)
            .with_extended(true)
            .with_auto_flush(false);
        assert_eq!(cfg.initial_size, 16);
        assert_eq!(cfg.max_size, 64);
        assert!(cfg.extended);
        assert!(!cfg.auto_flush);
    }
}
