use crate::buffer::IoBuffer;
use crate::framer::MAX_LEVEL;
use crate::types::{Endian, ItemHeader, Result};

struct Lister<'a> {
    buf: &'a IoBuffer,
    max_depth: usize,
    show_positions: bool,
    out: String,
}

impl IoBuffer {
    /// Render the tree of all items stored in the buffer, one line per
    /// item, for diagnostics. Only items that consist of sub-items are
    /// descended into, down to `max_depth` levels below the top level.
    /// Type names come from the buffer's registry, if one is set.
    pub fn list_items(&self, max_depth: usize, show_positions: bool) -> Result<String> {
        let mut lister = Lister {
            buf: self,
            max_depth: max_depth.min(MAX_LEVEL - 1),
            show_positions,
            out: String::new(),
        };
        lister.level(0, self.data.len(), 0, self.order)?;
        Ok(lister.out)
    }
}

impl Lister<'_> {
    fn level(&mut self, start: usize, end: usize, depth: usize, order: Endian) -> Result<()> {
        let mut pos = start;
        while pos < end {
            let (header, size, order) = self.buf.decode_at(pos, end, depth, order)?;
            self.line(&header, pos);
            let data_end = pos + size + header.length as usize;
            if header.can_search && depth < self.max_depth {
                self.level(pos + size, data_end, depth + 1, order)?;
            }
            pos = data_end;
        }
        Ok(())
    }

    fn line(&mut self, header: &ItemHeader, pos: usize) {
        let name = self
            .buf
            .registry()
            .and_then(|r| r.name(header.type_code))
            .map(|n| format!(" ({n})"))
            .unwrap_or_default();
        let mut line = format!(
            "{:indent$}Type {}{name} version {}, ident {}, length {}",
            "",
            header.type_code,
            header.version,
            header.ident,
            header.length,
            indent = 4 * header.level
        );
        if header.user_flag {
            line.push_str(", user flag");
        }
        if header.extended {
            line.push_str(", extended");
        }
        if header.can_search {
            line.push_str(", sub-items only");
        }
        if self.show_positions {
            line.push_str(&format!(" at {pos}"));
        }
        self.out.push_str(&line);
        self.out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::BufferConfig;
    use crate::registry::TypeRegistry;

    fn sample() -> IoBuffer {
        let mut buf = IoBuffer::default();
        let top = buf
            .put_item_begin(&ItemHeader::new(70, 1, 3))
            .unwrap();
        let cmd = buf
            .put_item_begin(&ItemHeader::new(71, 1, 3))
            .unwrap();
        buf.put::<i32>(0).unwrap();
        buf.put_string("run").unwrap();
        buf.put_item_end(cmd).unwrap();
        buf.put_item_end(top).unwrap();

        let raw = buf
            .put_item_begin(&ItemHeader::new(2000, 2, -1).with_user_flag(true))
            .unwrap();
        buf.put::<u64>(42).unwrap();
        buf.put_item_end(raw).unwrap();
        buf
    }

    #[test]
    fn test_list_items() {
        let mut buf = sample();
        let mut registry = TypeRegistry::builtin();
        registry.insert(2000, "TelescopeSettings", None);
        buf.set_registry(Arc::new(registry));

        insta::assert_snapshot!(buf.list_items(5, true).unwrap(), @r###"
        Type 70 (History) version 1, ident 3, length 21, sub-items only at 0
            Type 71 (CommandLine) version 1, ident 3, length 9 at 16
        Type 2000 (TelescopeSettings) version 2, ident -1, length 8, user flag at 37
        "###);
    }

    #[test]
    fn test_list_depth_limit_and_big_endian() {
        let bytes = {
            let mut buf = IoBuffer::new(BufferConfig::default().with_byte_order(Endian::Big));
            let top = buf.put_item_begin(&ItemHeader::new(5, 0, 0)).unwrap();
            let sub = buf.put_item_begin(&ItemHeader::new(6, 0, 0)).unwrap();
            buf.put_item_end(sub).unwrap();
            buf.put_item_end(top).unwrap();
            buf.into_bytes()
        };
        let buf = IoBuffer::from_bytes(bytes, BufferConfig::default()).unwrap();
        assert_eq!(
            buf.list_items(0, false).unwrap(),
            "Type 5 version 0, ident 0, length 12, sub-items only\n"
        );
    }
}
