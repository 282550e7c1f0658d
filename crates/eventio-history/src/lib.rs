//! Provenance history for eventio files.
//!
//! Programs writing eventio data record the command line they were started
//! with and the configuration lines they were given. Both end up in a
//! history block (type 70) holding one command line item (type 71) and
//! one item per configuration line (type 72). Every entry is a 32-bit unix
//! time followed by a string with a 16-bit length prefix.

use chrono::{DateTime, Local, TimeZone, Utc};
use eventio::{IoBuffer, ItemHeader, RaisingItem};

pub const HISTORY: u32 = 70;
pub const COMMAND_LINE: u32 = 71;
pub const CONFIG_LINE: u32 = 72;

const VERSION: u16 = 1;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Eventio(#[from] eventio::Error),
    #[error("unsupported version {version} of history item type {type_code}")]
    UnsupportedVersion { type_code: u32, version: u16 },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub time: DateTime<Utc>,
    pub text: String,
}

/// Collects the history of the running program until it is written.
#[derive(Debug, Clone, Default)]
pub struct History {
    command: Option<HistoryEntry>,
    configs: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the program's command line, replacing any earlier one.
    /// Returns false, leaving the history untouched, if `args` is empty.
    pub fn push_command<I>(&mut self, args: I) -> bool
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        self.push_command_at(args, Utc::now())
    }

    pub fn push_command_at<I>(&mut self, args: I, time: DateTime<Utc>) -> bool
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut text = String::new();
        for arg in args {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(arg.as_ref());
        }
        if text.is_empty() {
            log::warn!("ignoring empty command line");
            return false;
        }
        self.command = Some(HistoryEntry { time, text });
        true
    }

    /// Record a configuration line. With `replace`, an earlier line for the
    /// same keyword (the first word, ended by whitespace or `%`) is
    /// overwritten in place. Lines without a keyword are ignored.
    pub fn push_config(&mut self, line: &str, replace: bool) {
        self.push_config_at(line, replace, Utc::now())
    }

    pub fn push_config_at(&mut self, line: &str, replace: bool, time: DateTime<Utc>) {
        let Some(word) = keyword(line) else {
            return;
        };
        let entry = HistoryEntry {
            time,
            text: line.to_string(),
        };
        if replace {
            if let Some(old) = self
                .configs
                .iter_mut()
                .find(|c| keyword(&c.text) == Some(word))
            {
                *old = entry;
                return;
            }
        }
        self.configs.push(entry);
    }

    pub fn command(&self) -> Option<&HistoryEntry> {
        self.command.as_ref()
    }

    pub fn configs(&self) -> &[HistoryEntry] {
        &self.configs
    }

    /// Write the history block. The ident is used for the block and all of
    /// its entries. If any entry cannot be written the whole block is
    /// taken back out of the buffer.
    pub fn write(&self, buf: &mut IoBuffer, ident: i32) -> Result<ItemHeader> {
        let mut block = RaisingItem::write(buf, &ItemHeader::new(HISTORY, VERSION, ident))?;
        let entries = self
            .command
            .iter()
            .map(|c| (COMMAND_LINE, c))
            .chain(self.configs.iter().map(|c| (CONFIG_LINE, c)));
        for (type_code, entry) in entries {
            if let Err(err) = write_entry(&mut block, type_code, ident, entry) {
                block.unput()?;
                return Err(err);
            }
        }
        Ok(block.end().into_result()?)
    }
}

fn keyword(line: &str) -> Option<&str> {
    line.split(|c: char| c.is_whitespace() || c == '%')
        .find(|w| !w.is_empty())
}

fn write_entry(
    block: &mut RaisingItem<'_>,
    type_code: u32,
    ident: i32,
    entry: &HistoryEntry,
) -> Result<()> {
    let mut item = block.write_sub(&ItemHeader::new(type_code, VERSION, ident))?;
    item.put_checked::<i32, _>(entry.time.timestamp())?;
    item.put_string(&entry.text)?;
    item.end().into_result()?;
    Ok(())
}

/// A history block as found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryBlock {
    pub ident: i32,
    pub command: Option<HistoryEntry>,
    pub configs: Vec<HistoryEntry>,
}

fn open_block(buf: &mut IoBuffer) -> Result<RaisingItem<'_>> {
    let block = RaisingItem::read(buf, Some(HISTORY))?;
    let version = block.header().version;
    if version != VERSION {
        log::warn!("wrong version {version} of history block");
        // Reading past it keeps the following blocks accessible.
        block.end();
        return Err(Error::UnsupportedVersion {
            type_code: HISTORY,
            version,
        });
    }
    Ok(block)
}

fn read_entry(block: &mut RaisingItem<'_>, type_code: u32) -> Result<(i32, HistoryEntry)> {
    let mut item = block.read_sub(Some(type_code))?;
    let header = *item.header();
    if header.version != VERSION {
        log::warn!(
            "wrong version {} of history item type {type_code}",
            header.version
        );
        item.end();
        return Err(Error::UnsupportedVersion {
            type_code,
            version: header.version,
        });
    }
    let secs = item.get::<i32>()?;
    let text = item.get_string()?;
    item.end().into_result()?;
    let time = Utc
        .timestamp_opt(i64::from(secs), 0)
        .single()
        .unwrap_or_default();
    Ok((header.ident, HistoryEntry { time, text }))
}

/// Read the next item of the buffer as a history block. Unknown sub-items
/// are skipped.
pub fn read_history(buf: &mut IoBuffer) -> Result<HistoryBlock> {
    let mut block = open_block(buf)?;
    let mut history = HistoryBlock {
        ident: block.header().ident,
        command: None,
        configs: Vec::new(),
    };
    while let Some(type_code) = block.next_sub_type()? {
        match type_code {
            COMMAND_LINE => history.command = Some(read_entry(&mut block, COMMAND_LINE)?.1),
            CONFIG_LINE => history.configs.push(read_entry(&mut block, CONFIG_LINE)?.1),
            other => {
                log::warn!("skipping item of type {other} in history block");
                block.skip_sub()?;
            }
        }
    }
    block.end().into_result()?;
    Ok(history)
}

/// Render the next history block of the buffer as text, with times in the
/// local time zone.
pub fn list_history(buf: &mut IoBuffer) -> Result<String> {
    list_history_in(buf, &Local)
}

pub fn list_history_in<Tz>(buf: &mut IoBuffer, tz: &Tz) -> Result<String>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut block = open_block(buf)?;
    let ident = block.header().ident;
    let mut out = if ident > 0 {
        format!("\nHistory block (ident {ident}):\n")
    } else {
        "\nHistory block:\n".to_string()
    };

    if block.search(COMMAND_LINE)? {
        let (sub_ident, entry) = read_entry(&mut block, COMMAND_LINE)?;
        let dated = entry.time.with_timezone(tz).format("%Y-%m-%d %H:%M:%S");
        if sub_ident > 0 {
            out.push_str(&format!("   Command line (dated {dated}, ident {sub_ident}):\n"));
        } else {
            out.push_str(&format!("   Command line (dated {dated}):\n"));
        }
        out.push_str(&format!("      {}\n", entry.text));
    }

    block.rewind()?;
    out.push_str("   Configuration data:\n");
    while block.search(CONFIG_LINE)? {
        let (_, entry) = read_entry(&mut block, CONFIG_LINE)?;
        for line in entry.text.lines() {
            out.push_str("      ");
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push_str("End of history block\n");

    block.end().into_result()?;
    Ok(out)
}
