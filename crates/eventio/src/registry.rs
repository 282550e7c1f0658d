//! Names and descriptions of item types, for diagnostics only.
//!
//! The registry file holds one `type:name[:description]` entry per line.
//! Everything after a `#` is a comment; lines without a type number or a
//! name are ignored.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable naming the registry file.
pub const REGISTRY_ENV: &str = "EVENTIO_REGISTRY";
/// Registry file looked up in the working directory.
pub const LOCAL_REGISTRY: &str = "EventioRegisteredNames.dat";
/// Registry file looked up in the home directory.
pub const HOME_REGISTRY: &str = ".EventioRegisteredNames";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredType {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeRegistry {
    types: BTreeMap<u32, RegisteredType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The types used by the format itself.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        reg.insert(70, "History", Some("Block of history lines"));
        reg.insert(71, "CommandLine", Some("Command line history"));
        reg.insert(72, "ConfigLine", Some("Configuration history line"));
        reg
    }

    /// Parse registry text. Later entries for the same type replace
    /// earlier ones.
    pub fn parse(text: &str) -> Self {
        let mut reg = Self::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let mut fields = line.splitn(3, ':');
            let (Some(code), Some(name)) = (fields.next(), fields.next()) else {
                continue;
            };
            let Ok(code) = code.trim().parse::<u32>() else {
                continue;
            };
            let description = fields.next().map(str::trim).filter(|d| !d.is_empty());
            reg.insert(code, name.trim(), description);
        }
        reg
    }

    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Load the registry from `$EVENTIO_REGISTRY`, else from
    /// `EventioRegisteredNames.dat` in the working directory, else from
    /// `~/.EventioRegisteredNames`. Returns the built-in types if none of
    /// them can be read.
    pub fn from_default_locations() -> Self {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        Self::from_locations(std::env::var_os(REGISTRY_ENV).map(PathBuf::from), home)
    }

    fn from_locations(explicit: Option<PathBuf>, home: Option<PathBuf>) -> Self {
        let candidate = match explicit {
            Some(path) => Some(path),
            None if Path::new(LOCAL_REGISTRY).is_file() => Some(PathBuf::from(LOCAL_REGISTRY)),
            None => home.map(|h| h.join(HOME_REGISTRY)).filter(|p| p.is_file()),
        };
        let Some(path) = candidate else {
            log::debug!("no eventio type registry found");
            return Self::builtin();
        };
        match Self::from_file(&path) {
            Ok(mut reg) => {
                for (code, entry) in Self::builtin().types {
                    reg.types.entry(code).or_insert(entry);
                }
                reg
            }
            Err(err) => {
                log::warn!("cannot read type registry {}: {err}", path.display());
                Self::builtin()
            }
        }
    }

    pub fn insert(&mut self, type_code: u32, name: &str, description: Option<&str>) {
        self.types.insert(
            type_code,
            RegisteredType {
                name: name.to_owned(),
                description: description.map(str::to_owned),
            },
        );
    }

    pub fn lookup(&self, type_code: u32) -> Option<&RegisteredType> {
        self.types.get(&type_code)
    }

    pub fn name(&self, type_code: u32) -> Option<&str> {
        self.lookup(type_code).map(|t| t.name.as_str())
    }

    pub fn description(&self, type_code: u32) -> Option<&str> {
        self.lookup(type_code)
            .and_then(|t| t.description.as_deref())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &RegisteredType)> {
        self.types.iter().map(|(&code, t)| (code, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    const SAMPLE: &str = "\
# Registered eventio types
70:History:Block of history lines
2000:TelescopeSettings  # trailing comment
2010:Event:Full event data:with colon
:NoType
abc:NotANumber
2020
";

    #[test]
    fn test_parse() {
        let reg = TypeRegistry::parse(SAMPLE);
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.name(70), Some("History"));
        assert_eq!(reg.description(70), Some("Block of history lines"));
        assert_eq!(reg.name(2000), Some("TelescopeSettings"));
        assert_eq!(reg.description(2000), None);
        assert_eq!(reg.description(2010), Some("Full event data:with colon"));
        assert_eq!(reg.lookup(2020), None);
    }

    #[test]
    fn test_explicit_location_wins() {
        let dir = assert_fs::TempDir::new().unwrap();
        let explicit = dir.child("types.dat");
        explicit.write_str("1234:Custom\n").unwrap();
        dir.child(HOME_REGISTRY).write_str("1234:FromHome\n").unwrap();

        let reg = TypeRegistry::from_locations(
            Some(explicit.path().to_path_buf()),
            Some(dir.path().to_path_buf()),
        );
        assert_eq!(reg.name(1234), Some("Custom"));
        // Built-in entries fill the gaps.
        assert_eq!(reg.name(71), Some("CommandLine"));
    }

    #[test]
    fn test_unreadable_registry_falls_back() {
        let dir = assert_fs::TempDir::new().unwrap();
        let reg = TypeRegistry::from_locations(Some(dir.child("missing.dat").path().to_path_buf()), None);
        assert_eq!(reg, TypeRegistry::builtin());
    }
}
