//! Friendly names for dock addresses.
//!
//! The alias file holds one `<address> <alias text>` pair per line. Blank
//! lines and lines starting with `#` are skipped.

use std::fs;
use std::io;
use std::path::Path;

use log::{debug, warn};

use crate::config;
use crate::errors::{DriverError, Result};
use crate::transport::TransportKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub address: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct AliasBook {
    entries: Vec<Alias>,
}

impl AliasBook {
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once(char::is_whitespace) {
                Some((address, name)) if !name.trim().is_empty() => entries.push(Alias {
                    address: address.to_string(),
                    name: name.trim().to_string(),
                }),
                _ => warn!("alias file line {}: expected '<address> <alias>'", n + 1),
            }
        }
        Self { entries }
    }

    /// Read an alias file. A missing file is an empty book.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let book = Self::parse(&text);
                debug!("{} aliases loaded from {}", book.len(), path.display());
                Ok(book)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no alias file at {}", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load from `path`, or from the default location if none is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match config::alias_file_path() {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    pub fn entries(&self) -> &[Alias] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn alias_for(&self, address: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|a| a.address.eq_ignore_ascii_case(address))
            .map(|a| a.name.as_str())
    }

    /// Turn a user-supplied target into a connectable address.
    ///
    /// Addresses pass through. Otherwise an alias must match exactly
    /// (ignoring case) or be the only one starting with `target`.
    pub fn resolve(&self, target: &str) -> Result<String> {
        if TransportKind::classify(target).is_some() {
            return Ok(target.to_string());
        }

        let wanted = target.to_lowercase();
        if let Some(exact) = self
            .entries
            .iter()
            .find(|a| a.name.to_lowercase() == wanted)
        {
            return Ok(exact.address.clone());
        }

        let candidates: Vec<&Alias> = self
            .entries
            .iter()
            .filter(|a| a.name.to_lowercase().starts_with(&wanted))
            .collect();
        match candidates.as_slice() {
            [one] => Ok(one.address.clone()),
            [] => Err(DriverError::Resolution(format!(
                "'{target}' is not an address or a known alias"
            ))),
            many => Err(DriverError::Resolution(format!(
                "'{target}' is ambiguous: {}",
                many.iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# docks at home
00:1D:DF:52:F1:91 Kitchen dock
00:1D:DF:52:F1:92   Bedroom

/dev/ttyUSB0 Bedside serial
broken-line
";

    #[test]
    fn parses_entries_and_skips_noise() {
        let book = AliasBook::parse(SAMPLE);
        assert_eq!(book.len(), 3);
        assert_eq!(book.entries()[1].name, "Bedroom");
        assert_eq!(book.alias_for("00:1d:df:52:f1:91"), Some("Kitchen dock"));
        assert_eq!(book.alias_for("11:22:33:44:55:66"), None);
    }

    #[test]
    fn resolves_addresses_aliases_and_prefixes() {
        let book = AliasBook::parse(SAMPLE);
        assert_eq!(
            book.resolve("AA:BB:CC:DD:EE:FF").unwrap(),
            "AA:BB:CC:DD:EE:FF"
        );
        assert_eq!(book.resolve("kitchen dock").unwrap(), "00:1D:DF:52:F1:91");
        assert_eq!(book.resolve("bedr").unwrap(), "00:1D:DF:52:F1:92");
        assert_eq!(book.resolve("Bedside").unwrap(), "/dev/ttyUSB0");
    }

    #[test]
    fn unknown_or_ambiguous_targets_fail() {
        let book = AliasBook::parse(SAMPLE);
        assert!(matches!(
            book.resolve("garage"),
            Err(DriverError::Resolution(_))
        ));
        assert!(matches!(book.resolve("bed"), Err(DriverError::Resolution(_))));
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let book = AliasBook::load(&dir.path().join("nope")).unwrap();
        assert!(book.is_empty());

        let path = dir.path().join("aliases");
        fs::write(&path, SAMPLE).unwrap();
        assert_eq!(AliasBook::load(&path).unwrap().len(), 3);
    }
}
