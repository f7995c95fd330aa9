use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::protocol::Capability;
use crate::transport::TransportKind;

/// Last known state of one dock.
///
/// Discovery fills in the address, kind, name and alias. Everything else
/// is written by a session after a successful query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub kind: TransportKind,
    pub address: String,
    pub name: String,
    pub alias: Option<String>,
    pub version: Option<String>,
    pub volume: Option<u8>,
    /// What the dock was last told to show.
    pub display: Option<String>,
    pub capabilities: BTreeSet<Capability>,
    pub connected: bool,
}

impl Device {
    pub fn new(kind: TransportKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
            name: String::new(),
            alias: None,
            version: None,
            volume: None,
            display: None,
            capabilities: BTreeSet::new(),
            connected: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias;
        self
    }

    /// Multi-line report for the `info` command.
    pub fn report(&self) -> String {
        let unknown = "<unknown>";
        let caps = if self.capabilities.is_empty() {
            "-".to_string()
        } else {
            self.capabilities
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "address:      {} ({})\n\
             name:         {}\n\
             alias:        {}\n\
             version:      {}\n\
             volume:       {}\n\
             display:      {}\n\
             capabilities: {}",
            self.address,
            self.kind,
            if self.name.is_empty() { unknown } else { self.name.as_str() },
            self.alias.as_deref().unwrap_or("-"),
            self.version.as_deref().unwrap_or(unknown),
            self.volume
                .map(|v| v.to_string())
                .unwrap_or_else(|| unknown.to_string()),
            self.display.as_deref().unwrap_or("-"),
            caps
        )
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        if !self.name.is_empty() {
            write!(f, " {}", self.name)?;
        }
        if let Some(alias) = &self.alias {
            write!(f, " ({alias})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_uses_fixed_fields() {
        let mut device = Device::new(TransportKind::Bluetooth, "00:1D:DF:52:F1:91")
            .with_name("AS111")
            .with_alias(Some("kitchen".into()));
        device.volume = Some(12);
        device.capabilities.insert(Capability::Volume);
        device.capabilities.insert(Capability::Dbb);

        let value = serde_json::to_value(&device).unwrap();
        assert_eq!(value["kind"], "bluetooth");
        assert_eq!(value["volume"], 12);
        assert_eq!(value["version"], serde_json::Value::Null);
        assert_eq!(value["capabilities"], serde_json::json!(["VOLUME", "DBB"]));
        assert_eq!(device.to_string(), "00:1D:DF:52:F1:91 AS111 (kitchen)");
        assert!(device.report().contains("capabilities: VOLUME, DBB"));
        assert!(device.report().contains("version:      <unknown>"));
    }
}
