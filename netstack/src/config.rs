use crate::error::{Error, Result};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

/// Address configuration of the interface the stack runs on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub interface: String,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl InterfaceConfig {
    /// Reads a file of `Key value` lines:
    ///
    /// ```text
    /// # comment
    /// Interface   eth0
    /// IPv4Address 192.168.1.1
    /// SubnetMask  255.255.255.0
    /// ```
    ///
    /// Keys are case-insensitive and all three must be present.
    pub fn read(path: impl AsRef<Path>) -> Result<InterfaceConfig> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(Error::Io)?;
        InterfaceConfig::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<InterfaceConfig> {
        let mut interface = None;
        let mut addr = None;
        let mut netmask = None;

        for (line, fields) in records(text) {
            if fields.len() != 2 {
                return Err(Error::config(path, line, "expected `key value`"));
            }
            let value = fields[1];
            match fields[0].to_ascii_lowercase().as_str() {
                "interface" => interface = Some(value.to_string()),
                "ipv4address" => addr = Some(parse_addr(path, line, value)?),
                "subnetmask" => netmask = Some(parse_addr(path, line, value)?),
                key => {
                    return Err(Error::config(
                        path,
                        line,
                        format!("unknown key `{}`", key),
                    ))
                }
            }
        }

        let missing = |key: &str| Error::config(path, 0, format!("missing `{}`", key));
        Ok(InterfaceConfig {
            interface: interface.ok_or_else(|| missing("Interface"))?,
            addr: addr.ok_or_else(|| missing("IPv4Address"))?,
            netmask: netmask.ok_or_else(|| missing("SubnetMask"))?,
        })
    }
}

/// Splits `text` into whitespace-separated fields, one record per line, skipping blank lines
/// and `#` comments. Line numbers start at 1.
pub(crate) fn records(text: &str) -> impl Iterator<Item = (usize, Vec<&str>)> {
    text.lines().enumerate().filter_map(|(index, line)| {
        let line_text = line.trim();
        if line_text.is_empty() || line_text.starts_with('#') {
            None
        } else {
            Some((index + 1, line_text.split_whitespace().collect()))
        }
    })
}

pub(crate) fn parse_addr(path: &Path, line: usize, token: &str) -> Result<Ipv4Addr> {
    token
        .parse()
        .map_err(|_| Error::config(path, line, format!("invalid IPv4 address `{}`", token)))
}
