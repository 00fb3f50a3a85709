// src/core/instance/address.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Port assumed when an address is given without one.
pub const DEFAULT_PORT: u16 = 3306;

/// The network address of a member. Used as a probe hint; the member's
/// `server_uuid` is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("address cannot be empty".to_string());
        }

        // Bracketed IPv6: [::1]:3306
        if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| format!("unterminated '[' in address '{s}'"))?;
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(s, p)?,
                None if tail.is_empty() => DEFAULT_PORT,
                None => return Err(format!("unexpected trailing text in address '{s}'")),
            };
            return Ok(Address::new(host, port));
        }

        match s.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => Err(format!(
                "IPv6 address '{s}' must be written as [host]:port"
            )),
            Some((host, port)) if !host.is_empty() => Ok(Address::new(host, parse_port(s, port)?)),
            Some(_) => Err(format!("address '{s}' has no host")),
            None => Ok(Address::new(s, DEFAULT_PORT)),
        }
    }
}

fn parse_port(original: &str, port: &str) -> Result<u16, String> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port in address '{original}'")),
        Ok(p) => Ok(p),
    }
}

impl TryFrom<String> for Address {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}
