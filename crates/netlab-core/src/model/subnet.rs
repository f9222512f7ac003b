// ── IPv4 subnet ──
//
// CIDR-notation addressing for simulated network segments. Host
// numbering is 1-based and skips the network and broadcast addresses.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Longest prefix that still leaves room for a gateway and one device.
const MAX_PREFIX_LEN: u8 = 30;

/// An IPv4 network in CIDR form, e.g. `10.0.0.0/24`.
///
/// Always normalized: parsing rejects addresses with host bits set,
/// so `network_address()` is exactly what the user wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    address: Ipv4Addr,
    prefix_len: u8,
}

/// Why a subnet string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubnetParseError {
    #[error("expected CIDR notation <address>/<prefix>, got '{0}'")]
    MissingPrefix(String),

    #[error("invalid IPv4 address '{0}'")]
    InvalidAddress(String),

    #[error("invalid prefix length '{0}' (expected 0..=30)")]
    InvalidPrefix(String),

    #[error("'{0}' has host bits set")]
    HostBitsSet(String),
}

impl Subnet {
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, SubnetParseError> {
        if prefix_len > MAX_PREFIX_LEN {
            return Err(SubnetParseError::InvalidPrefix(prefix_len.to_string()));
        }
        let subnet = Self {
            address,
            prefix_len,
        };
        if u32::from(address) & !subnet.mask_bits() != 0 {
            return Err(SubnetParseError::HostBitsSet(format!("{address}/{prefix_len}")));
        }
        Ok(subnet)
    }

    pub fn network_address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Dotted-quad netmask (`255.255.255.0` for a /24).
    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask_bits())
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask_bits() == u32::from(self.address)
    }

    /// Number of usable host addresses (network and broadcast excluded).
    pub fn host_count(&self) -> u32 {
        let host_bits = 32 - u32::from(self.prefix_len);
        u32::try_from((1u64 << host_bits) - 2).unwrap_or(u32::MAX)
    }

    /// The `n`-th usable host address, 1-based. `None` outside the range.
    pub fn host(&self, n: u32) -> Option<Ipv4Addr> {
        if n == 0 || n > self.host_count() {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.address) + n))
    }

    /// Conventional gateway address: the first usable host.
    pub fn gateway(&self) -> Ipv4Addr {
        // prefix_len <= 30 guarantees at least two hosts
        Ipv4Addr::from(u32::from(self.address) + 1)
    }

    fn mask_bits(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix_len))
        }
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Subnet {
    type Err = SubnetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| SubnetParseError::MissingPrefix(s.to_owned()))?;
        let address: Ipv4Addr = addr
            .parse()
            .map_err(|_| SubnetParseError::InvalidAddress(addr.to_owned()))?;
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| SubnetParseError::InvalidPrefix(prefix.to_owned()))?;
        Self::new(address, prefix_len)
    }
}

impl Serialize for Subnet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Subnet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
