//! CIDR subnet value type.
//!
//! A [`Subnet`] is an IPv4 address paired with a prefix length in `1..=31`.
//! The address is kept exactly as given: overlay agents report their per-host
//! range as the gateway address (`10.58.12.1/24`), and that text must survive
//! a round trip unchanged. Use [`Subnet::network`] for the masked range.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Smallest accepted prefix length.
pub const MIN_PREFIX: u8 = 1;

/// Largest accepted prefix length.
pub const MAX_PREFIX: u8 = 31;

/// An IPv4 address range in `address/prefix` notation.
///
/// # Examples
///
/// ```
/// use multihost_core::subnet::Subnet;
///
/// let subnet: Subnet = "10.58.0.0/16".parse().unwrap();
/// assert_eq!(subnet.prefix(), 16);
/// assert_eq!(subnet.to_string(), "10.58.0.0/16");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subnet {
    address: Ipv4Addr,
    prefix: u8,
    net: Ipv4Net,
}

impl Subnet {
    /// Creates a subnet, rejecting prefixes outside `1..=31`.
    pub fn new(address: Ipv4Addr, prefix: u8) -> Result<Self> {
        if !(MIN_PREFIX..=MAX_PREFIX).contains(&prefix) {
            return Err(CoreError::InvalidPrefix(u32::from(prefix)));
        }
        let net = Ipv4Net::new(address, prefix)
            .map_err(|_| CoreError::InvalidPrefix(u32::from(prefix)))?
            .trunc();
        Ok(Self {
            address,
            prefix,
            net,
        })
    }

    /// Returns the address part as given.
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Returns the prefix length.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Returns the masked network range.
    pub fn network(&self) -> Ipv4Net {
        self.net
    }

    /// Returns true if `other` lies entirely inside this range.
    pub fn contains(&self, other: &Subnet) -> bool {
        self.network().contains(&other.network())
    }

    /// Returns true if the two ranges share at least one address.
    pub fn overlaps(&self, other: &Subnet) -> bool {
        let (a, b) = (self.network(), other.network());
        a.contains(&b) || b.contains(&a)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

impl FromStr for Subnet {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self> {
        let (address, prefix) = value
            .trim()
            .split_once('/')
            .ok_or_else(|| CoreError::invalid_subnet(value, "expected address/prefix"))?;

        let address: Ipv4Addr = address
            .parse()
            .map_err(|_| CoreError::InvalidAddress(address.to_string()))?;

        let prefix: u32 = prefix
            .parse()
            .map_err(|_| CoreError::invalid_subnet(value, "prefix is not a number"))?;
        let prefix = u8::try_from(prefix).map_err(|_| CoreError::InvalidPrefix(prefix))?;

        Self::new(address, prefix)
    }
}

impl TryFrom<String> for Subnet {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Subnet> for String {
    fn from(subnet: Subnet) -> Self {
        subnet.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet(s: &str) -> Subnet {
        s.parse().unwrap()
    }

    #[test]
    fn test_subnet_round_trip() {
        for text in ["10.58.0.0/16", "192.168.0.0/24", "10.58.12.1/24", "1.2.3.4/31", "0.0.0.0/1"] {
            let parsed = subnet(text);
            assert_eq!(parsed.to_string(), text);
            assert_eq!(subnet(&parsed.to_string()), parsed);
        }
    }

    #[test]
    fn test_prefix_bounds() {
        assert_eq!(
            "10.0.0.0/0".parse::<Subnet>(),
            Err(CoreError::InvalidPrefix(0))
        );
        assert_eq!(
            "10.0.0.0/32".parse::<Subnet>(),
            Err(CoreError::InvalidPrefix(32))
        );
        assert_eq!(
            "10.0.0.0/4096".parse::<Subnet>(),
            Err(CoreError::InvalidPrefix(4096))
        );
        assert!(Subnet::new(Ipv4Addr::new(10, 0, 0, 0), 0).is_err());
        assert!(Subnet::new(Ipv4Addr::new(10, 0, 0, 0), 31).is_ok());
    }

    #[test]
    fn test_malformed_text() {
        assert!(matches!(
            "10.0.0.0".parse::<Subnet>(),
            Err(CoreError::InvalidSubnet { .. })
        ));
        assert!(matches!(
            "not-an-ip/8".parse::<Subnet>(),
            Err(CoreError::InvalidAddress(_))
        ));
        assert!(matches!(
            "10.0.0.0/abc".parse::<Subnet>(),
            Err(CoreError::InvalidSubnet { .. })
        ));
    }

    #[test]
    fn test_equality_is_textual() {
        assert_eq!(subnet("10.58.0.0/16"), subnet(" 10.58.0.0/16 "));
        // Same range, different address text.
        assert_ne!(subnet("10.58.12.0/24"), subnet("10.58.12.1/24"));
        assert_ne!(subnet("10.58.0.0/16"), subnet("10.58.0.0/17"));
    }

    #[test]
    fn test_containment_and_overlap() {
        let whole = subnet("10.58.0.0/16");
        let a = subnet("10.58.12.1/24");
        let b = subnet("10.58.13.1/24");
        let outside = subnet("10.59.0.1/24");

        assert!(whole.contains(&a));
        assert!(whole.contains(&b));
        assert!(!whole.contains(&outside));
        assert!(!a.contains(&whole));

        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&whole));
        assert!(whole.overlaps(&a));
        assert!(a.overlaps(&subnet("10.58.12.0/24")));
    }

    #[test]
    fn test_network_is_masked() {
        assert_eq!(subnet("10.58.12.1/24").network().to_string(), "10.58.12.0/24");
    }

    #[test]
    fn test_serde_as_text() {
        let value = serde_json::to_string(&subnet("10.58.0.0/16")).unwrap();
        assert_eq!(value, "\"10.58.0.0/16\"");

        let back: Subnet = serde_json::from_str(&value).unwrap();
        assert_eq!(back, subnet("10.58.0.0/16"));

        assert!(serde_json::from_str::<Subnet>("\"10.58.0.0/32\"").is_err());
    }
}
