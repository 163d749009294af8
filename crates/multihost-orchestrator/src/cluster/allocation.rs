//! Overlay allocations read back from agents.
//!
//! Every flannel agent leases a slice of the overlay and writes it to
//! `subnet.env`:
//!
//! ```text
//! FLANNEL_NETWORK=10.58.0.0/16
//! FLANNEL_SUBNET=10.58.12.1/24
//! FLANNEL_MTU=1450
//! FLANNEL_IPMASQ=false
//! ```

use multihost_core::{CoreError, EnvFile, Subnet};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Key holding the whole overlay range.
pub const KEY_NETWORK: &str = "FLANNEL_NETWORK";
/// Key holding the host's slice.
pub const KEY_SUBNET: &str = "FLANNEL_SUBNET";
/// Key holding the MTU.
pub const KEY_MTU: &str = "FLANNEL_MTU";
/// Key holding the IP masquerade flag.
pub const KEY_IPMASQ: &str = "FLANNEL_IPMASQ";

/// One agent's self-assigned share of the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayAllocation {
    /// The whole overlay range.
    pub network: Subnet,

    /// The range leased to this host.
    pub subnet: Subnet,

    /// MTU for interfaces on this host, always positive.
    pub mtu: u32,

    /// Whether the agent masquerades traffic leaving the overlay.
    pub ip_masq: bool,
}

impl OverlayAllocation {
    /// Builds an allocation from a parsed environment file.
    pub fn from_env(env: &EnvFile) -> std::result::Result<Self, CoreError> {
        let network: Subnet = env.require_parsed(KEY_NETWORK)?;
        let subnet: Subnet = env.require_parsed(KEY_SUBNET)?;
        let mtu: u32 = env.require_parsed(KEY_MTU)?;
        if mtu == 0 {
            return Err(CoreError::invalid_value(KEY_MTU, "0"));
        }
        let ip_masq = env.require_bool(KEY_IPMASQ)?;

        Ok(Self {
            network,
            subnet,
            mtu,
            ip_masq,
        })
    }

    /// Parses the raw contents of `subnet.env` as read from `host`.
    ///
    /// Empty content means the agent has not written its lease yet and maps
    /// to [`OrchestratorError::AllocationUnavailable`]. Anything else that
    /// fails to parse is a configuration error.
    pub fn parse(host: &str, bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(OrchestratorError::allocation_unavailable(host));
        }

        let env = EnvFile::parse(bytes)?;
        Ok(Self::from_env(&env)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "tcp://10.0.0.1:2375";

    #[test]
    fn test_parse_allocation() {
        let allocation = OverlayAllocation::parse(
            HOST,
            b"FLANNEL_NETWORK=10.58.0.0/16\nFLANNEL_SUBNET=10.58.12.1/24\nFLANNEL_MTU=1450\nFLANNEL_IPMASQ=false\n",
        )
        .unwrap();

        assert_eq!(allocation.network.to_string(), "10.58.0.0/16");
        assert_eq!(allocation.subnet.to_string(), "10.58.12.1/24");
        assert_eq!(allocation.mtu, 1450);
        assert!(!allocation.ip_masq);
        assert!(allocation.network.contains(&allocation.subnet));
    }

    #[test]
    fn test_empty_is_unavailable() {
        for body in [&b""[..], b"\n", b"  \n\n"] {
            assert!(matches!(
                OverlayAllocation::parse(HOST, body),
                Err(OrchestratorError::AllocationUnavailable { .. })
            ));
        }
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let err = OverlayAllocation::parse(
            HOST,
            b"FLANNEL_NETWORK=10.58.0.0/16\nFLANNEL_MTU=1450\nFLANNEL_IPMASQ=true\n",
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidConfiguration(_)));
        assert!(err.to_string().contains(KEY_SUBNET));
    }

    #[test]
    fn test_malformed_values() {
        let cases: [&[u8]; 4] = [
            b"FLANNEL_NETWORK=10.58.0.0/16\nFLANNEL_SUBNET=10.58.12.1/24\nFLANNEL_MTU=0\nFLANNEL_IPMASQ=true\n",
            b"FLANNEL_NETWORK=10.58.0.0/16\nFLANNEL_SUBNET=10.58.12.1/24\nFLANNEL_MTU=1450\nFLANNEL_IPMASQ=maybe\n",
            b"FLANNEL_NETWORK=10.58.0.0/16\nFLANNEL_SUBNET=10.58.12.1/32\nFLANNEL_MTU=1450\nFLANNEL_IPMASQ=true\n",
            b"FLANNEL_NETWORK=10.58.0.0/16\ngarbage\n",
        ];
        for body in cases {
            assert!(matches!(
                OverlayAllocation::parse(HOST, body),
                Err(OrchestratorError::InvalidConfiguration(_))
            ));
        }
    }
}
