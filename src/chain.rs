//! A minimal static registry mapping the CAIP-2 networks this core signs for to an EIP-712
//! chain descriptor.
//!
//! This is deliberately narrow: it is not a general CAIP-2 parser or a full chain directory (that
//! belongs to the out-of-scope chain registry collaborator the agent loop owns). It exists only to
//! satisfy the exact three-entry mapping the signing source resolver needs (§4.1), with the
//! fallback the spec requires for anything else.

use std::fmt::{self, Display, Formatter};

/// A resolved EVM chain, just the fields the EIP-712 domain needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainDescriptor {
    pub name: &'static str,
    pub chain_id: u64,
}

pub const BASE: ChainDescriptor = ChainDescriptor {
    name: "base",
    chain_id: 8453,
};

pub const BASE_SEPOLIA: ChainDescriptor = ChainDescriptor {
    name: "base-sepolia",
    chain_id: 84532,
};

pub const ETHEREUM: ChainDescriptor = ChainDescriptor {
    name: "ethereum",
    chain_id: 1,
};

/// Resolves a CAIP-2 network identifier (e.g. `"eip155:8453"`) to a [`ChainDescriptor`].
///
/// Unknown or malformed networks fall back to [`BASE`], per §4.1.
pub fn resolve(network: &str) -> ChainDescriptor {
    match network {
        "eip155:8453" => BASE,
        "eip155:84532" => BASE_SEPOLIA,
        "eip155:1" => ETHEREUM,
        _ => BASE,
    }
}

impl Display for ChainDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} (eip155:{})", self.name, self.chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_networks() {
        assert_eq!(resolve("eip155:8453"), BASE);
        assert_eq!(resolve("eip155:84532"), BASE_SEPOLIA);
        assert_eq!(resolve("eip155:1"), ETHEREUM);
    }

    #[test]
    fn falls_back_to_base_for_unknown_networks() {
        assert_eq!(resolve("eip155:999999"), BASE);
        assert_eq!(resolve("solana:mainnet"), BASE);
        assert_eq!(resolve(""), BASE);
    }
}
