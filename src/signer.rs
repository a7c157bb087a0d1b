//! The signing source resolver (§4.1): turns `{ signerMode, paymentHeader, secrets }` into a
//! [`SigningSource`], and constructs the `env_pk` signing function that signs EIP-712 `Permit`
//! authorizations.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolStruct, eip712_domain, sol};
use async_trait::async_trait;

use crate::chain;
use crate::error::{ResolverError, SigningError};
use crate::types::{Secrets, SignatureInput, SignatureOutput, SignerMode, SigningSource};

sol!(
    /// Solidity-compatible struct for EIP-2612 `Permit`, used to reconstruct the EIP-712 typed
    /// data this core signs.
    struct Permit {
        address owner;
        address spender;
        uint256 value;
        uint256 nonce;
        uint256 deadline;
    }
);

/// How long a freshly signed Permit is valid for, absent a `minDeadlineExclusive` floor (§4.1).
const PERMIT_VALIDITY_SECONDS: u64 = 3600;

/// Reads the ERC-2612 `nonces(address owner) returns (uint256)` view for a token.
///
/// This is the "EVM read client" the spec calls out as an external collaborator (§1, §6): the
/// core defines the boundary but never builds a live RPC client against it. Callers inject a
/// concrete implementation (wrapping whatever provider the out-of-scope agent loop already holds).
#[async_trait]
pub trait NonceReader: Send + Sync {
    async fn read_nonce(
        &self,
        chain: chain::ChainDescriptor,
        asset: Address,
        owner: Address,
    ) -> Result<U256, Box<dyn std::error::Error + Send + Sync>>;
}

/// Resolves `{ signerMode?, paymentHeader?, secrets }` into a [`SigningSource`] (§4.1).
pub fn resolve_signing_source(
    signer_mode: Option<SignerMode>,
    payment_header: Option<String>,
    secrets: &Secrets,
    nonce_reader: Arc<dyn NonceReader>,
) -> Result<SigningSource, ResolverError> {
    match signer_mode.unwrap_or_default() {
        SignerMode::StaticHeader => {
            let header_value = secrets
                .x402_static_payment_header
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ResolverError::MissingStaticHeader("X402_STATIC_PAYMENT_HEADER".to_string())
                })?
                .to_string();
            Ok(SigningSource::StaticHeader {
                header_name: payment_header.unwrap_or_else(|| crate::types::DEFAULT_PAYMENT_HEADER.to_string()),
                header_value,
            })
        }
        SignerMode::EnvPk => {
            let raw = secrets
                .x402_private_key
                .as_deref()
                .ok_or_else(|| ResolverError::MissingPrivateKey("X402_PRIVATE_KEY".to_string()))?;
            let normalized = normalize_private_key(raw)
                .ok_or_else(|| ResolverError::MissingPrivateKey("X402_PRIVATE_KEY".to_string()))?;
            let signer: PrivateKeySigner = normalized.parse().map_err(|_| ResolverError::InvalidPrivateKey)?;
            let signer = Arc::new(signer);
            let nonce_reader = nonce_reader.clone();
            let signature_fn: crate::types::SignatureFn = Arc::new(move |input: SignatureInput| {
                let signer = signer.clone();
                let nonce_reader = nonce_reader.clone();
                Box::pin(async move { sign_permit(signer, nonce_reader, input).await })
            });
            Ok(SigningSource::Signature { signature_fn })
        }
    }
}

/// Normalizes a raw private key string: accepts a leading `0X`, rewrites to lowercase `0x`, trims
/// whitespace, and validates against `^0x[0-9a-fA-F]{64}$` (§4.1, §8 scenario 6).
pub fn normalize_private_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let rewritten = if let Some(rest) = trimmed.strip_prefix("0X") {
        format!("0x{rest}")
    } else {
        trimmed.to_string()
    };
    let hex_part = rewritten.strip_prefix("0x")?;
    if hex_part.len() == 64 && hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(rewritten)
    } else {
        None
    }
}

async fn sign_permit(
    signer: Arc<PrivateKeySigner>,
    nonce_reader: Arc<dyn NonceReader>,
    input: SignatureInput,
) -> Result<SignatureOutput, SigningError> {
    let chain_descriptor = chain::resolve(&input.network);

    let asset: Address = input
        .asset
        .parse()
        .map_err(|_| SigningError::InvalidAssetAddress(input.asset.clone()))?;
    let spender: Address = input
        .facilitator_signer
        .parse()
        .map_err(|_| SigningError::InvalidFacilitatorAddress(input.facilitator_signer.clone()))?;
    let owner = signer.address();

    let nonce = nonce_reader
        .read_nonce(chain_descriptor, asset, owner)
        .await
        .map_err(|source| SigningError::NonceRead {
            owner: owner.to_string(),
            asset: input.asset.clone(),
            source,
        })?;

    let now = crate::timestamp::UnixTimestamp::try_now()?.seconds_since_epoch();
    let mut deadline = now + PERMIT_VALIDITY_SECONDS;
    if let Some(floor) = input.min_deadline_exclusive {
        if deadline <= floor {
            deadline = floor + 1;
        }
    }

    let value = U256::from_str_radix(&input.permit_cap, 10)
        .map_err(|_| SigningError::InvalidCap(input.permit_cap.clone()))?;

    let domain = eip712_domain! {
        name: input.token_name.clone(),
        version: input.token_version.clone(),
        chain_id: chain_descriptor.chain_id,
        verifying_contract: asset,
    };
    let permit = Permit {
        owner,
        spender,
        value,
        nonce,
        deadline: U256::from(deadline),
    };
    let signing_hash = permit.eip712_signing_hash(&domain);
    let signature = signer.sign_hash(&signing_hash).await.map_err(SigningError::SignHash)?;

    Ok(SignatureOutput {
        signature: format!("0x{}", alloy_primitives::hex::encode(signature.as_bytes())),
        nonce: nonce.to_string(),
        deadline: deadline.to_string(),
        account_address: owner.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_uppercase_0x_prefix() {
        let key = format!("0X{}", "a".repeat(64));
        let normalized = normalize_private_key(&key).unwrap();
        assert_eq!(normalized, format!("0x{}", "a".repeat(64)));
    }

    #[test]
    fn rejects_short_keys() {
        assert!(normalize_private_key("0x1234").is_none());
    }

    #[test]
    fn rejects_empty_string() {
        assert!(normalize_private_key("").is_none());
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let key = format!("  0x{}  ", "b".repeat(64));
        assert_eq!(normalize_private_key(&key).unwrap(), format!("0x{}", "b".repeat(64)));
    }

    #[test]
    fn static_header_mode_requires_non_empty_secret() {
        let secrets = Secrets { x402_static_payment_header: Some("  ".to_string()), ..Default::default() };
        let nonce_reader: Arc<dyn NonceReader> = Arc::new(MockNonceReader);
        let result = resolve_signing_source(Some(SignerMode::StaticHeader), None, &secrets, nonce_reader);
        assert!(matches!(result, Err(ResolverError::MissingStaticHeader(_))));
    }

    #[test]
    fn env_pk_mode_requires_private_key() {
        let secrets = Secrets::default();
        let nonce_reader: Arc<dyn NonceReader> = Arc::new(MockNonceReader);
        let result = resolve_signing_source(Some(SignerMode::EnvPk), None, &secrets, nonce_reader);
        assert!(matches!(result, Err(ResolverError::MissingPrivateKey(_))));
    }

    struct MockNonceReader;

    #[async_trait]
    impl NonceReader for MockNonceReader {
        async fn read_nonce(
            &self,
            _chain: chain::ChainDescriptor,
            _asset: Address,
            _owner: Address,
        ) -> Result<U256, Box<dyn std::error::Error + Send + Sync>> {
            Ok(U256::from(0u64))
        }
    }
}
