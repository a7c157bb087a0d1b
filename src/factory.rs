//! The header factory (§4.2): caches one encoded authorization per `(cap, network, asset, payTo)`
//! tuple, re-signing on miss, forced refresh, or domain change.

use std::sync::Mutex;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::error::FactoryError;
use crate::types::{
    AcceptedPayment, CachedHeader, PaymentExtra, PaymentPayload, PermitAuthorization, PermitPayload,
    RouterConfig, SignatureInput, SigningSource, PRE_INVALIDATE_WINDOW_SECONDS, SCHEME_UPTO, X402_VERSION,
};

/// What [`HeaderFactory::get_header`] returns on success.
#[derive(Debug, Clone)]
pub struct IssuedHeader {
    pub header_name: String,
    pub header_value: String,
    pub deadline: u64,
}

/// Parameters accepted by [`HeaderFactory::get_header`] (§4.2).
#[derive(Debug, Clone, Default)]
pub struct GetHeaderOptions {
    pub cap_override: Option<String>,
    pub min_deadline_exclusive: Option<u64>,
}

/// Owns one `(config, cached)` pair and the signing source used to refresh it (§4.2).
pub struct HeaderFactory {
    signing_source: SigningSource,
    default_permit_cap: String,
    config: Mutex<RouterConfig>,
    cached: Mutex<Option<CachedHeader>>,
}

impl HeaderFactory {
    pub fn new(signing_source: SigningSource, default_permit_cap: String, config: RouterConfig) -> Self {
        Self {
            signing_source,
            default_permit_cap,
            config: Mutex::new(config),
            cached: Mutex::new(None),
        }
    }

    /// Read-only snapshot of the current config (§4.2).
    pub fn get_config(&self) -> RouterConfig {
        self.config.lock().expect("config mutex poisoned").clone()
    }

    /// Replaces the config. Does not itself invalidate the cache — the next `get_header` call
    /// misses naturally once the domain tuple no longer matches (§4.2).
    pub fn update_config(&self, next: RouterConfig) {
        *self.config.lock().expect("config mutex poisoned") = next;
    }

    /// Unconditionally clears the cache (§4.2).
    pub fn invalidate(&self) {
        *self.cached.lock().expect("cache mutex poisoned") = None;
    }

    /// Returns a header for the current request, reusing the cache when it is still valid and
    /// signing fresh otherwise (§4.2).
    ///
    /// The cache lock is only ever held across the synchronous reuse check or the final
    /// synchronous write, never across the signing `.await` (§5) — so this can race with a
    /// concurrent call and duplicate a signature; the design tolerates that explicitly.
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.factory.get_header", skip(self)))]
    pub async fn get_header(&self, options: GetHeaderOptions) -> Result<IssuedHeader, FactoryError> {
        let config = self.get_config();
        let effective_cap = options.cap_override.clone().unwrap_or_else(|| self.default_permit_cap.clone());

        if options.min_deadline_exclusive.is_none() {
            if let Some(reused) = self.try_reuse(&config, &effective_cap) {
                #[cfg(feature = "telemetry")]
                tracing::debug!(network = %config.network, "reusing cached payment header");
                return Ok(reused);
            }
        }

        #[cfg(feature = "telemetry")]
        tracing::debug!(network = %config.network, cap = %effective_cap, "signing a fresh payment header");

        let input = SignatureInput::from_config(&config, effective_cap.clone(), options.min_deadline_exclusive);
        let signature_fn = match &self.signing_source {
            SigningSource::Signature { signature_fn } => signature_fn.clone(),
            SigningSource::StaticHeader { .. } => {
                unreachable!("get_header is only called in signature mode; static mode short-circuits earlier")
            }
        };
        let output = signature_fn(input).await?;

        let deadline: u64 = output
            .deadline
            .parse()
            .map_err(|_| FactoryError::InvalidDeadline(output.deadline.clone()))?;

        let payload = PaymentPayload {
            x402_version: X402_VERSION,
            accepted: AcceptedPayment {
                scheme: SCHEME_UPTO.to_string(),
                network: config.network.clone(),
                asset: config.asset.clone(),
                pay_to: config.pay_to.clone(),
                extra: PaymentExtra { name: config.token_name.clone(), version: config.token_version.clone() },
            },
            payload: PermitPayload {
                authorization: PermitAuthorization {
                    from: output.account_address,
                    to: config.facilitator_signer.clone(),
                    value: effective_cap.clone(),
                    valid_before: output.deadline.clone(),
                    nonce: output.nonce,
                },
                signature: output.signature,
            },
        };
        let json = serde_json::to_vec(&payload)?;
        let header_value = crate::util::Base64Bytes::encode(&json).to_string();

        *self.cached.lock().expect("cache mutex poisoned") = Some(CachedHeader {
            header_value: header_value.clone(),
            deadline,
            max_value: effective_cap,
            network: config.network.clone(),
            asset: config.asset.clone(),
            pay_to: config.pay_to.clone(),
        });

        Ok(IssuedHeader { header_name: config.header_name().to_string(), header_value, deadline })
    }

    fn try_reuse(&self, config: &RouterConfig, effective_cap: &str) -> Option<IssuedHeader> {
        let cached = self.cached.lock().expect("cache mutex poisoned");
        let cached = cached.as_ref()?;
        let now = crate::timestamp::UnixTimestamp::try_now().ok()?.seconds_since_epoch();
        let domain_matches = cached.network.eq_ignore_ascii_case(&config.network)
            && cached.asset.eq_ignore_ascii_case(&config.asset)
            && cached.pay_to.eq_ignore_ascii_case(&config.pay_to);
        let cap_matches = cached.max_value == effective_cap;
        let fresh_enough = cached.deadline.saturating_sub(now) > PRE_INVALIDATE_WINDOW_SECONDS;
        if domain_matches && cap_matches && fresh_enough {
            Some(IssuedHeader {
                header_name: config.header_name().to_string(),
                header_value: cached.header_value.clone(),
                deadline: cached.deadline,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SignatureOutput, SigningSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_config() -> RouterConfig {
        RouterConfig {
            network: "eip155:8453".to_string(),
            asset: "0x8335589fCD6eDb6E08f4c7C32D4f71b54bdA02913".to_string(),
            pay_to: "0x1234000000000000000000000000000000005678".to_string(),
            facilitator_signer: "0x1234000000000000000000000000000000005678".to_string(),
            token_name: "USD Coin".to_string(),
            token_version: "2".to_string(),
            payment_header: None,
        }
    }

    fn counting_signer(call_count: Arc<AtomicUsize>, deadline: u64) -> SigningSource {
        SigningSource::Signature {
            signature_fn: Arc::new(move |input| {
                let call_count = call_count.clone();
                Box::pin(async move {
                    call_count.fetch_add(1, Ordering::SeqCst);
                    Ok(SignatureOutput {
                        signature: "0xsig".to_string(),
                        nonce: "1".to_string(),
                        deadline: (deadline + input.min_deadline_exclusive.unwrap_or(0)).to_string(),
                        account_address: "0x9999000000000000000000000000000000009999".to_string(),
                    })
                })
            }),
        }
    }

    #[tokio::test]
    async fn reuses_cache_across_calls_with_same_domain_and_cap() {
        let now = crate::timestamp::UnixTimestamp::try_now().unwrap().seconds_since_epoch();
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = HeaderFactory::new(counting_signer(calls.clone(), now + 600), "1000000".to_string(), test_config());

        let first = factory.get_header(GetHeaderOptions::default()).await.unwrap();
        let second = factory.get_header(GetHeaderOptions::default()).await.unwrap();

        assert_eq!(first.header_value, second.header_value);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn min_deadline_exclusive_always_bypasses_cache() {
        let now = crate::timestamp::UnixTimestamp::try_now().unwrap().seconds_since_epoch();
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = HeaderFactory::new(counting_signer(calls.clone(), now + 600), "1000000".to_string(), test_config());

        factory.get_header(GetHeaderOptions::default()).await.unwrap();
        factory
            .get_header(GetHeaderOptions { cap_override: None, min_deadline_exclusive: Some(now + 700) })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_resign() {
        let now = crate::timestamp::UnixTimestamp::try_now().unwrap().seconds_since_epoch();
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = HeaderFactory::new(counting_signer(calls.clone(), now + 600), "1000000".to_string(), test_config());

        factory.get_header(GetHeaderOptions::default()).await.unwrap();
        factory.invalidate();
        factory.get_header(GetHeaderOptions::default()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn update_config_with_new_domain_forces_a_resign() {
        let now = crate::timestamp::UnixTimestamp::try_now().unwrap().seconds_since_epoch();
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = HeaderFactory::new(counting_signer(calls.clone(), now + 600), "1000000".to_string(), test_config());

        factory.get_header(GetHeaderOptions::default()).await.unwrap();
        let mut next = test_config();
        next.asset = "0xdeaddeaddeaddeaddeaddeaddeaddeaddeaddead".to_string();
        factory.update_config(next);
        factory.get_header(GetHeaderOptions::default()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn deadline_inside_pre_invalidate_window_forces_a_resign() {
        let now = crate::timestamp::UnixTimestamp::try_now().unwrap().seconds_since_epoch();
        let calls = Arc::new(AtomicUsize::new(0));
        // first signature is valid for only 30s, well inside the 60s pre-invalidate window
        let factory = HeaderFactory::new(counting_signer(calls.clone(), now + 30), "1000000".to_string(), test_config());

        factory.get_header(GetHeaderOptions::default()).await.unwrap();
        factory.get_header(GetHeaderOptions::default()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn different_cap_override_forces_a_resign() {
        let now = crate::timestamp::UnixTimestamp::try_now().unwrap().seconds_since_epoch();
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = HeaderFactory::new(counting_signer(calls.clone(), now + 600), "1000000".to_string(), test_config());

        factory.get_header(GetHeaderOptions::default()).await.unwrap();
        factory
            .get_header(GetHeaderOptions { cap_override: Some("500000".to_string()), min_deadline_exclusive: None })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
