#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Reqwest middleware for transparent [x402](https://www.x402.org)-style "upto" payments.
//!
//! This crate signs and attaches EIP-2612 `Permit` authorizations to outbound requests
//! addressed at a payment-gated router, and reacts to the router's `401`/`402` payment
//! challenges by refreshing those authorizations and retrying exactly once. It is the client
//! side of a protocol in which each chargeable request carries a base64-encoded, signed
//! authorization granting the router the right to draw up to some cap of a stablecoin from a
//! spender account on an EVM-compatible chain.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use reqwest::Client;
//! use std::sync::Arc;
//! use x402_upto_reqwest::{
//!     PaymentInterceptor, PaymentInterceptorConfig, Secrets, SignerMode, WithPayments, WithPaymentsBuild,
//!     resolve_signing_source,
//! };
//!
//! # struct MyNonceReader;
//! # #[async_trait::async_trait]
//! # impl x402_upto_reqwest::NonceReader for MyNonceReader {
//! #     async fn read_nonce(
//! #         &self,
//! #         _chain: x402_upto_reqwest::ChainDescriptor,
//! #         _asset: alloy_primitives::Address,
//! #         _owner: alloy_primitives::Address,
//! #     ) -> Result<alloy_primitives::U256, Box<dyn std::error::Error + Send + Sync>> {
//! #         unimplemented!()
//! #     }
//! # }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let secrets = Secrets { x402_private_key: Some("0x...".to_string()), ..Default::default() };
//! let signing_source = resolve_signing_source(Some(SignerMode::EnvPk), None, &secrets, Arc::new(MyNonceReader))?;
//!
//! let interceptor = PaymentInterceptor::new(PaymentInterceptorConfig {
//!     router_url: "https://router.example.com".parse()?,
//!     permit_cap: "1000000".to_string(),
//!     signing_source,
//!     initial_config: None,
//!     network: None,
//! });
//!
//! let client = Client::new().with_payments(interceptor).build();
//! # let _ = client;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Three components carry the authorization lifecycle:
//! - [`resolve_signing_source`] turns `{ signerMode, paymentHeader, secrets }` into a
//!   [`SigningSource`], choosing between an on-chain `Permit` signer and a static bearer header.
//! - [`HeaderFactory`] caches one encoded authorization per `(cap, network, asset, payTo)` tuple,
//!   re-signing on miss, forced refresh, or domain change.
//! - [`PaymentInterceptor`] is the `reqwest_middleware::Middleware` entry point: URL gating,
//!   header attach, challenge parsing, and the exactly-once retry policy.

mod builder;
mod chain;
mod error;
mod factory;
mod interceptor;
mod signer;
mod timestamp;
mod types;
mod util;

pub use builder::{WithPayments, WithPaymentsBuild, WithPaymentsBuilder};
pub use chain::{BASE, BASE_SEPOLIA, ChainDescriptor, ETHEREUM};
pub use error::{FactoryError, InterceptorError, ResolverError, SigningError};
pub use factory::{GetHeaderOptions, HeaderFactory, IssuedHeader};
pub use interceptor::{PaymentInterceptor, PaymentInterceptorConfig};
pub use signer::{NonceReader, normalize_private_key, resolve_signing_source};
pub use timestamp::UnixTimestamp;
pub use types::{
    AcceptedPayment, CachedHeader, DEFAULT_BASE_USDC_ASSET, DEFAULT_PAYMENT_HEADER, ErrorResponse, PaymentExtra,
    PaymentPayload, PaymentRequirement, PaymentRequiredHeader, PermitAuthorization, PermitPayload, RouterConfig,
    SCHEME_UPTO, Secrets, SignatureFn, SignatureInput, SignatureOutput, SignerMode, SigningSource, X402_VERSION,
};
pub use util::Base64Bytes;
