//! The data model shared between the resolver, the header factory, and the interceptor (§3).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Name of the HTTP header the authorization rides on, absent an override.
pub const DEFAULT_PAYMENT_HEADER: &str = "PAYMENT-SIGNATURE";

/// Default USDC-on-Base asset used when the router's `/v1/config` can't be fetched (§4.3).
pub const DEFAULT_BASE_USDC_ASSET: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

/// The signing domain: which network, token, and parties a Permit authorization is signed for.
///
/// Address fields are compared case-insensitively (§3 invariant) but stored exactly as given —
/// see [`RouterConfig::domain_eq`] rather than lower-casing the fields in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    pub network: String,
    pub asset: String,
    pub pay_to: String,
    pub facilitator_signer: String,
    pub token_name: String,
    pub token_version: String,
    pub payment_header: Option<String>,
}

impl RouterConfig {
    pub fn header_name(&self) -> &str {
        self.payment_header.as_deref().unwrap_or(DEFAULT_PAYMENT_HEADER)
    }

    /// True iff `(network, asset, payTo)` match, case-insensitively.
    pub fn domain_eq(&self, network: &str, asset: &str, pay_to: &str) -> bool {
        self.network.eq_ignore_ascii_case(network)
            && self.asset.eq_ignore_ascii_case(asset)
            && self.pay_to.eq_ignore_ascii_case(pay_to)
    }

    /// The fallback config used when `GET {routerBase}/v1/config` cannot be fetched or parsed
    /// (§4.3, §7 kind 2).
    pub fn default_for_network(network: Option<&str>) -> Self {
        Self {
            network: network.unwrap_or("eip155:8453").to_string(),
            asset: DEFAULT_BASE_USDC_ASSET.to_string(),
            pay_to: String::new(),
            facilitator_signer: String::new(),
            token_name: "USD Coin".to_string(),
            token_version: "2".to_string(),
            payment_header: None,
        }
    }
}

/// Input to a signing function: the domain plus the cap and optional deadline floor (§3).
#[derive(Debug, Clone)]
pub struct SignatureInput {
    pub network: String,
    pub asset: String,
    pub pay_to: String,
    pub facilitator_signer: String,
    pub token_name: String,
    pub token_version: String,
    pub permit_cap: String,
    pub min_deadline_exclusive: Option<u64>,
}

impl SignatureInput {
    pub fn from_config(config: &RouterConfig, permit_cap: String, min_deadline_exclusive: Option<u64>) -> Self {
        Self {
            network: config.network.clone(),
            asset: config.asset.clone(),
            pay_to: config.pay_to.clone(),
            facilitator_signer: config.facilitator_signer.clone(),
            token_name: config.token_name.clone(),
            token_version: config.token_version.clone(),
            permit_cap,
            min_deadline_exclusive,
        }
    }
}

/// Output of a signing function: everything the factory needs to assemble a payload (§3).
#[derive(Debug, Clone)]
pub struct SignatureOutput {
    pub signature: String,
    pub nonce: String,
    pub deadline: String,
    pub account_address: String,
}

/// The factory's memoized artifact (§3).
#[derive(Debug, Clone)]
pub struct CachedHeader {
    pub header_value: String,
    pub deadline: u64,
    pub max_value: String,
    pub network: String,
    pub asset: String,
    pub pay_to: String,
}

/// The safety margin (seconds) before `deadline` during which a cached header is stale (§3, §4.2).
pub const PRE_INVALIDATE_WINDOW_SECONDS: u64 = 60;

/// A signing function: given the current domain, cap, and deadline floor, produce a signature.
pub type SignatureFn = Arc<
    dyn Fn(SignatureInput) -> futures_boxed::BoxFuture<'static, Result<SignatureOutput, crate::error::SigningError>>
        + Send
        + Sync,
>;

/// Small local substitute for `futures::future::BoxFuture` so this crate doesn't need to pull in
/// the whole `futures` crate for one type alias.
pub mod futures_boxed {
    use std::future::Future;
    use std::pin::Pin;

    pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
}

/// Which signing source a [`crate::interceptor::PaymentInterceptor`] was built with (§3, §9).
#[derive(Clone)]
pub enum SigningSource {
    Signature { signature_fn: SignatureFn },
    StaticHeader { header_name: String, header_value: String },
}

/// Resolved secrets handed to the resolver. The core never reads the process environment itself;
/// the out-of-scope agent loop is responsible for populating this (§1, §4.1, ambient stack note in
/// SPEC_FULL.md §1).
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub x402_private_key: Option<String>,
    pub x402_static_payment_header: Option<String>,
}

/// Which signing source the resolver should build, defaulting to [`SignerMode::EnvPk`] (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignerMode {
    #[default]
    EnvPk,
    StaticHeader,
}

impl std::str::FromStr for SignerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "env_pk" => Ok(SignerMode::EnvPk),
            "static_header" => Ok(SignerMode::StaticHeader),
            other => Err(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------------------------

/// The JSON body that is serialized, then base64-encoded, into the payment header (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u8,
    pub accepted: AcceptedPayment,
    pub payload: PermitPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPayment {
    pub scheme: String,
    pub network: String,
    pub asset: String,
    pub pay_to: String,
    pub extra: PaymentExtra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentExtra {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermitPayload {
    pub authorization: PermitAuthorization,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitAuthorization {
    pub from: String,
    pub to: String,
    pub value: String,
    pub valid_before: String,
    pub nonce: String,
}

/// The x402 protocol version this crate emits (§3: `x402Version: 2`).
pub const X402_VERSION: u8 = 2;

/// The scheme name this crate emits (§3: `scheme: "upto"`).
pub const SCHEME_UPTO: &str = "upto";

/// A single requirement from the server's `PAYMENT-REQUIRED` challenge (§3, §4.3 step 3/5).
///
/// Parsed leniently from a [`serde_json::Value`] because the field casing and the cap field name
/// both vary in the wild — see [`PaymentRequirement::from_value`].
#[derive(Debug, Clone, Default)]
pub struct PaymentRequirement {
    pub network: Option<String>,
    pub asset: Option<String>,
    pub pay_to: Option<String>,
    pub extra_name: Option<String>,
    pub extra_version: Option<String>,
    pub max_amount_required: Option<String>,
}

impl PaymentRequirement {
    pub fn from_value(value: &Value) -> Self {
        let pay_to = str_field(value, "payTo").or_else(|| str_field(value, "pay_to"));
        let extra = value.get("extra");
        let extra_name = extra.and_then(|e| str_field(e, "name"));
        let extra_version = extra.and_then(|e| str_field(e, "version"));
        let max_amount_required = extra.and_then(|e| {
            ["maxAmountRequired", "max_amount_required", "maxAmount", "max_amount", "amount"]
                .iter()
                .find_map(|key| str_field(e, key))
        });
        Self {
            network: str_field(value, "network"),
            asset: str_field(value, "asset"),
            pay_to,
            extra_name,
            extra_version,
            max_amount_required,
        }
    }
}

/// The server challenge header, base64-decoded then JSON-parsed (§3, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequiredHeader {
    pub accepts: Vec<Value>,
}

impl PaymentRequiredHeader {
    /// The first accepted requirement, the only one the core reads (§3).
    pub fn first_requirement(&self) -> Option<PaymentRequirement> {
        self.accepts.first().map(PaymentRequirement::from_value)
    }
}

/// A normalized view of a 401/402 response body (§3, §7 kind 4).
#[derive(Debug, Clone, Default)]
pub struct ErrorResponse {
    pub code: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl ErrorResponse {
    /// Parses either the flat `{code, error, message}` shape or a nested
    /// `error: {code|type, message|error}` shape (§4.3 step 1, §9).
    pub fn from_body(body: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(body).ok()?;
        let nested = value.get("error").filter(|e| e.is_object());
        if let Some(nested) = nested {
            let code = str_field(nested, "code").or_else(|| str_field(nested, "type"));
            let message = str_field(nested, "message").or_else(|| str_field(nested, "error"));
            return Some(Self { code, error: None, message });
        }
        let code = str_field(&value, "code");
        let error = str_field(&value, "error");
        let message = str_field(&value, "message");
        if code.is_none() && error.is_none() && message.is_none() {
            return None;
        }
        Some(Self { code, error, message })
    }

    /// Classifies the error against the retriable set named in §4.3 step 4.
    pub fn is_retriable(&self) -> bool {
        const CODES: [&str; 3] = ["cap_exhausted", "session_closed", "settlement_blocked"];
        const PHRASES: [&str; 4] = [
            "cap exhausted",
            "session closed",
            "settlement blocked",
            "blocked after previous settlement",
        ];
        if let Some(code) = &self.code {
            return CODES.contains(&code.as_str());
        }
        let haystack = format!(
            "{}{}",
            self.error.as_deref().unwrap_or_default(),
            self.message.as_deref().unwrap_or_default()
        )
        .to_lowercase();
        PHRASES.iter().any(|phrase| haystack.contains(phrase))
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(ToOwned::to_owned)
}
