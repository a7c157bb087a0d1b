//! The fetch interceptor (§4.3): URL gating, header attach, challenge parsing, and the
//! exactly-once retry policy, wired up as a [`reqwest_middleware::Middleware`] following the
//! teacher crate's own integration shape (`X402Client`/`X402Payments`).

use std::sync::Arc;

use async_trait::async_trait;
use http::{Extensions, HeaderMap, HeaderName, HeaderValue, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as RqmResult};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::error::InterceptorError;
use crate::factory::{GetHeaderOptions, HeaderFactory};
#[cfg(test)]
use crate::types::DEFAULT_PAYMENT_HEADER;
use crate::types::{ErrorResponse, PaymentRequirement, RouterConfig, SigningSource};
use crate::util::Base64Bytes;

/// The URL path suffixes that never carry a charge (§4.3): the router's own config/model
/// discovery endpoints. Signing for these would be wasteful and, for `/v1/config`, circular.
const UNCHARGED_PATH_SUFFIXES: [&str; 4] = ["/v1/config", "/config", "/v1/models", "/models"];

/// What [`PaymentInterceptor::new`] is constructed with (§4.3).
pub struct PaymentInterceptorConfig {
    pub router_url: url::Url,
    pub permit_cap: String,
    pub signing_source: SigningSource,
    pub initial_config: Option<RouterConfig>,
    pub network: Option<String>,
}

/// A `reqwest_middleware::Middleware` that signs and attaches payment authorizations for
/// requests addressed at a payment-gated router, retrying exactly once on a classifiable
/// payment challenge (§4.3).
pub struct PaymentInterceptor {
    router_origin: url::Origin,
    router_base: String,
    permit_cap: String,
    signing_source: SigningSource,
    initial_config: Option<RouterConfig>,
    network: Option<String>,
    config_http: reqwest::Client,
    factory: tokio::sync::OnceCell<Arc<HeaderFactory>>,
}

impl PaymentInterceptor {
    pub fn new(config: PaymentInterceptorConfig) -> Self {
        let router_base = config.router_url.as_str().trim_end_matches('/').to_string();
        Self {
            router_origin: config.router_url.origin(),
            router_base,
            permit_cap: config.permit_cap,
            signing_source: config.signing_source,
            initial_config: config.initial_config,
            network: config.network,
            config_http: reqwest::Client::new(),
            factory: tokio::sync::OnceCell::new(),
        }
    }

    /// §4.3 URL gating: chargeable iff same origin as the router and not one of the
    /// config/model discovery paths.
    fn is_chargeable(&self, url: &url::Url) -> bool {
        if url.origin() != self.router_origin {
            return false;
        }
        let path = url.path();
        !UNCHARGED_PATH_SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
    }

    /// Lazily builds the header factory, memoized for the interceptor's lifetime (§4.3, §5).
    async fn factory(&self) -> Arc<HeaderFactory> {
        self.factory
            .get_or_init(|| async {
                let config = match &self.initial_config {
                    Some(config) => config.clone(),
                    None => self
                        .fetch_router_config()
                        .await
                        .unwrap_or_else(|| RouterConfig::default_for_network(self.network.as_deref())),
                };
                Arc::new(HeaderFactory::new(self.signing_source.clone(), self.permit_cap.clone(), config))
            })
            .await
            .clone()
    }

    /// `GET {routerBase}/v1/config` (§6). Any failure at any stage — transport, non-OK status,
    /// or a response shape that doesn't parse — is swallowed; the caller falls back to the
    /// default config (§4.3, §7 kind 2).
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.interceptor.fetch_router_config", skip(self)))]
    async fn fetch_router_config(&self) -> Option<RouterConfig> {
        let url = format!("{}/v1/config", self.router_base);
        let response = self.config_http.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: serde_json::Value = response.json().await.ok()?;
        let network_entry = body.get("networks")?.as_array()?.first()?;

        let network = network_entry.get("network_id")?.as_str()?.to_string();
        let asset = network_entry.get("asset")?.get("address")?.as_str()?.to_string();
        let pay_to = network_entry.get("pay_to").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let payment_header = body.get("payment_header").and_then(|v| v.as_str()).map(ToOwned::to_owned);
        let eip712 = body.get("eip712_config");
        let token_name = eip712
            .and_then(|e| e.get("domain_name"))
            .and_then(|v| v.as_str())
            .unwrap_or("USD Coin")
            .to_string();
        let token_version =
            eip712.and_then(|e| e.get("domain_version")).and_then(|v| v.as_str()).unwrap_or("2").to_string();

        Some(RouterConfig {
            network,
            asset,
            facilitator_signer: pay_to.clone(),
            pay_to,
            token_name,
            token_version,
            payment_header,
        })
    }
}

#[async_trait]
impl Middleware for PaymentInterceptor {
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "x402.interceptor.handle", skip(self, req, extensions, next), fields(url = %req.url()))
    )]
    async fn handle(&self, req: Request, extensions: &mut Extensions, next: Next<'_>) -> RqmResult<Response> {
        if !self.is_chargeable(req.url()) {
            return next.run(req, extensions).await;
        }

        let SigningSource::StaticHeader { header_name, header_value } = &self.signing_source else {
            return self.handle_signed(req, extensions, next).await;
        };

        let mut req = req;
        insert_header(&mut req, header_name, header_value)?;
        next.run(req, extensions).await
    }
}

impl PaymentInterceptor {
    async fn handle_signed(&self, req: Request, extensions: &mut Extensions, next: Next<'_>) -> RqmResult<Response> {
        let factory = self.factory().await;

        // Cloned before the header is attached, so the retry starts from a pristine request.
        let retry_req = req.try_clone();

        let issued = factory
            .get_header(GetHeaderOptions::default())
            .await
            .map_err(|e| into_rqm_error(InterceptorError::from(e)))?;

        let mut req = req;
        insert_header(&mut req, &issued.header_name, &issued.header_value)?;

        let res = next.clone().run(req, extensions).await?;

        let status = res.status();
        if status != StatusCode::UNAUTHORIZED && status != StatusCode::PAYMENT_REQUIRED {
            #[cfg(feature = "telemetry")]
            tracing::trace!(%status, "not a payment challenge, returning response");
            return Ok(res);
        }

        let requirement = parse_payment_required_header(res.headers()).and_then(|h| h.first_requirement());
        let (res, body) = reconstruct_with_body(res).await.map_err(into_rqm_error)?;
        let error = ErrorResponse::from_body(&body);

        if let Some(requirement) = &requirement {
            let current = factory.get_config();
            factory.update_config(overlay_config(&current, requirement));
        }

        let retriable = error.as_ref().is_some_and(ErrorResponse::is_retriable);
        if !retriable {
            #[cfg(feature = "telemetry")]
            tracing::debug!(%status, "payment challenge is not retriable, returning original response");
            return Ok(res);
        }

        #[cfg(feature = "telemetry")]
        tracing::info!(%status, "retrying once with a refreshed payment header");

        factory.invalidate();
        let cap_override = requirement.as_ref().and_then(|r| r.max_amount_required.clone());
        let retry_options = GetHeaderOptions { cap_override, min_deadline_exclusive: Some(issued.deadline) };
        let retry_issued = factory
            .get_header(retry_options)
            .await
            .map_err(|e| into_rqm_error(InterceptorError::from(e)))?;

        let mut retry_req = retry_req.ok_or_else(|| into_rqm_error(InterceptorError::RequestNotCloneable))?;
        insert_header(&mut retry_req, &retry_issued.header_name, &retry_issued.header_value)?;

        next.run(retry_req, extensions).await
    }
}

fn into_rqm_error(error: InterceptorError) -> reqwest_middleware::Error {
    error.into()
}

fn insert_header(req: &mut Request, name: &str, value: &str) -> Result<(), InterceptorError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| InterceptorError::InvalidHeaderName(name.to_string()))?;
    let header_value = HeaderValue::from_str(value)?;
    req.headers_mut().insert(header_name, header_value);
    Ok(())
}

fn parse_payment_required_header(headers: &HeaderMap) -> Option<crate::types::PaymentRequiredHeader> {
    let raw = headers.get("PAYMENT-REQUIRED")?.to_str().ok()?;
    let decoded = Base64Bytes::from(raw.as_bytes()).decode().ok()?;
    serde_json::from_slice(&decoded).ok()
}

/// §4.3 step 3: overlays the parts of the requirement that are present, retaining the current
/// value for anything absent. `facilitatorSigner` tracks the requirement's `payTo` independently
/// from `pay_to` itself, since the two may already have diverged from an earlier challenge.
fn overlay_config(current: &RouterConfig, requirement: &PaymentRequirement) -> RouterConfig {
    RouterConfig {
        network: requirement.network.clone().unwrap_or_else(|| current.network.clone()),
        asset: requirement.asset.clone().unwrap_or_else(|| current.asset.clone()),
        pay_to: requirement.pay_to.clone().unwrap_or_else(|| current.pay_to.clone()),
        facilitator_signer: requirement.pay_to.clone().unwrap_or_else(|| current.facilitator_signer.clone()),
        token_name: requirement.extra_name.clone().unwrap_or_else(|| current.token_name.clone()),
        token_version: requirement.extra_version.clone().unwrap_or_else(|| current.token_version.clone()),
        payment_header: current.payment_header.clone(),
    }
}

/// Reads the whole body, then rebuilds a fresh [`Response`] carrying the same status, headers,
/// and body bytes, so the caller can still consume it after this middleware has already read it
/// once to classify the error (§4.3 step 1). The rebuilt response loses the original request URL
/// that `reqwest::Response::url()` would have reported; nothing downstream of this middleware
/// relies on it.
async fn reconstruct_with_body(response: Response) -> Result<(Response, bytes::Bytes), InterceptorError> {
    let status = response.status();
    let version = response.version();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(InterceptorError::ResponseBody)?;

    let mut builder = http::Response::builder().status(status).version(version);
    if let Some(map) = builder.headers_mut() {
        *map = headers;
    }
    let http_response = builder
        .body(reqwest::Body::from(body.clone()))
        .expect("status and headers copied from a real response are always valid");

    Ok((Response::from(http_response), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> RouterConfig {
        RouterConfig {
            network: "eip155:8453".to_string(),
            asset: "0xaaaa000000000000000000000000000000aaaa".to_string(),
            pay_to: "0x1111000000000000000000000000000000000000".to_string(),
            facilitator_signer: "0x1111000000000000000000000000000000000000".to_string(),
            token_name: "USD Coin".to_string(),
            token_version: "2".to_string(),
            payment_header: None,
        }
    }

    #[test]
    fn overlay_retains_facilitator_signer_when_pay_to_absent() {
        let current = sample_config();
        let requirement = PaymentRequirement { network: None, asset: None, pay_to: None, ..Default::default() };
        let next = overlay_config(&current, &requirement);
        assert_eq!(next.facilitator_signer, current.facilitator_signer);
        assert_eq!(next.pay_to, current.pay_to);
    }

    #[test]
    fn overlay_moves_facilitator_signer_with_new_pay_to() {
        let current = sample_config();
        let requirement = PaymentRequirement {
            pay_to: Some("0x2222000000000000000000000000000000000000".to_string()),
            ..Default::default()
        };
        let next = overlay_config(&current, &requirement);
        assert_eq!(next.pay_to, "0x2222000000000000000000000000000000000000");
        assert_eq!(next.facilitator_signer, "0x2222000000000000000000000000000000000000");
    }

    #[test]
    fn chargeable_gating_excludes_config_and_models_paths() {
        let interceptor = PaymentInterceptor::new(PaymentInterceptorConfig {
            router_url: url::Url::parse("https://router.example.com").unwrap(),
            permit_cap: "1000000".to_string(),
            signing_source: SigningSource::StaticHeader {
                header_name: DEFAULT_PAYMENT_HEADER.to_string(),
                header_value: "x".to_string(),
            },
            initial_config: None,
            network: None,
        });

        assert!(interceptor.is_chargeable(&url::Url::parse("https://router.example.com/v1/chat").unwrap()));
        assert!(!interceptor.is_chargeable(&url::Url::parse("https://router.example.com/v1/config").unwrap()));
        assert!(!interceptor.is_chargeable(&url::Url::parse("https://router.example.com/v1/models").unwrap()));
        assert!(!interceptor.is_chargeable(&url::Url::parse("https://other.example.com/v1/chat").unwrap()));
    }

    #[tokio::test]
    async fn reconstructed_response_preserves_status_headers_and_body() {
        let http_response = http::Response::builder()
            .status(402)
            .header("x-test", "value")
            .body(reqwest::Body::from("hello"))
            .unwrap();
        let response = Response::from(http_response);

        let (rebuilt, body) = reconstruct_with_body(response).await.unwrap();
        assert_eq!(rebuilt.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(rebuilt.headers().get("x-test").unwrap(), "value");
        assert_eq!(body, "hello");
    }
}
