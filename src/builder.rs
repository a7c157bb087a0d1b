//! Builder utilities for attaching a [`PaymentInterceptor`] to a `reqwest` client, mirroring the
//! teacher crate's `ReqwestWithPayments`/`ReqwestWithPaymentsBuild` shape.

use reqwest::{Client, ClientBuilder};

use crate::interceptor::PaymentInterceptor;

/// Adds a [`PaymentInterceptor`] to a `reqwest` [`Client`] or [`ClientBuilder`].
///
/// ```rust,no_run
/// use reqwest::Client;
/// use x402_upto_reqwest::{PaymentInterceptor, PaymentInterceptorConfig, WithPayments, WithPaymentsBuild};
///
/// # fn interceptor() -> PaymentInterceptor { unimplemented!() }
/// let client = Client::new()
///     .with_payments(interceptor())
///     .build();
/// ```
pub trait WithPayments<A> {
    fn with_payments(self, interceptor: PaymentInterceptor) -> WithPaymentsBuilder<A>;
}

impl WithPayments<Client> for Client {
    fn with_payments(self, interceptor: PaymentInterceptor) -> WithPaymentsBuilder<Client> {
        WithPaymentsBuilder { inner: self, interceptor }
    }
}

impl WithPayments<ClientBuilder> for ClientBuilder {
    fn with_payments(self, interceptor: PaymentInterceptor) -> WithPaymentsBuilder<ClientBuilder> {
        WithPaymentsBuilder { inner: self, interceptor }
    }
}

/// Intermediate builder produced by [`WithPayments::with_payments`].
pub struct WithPaymentsBuilder<A> {
    inner: A,
    interceptor: PaymentInterceptor,
}

/// Finishes building the `reqwest_middleware`-wrapped client.
pub trait WithPaymentsBuild {
    type BuildResult;
    type BuilderResult;

    fn build(self) -> Self::BuildResult;
    fn builder(self) -> Self::BuilderResult;
}

impl WithPaymentsBuild for WithPaymentsBuilder<Client> {
    type BuildResult = reqwest_middleware::ClientWithMiddleware;
    type BuilderResult = reqwest_middleware::ClientBuilder;

    fn build(self) -> Self::BuildResult {
        self.builder().build()
    }

    fn builder(self) -> Self::BuilderResult {
        reqwest_middleware::ClientBuilder::new(self.inner).with(self.interceptor)
    }
}

impl WithPaymentsBuild for WithPaymentsBuilder<ClientBuilder> {
    type BuildResult = Result<reqwest_middleware::ClientWithMiddleware, reqwest::Error>;
    type BuilderResult = Result<reqwest_middleware::ClientBuilder, reqwest::Error>;

    fn build(self) -> Self::BuildResult {
        let builder = self.builder()?;
        Ok(builder.build())
    }

    fn builder(self) -> Self::BuilderResult {
        let client = self.inner.build()?;
        Ok(reqwest_middleware::ClientBuilder::new(client).with(self.interceptor))
    }
}
