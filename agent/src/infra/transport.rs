//! HTTP(S) exchange transport.
//!
//! One exchange is one POST of an encoded batch; the reply body is the
//! inbound batch. With a pinned certificate the TLS handshake rejects any
//! other server certificate before the request is written.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fleet_common::{Batch, Message, decode_batch, encode_batch};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};

use crate::application::ports::MessageTransport;
use crate::domain::{ExchangeError, TransportError};
use crate::infra::pinning::{PinnedCertVerifier, PinnedCertificate};

/// Content type of encoded batches.
pub const BATCH_CONTENT_TYPE: &str = "application/x-fleet-batch";

pub const USER_AGENT_VALUE: &str = concat!("fleet-agent/", env!("CARGO_PKG_VERSION"));

pub const COMPUTER_ID_HEADER: &str = "x-computer-id";
pub const MESSAGE_API_HEADER: &str = "x-message-api";

/// Timeouts and proxy handling for [`HttpTransport`].
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Honour `HTTP(S)_PROXY` from the environment.
    pub use_env_proxy: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            use_env_proxy: true,
        }
    }
}

/// Exchange transport bound to one URL.
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport. The pin, if any, is fixed for the transport's
    /// lifetime.
    pub fn new(
        url: impl Into<String>,
        pin: Option<PinnedCertificate>,
        options: TransportOptions,
    ) -> Result<Self> {
        let url = url.into();
        let mut builder = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout);
        if !options.use_env_proxy {
            builder = builder.no_proxy();
        }

        builder = match pin {
            Some(pin) => {
                if !url.starts_with("https://") {
                    anyhow::bail!("certificate pin configured for non-https URL {url}");
                }
                let provider = Arc::new(rustls::crypto::ring::default_provider());
                let verifier = PinnedCertVerifier::new(pin, &provider)?;
                let tls = rustls::ClientConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()
                    .context("TLS protocol versions")?
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(verifier))
                    .with_no_client_auth();
                builder.use_preconfigured_tls(tls)
            }
            None => builder.use_rustls_tls(),
        };

        let client = builder.build().context("failed to build HTTP client")?;
        Ok(Self { url, client })
    }

    fn classify(&self, err: &reqwest::Error) -> ExchangeError {
        if let Some(detail) = certificate_failure(err) {
            tracing::error!(url = %self.url, error = %detail, "server certificate verification failed");
            return ExchangeError::CertificateVerification(detail);
        }
        if err.is_timeout() {
            return TransportError::Timeout.into();
        }
        if err.is_connect() {
            return TransportError::Connect {
                url: self.url.clone(),
                reason: error_chain(err),
            }
            .into();
        }
        TransportError::Request(error_chain(err)).into()
    }
}

/// Find a rustls certificate error anywhere in the source chain.
fn certificate_failure(err: &reqwest::Error) -> Option<String> {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(tls) = as_certificate_error(e) {
            return Some(tls.to_string());
        }
        // io::Error::source skips the wrapped error itself.
        if let Some(inner) = e
            .downcast_ref::<std::io::Error>()
            .and_then(std::io::Error::get_ref)
        {
            if let Some(tls) = as_certificate_error(inner) {
                return Some(tls.to_string());
            }
        }
        current = e.source();
    }
    // Connector layers that box errors without exposing them as a source
    // still carry the rustls variant in their debug form.
    let debug = format!("{err:?}");
    debug
        .contains("InvalidCertificate")
        .then(|| error_chain(err))
}

fn as_certificate_error<'a>(e: &'a (dyn StdError + 'static)) -> Option<&'a rustls::Error> {
    e.downcast_ref::<rustls::Error>()
        .filter(|tls| matches!(tls, rustls::Error::InvalidCertificate(_)))
}

fn error_chain(err: &dyn StdError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        text.push_str(": ");
        text.push_str(&e.to_string());
        source = e.source();
    }
    text
}

#[async_trait]
impl MessageTransport for HttpTransport {
    async fn exchange(
        &self,
        batch: &[Message],
        computer_id: Option<&str>,
        message_api: &str,
    ) -> Result<Batch, ExchangeError> {
        let payload = encode_batch(batch)?;
        tracing::debug!(url = %self.url, messages = batch.len(), bytes = payload.len(), "sending batch");

        let mut request = self
            .client
            .post(self.url.as_str())
            .header(CONTENT_TYPE, BATCH_CONTENT_TYPE)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(MESSAGE_API_HEADER, message_api);
        if let Some(id) = computer_id {
            request = request.header(COMPUTER_ID_HEADER, id);
        }

        let response = request
            .body(payload)
            .send()
            .await
            .map_err(|e| self.classify(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()).into());
        }
        let body = response.bytes().await.map_err(|e| self.classify(&e))?;
        let inbound = decode_batch(&body)?;
        tracing::debug!(url = %self.url, messages = inbound.len(), "received batch");
        Ok(inbound)
    }

    fn url(&self) -> &str {
        &self.url
    }
}
