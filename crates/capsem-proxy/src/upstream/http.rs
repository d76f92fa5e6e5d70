//! `reqwest`-backed upstream client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use capsem_core::error::{CapsemError, Result};

use super::{ByteStream, Provider, UpstreamClient, UpstreamRequest};
use crate::config::ProvidersSection;

pub struct HttpUpstream {
    client: reqwest::Client,
    gemini_base_url: String,
    openai_base_url: String,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(providers: &ProvidersSection, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| CapsemError::Config(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            gemini_base_url: providers.gemini_base_url.trim_end_matches('/').to_string(),
            openai_base_url: providers.openai_base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, req: &UpstreamRequest<'_>) -> String {
        let base = match req.provider {
            Provider::Gemini => &self.gemini_base_url,
            Provider::OpenAi => &self.openai_base_url,
        };
        match &req.query {
            Some(q) => format!("{base}{}?{q}", req.path),
            None => format!("{base}{}", req.path),
        }
    }

    fn build(&self, req: &UpstreamRequest<'_>) -> reqwest::RequestBuilder {
        let rb = self
            .client
            .post(self.url(req))
            .header(CONTENT_TYPE, "application/json")
            .body(req.body.clone());
        match req.provider {
            Provider::Gemini => rb.header("x-goog-api-key", req.credential.expose()),
            Provider::OpenAi => {
                rb.header(AUTHORIZATION, format!("Bearer {}", req.credential.expose()))
            }
        }
    }

    async fn send(&self, rb: reqwest::RequestBuilder, provider: Provider) -> Result<reqwest::Response> {
        let resp = rb.send().await.map_err(|e| transport(provider, e))?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(provider = provider.as_str(), status = status.as_u16(), "upstream returned error status");
            return Err(CapsemError::UpstreamStatus(status.as_u16()));
        }
        Ok(resp)
    }
}

fn transport(provider: Provider, e: reqwest::Error) -> CapsemError {
    tracing::warn!(provider = provider.as_str(), error = %e, timeout = e.is_timeout(), "upstream transport error");
    CapsemError::UpstreamTransport(e.to_string())
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn generate(&self, req: UpstreamRequest<'_>) -> Result<Bytes> {
        let rb = self.build(&req).timeout(self.timeout);
        let resp = self.send(rb, req.provider).await?;
        resp.bytes().await.map_err(|e| transport(req.provider, e))
    }

    async fn stream(&self, req: UpstreamRequest<'_>) -> Result<ByteStream> {
        // The timeout bounds the wait for response headers only; an open
        // stream may run as long as the provider keeps sending.
        let provider = req.provider;
        let resp = tokio::time::timeout(self.timeout, self.send(self.build(&req), provider))
            .await
            .map_err(|_| CapsemError::UpstreamTransport("timed out waiting for upstream".into()))??;
        Ok(resp
            .bytes_stream()
            .map_err(move |e| transport(provider, e))
            .boxed())
    }
}
