//! Upstream provider client.
//!
//! The gateway forwards the client's original request body to the provider
//! and hands back the raw response bytes, so whatever the provider returned
//! reaches the client byte for byte once the response gates pass.

pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use capsem_core::error::Result;
use capsem_core::identity::Credential;

pub use http::HttpUpstream;

/// Upstream wire protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Gemini,
    OpenAi,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Gemini, Provider::OpenAi];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
        }
    }
}

/// One outbound call.
#[derive(Debug)]
pub struct UpstreamRequest<'a> {
    pub provider: Provider,
    /// Path below the provider base URL, e.g. `/v1/chat/completions`.
    pub path: String,
    /// Raw query string without `?`.
    pub query: Option<String>,
    pub credential: &'a Credential,
    /// Original client body, forwarded unmodified.
    pub body: Bytes,
}

pub type ByteStream = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Non-streaming call; returns the raw success body.
    async fn generate(&self, req: UpstreamRequest<'_>) -> Result<Bytes>;

    /// Streaming call; the stream yields raw body chunks as they arrive.
    async fn stream(&self, req: UpstreamRequest<'_>) -> Result<ByteStream>;
}
