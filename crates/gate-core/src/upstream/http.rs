use super::{HttpClient, RequestContext, UpstreamError, UpstreamTransport};
use crate::types::{JsonRpcRequest, RpcPayload};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

/// Stateless transport: one POST per call to the backend's `url`.
pub struct HttpTransport {
    context: RequestContext,
    client: HttpClient,
}

impl HttpTransport {
    #[must_use]
    pub fn new(context: RequestContext, client: HttpClient) -> Self {
        Self { context, client }
    }
}

#[async_trait]
impl UpstreamTransport for HttpTransport {
    fn context(&self) -> &RequestContext {
        &self.context
    }

    async fn send_upstream(&self, request: &RpcPayload<JsonRpcRequest>) -> Result<Value, UpstreamError> {
        if request.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }

        let backend = self.context.backend();
        let body = Bytes::from(serde_json::to_vec(request)?);
        let bytes = self.client.post_json(&backend.url, body, backend.timeout()).await?;

        serde_json::from_slice(&bytes).map_err(|e| {
            tracing::debug!(chain = %backend.chain, error = %e, "unparseable upstream response");
            UpstreamError::InvalidResponse(e.to_string())
        })
    }
}
