use async_trait::async_trait;
use serde::Serialize;

use super::{ReasoningError, ReasoningRequest, ReasoningResponse, ReasoningService};

/// Reasoning service reached over HTTP.
///
/// Posts `{model, messages, tools, tool_choice}` to the configured endpoint
/// and expects a [`ReasoningResponse`] body back. A provider gateway is
/// responsible for translating to a specific model vendor.
#[derive(Debug, Clone)]
pub struct HttpReasoningService {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a ReasoningRequest,
}

impl HttpReasoningService {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout_ms: u64,
    ) -> Result<Self, ReasoningError> {
        let endpoint = endpoint.into();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ReasoningError::Configuration(format!(
                "endpoint must start with http:// or https://, got '{endpoint}'"
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| ReasoningError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            endpoint,
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningService {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &ReasoningRequest,
    ) -> Result<ReasoningResponse, ReasoningError> {
        let mut builder = self.http.post(&self.endpoint).json(&WireRequest {
            model: &self.model,
            request,
        });
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ReasoningError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ReasoningResponse>()
            .await
            .map_err(|e| ReasoningError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::{ToolChoice, TranscriptMessage};

    #[test]
    fn test_rejects_non_http_endpoint() {
        let err = HttpReasoningService::new("ftp://models", None, "m", 1000).unwrap_err();
        assert!(matches!(err, ReasoningError::Configuration(_)));
    }

    #[test]
    fn test_wire_request_flattens_model() {
        let request = ReasoningRequest {
            messages: vec![TranscriptMessage::user("hello")],
            tools: vec![],
            tool_choice: ToolChoice::Auto,
        };
        let wire = serde_json::to_value(WireRequest {
            model: "gateway-default",
            request: &request,
        })
        .unwrap();
        assert_eq!(wire["model"], "gateway-default");
        assert_eq!(wire["tool_choice"], "auto");
        assert_eq!(wire["messages"][0]["role"], "user");
    }
}
