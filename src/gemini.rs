//! Blocking client for the Gemini `generateContent` REST endpoint.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{
    StatusCode,
    blocking::{Client, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::{AnalysisConfig, GenerationParams, SafetySetting},
    error::{ProviderError, ProviderErrorKind},
    provider::{InferenceProvider, ProviderResponse},
    request::{ContentPart, GenerateRequest},
};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Finish reasons that mean the candidate was withheld by a content filter.
const BLOCKING_FINISH_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    system_instruction: WireContent<'a>,
    contents: [WireContent<'a>; 1],
    safety_settings: &'a [SafetySetting],
    generation_config: &'a GenerationParams,
}

#[derive(Serialize)]
struct WireContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WirePart<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: WireBlob,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob {
    mime_type: &'static str,
    data: String,
}

impl<'a> From<ContentPart<'a>> for WirePart<'a> {
    fn from(part: ContentPart<'a>) -> Self {
        match part {
            ContentPart::Text(text) => WirePart::Text { text },
            ContentPart::Image(item) => WirePart::InlineData {
                inline_data: WireBlob {
                    mime_type: item.mime_type(),
                    data: STANDARD.encode(item.bytes()),
                },
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_provider_response(self) -> ProviderResponse {
        let first = self.candidates.into_iter().next();

        let text: String = first
            .as_ref()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect()
            })
            .unwrap_or_default();
        if !text.trim().is_empty() {
            return ProviderResponse::Text(text);
        }

        if let Some(reason) = self.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            return ProviderResponse::Blocked(reason);
        }

        match first.and_then(|candidate| candidate.finish_reason) {
            Some(reason) if BLOCKING_FINISH_REASONS.contains(&reason.as_str()) => {
                ProviderResponse::Blocked(reason)
            }
            _ => ProviderResponse::Empty,
        }
    }
}

/// [`InferenceProvider`] backed by Google's Gemini API.
pub struct GeminiProvider {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    /// Builds the provider from the process configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Credential, model, endpoint and optional request timeout.
    ///
    /// # Returns
    ///
    /// A provider whose HTTP client uses `config.request_timeout` when set and
    /// reqwest's default timeout otherwise.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, ProviderError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Transport,
                format!("failed to build HTTP client: {e}"),
            )
        })?;
        Ok(Self::with_client(
            http,
            &config.api_key,
            &config.model,
            &config.base_url,
        ))
    }

    /// Wraps an already built HTTP client. Trailing slashes are stripped
    /// from `base_url`.
    pub fn with_client(http: Client, api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Model id the requests are sent to.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn read_response(response: Response) -> Result<ProviderResponse, ProviderError> {
        let status = response.status();
        let body = response.text().map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Transport,
                format!("failed to read response body: {e}"),
            )
        })?;

        if !status.is_success() {
            log::warn!("Gemini answered HTTP {status}: {body}");
            return Err(classify_http_error(status, &body));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Unexpected,
                format!("failed to parse response: {e}"),
            )
        })?;
        Ok(parsed.into_provider_response())
    }
}

impl InferenceProvider for GeminiProvider {
    fn generate(&mut self, request: &GenerateRequest<'_>) -> Result<ProviderResponse, ProviderError> {
        let body = GenerateContentBody {
            system_instruction: WireContent {
                role: None,
                parts: vec![WirePart::Text {
                    text: request.system_instruction,
                }],
            },
            contents: [WireContent {
                role: Some("user"),
                parts: request.content.parts().map(WirePart::from).collect(),
            }],
            safety_settings: request.safety_settings,
            generation_config: request.generation,
        };

        log::debug!(
            "POST generateContent for {} with {} image(s)",
            self.model,
            request.content.image_count()
        );

        let response = self
            .http
            .post(self.endpoint())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                ProviderError::new(ProviderErrorKind::Transport, format!("network error: {e}"))
            })?;

        Self::read_response(response)
    }
}

/// Maps a non-success HTTP answer to a provider error.
///
/// Understands the `{"error": {"code", "message", "status"}}` body Gemini
/// returns and falls back to the raw body otherwise.
fn classify_http_error(status: StatusCode, body: &str) -> ProviderError {
    let json = serde_json::from_str::<Value>(body).ok();
    let error = json.as_ref().and_then(|json| json.get("error"));
    let api_status = error
        .and_then(|e| e.get("status"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let message = error
        .and_then(|e| e.get("message").or_else(|| e.get("status")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());

    let kind = if status == StatusCode::TOO_MANY_REQUESTS
        || api_status == "RESOURCE_EXHAUSTED"
        || body.to_lowercase().contains("quota")
    {
        ProviderErrorKind::Quota
    } else if status == StatusCode::NOT_FOUND || api_status == "NOT_FOUND" {
        ProviderErrorKind::ModelNotFound
    } else if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || api_status == "PERMISSION_DENIED"
        || api_status == "UNAUTHENTICATED"
    {
        ProviderErrorKind::Authentication
    } else if status == StatusCode::BAD_REQUEST {
        ProviderErrorKind::InvalidRequest
    } else {
        ProviderErrorKind::Api
    };

    ProviderError::new(kind, message).with_status(status.as_u16())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use image::ImageFormat;
    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::*;
    use crate::{
        request::AnalysisRequest,
        upload::{RawUpload, UploadBatch, collect_uploads, encoded_image},
    };

    const PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

    fn provider(server: &Server) -> (AnalysisConfig, GeminiProvider) {
        let mut config = AnalysisConfig::new("test-key");
        config.base_url = server.url();
        let provider = GeminiProvider::from_config(&config).unwrap();
        (config, provider)
    }

    fn batch() -> UploadBatch {
        collect_uploads([RawUpload::new("chest.png", encoded_image(ImageFormat::Png))]).0
    }

    fn call(
        config: &AnalysisConfig,
        provider: &mut GeminiProvider,
    ) -> Result<ProviderResponse, ProviderError> {
        let batch = batch();
        let content = AnalysisRequest::new(&config.instruction, &batch);
        provider.generate(&GenerateRequest {
            system_instruction: &config.system_instruction,
            safety_settings: &config.safety_settings,
            generation: &config.generation,
            content: &content,
        })
    }

    #[test]
    fn sends_instruction_images_and_settings() {
        let mut server = Server::new();
        let (config, mut provider) = provider(&server);
        let png = STANDARD.encode(encoded_image(ImageFormat::Png));
        let mock = server
            .mock("POST", PATH)
            .match_header(API_KEY_HEADER, "test-key")
            .match_body(Matcher::PartialJson(json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "text": config.instruction },
                        { "inlineData": { "mimeType": "image/png", "data": png } }
                    ]
                }],
                "systemInstruction": { "parts": [{ "text": config.system_instruction }] },
                "safetySettings": [
                    { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_ONLY_HIGH" },
                    { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_ONLY_HIGH" },
                    { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_ONLY_HIGH" },
                    { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_ONLY_HIGH" }
                ],
                "generationConfig": { "topK": 32, "maxOutputTokens": 4096 }
            })))
            .with_status(200)
            .with_body(
                json!({
                    "candidates": [{
                        "content": { "role": "model", "parts": [{ "text": "Left " }, { "text": "wrist." }] },
                        "finishReason": "STOP"
                    }]
                })
                .to_string(),
            )
            .create();

        let response = call(&config, &mut provider).unwrap();

        mock.assert();
        assert_eq!(response, ProviderResponse::Text("Left wrist.".to_string()));
    }

    #[test]
    fn prompt_feedback_block_is_reported() {
        let mut server = Server::new();
        let (config, mut provider) = provider(&server);
        let _mock = server
            .mock("POST", PATH)
            .with_status(200)
            .with_body(r#"{"promptFeedback":{"blockReason":"OTHER"}}"#)
            .create();

        let response = call(&config, &mut provider).unwrap();

        assert_eq!(response, ProviderResponse::Blocked("OTHER".to_string()));
    }

    #[test]
    fn safety_finish_without_text_is_a_block() {
        let mut server = Server::new();
        let (config, mut provider) = provider(&server);
        let _mock = server
            .mock("POST", PATH)
            .with_status(200)
            .with_body(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#)
            .create();

        let response = call(&config, &mut provider).unwrap();

        assert_eq!(response, ProviderResponse::Blocked("SAFETY".to_string()));
    }

    #[test]
    fn no_candidates_is_empty() {
        let mut server = Server::new();
        let (config, mut provider) = provider(&server);
        let _mock = server.mock("POST", PATH).with_status(200).with_body("{}").create();

        assert_eq!(call(&config, &mut provider).unwrap(), ProviderResponse::Empty);
    }

    #[test]
    fn garbage_body_is_unexpected() {
        let mut server = Server::new();
        let (config, mut provider) = provider(&server);
        let _mock = server.mock("POST", PATH).with_status(200).with_body("<html>").create();

        let err = call(&config, &mut provider).unwrap_err();

        assert_eq!(err.kind(), ProviderErrorKind::Unexpected);
    }

    #[test]
    fn resource_exhausted_is_quota() {
        let mut server = Server::new();
        let (config, mut provider) = provider(&server);
        let _mock = server
            .mock("POST", PATH)
            .with_status(429)
            .with_body(
                r#"{"error":{"code":429,"message":"You exceeded your current quota.","status":"RESOURCE_EXHAUSTED"}}"#,
            )
            .create();

        let err = call(&config, &mut provider).unwrap_err();

        assert_eq!(err.kind(), ProviderErrorKind::Quota);
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.message(), "You exceeded your current quota.");
    }

    #[test]
    fn server_error_is_generic_api_error() {
        let mut server = Server::new();
        let (config, mut provider) = provider(&server);
        let _mock = server
            .mock("POST", PATH)
            .with_status(503)
            .with_body(r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#)
            .create();

        let err = call(&config, &mut provider).unwrap_err();

        assert_eq!(err.kind(), ProviderErrorKind::Api);
    }

    #[test]
    fn http_status_mapping() {
        let cases = [
            (StatusCode::NOT_FOUND, r#"{"error":{"status":"NOT_FOUND"}}"#, ProviderErrorKind::ModelNotFound),
            (StatusCode::FORBIDDEN, "denied", ProviderErrorKind::Authentication),
            (StatusCode::BAD_REQUEST, "API key not valid", ProviderErrorKind::InvalidRequest),
            (StatusCode::BAD_REQUEST, "Quota exceeded for metric", ProviderErrorKind::Quota),
            (StatusCode::INTERNAL_SERVER_ERROR, "", ProviderErrorKind::Api),
        ];
        for (status, body, kind) in cases {
            assert_eq!(classify_http_error(status, body).kind(), kind, "{status} {body}");
        }
    }

    #[test]
    fn unreachable_host_is_transport() {
        let mut config = AnalysisConfig::new("test-key");
        config.base_url = "http://127.0.0.1:9".to_string();
        let mut provider = GeminiProvider::from_config(&config).unwrap();

        let err = call(&config, &mut provider).unwrap_err();

        assert_eq!(err.kind(), ProviderErrorKind::Transport);
    }

    /// Accepts connections on a local port and never answers them.
    fn stalled_listener() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                held.push(stream);
            }
        });
        url
    }

    /// Runs one call against a server that never answers and reports how it
    /// ended, or `None` if it is still blocked after `wait`.
    fn call_stalled(mut config: AnalysisConfig, wait: Duration) -> Option<ProviderError> {
        config.base_url = stalled_listener();
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let mut provider = GeminiProvider::from_config(&config).unwrap();
            let _ = tx.send(call(&config, &mut provider));
        });
        rx.recv_timeout(wait).ok().map(|result| result.unwrap_err())
    }

    #[test]
    fn configured_timeout_ends_a_stalled_call() {
        let mut config = AnalysisConfig::new("test-key");
        config.request_timeout = Some(Duration::from_millis(200));

        let err = call_stalled(config, Duration::from_secs(10)).expect("call never returned");

        assert_eq!(err.kind(), ProviderErrorKind::Transport);
    }

    #[test]
    fn default_config_keeps_the_transport_timeout() {
        let config = AnalysisConfig::new("test-key");
        assert!(config.request_timeout.is_none());

        let err = call_stalled(config, Duration::from_secs(60)).expect("call never returned");

        assert_eq!(err.kind(), ProviderErrorKind::Transport);
    }
}
