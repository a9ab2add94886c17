/// Per-provider request builders and reply extractors.
///
/// Provider payloads differ in message/content shape but always carry the
/// same four things: system instructions, task text, recent action history,
/// and the current image. Everything provider-specific stays behind this
/// trait; the rest of the client never touches raw JSON shapes.
use serde_json::json;

use crate::client::transport::HttpRequest;
use crate::config::{EndpointConfig, ProviderKind};
use crate::errors::{SeeTapError, SeeTapResult};

pub trait ProviderAdapter: Send + Sync {
    fn build_request(
        &self,
        endpoint: &EndpointConfig,
        image_b64: &str,
        system_prompt: &str,
        user_message: &str,
    ) -> HttpRequest;

    /// Pull the assistant's text out of a 2xx response body.
    fn extract_reply(&self, body: &str) -> SeeTapResult<String>;
}

pub fn adapter_for(kind: ProviderKind) -> &'static dyn ProviderAdapter {
    match kind {
        ProviderKind::Claude => &ClaudeMessages,
        ProviderKind::Gemini => &GeminiGenerate,
        // Zhipu, OpenAI, Qwen and custom endpoints all speak the
        // chat/completions dialect.
        _ => &OpenAiChat,
    }
}

const MAX_TOKENS: u32 = 1024;
const TEMPERATURE: f64 = 0.1;

pub struct OpenAiChat;

impl ProviderAdapter for OpenAiChat {
    fn build_request(
        &self,
        endpoint: &EndpointConfig,
        image_b64: &str,
        system_prompt: &str,
        user_message: &str,
    ) -> HttpRequest {
        let body = json!({
            "model": endpoint.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": system_prompt },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": user_message },
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:image/png;base64,{image_b64}") }
                        }
                    ]
                }
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        });
        HttpRequest {
            url: endpoint.endpoint_url(),
            headers: vec![
                ("Authorization".into(), format!("Bearer {}", endpoint.resolved_api_key())),
                ("Content-Type".into(), "application/json".into()),
            ],
            body,
        }
    }

    fn extract_reply(&self, body: &str) -> SeeTapResult<String> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| SeeTapError::Provider("reply has no message content".into()))
    }
}

pub struct ClaudeMessages;

impl ProviderAdapter for ClaudeMessages {
    fn build_request(
        &self,
        endpoint: &EndpointConfig,
        image_b64: &str,
        system_prompt: &str,
        user_message: &str,
    ) -> HttpRequest {
        let body = json!({
            "model": endpoint.model,
            "max_tokens": MAX_TOKENS,
            "stream": false,
            "system": system_prompt,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": "image/png",
                                "data": image_b64
                            }
                        },
                        { "type": "text", "text": user_message }
                    ]
                }
            ],
        });
        HttpRequest {
            url: endpoint.endpoint_url(),
            headers: vec![
                ("x-api-key".into(), endpoint.resolved_api_key()),
                ("anthropic-version".into(), "2023-06-01".into()),
                ("Content-Type".into(), "application/json".into()),
            ],
            body,
        }
    }

    fn extract_reply(&self, body: &str) -> SeeTapResult<String> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        value["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| SeeTapError::Provider("reply has no text content".into()))
    }
}

pub struct GeminiGenerate;

impl ProviderAdapter for GeminiGenerate {
    fn build_request(
        &self,
        endpoint: &EndpointConfig,
        image_b64: &str,
        system_prompt: &str,
        user_message: &str,
    ) -> HttpRequest {
        // Gemini has no system role in this API; prepend the instructions.
        let combined = format!("{system_prompt}\n\n{user_message}");
        let body = json!({
            "contents": [
                {
                    "parts": [
                        { "text": combined },
                        {
                            "inline_data": {
                                "mime_type": "image/png",
                                "data": image_b64
                            }
                        }
                    ]
                }
            ],
        });
        // Key travels as a query parameter, not a header.
        let url = format!("{}?key={}", endpoint.endpoint_url(), endpoint.resolved_api_key());
        HttpRequest {
            url,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body,
        }
    }

    fn extract_reply(&self, body: &str) -> SeeTapResult<String> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        value["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| SeeTapError::Provider("reply has no candidate text".into()))
    }
}
