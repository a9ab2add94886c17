//! Resilient multi-provider model client.
//!
//! Answers "given this screenshot and task history, what should happen next"
//! while hiding provider heterogeneity and transient failure: per-endpoint
//! retry with exponential backoff, fatal-error classification, failover
//! across configured endpoints, and a per-endpoint failure cooldown.

pub mod adapter;
pub mod prompt;
pub mod transport;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::Engine as _;
use rand::seq::SliceRandom;

use crate::config::{EndpointConfig, RetryConfig};
use crate::errors::{SeeTapError, SeeTapResult};
use crate::model::action::AIResponse;
use crate::model::coords::ScreenSize;
use crate::parser::parse_response;

/// A failed endpoint is skipped for this long after its last failure.
const FAILURE_COOLDOWN: Duration = Duration::from_secs(60);

pub struct ResilientClient {
    endpoints: Vec<EndpointConfig>,
    retry: RetryConfig,
    transport: Arc<dyn transport::Transport>,
    /// Last failure per endpoint id. Single-writer: only `analyze` touches it.
    failed: Mutex<HashMap<String, Instant>>,
    /// Message of the most recent endpoint failure, surfaced when every
    /// candidate is cooling down so callers can still classify the root cause.
    last_failure: Mutex<Option<String>>,
}

impl ResilientClient {
    pub fn new(
        endpoints: Vec<EndpointConfig>,
        retry: RetryConfig,
        transport: Arc<dyn transport::Transport>,
    ) -> Self {
        Self {
            endpoints,
            retry,
            transport,
            failed: Mutex::new(HashMap::new()),
            last_failure: Mutex::new(None),
        }
    }

    /// One analysis call: pick candidates, try each with retries, fail over.
    pub async fn analyze(
        &self,
        screenshot_png: &[u8],
        task: &str,
        history: &[String],
        screen: &ScreenSize,
    ) -> SeeTapResult<AIResponse> {
        if !self.endpoints.iter().any(|e| e.enabled) {
            return Err(SeeTapError::Config(
                "no enabled model endpoints configured".into(),
            ));
        }

        let candidates = self.available_endpoints();
        if candidates.is_empty() {
            let last = self
                .last_failure
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "unknown".into());
            return Err(SeeTapError::Provider(format!(
                "all endpoints in cooldown; last error: {last}"
            )));
        }

        let image_b64 = base64::engine::general_purpose::STANDARD.encode(screenshot_png);
        let system = prompt::system_prompt();
        let user = prompt::user_message(task, history);

        let mut last_err: Option<SeeTapError> = None;
        for endpoint in candidates {
            tracing::debug!(
                endpoint = %endpoint.name,
                provider = endpoint.provider.display_name(),
                "trying endpoint"
            );
            match self
                .call_with_retry(&endpoint, &image_b64, &system, &user, screen)
                .await
            {
                Ok(response) => {
                    // One success fully rehabilitates the endpoint.
                    self.failed.lock().unwrap().remove(&endpoint.id);
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint.name, error = %e, "endpoint failed");
                    self.failed
                        .lock()
                        .unwrap()
                        .insert(endpoint.id.clone(), Instant::now());
                    *self.last_failure.lock().unwrap() = Some(e.to_string());
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| SeeTapError::Provider("all endpoints failed".into())))
    }

    /// Enabled endpoints outside their cooldown window, priority tiers in
    /// descending order, shuffled within each tier to spread load without
    /// starving lower tiers.
    fn available_endpoints(&self) -> Vec<EndpointConfig> {
        let failed = self.failed.lock().unwrap();
        let now = Instant::now();
        let mut candidates: Vec<EndpointConfig> = self
            .endpoints
            .iter()
            .filter(|e| e.enabled)
            .filter(|e| {
                failed
                    .get(&e.id)
                    .map(|at| now.duration_since(*at) > FAILURE_COOLDOWN)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        drop(failed);

        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
        let mut rng = rand::thread_rng();
        let mut i = 0;
        while i < candidates.len() {
            let tier = candidates[i].priority;
            let end = candidates[i..]
                .iter()
                .position(|e| e.priority != tier)
                .map(|p| i + p)
                .unwrap_or(candidates.len());
            candidates[i..end].shuffle(&mut rng);
            i = end;
        }
        candidates
    }

    async fn call_with_retry(
        &self,
        endpoint: &EndpointConfig,
        image_b64: &str,
        system: &str,
        user: &str,
        screen: &ScreenSize,
    ) -> SeeTapResult<AIResponse> {
        let mut delay_ms = self.retry.initial_delay_ms;
        let mut last_err: Option<SeeTapError> = None;

        for attempt in 0..self.retry.max_retries {
            tracing::debug!(
                endpoint = %endpoint.name,
                attempt = attempt + 1,
                max = self.retry.max_retries,
                "calling endpoint"
            );
            match self.call_endpoint(endpoint, image_b64, system, user, screen).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !is_retryable_error(&e) {
                        return Err(e);
                    }
                    last_err = Some(e);
                    if attempt + 1 < self.retry.max_retries {
                        tracing::debug!(delay_ms, "backing off before retry");
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = ((delay_ms as f64 * self.retry.multiplier) as u64)
                            .min(self.retry.max_delay_ms);
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| SeeTapError::Provider("endpoint call failed".into())))
    }

    async fn call_endpoint(
        &self,
        endpoint: &EndpointConfig,
        image_b64: &str,
        system: &str,
        user: &str,
        screen: &ScreenSize,
    ) -> SeeTapResult<AIResponse> {
        let adapter = adapter::adapter_for(endpoint.provider);
        let request = adapter.build_request(endpoint, image_b64, system, user);
        let response = self.transport.send(request).await?;

        if !response.is_success() {
            return Err(SeeTapError::Provider(parse_error_message(
                &response.body,
                response.status,
            )));
        }

        let reply = adapter.extract_reply(&response.body)?;
        parse_response(&reply, screen)
    }
}

/// Human-readable provider error, keeping the status code visible so the
/// retry classifier can key off it.
fn parse_error_message(body: &str, status: u16) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| body.to_string());
    format!("API error ({status}): {detail}")
}

/// Account-level problems that will not resolve by retrying: exhausted
/// balance or quota, rejected credentials, suspended accounts.
pub fn is_fatal_error(err: &SeeTapError) -> bool {
    let message = err.to_string().to_lowercase();
    let account_dead = message.contains("account")
        && (message.contains("disabled")
            || message.contains("suspended")
            || message.contains("banned"));
    message.contains("insufficient")
        || message.contains("quota")
        || message.contains("balance")
        || message.contains("credit")
        || message.contains("billing")
        || message.contains("401")
        || message.contains("403")
        || message.contains("unauthorized")
        || message.contains("forbidden")
        || message.contains("invalid api key")
        || message.contains("invalid_api_key")
        || message.contains("authentication")
        || account_dead
}

/// Transient failures worth retrying. Parse/JSON errors count: truncated
/// model output is usually a one-off.
pub fn is_retryable_error(err: &SeeTapError) -> bool {
    if is_fatal_error(err) {
        return false;
    }
    if matches!(err, SeeTapError::Parse(_) | SeeTapError::Json(_)) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    message.contains("timeout")
        || message.contains("timed out")
        || message.contains("connection")
        || message.contains("socket")
        || message.contains("500")
        || message.contains("502")
        || message.contains("503")
        || message.contains("504")
        || message.contains("429")
        || message.contains("rate limit")
        || message.contains("parse")
}

#[cfg(test)]
mod tests {
    use super::transport::{HttpRequest, HttpResponse, Transport};
    use super::*;
    use crate::config::ProviderKind;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    const SCREEN: ScreenSize = ScreenSize { width: 1080, height: 2400 };

    fn endpoint(id: &str, url: &str, priority: i32) -> EndpointConfig {
        EndpointConfig {
            id: id.into(),
            name: id.into(),
            provider: ProviderKind::OpenAiCompatible,
            model: "m".into(),
            api_key: "k".into(),
            endpoint: Some(url.into()),
            enabled: true,
            priority,
        }
    }

    fn ok_reply() -> HttpResponse {
        HttpResponse {
            status: 200,
            body: r#"{"choices":[{"message":{"content":"<act>do(action=\"Back\")</act>"}}]}"#
                .into(),
        }
    }

    fn fatal_reply() -> HttpResponse {
        HttpResponse {
            status: 401,
            body: r#"{"error":{"message":"invalid api key"}}"#.into(),
        }
    }

    fn busy_reply() -> HttpResponse {
        HttpResponse { status: 503, body: "service unavailable".into() }
    }

    /// Scripted transport: pops one canned response per call to a URL and
    /// records every URL hit.
    struct Scripted {
        responses: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(script: Vec<(&str, Vec<HttpResponse>)>) -> Self {
            let responses = script
                .into_iter()
                .map(|(url, rs)| (url.to_string(), rs.into_iter().collect()))
                .collect();
            Self { responses: Mutex::new(responses), calls: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: HttpRequest) -> SeeTapResult<HttpResponse> {
            self.calls.lock().unwrap().push(request.url.clone());
            let mut responses = self.responses.lock().unwrap();
            let queue = responses
                .get_mut(&request.url)
                .unwrap_or_else(|| panic!("unscripted url {}", request.url));
            Ok(queue.pop_front().expect("script exhausted"))
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig { max_retries: 3, initial_delay_ms: 1, max_delay_ms: 4, multiplier: 2.0 }
    }

    #[tokio::test]
    async fn fatal_endpoints_fail_over_and_cool_down() {
        let transport = Arc::new(Scripted::new(vec![
            ("http://a", vec![fatal_reply()]),
            ("http://b", vec![fatal_reply()]),
            ("http://c", vec![ok_reply(), ok_reply()]),
        ]));
        // Distinct priorities keep the visit order deterministic.
        let client = ResilientClient::new(
            vec![
                endpoint("a", "http://a", 3),
                endpoint("b", "http://b", 2),
                endpoint("c", "http://c", 1),
            ],
            fast_retry(),
            transport.clone(),
        );

        let resp = client.analyze(b"png", "task", &[], &SCREEN).await.unwrap();
        assert_eq!(resp.actions.len(), 1);
        // Fatal errors are not retried: exactly one call each to a and b.
        assert_eq!(transport.calls(), vec!["http://a", "http://b", "http://c"]);

        // Within the cooldown window only c is a candidate.
        client.analyze(b"png", "task", &[], &SCREEN).await.unwrap();
        assert_eq!(
            transport.calls(),
            vec!["http://a", "http://b", "http://c", "http://c"]
        );
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_then_fail_over() {
        let transport = Arc::new(Scripted::new(vec![
            ("http://a", vec![busy_reply(), busy_reply(), busy_reply()]),
            ("http://b", vec![ok_reply()]),
        ]));
        let client = ResilientClient::new(
            vec![endpoint("a", "http://a", 1), endpoint("b", "http://b", 0)],
            fast_retry(),
            transport.clone(),
        );

        client.analyze(b"png", "task", &[], &SCREEN).await.unwrap();
        // Three attempts against a, then failover to b.
        assert_eq!(
            transport.calls(),
            vec!["http://a", "http://a", "http://a", "http://b"]
        );
    }

    #[tokio::test]
    async fn success_clears_the_failure_record() {
        let transport = Arc::new(Scripted::new(vec![(
            "http://a",
            vec![busy_reply(), ok_reply(), ok_reply()],
        )]));
        let client = ResilientClient::new(
            vec![endpoint("a", "http://a", 0)],
            RetryConfig { max_retries: 2, ..fast_retry() },
            transport.clone(),
        );

        client.analyze(b"png", "task", &[], &SCREEN).await.unwrap();
        assert!(client.failed.lock().unwrap().is_empty());

        client.analyze(b"png", "task", &[], &SCREEN).await.unwrap();
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn no_enabled_endpoints_is_a_config_error() {
        let transport = Arc::new(Scripted::new(vec![]));
        let mut ep = endpoint("a", "http://a", 0);
        ep.enabled = false;
        let client = ResilientClient::new(vec![ep], fast_retry(), transport);
        let err = client.analyze(b"png", "task", &[], &SCREEN).await.unwrap_err();
        assert!(matches!(err, SeeTapError::Config(_)));
    }

    #[tokio::test]
    async fn cooldown_exhaustion_keeps_the_root_cause_classifiable() {
        let transport = Arc::new(Scripted::new(vec![("http://a", vec![fatal_reply()])]));
        let client =
            ResilientClient::new(vec![endpoint("a", "http://a", 0)], fast_retry(), transport);

        let first = client.analyze(b"png", "task", &[], &SCREEN).await.unwrap_err();
        assert!(is_fatal_error(&first));

        // The endpoint is cooling down now; the surfaced error still reads
        // as fatal so the executor's streak counter keeps counting.
        let second = client.analyze(b"png", "task", &[], &SCREEN).await.unwrap_err();
        assert!(matches!(second, SeeTapError::Provider(_)));
        assert!(second.to_string().contains("cooldown"));
        assert!(is_fatal_error(&second));
    }

    #[tokio::test]
    async fn exhausted_candidates_surface_the_last_error() {
        let transport = Arc::new(Scripted::new(vec![("http://a", vec![fatal_reply()])]));
        let client =
            ResilientClient::new(vec![endpoint("a", "http://a", 0)], fast_retry(), transport);
        let err = client.analyze(b"png", "task", &[], &SCREEN).await.unwrap_err();
        assert!(err.to_string().contains("invalid api key"));
        assert!(is_fatal_error(&err));
    }

    #[test]
    fn classification_matches_the_taxonomy() {
        let fatal = SeeTapError::Provider("API error (401): invalid api key".into());
        assert!(is_fatal_error(&fatal));
        assert!(!is_retryable_error(&fatal));

        let busy = SeeTapError::Provider("API error (503): service unavailable".into());
        assert!(!is_fatal_error(&busy));
        assert!(is_retryable_error(&busy));

        let quota = SeeTapError::Provider("insufficient balance".into());
        assert!(is_fatal_error(&quota));

        let parse = SeeTapError::Parse("no recoverable action".into());
        assert!(is_retryable_error(&parse));
    }

    #[test]
    fn priority_tiers_are_visited_in_descending_order() {
        let transport: Arc<dyn Transport> = Arc::new(Scripted::new(vec![]));
        let client = ResilientClient::new(
            vec![
                endpoint("low", "http://low", 0),
                endpoint("high", "http://high", 9),
                endpoint("mid", "http://mid", 5),
            ],
            fast_retry(),
            transport,
        );
        let order: Vec<i32> = client.available_endpoints().iter().map(|e| e.priority).collect();
        assert_eq!(order, vec![9, 5, 0]);
    }
}
