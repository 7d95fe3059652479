// src/services/gemini_client.rs
use crate::config::GeminiSettings;
use crate::errors::VigilError;
use actix_web::ResponseError;
use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Status and raw body of one completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// One `generateContent` round trip. Connection-level failures map to
/// [`VigilError::Transient`].
#[async_trait]
pub trait GeminiTransport: Send + Sync {
    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        body: &Value,
    ) -> Result<TransportResponse, VigilError>;
}

pub struct HttpTransport {
    api_base: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl GeminiTransport for HttpTransport {
    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        body: &Value,
    ) -> Result<TransportResponse, VigilError> {
        let transient = |e: reqwest::Error| VigilError::Transient {
            status: 502,
            message: format!("Gemini request failed: {}", e.without_url()),
        };

        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.api_base, model))
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await
            .map_err(transient)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(transient)?;

        Ok(TransportResponse { status, body })
    }
}

pub struct GeminiClient {
    settings: GeminiSettings,
    transport: Arc<dyn GeminiTransport>,
}

impl GeminiClient {
    pub fn new(settings: GeminiSettings, transport: Arc<dyn GeminiTransport>) -> Self {
        Self {
            settings,
            transport,
        }
    }

    pub fn with_http(settings: GeminiSettings) -> Self {
        let transport = Arc::new(HttpTransport::new(settings.api_base.clone()));
        Self::new(settings, transport)
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    pub fn keys_configured(&self) -> usize {
        self.settings.api_keys.len()
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "maxOutputTokens": self.settings.max_output_tokens,
                "temperature": 0.2,
                "responseMimeType": "application/json"
            }
        })
    }

    /// Sends `prompt` and returns the model's raw text output.
    ///
    /// Attempt `i` uses key `i mod keys`. A 429 moves straight on to the next
    /// key, a 5xx or connection failure waits for the backoff first. Timeouts,
    /// 400, 401/403 and malformed envelopes are returned without retrying.
    pub async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, VigilError> {
        let keys = &self.settings.api_keys;
        if keys.is_empty() {
            return Err(VigilError::Configuration(
                "no Gemini API key configured".to_string(),
            ));
        }

        let body = self.request_body(prompt);
        let retries = self.settings.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..retries {
            let key_index = attempt as usize % keys.len();
            let has_next = attempt + 1 < retries;
            debug!(
                "Gemini attempt {}/{} with key #{}",
                attempt + 1,
                retries,
                key_index + 1
            );

            let call = tokio::time::timeout(
                self.settings.timeout,
                self.transport
                    .generate(&keys[key_index], &self.settings.model, &body),
            );

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(VigilError::Cancelled),
                outcome = call => outcome,
            };

            let response = match outcome {
                Err(_) => {
                    let timeout_ms = self.settings.timeout.as_millis() as u64;
                    error!("Gemini attempt {} timed out after {}ms", attempt + 1, timeout_ms);
                    return Err(VigilError::Timeout { timeout_ms });
                }
                Ok(Err(err @ VigilError::Transient { .. })) => {
                    warn!("Gemini attempt {} failed: {}", attempt + 1, err);
                    last_error = Some(err);
                    if has_next {
                        self.backoff(cancel).await?;
                    }
                    continue;
                }
                Ok(Err(err)) => return Err(err),
                Ok(Ok(response)) => response,
            };

            match response.status {
                200..=299 => return extract_text(&response.body),
                429 => {
                    let err = VigilError::RateLimited {
                        message: upstream_message(&response.body),
                    };
                    if keys.len() > 1 && has_next {
                        warn!(
                            "Gemini key #{} rate limited, switching key",
                            key_index + 1
                        );
                        last_error = Some(err);
                        continue;
                    }
                    error!("Gemini rate limit reached with no alternate key left");
                    return Err(err);
                }
                400 => {
                    return Err(VigilError::BadRequest {
                        message: upstream_message(&response.body),
                    });
                }
                401 | 403 => {
                    return Err(VigilError::Auth {
                        status: response.status,
                        message: upstream_message(&response.body),
                    });
                }
                status @ 500.. => {
                    let err = VigilError::Transient {
                        status,
                        message: upstream_message(&response.body),
                    };
                    warn!("Gemini attempt {} failed: {}", attempt + 1, err);
                    last_error = Some(err);
                    if has_next {
                        self.backoff(cancel).await?;
                    }
                }
                status => {
                    return Err(VigilError::Upstream {
                        status,
                        message: upstream_message(&response.body),
                    });
                }
            }
        }

        error!("Gemini retry budget of {} attempts exhausted", retries);
        Err(match last_error {
            Some(VigilError::Transient { status, message }) => {
                VigilError::UpstreamFailure { status, message }
            }
            Some(other) => VigilError::UpstreamFailure {
                status: other.status_code().as_u16(),
                message: other.to_string(),
            },
            None => VigilError::UpstreamFailure {
                status: 500,
                message: "no Gemini attempt completed".to_string(),
            },
        })
    }

    async fn backoff(&self, cancel: &CancellationToken) -> Result<(), VigilError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(VigilError::Cancelled),
            _ = tokio::time::sleep(self.settings.backoff) => Ok(()),
        }
    }
}

fn extract_text(body: &str) -> Result<String, VigilError> {
    let envelope: Value = serde_json::from_str(body)
        .map_err(|e| VigilError::BadGateway(format!("response is not JSON: {}", e)))?;

    envelope["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| VigilError::BadGateway("no text in Gemini response".to_string()))
}

/// Prefers Gemini's `error.message`, otherwise a bounded prefix of the body.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(300).collect())
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    pub enum Scripted {
        Reply(u16, String),
        Hang,
        ConnectionReset,
    }

    /// Replays scripted replies in order and records every call.
    pub struct ScriptedTransport {
        replies: Mutex<VecDeque<Scripted>>,
        calls: Mutex<Vec<(String, Instant, Value)>>,
        abandoned: AtomicUsize,
    }

    /// Counts a hanging call whose future was dropped before it finished.
    struct Abandoned<'a>(&'a AtomicUsize);

    impl Drop for Abandoned<'_> {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
                abandoned: AtomicUsize::new(0),
            })
        }

        pub fn keys_used(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(k, _, _)| k.clone()).collect()
        }

        pub fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, t, _)| *t).collect()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Hanging calls that were dropped mid-flight.
        pub fn abandoned_count(&self) -> usize {
            self.abandoned.load(Ordering::SeqCst)
        }

        pub fn last_body(&self) -> Option<Value> {
            self.calls.lock().unwrap().last().map(|(_, _, b)| b.clone())
        }
    }

    #[async_trait]
    impl GeminiTransport for ScriptedTransport {
        async fn generate(
            &self,
            api_key: &str,
            _model: &str,
            body: &Value,
        ) -> Result<TransportResponse, VigilError> {
            self.calls
                .lock()
                .unwrap()
                .push((api_key.to_string(), Instant::now(), body.clone()));
            let next = self.replies.lock().unwrap().pop_front();
            match next {
                Some(Scripted::Reply(status, body)) => Ok(TransportResponse { status, body }),
                Some(Scripted::Hang) => {
                    let _abandoned = Abandoned(&self.abandoned);
                    std::future::pending::<Result<TransportResponse, VigilError>>().await
                }
                Some(Scripted::ConnectionReset) => Err(VigilError::Transient {
                    status: 502,
                    message: "connection reset".to_string(),
                }),
                None => Ok(TransportResponse {
                    status: 500,
                    body: "script exhausted".to_string(),
                }),
            }
        }
    }

    /// A Gemini envelope wrapping `text`.
    pub fn envelope(text: &str) -> String {
        json!({
            "candidates": [{ "content": { "parts": [{ "text": text }], "role": "model" } }]
        })
        .to_string()
    }

    pub fn settings(keys: &[&str]) -> GeminiSettings {
        GeminiSettings {
            api_keys: keys.iter().map(|k| k.to_string()).collect(),
            ..GeminiSettings::default()
        }
    }
}
