// src/services/analysis_service.rs
use crate::errors::VigilError;
use crate::models::{AnalysisResult, DetectionInput};
use crate::services::gemini_client::GeminiClient;
use crate::services::prompt_builder::build_prompt;
use crate::services::report::{normalize, synthesize_fallback};
use log::{info, warn};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct AnalysisService {
    client: GeminiClient,
    fallback_enabled: bool,
}

impl AnalysisService {
    pub fn new(client: GeminiClient, fallback_enabled: bool) -> Self {
        Self {
            client,
            fallback_enabled,
        }
    }

    pub fn client(&self) -> &GeminiClient {
        &self.client
    }

    /// Runs one detection payload through Gemini.
    ///
    /// Only an exhausted retry budget is replaced by the local fallback report,
    /// and only when fallback is enabled.
    pub async fn analyze(
        &self,
        input: &DetectionInput,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, VigilError> {
        let start = Instant::now();
        let prompt = build_prompt(input);

        match self.client.generate(&prompt, cancel).await {
            Ok(raw) => {
                let result = normalize(&raw, input)?;
                info!(
                    "Gemini analysis completed in {}ms (risk {} {:?})",
                    start.elapsed().as_millis(),
                    result.risk_score,
                    result.risk_level
                );
                Ok(result)
            }
            Err(err @ VigilError::UpstreamFailure { .. }) if self.fallback_enabled => {
                warn!("Using fallback report: {}", err);
                Ok(synthesize_fallback(input))
            }
            Err(err) => Err(err),
        }
    }
}
