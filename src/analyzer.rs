use std::fmt;

use crate::{
    config::AnalysisConfig,
    error::{ProviderError, ProviderErrorKind},
    provider::{InferenceProvider, ProviderResponse},
    request::{AnalysisRequest, GenerateRequest},
    retry::{ErrorClass, Sleeper, ThreadSleeper},
    upload::UploadBatch,
};

/// Appended to every successful analysis.
pub const DISCLAIMER_SUFFIX: &str = "\n\n---\n**⚠️ AI DISCLAIMER:** *This analysis was generated \
automatically. It is not a diagnosis and does not replace the opinion of a radiologist.*";

/// Failure text when a batch contains no decodable image.
pub const NO_IMAGES_MESSAGE: &str = "no images provided";

/// Final result of one analysis, ready for display.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// Model text with [`DISCLAIMER_SUFFIX`] appended.
    Success(String),
    /// User-displayable reason.
    Failure(String),
}

impl AnalysisOutcome {
    /// `true` for [`AnalysisOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisOutcome::Success(_))
    }

    /// The text to show, whichever variant this is.
    pub fn as_str(&self) -> &str {
        match self {
            AnalysisOutcome::Success(text) | AnalysisOutcome::Failure(text) => text,
        }
    }

    /// Consumes the outcome, returning its text.
    pub fn into_string(self) -> String {
        match self {
            AnalysisOutcome::Success(text) | AnalysisOutcome::Failure(text) => text,
        }
    }
}

impl fmt::Display for AnalysisOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sends upload batches to an [`InferenceProvider`] and turns whatever comes
/// back into an [`AnalysisOutcome`].
///
/// Every call to [`analyze`](Self::analyze) is independent: nothing is cached
/// and the same batch submitted twice reaches the provider twice.
pub struct AnalysisRequester<'c, P, S = ThreadSleeper> {
    config: &'c AnalysisConfig,
    provider: P,
    sleeper: S,
}

impl<'c, P: InferenceProvider> AnalysisRequester<'c, P> {
    /// Creates a requester that sleeps on the calling thread between retries.
    ///
    /// # Arguments
    ///
    /// * `config` - Instructions, safety settings, generation parameters and
    ///   retry policy, shared for the requester's lifetime.
    /// * `provider` - The model backend to call.
    pub fn new(config: &'c AnalysisConfig, provider: P) -> Self {
        Self::with_sleeper(config, provider, ThreadSleeper)
    }
}

impl<'c, P: InferenceProvider, S: Sleeper> AnalysisRequester<'c, P, S> {
    /// Creates a requester with a custom [`Sleeper`] for the retry delay.
    pub fn with_sleeper(config: &'c AnalysisConfig, provider: P, sleeper: S) -> Self {
        Self {
            config,
            provider,
            sleeper,
        }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The sleeper used between attempts.
    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Analyses a batch, retrying transient failures per the configured
    /// policy. Never panics on provider failures; every error path ends in
    /// [`AnalysisOutcome::Failure`].
    pub fn analyze(&mut self, batch: &UploadBatch) -> AnalysisOutcome {
        if batch.is_empty() {
            log::warn!("Analysis requested without any decoded image");
            return AnalysisOutcome::Failure(NO_IMAGES_MESSAGE.to_string());
        }

        let outcome = self.run(batch);

        match &outcome {
            AnalysisOutcome::Success(_) => log::info!("Analysis completed"),
            AnalysisOutcome::Failure(message) => log::warn!("Analysis failed: {message}"),
        }
        outcome
    }

    fn run(&mut self, batch: &UploadBatch) -> AnalysisOutcome {
        let config = self.config;
        let policy = &config.retry;
        let attempts = policy.attempts();

        let content = AnalysisRequest::new(&config.instruction, batch);
        let request = GenerateRequest {
            system_instruction: &config.system_instruction,
            safety_settings: &config.safety_settings,
            generation: &config.generation,
            content: &content,
        };

        let mut last_error: Option<ProviderError> = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                log::debug!("Waiting {:?} before attempt {attempt}", policy.delay);
                self.sleeper.sleep(policy.delay);
            }
            log::debug!(
                "Attempt {attempt}/{attempts}: sending {} image(s) to {}",
                content.image_count(),
                config.model
            );

            match self.provider.generate(&request) {
                Ok(ProviderResponse::Text(text)) if !text.trim().is_empty() => {
                    return AnalysisOutcome::Success(format!("{}{DISCLAIMER_SUFFIX}", text.trim()));
                }
                Ok(ProviderResponse::Blocked(reason)) => {
                    return AnalysisOutcome::Failure(blocked_message(&reason));
                }
                Ok(_) => {
                    log::warn!("Attempt {attempt}/{attempts}: provider returned an empty response");
                    last_error = None;
                }
                Err(err) => match policy.classify(&err) {
                    ErrorClass::Terminal => {
                        log::error!("Attempt {attempt}/{attempts}: terminal provider error: {err}");
                        return AnalysisOutcome::Failure(terminal_message(config, &err));
                    }
                    ErrorClass::Transient => {
                        log::warn!("Attempt {attempt}/{attempts}: transient provider error: {err}");
                        last_error = Some(err);
                    }
                },
            }
        }

        match last_error {
            Some(err) if err.kind() == ProviderErrorKind::Unexpected => AnalysisOutcome::Failure(
                format!("❌ Unexpected error ({}): {}", err.kind(), err.message()),
            ),
            _ => AnalysisOutcome::Failure(format!(
                "❌ Unable to complete the analysis after {attempts} attempt(s)."
            )),
        }
    }
}

fn blocked_message(reason: &str) -> String {
    format!(
        "⚠️ Analysis blocked by the safety filters (reason: {reason}). \
         Medical images are sometimes filtered by mistake."
    )
}

fn terminal_message(config: &AnalysisConfig, err: &ProviderError) -> String {
    match err.kind() {
        ProviderErrorKind::Quota => "❌ Error: the API quota has been exceeded. Try again later.".to_string(),
        ProviderErrorKind::ModelNotFound => {
            format!("❌ Error: the model '{}' is not available.", config.model)
        }
        ProviderErrorKind::Authentication => {
            format!("❌ Error: the API key was rejected ({}).", err.message())
        }
        ProviderErrorKind::InvalidRequest => {
            format!("❌ Error: the request was rejected by the provider ({}).", err.message())
        }
        _ => format!("❌ Error: {err}"),
    }
}
