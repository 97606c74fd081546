use std::{fmt, time::Duration};

use serde::Serialize;

use crate::{
    error::ConfigError,
    retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy},
};

/// Environment variable holding the Gemini API key. Required.
pub const API_KEY_VAR: &str = "GEMINI_API_KEY";
/// Overrides [`DEFAULT_MODEL`].
pub const MODEL_VAR: &str = "GEMINI_MODEL";
/// Overrides [`DEFAULT_BASE_URL`].
pub const BASE_URL_VAR: &str = "GEMINI_BASE_URL";
/// Total attempts per analysis, a positive integer.
pub const MAX_RETRIES_VAR: &str = "ANALYSIS_MAX_RETRIES";
/// Delay between attempts, in milliseconds.
pub const RETRY_DELAY_MS_VAR: &str = "ANALYSIS_RETRY_DELAY_MS";
/// Language the model is asked to answer in.
pub const LANGUAGE_VAR: &str = "ANALYSIS_LANGUAGE";

/// Model used when [`MODEL_VAR`] is unset.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
/// Public Gemini endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// Answer language when [`LANGUAGE_VAR`] is unset.
pub const DEFAULT_LANGUAGE: &str = "Italian";

/// Harm categories understood by the provider's safety filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
}

/// Minimum probability at which the safety filter withholds content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockThreshold {
    /// Never block.
    BlockNone,
    /// Block only high-probability content.
    BlockOnlyHigh,
    /// Block medium and high probability.
    BlockMediumAndAbove,
    /// Block anything from low probability up.
    BlockLowAndAbove,
}

/// Threshold for one harm category, serialised as sent on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: BlockThreshold,
}

/// Medical images trip the default filters, so every category is relaxed to
/// block only high-probability content.
pub fn relaxed_safety_settings() -> Vec<SafetySetting> {
    [
        HarmCategory::Harassment,
        HarmCategory::HateSpeech,
        HarmCategory::SexuallyExplicit,
        HarmCategory::DangerousContent,
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: BlockThreshold::BlockOnlyHigh,
    })
    .collect()
}

/// Sampling parameters sent with every request.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.4,
            top_p: 0.95,
            top_k: 32,
            max_output_tokens: 4096,
        }
    }
}

/// Role and safety framing given to the model as its system instruction.
pub fn system_instruction_for(language: &str) -> String {
    format!(
        "You are an AI assistant specialised in biomedical imaging. Your task is to analyse \
         the radiograph images you are given.\n\
         ALWAYS ANSWER IN {language}.\n\n\
         Guidelines:\n\
         1. Identify the visible anatomical region.\n\
         2. Describe in a structured way any visible anomalies, fractures, opacities or points of interest.\n\
         3. If the image is unclear or is not a radiograph, say so plainly.\n\
         4. Keep a professional but cautious tone.\n\n\
         IMPORTANT: never give a definitive diagnosis. Always end by recommending a radiologist."
    )
}

/// Lead-in placed before the images of every request.
pub fn instruction_for(language: &str) -> String {
    format!(
        "Analyse these radiograph images in detail, one by one or together when they belong \
         to the same study. Write the analysis in {language}."
    )
}

/// Process-wide settings for the analysis workflow.
///
/// Built once at startup and lent to the requester; nothing in the crate
/// mutates it afterwards.
#[derive(Clone)]
pub struct AnalysisConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub response_language: String,
    pub system_instruction: String,
    pub instruction: String,
    pub safety_settings: Vec<SafetySetting>,
    pub generation: GenerationParams,
    pub retry: RetryPolicy,
    /// Per-request HTTP timeout. `None` keeps the HTTP client's own default.
    pub request_timeout: Option<Duration>,
}

impl AnalysisConfig {
    /// Creates a configuration with every default and the given key.
    ///
    /// # Arguments
    ///
    /// * `api_key` - The Gemini API key.
    ///
    /// # Returns
    ///
    /// A configuration answering in [`DEFAULT_LANGUAGE`] with the default
    /// model, endpoint, safety settings and retry policy.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_language(api_key, DEFAULT_LANGUAGE)
    }

    /// Like [`new`](Self::new), with both instructions asking for answers
    /// in `language`.
    pub fn with_language(api_key: impl Into<String>, language: &str) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            response_language: language.to_string(),
            system_instruction: system_instruction_for(language),
            instruction: instruction_for(language),
            safety_settings: relaxed_safety_settings(),
            generation: GenerationParams::default(),
            retry: RetryPolicy::default(),
            request_timeout: None,
        }
    }

    /// Loads `.env` when present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => log::debug!("Loaded environment from {}", path.display()),
            Err(e) => log::debug!("No .env file loaded: {e}"),
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_key = read(API_KEY_VAR).ok_or(ConfigError::MissingCredential(API_KEY_VAR))?;
        let language = read(LANGUAGE_VAR).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
        let mut config = Self::with_language(api_key, &language);

        if let Some(model) = read(MODEL_VAR) {
            config.model = model;
        }
        if let Some(base_url) = read(BASE_URL_VAR) {
            config.base_url = base_url;
        }

        let max_attempts = match read(MAX_RETRIES_VAR) {
            Some(value) => parse_positive(MAX_RETRIES_VAR, value)?,
            None => DEFAULT_MAX_ATTEMPTS,
        };
        let delay = match read(RETRY_DELAY_MS_VAR) {
            Some(value) => Duration::from_millis(value.parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue {
                    name: RETRY_DELAY_MS_VAR,
                    value,
                }
            })?),
            None => config.retry.delay,
        };
        config.retry = RetryPolicy::new(max_attempts, delay);

        log::info!(
            "Using model {} with {} attempt(s), {:?} apart",
            config.model,
            config.retry.attempts(),
            config.retry.delay
        );
        Ok(config)
    }
}

fn parse_positive(name: &'static str, value: String) -> Result<u32, ConfigError> {
    match value.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue { name, value }),
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("response_language", &self.response_language)
            .field("safety_settings", &self.safety_settings)
            .field("generation", &self.generation)
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
